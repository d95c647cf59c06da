//! Background work: periodic reconciliation and on-demand checks.

use crate::{
    error::{LeaseError, RelayError},
    reconcile::{ReconcileReport, Scanner},
    sequencer::Sequencer,
    submission::{SubmitOutcome, Submitter},
    types::FundingStatus,
};
use alloy::primitives::Address;
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Messages accepted by the [`ReconciliationService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkMessage {
    /// Reconcile a Safe and submit its next transaction.
    Check(Address),
}

/// Handle to enqueue work for the [`ReconciliationService`].
#[derive(Debug, Clone)]
pub struct WorkQueueHandle {
    command_tx: mpsc::UnboundedSender<WorkMessage>,
}

impl WorkQueueHandle {
    /// Enqueues an out-of-band check of `safe`. Returns `false` if the service is gone.
    pub fn enqueue(&self, safe: Address) -> bool {
        self.command_tx.send(WorkMessage::Check(safe)).is_ok()
    }
}

/// Reconciles every Safe on a fixed interval and checks enqueued Safes as they arrive.
///
/// After reconciling, a Safe on its way to deployment gets its next submission, and a deployed
/// Safe gets its unsent multisig executions sent again.
#[derive(Debug)]
pub struct ReconciliationService {
    scanner: Scanner,
    submitter: Submitter,
    sequencer: Sequencer,
    interval: Duration,
    command_rx: mpsc::UnboundedReceiver<WorkMessage>,
}

impl ReconciliationService {
    /// Creates a new [`ReconciliationService`].
    pub fn new(
        scanner: Scanner,
        submitter: Submitter,
        sequencer: Sequencer,
        interval: Duration,
    ) -> (Self, WorkQueueHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        (
            Self { scanner, submitter, sequencer, interval, command_rx },
            WorkQueueHandle { command_tx },
        )
    }

    /// Creates a new [`ReconciliationService`] and spawns it.
    pub fn spawn(
        scanner: Scanner,
        submitter: Submitter,
        sequencer: Sequencer,
        interval: Duration,
    ) -> (WorkQueueHandle, JoinHandle<()>) {
        let (this, handle) = Self::new(scanner, submitter, sequencer, interval);
        (handle, tokio::spawn(this.run()))
    }

    /// Runs until every [`WorkQueueHandle`] is dropped.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.reconcile_all().await,
                message = self.command_rx.recv() => match message {
                    Some(WorkMessage::Check(safe)) => self.check(safe).await,
                    None => break,
                },
            }
        }

        info!("Reconciliation service stopped.");
    }

    async fn reconcile_all(&self) {
        let outcomes = match self.scanner.reconcile_all().await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                error!(%err, "Failed to list wallets to reconcile.");
                return;
            }
        };

        for (_, outcome) in outcomes {
            if let Ok(report) = outcome {
                self.submit(&report).await;
            }
        }
    }

    async fn check(&self, safe: Address) {
        match self.scanner.reconcile_wallet(safe).await {
            Ok(report) => self.submit(&report).await,
            Err(err) if err.is_transient() => {
                warn!(%safe, %err, "Check failed, retrying on the next pass.")
            }
            Err(err) => error!(%safe, %err, "Check failed."),
        }
    }

    async fn submit(&self, report: &ReconcileReport) {
        match report.status {
            FundingStatus::NotFunded => return,
            FundingStatus::Deployed => {
                self.resend(report).await;
                return;
            }
            _ => {}
        }

        match self.submitter.submit_if_authorized(report.safe).await {
            Ok(SubmitOutcome::Submitted { kind, tx_hash }) => {
                debug!(safe = %report.safe, %kind, %tx_hash, "Submitted after reconciliation.")
            }
            Ok(outcome) => debug!(safe = %report.safe, ?outcome, "Nothing submitted."),
            Err(err) if err.is_transient() => {
                warn!(safe = %report.safe, %err, "Submission failed, retrying on the next pass.")
            }
            Err(err) => error!(safe = %report.safe, %err, "Submission failed."),
        }
    }

    async fn resend(&self, report: &ReconcileReport) {
        match self.sequencer.resend_unexecuted(report.safe).await {
            Ok(0) | Err(RelayError::Lease(LeaseError::Busy(_))) => {}
            Ok(sent) => info!(safe = %report.safe, sent, "Sent multisig executions again."),
            Err(err) if err.is_transient() => {
                warn!(safe = %report.safe, %err, "Resending executions failed, retrying on the next pass.")
            }
            Err(err) => error!(safe = %report.safe, %err, "Resending executions failed."),
        }
    }
}
