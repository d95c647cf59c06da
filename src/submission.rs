//! Deployer funding and Safe deployment.
//!
//! [`Submitter::submit_if_authorized`] moves a Safe one step forward: it tops up the deployer
//! once the Safe is funded, and deploys the Safe once the top-up is confirmed. Each step sends
//! at most one transaction per Safe.
//!
//! A transaction is signed and reserved in storage before the node sees it. A broadcast that
//! fails, or succeeds without the submission being recorded, leaves the reservation behind, and
//! the next attempt sends that same transaction instead of building another one.

use crate::{
    address::create_proxy_calldata,
    constants::FUNDING_TX_GAS,
    error::{RelayError, StorageError},
    estimation::deployment_gas,
    lease::Leases,
    node::NodeClient,
    signers::DynSigner,
    storage::{RelayStorage, StorageApi},
    transactions::{TxRequest, TxSender},
    types::{
        DeploymentIntent, EthereumTx, FundingFacts, FundingStatus, PendingSubmission,
        SubmissionKind, status::TransitionError,
    },
};
use alloy::primitives::{Address, B256};
use eyre::eyre;
use metrics::Counter;
use metrics_derive::Metrics;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Metrics of the [`Submitter`].
#[derive(Metrics)]
#[metrics(scope = "submission")]
pub struct SubmissionMetrics {
    /// Number of submitted transactions.
    pub submitted: Counter,
    /// Number of rebroadcast transactions.
    pub rebroadcast: Counter,
    /// Number of attempts that found the wallet lease busy.
    pub busy: Counter,
    /// Number of reserved transactions the node did not accept.
    pub unsent: Counter,
    /// Number of reservations dropped because their nonce was taken.
    pub superseded: Counter,
}

/// Result of [`Submitter::submit_if_authorized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The Safe is not funded yet.
    NotAuthorized,
    /// A transaction was sent and recorded.
    Submitted {
        /// What was sent.
        kind: SubmissionKind,
        /// Transaction hash.
        tx_hash: B256,
    },
    /// A transaction reserved by an earlier attempt was sent, or found sent, and recorded.
    Resumed {
        /// What was sent.
        kind: SubmissionKind,
        /// Transaction hash.
        tx_hash: B256,
    },
    /// The recorded transaction was unknown to the node and was sent again.
    Rebroadcast {
        /// Transaction hash.
        tx_hash: B256,
    },
    /// A transaction for the current step is already recorded.
    AlreadySubmitted,
    /// Another worker holds the wallet lease.
    Busy,
}

/// The relay accounts.
#[derive(Debug, Clone)]
pub struct RelayAccounts {
    /// Sends deployments and relayed multisig transactions.
    pub deployer: DynSigner,
    /// Tops up the deployer.
    pub funder: DynSigner,
}

/// Sends the funding and deployment transactions of Safes.
#[derive(Debug, Clone)]
pub struct Submitter {
    node: Arc<dyn NodeClient>,
    storage: RelayStorage,
    leases: Leases,
    sender: TxSender,
    accounts: RelayAccounts,
    metrics: Arc<SubmissionMetrics>,
}

impl Submitter {
    /// Creates a new [`Submitter`].
    pub fn new(
        node: Arc<dyn NodeClient>,
        storage: RelayStorage,
        leases: Leases,
        sender: TxSender,
        accounts: RelayAccounts,
    ) -> Self {
        Self {
            node,
            storage,
            leases,
            sender,
            accounts,
            metrics: Arc::new(SubmissionMetrics::default()),
        }
    }

    /// Sends the next transaction of `safe` if its status allows it.
    ///
    /// Runs under the wallet lease. A busy lease is not an error, the caller simply tries again
    /// on its next pass.
    #[instrument(skip(self))]
    pub async fn submit_if_authorized(&self, safe: Address) -> Result<SubmitOutcome, RelayError> {
        match self.leases.with_wallet(safe, || self.submit_locked(safe)).await? {
            Some(outcome) => outcome,
            None => {
                self.metrics.busy.increment(1);
                Ok(SubmitOutcome::Busy)
            }
        }
    }

    async fn submit_locked(&self, safe: Address) -> Result<SubmitOutcome, RelayError> {
        let intent = self.storage.read_intent(safe).await?.ok_or(RelayError::NotFound(safe))?;
        let facts = self.storage.read_funding(safe).await?.ok_or(RelayError::NotFound(safe))?;
        let status = facts
            .status()
            .map_err(|err| RelayError::from_transition(safe, err.into()))?;

        match status {
            FundingStatus::NotFunded => Ok(SubmitOutcome::NotAuthorized),
            FundingStatus::FundedAwaitingDeployer => {
                self.advance(&intent, SubmissionKind::DeployerFunding).await
            }
            FundingStatus::DeployerFunded => self.advance(&intent, SubmissionKind::Deployment).await,
            FundingStatus::DeployerFundedUnconfirmed | FundingStatus::DeployedUnconfirmed => {
                self.ensure_broadcast(&facts, status).await
            }
            FundingStatus::Deployed => Err(RelayError::AlreadyDeployed(safe)),
        }
    }

    fn signer(&self, kind: SubmissionKind) -> &DynSigner {
        match kind {
            SubmissionKind::DeployerFunding => &self.accounts.funder,
            SubmissionKind::Deployment => &self.accounts.deployer,
        }
    }

    fn request(intent: &DeploymentIntent, kind: SubmissionKind) -> TxRequest {
        match kind {
            SubmissionKind::DeployerFunding => TxRequest::transfer(
                intent.deployer,
                intent.funding_amount(),
                FUNDING_TX_GAS,
                intent.gas_price_estimated,
            ),
            SubmissionKind::Deployment => TxRequest::call(
                intent.proxy_factory,
                create_proxy_calldata(
                    intent.master_copy,
                    intent.setup_data.clone(),
                    intent.salt_nonce,
                ),
                deployment_gas(intent.owners.len() as u64, intent.payment_token.is_some()),
                intent.gas_price_estimated,
            ),
        }
    }

    async fn advance(
        &self,
        intent: &DeploymentIntent,
        kind: SubmissionKind,
    ) -> Result<SubmitOutcome, RelayError> {
        match self.storage.read_pending_submission(intent.safe, kind).await? {
            Some(pending) => self.resume(intent, pending).await,
            None => self.submit(intent, kind).await,
        }
    }

    /// Signs, reserves, broadcasts and records a new transaction for `kind`.
    async fn submit(
        &self,
        intent: &DeploymentIntent,
        kind: SubmissionKind,
    ) -> Result<SubmitOutcome, RelayError> {
        let tx = self.sender.sign(self.signer(kind), Self::request(intent, kind)).await?;

        if let Err(err) = self.storage.reserve_submission(intent.safe, kind, &tx).await {
            self.sender.release_nonce(tx.from).await;
            return match err {
                StorageError::Conflict(_)
                | StorageError::Transition(TransitionError::AlreadySubmitted(_)) => {
                    debug!(safe = %intent.safe, %kind, %err, "Submission is already reserved.");
                    Ok(SubmitOutcome::AlreadySubmitted)
                }
                StorageError::Transition(err) => Err(RelayError::from_transition(intent.safe, err)),
                err => Err(err.into()),
            };
        }

        if let Err(err) = self.sender.broadcast(&tx).await {
            self.metrics.unsent.increment(1);
            warn!(safe = %intent.safe, %kind, tx_hash = %tx.tx_hash, nonce = tx.nonce, %err, "Broadcast failed, the reserved transaction is sent again on the next attempt.");
            return Err(err.into());
        }

        let facts = self.record(intent.safe, kind, &tx).await?;
        self.metrics.submitted.increment(1);
        info!(safe = %intent.safe, %kind, tx_hash = %tx.tx_hash, status = ?facts.status(), "Submitted transaction.");
        Ok(SubmitOutcome::Submitted { kind, tx_hash: tx.tx_hash })
    }

    /// Sends the reserved transaction unless the node knows it, then records it.
    ///
    /// A reservation whose nonce went to another transaction of the relay account can never be
    /// mined. It is dropped and a new transaction is built in its place.
    async fn resume(
        &self,
        intent: &DeploymentIntent,
        pending: PendingSubmission,
    ) -> Result<SubmitOutcome, RelayError> {
        let kind = pending.kind;
        let tx = self
            .storage
            .read_transaction(pending.tx_hash)
            .await?
            .ok_or_else(|| eyre!("reserved transaction {} is not stored", pending.tx_hash))?;

        if self.node.get_transaction_by_hash(tx.tx_hash).await?.is_none() {
            if let Err(err) = self.sender.rebroadcast(&tx).await {
                if !self.sender.is_superseded(&tx).await? {
                    self.metrics.unsent.increment(1);
                    return Err(err.into());
                }

                self.metrics.superseded.increment(1);
                warn!(safe = %intent.safe, %kind, tx_hash = %tx.tx_hash, nonce = tx.nonce, %err, "Reserved nonce was taken by another transaction.");
                self.storage.release_submission(intent.safe, kind, tx.tx_hash).await?;
                self.sender.release_nonce(tx.from).await;
                return self.submit(intent, kind).await;
            }
            self.metrics.rebroadcast.increment(1);
        }

        self.record(intent.safe, kind, &tx).await?;
        self.metrics.submitted.increment(1);
        info!(safe = %intent.safe, %kind, tx_hash = %tx.tx_hash, "Recorded reserved submission.");
        Ok(SubmitOutcome::Resumed { kind, tx_hash: tx.tx_hash })
    }

    async fn record(
        &self,
        safe: Address,
        kind: SubmissionKind,
        tx: &EthereumTx,
    ) -> Result<FundingFacts, RelayError> {
        self.storage.record_submission(safe, kind, tx).await.map_err(|err| {
            error!(%safe, %kind, tx_hash = %tx.tx_hash, %err, "Failed to record submission, it stays reserved.");
            match err {
                StorageError::Transition(err) => RelayError::from_transition(safe, err),
                err => err.into(),
            }
        })
    }

    /// Makes sure the outstanding transaction is known to the node.
    async fn ensure_broadcast(
        &self,
        facts: &FundingFacts,
        status: FundingStatus,
    ) -> Result<SubmitOutcome, RelayError> {
        let Some(tx_hash) = SubmissionKind::for_status(status).and_then(|kind| facts.tx_hash(kind))
        else {
            return Ok(SubmitOutcome::AlreadySubmitted);
        };

        if self.node.get_transaction_by_hash(tx_hash).await?.is_some() {
            debug!(safe = %facts.safe, %tx_hash, "Submission is known to the node.");
            return Ok(SubmitOutcome::AlreadySubmitted);
        }

        let Some(tx) = self.storage.read_transaction(tx_hash).await? else {
            warn!(safe = %facts.safe, %tx_hash, "Submission is not stored.");
            return Ok(SubmitOutcome::AlreadySubmitted);
        };
        if tx.raw.is_none() {
            warn!(safe = %facts.safe, %tx_hash, "Submission was adopted without envelope, cannot rebroadcast.");
            return Ok(SubmitOutcome::AlreadySubmitted);
        }

        self.sender.rebroadcast(&tx).await?;
        self.metrics.rebroadcast.increment(1);
        info!(safe = %facts.safe, %tx_hash, "Rebroadcast dropped submission.");
        Ok(SubmitOutcome::Rebroadcast { tx_hash })
    }
}
