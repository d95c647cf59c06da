//! Chain reconciliation.
//!
//! The [`Scanner`] compares what the relay recorded about a Safe with what the chain shows:
//! it detects funding, confirms submitted transactions once they are buried deep enough,
//! rolls back confirmations that a reorg invalidated, and walks new blocks for activity
//! touching the Safe.

use crate::{
    address::create_proxy_calldata,
    constants::{
        DEFAULT_CONFIRMATION_MARGIN, DEFAULT_MAX_BLOCKS_PER_PASS, DEFAULT_REORG_CHECK_DEPTH,
    },
    error::{LeaseError, NodeError, RelayError, StorageError},
    lease::{Leases, wallet_key},
    node::{NodeClient, token_balance},
    storage::{RelayStorage, StorageApi},
    types::{
        DeploymentIntent, EthereumTx, FundingFacts, FundingStatus, PendingSubmission, ScanCursor,
        SubmissionKind,
    },
};
use alloy::primitives::{Address, B256, BlockNumber};
use futures_util::future::join_all;
use metrics::Counter;
use metrics_derive::Metrics;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, error, info, instrument, warn};

/// Metrics of the [`Scanner`].
#[derive(Metrics)]
#[metrics(scope = "reconcile")]
pub struct ReconcileMetrics {
    /// Number of reconciled wallets.
    pub reconciled: Counter,
    /// Number of failed wallet passes.
    pub failed: Counter,
    /// Number of confirmed submissions.
    pub confirmed: Counter,
    /// Number of reverted submissions.
    pub reverted: Counter,
    /// Number of reorged confirmations that were rolled back.
    pub reorgs: Counter,
    /// Number of reserved submissions found mined before they were recorded.
    pub adopted: Counter,
    /// Number of scanned blocks.
    pub blocks: Counter,
}

/// Scanner settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerConfig {
    /// Blocks a transaction must be buried under before it counts as mined.
    pub confirmation_margin: u64,
    /// How far behind the head confirmations are re-verified.
    pub reorg_check_depth: u64,
    /// Upper bound of blocks walked per wallet and pass.
    pub max_blocks_per_pass: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            confirmation_margin: DEFAULT_CONFIRMATION_MARGIN,
            reorg_check_depth: DEFAULT_REORG_CHECK_DEPTH,
            max_blocks_per_pass: DEFAULT_MAX_BLOCKS_PER_PASS,
        }
    }
}

/// What a reconciliation pass did for one Safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// The Safe.
    pub safe: Address,
    /// Status after the pass.
    pub status: FundingStatus,
    /// The Safe was found funded in this pass.
    pub funded: bool,
    /// Submission confirmed in this pass.
    pub confirmed: Option<SubmissionKind>,
    /// Submission found reverted in this pass.
    pub reverted: Option<B256>,
    /// A reorged confirmation was rolled back.
    pub rolled_back: bool,
    /// Reserved submission found mined and recorded in this pass.
    pub adopted: Option<B256>,
    /// Transactions touching the Safe that were stored.
    pub transactions: usize,
    /// Internal calls touching the Safe that were stored.
    pub internal_calls: usize,
    /// Token transfers into the Safe that were stored.
    pub token_transfers: usize,
    /// Last block scanned for transactions.
    pub tx_block_number: BlockNumber,
    /// Last block scanned for token transfers.
    pub erc20_block_number: BlockNumber,
}

impl ReconcileReport {
    fn new(safe: Address, cursor: &ScanCursor) -> Self {
        Self {
            safe,
            status: FundingStatus::NotFunded,
            funded: false,
            confirmed: None,
            reverted: None,
            rolled_back: false,
            adopted: None,
            transactions: 0,
            internal_calls: 0,
            token_transfers: 0,
            tx_block_number: cursor.tx_block_number,
            erc20_block_number: cursor.erc20_block_number,
        }
    }
}

/// Outcome of reconciling one Safe in [`Scanner::reconcile_all`].
pub type WalletOutcome = (Address, Result<ReconcileReport, RelayError>);

/// Reconciles recorded Safe facts with the chain.
#[derive(Debug, Clone)]
pub struct Scanner {
    node: Arc<dyn NodeClient>,
    storage: RelayStorage,
    leases: Leases,
    config: ScannerConfig,
    metrics: Arc<ReconcileMetrics>,
}

impl Scanner {
    /// Creates a new [`Scanner`].
    pub fn new(
        node: Arc<dyn NodeClient>,
        storage: RelayStorage,
        leases: Leases,
        config: ScannerConfig,
    ) -> Self {
        Self { node, storage, leases, config, metrics: Arc::new(ReconcileMetrics::default()) }
    }

    /// Reconciles every registered Safe. Each Safe is an isolated unit: a failing Safe is
    /// reported and does not stop the others.
    pub async fn reconcile_all(&self) -> Result<Vec<WalletOutcome>, RelayError> {
        let wallets = self.storage.wallets_to_reconcile().await?;
        let outcomes = join_all(wallets.into_iter().map(|safe| async move {
            let outcome = self.reconcile_wallet(safe).await;
            if let Err(err) = &outcome {
                error!(%safe, %err, transient = err.is_transient(), "Failed to reconcile wallet.");
            }
            (safe, outcome)
        }))
        .await;

        Ok(outcomes)
    }

    /// Runs one reconciliation pass for `safe` under its wallet lease.
    #[instrument(skip(self))]
    pub async fn reconcile_wallet(&self, safe: Address) -> Result<ReconcileReport, RelayError> {
        let report = self
            .leases
            .with_wallet(safe, || self.reconcile_locked(safe))
            .await?
            .unwrap_or_else(|| Err(LeaseError::Busy(wallet_key(safe)).into()));

        match &report {
            Ok(_) => self.metrics.reconciled.increment(1),
            Err(_) => self.metrics.failed.increment(1),
        }
        report
    }

    async fn reconcile_locked(&self, safe: Address) -> Result<ReconcileReport, RelayError> {
        let intent = self.storage.read_intent(safe).await?.ok_or(RelayError::NotFound(safe))?;
        let mut facts =
            self.storage.read_funding(safe).await?.ok_or(RelayError::NotFound(safe))?;
        let head = self.node.block_number().await?;
        let mut cursor = match self.storage.read_cursor(safe).await? {
            Some(cursor) => cursor,
            None => ScanCursor::new(safe, head),
        };
        let mut report = ReconcileReport::new(safe, &cursor);

        facts = self.check_reorg(facts, head, &mut cursor, &mut report).await?;
        facts = self.check_funding(&intent, facts, &mut report).await?;
        facts = self.check_confirmation(facts, head, &mut report).await?;

        let walked = self.walk(&intent, &mut facts, head, &mut cursor, &mut report).await;
        self.storage.write_cursor(&cursor).await?;
        walked?;

        report.status = status_of(&facts)?;
        report.tx_block_number = cursor.tx_block_number;
        report.erc20_block_number = cursor.erc20_block_number;
        Ok(report)
    }

    /// Re-verifies the latest confirmation and rolls it back if its transaction left the
    /// canonical chain.
    async fn check_reorg(
        &self,
        facts: FundingFacts,
        head: BlockNumber,
        cursor: &mut ScanCursor,
        report: &mut ReconcileReport,
    ) -> Result<FundingFacts, RelayError> {
        let status = status_of(&facts)?;
        let kind = match status {
            FundingStatus::DeployerFunded => SubmissionKind::DeployerFunding,
            FundingStatus::Deployed => SubmissionKind::Deployment,
            _ => return Ok(facts),
        };
        let Some(tx_hash) = facts.tx_hash(kind) else { return Ok(facts) };

        let recorded_block = match kind {
            SubmissionKind::Deployment => facts.deployed_block_number,
            SubmissionKind::DeployerFunding => self
                .storage
                .read_transaction(tx_hash)
                .await?
                .and_then(|tx| tx.block_number),
        };
        let Some(recorded_block) = recorded_block else { return Ok(facts) };
        if head.saturating_sub(recorded_block) > self.config.reorg_check_depth {
            return Ok(facts);
        }

        let receipt = self.node.get_transaction_receipt(tx_hash).await?;
        if receipt.is_some_and(|receipt| receipt.block_number == recorded_block) {
            return Ok(facts);
        }

        let facts = self.storage.rollback_mined(facts.safe).await?;
        cursor.rewind_before(recorded_block);
        report.rolled_back = true;
        self.metrics.reorgs.increment(1);
        warn!(
            safe = %facts.safe,
            %tx_hash,
            block = recorded_block,
            found_in = ?receipt.map(|receipt| receipt.block_number),
            "Reorg detected, rolled back confirmation."
        );
        Ok(facts)
    }

    /// Marks the Safe funded once it holds the creation payment.
    async fn check_funding(
        &self,
        intent: &DeploymentIntent,
        facts: FundingFacts,
        report: &mut ReconcileReport,
    ) -> Result<FundingFacts, RelayError> {
        if status_of(&facts)? != FundingStatus::NotFunded {
            return Ok(facts);
        }

        let balance = match intent.payment_token {
            Some(token) => token_balance(self.node.as_ref(), token, intent.safe).await?,
            None => self.node.get_balance(intent.safe).await?,
        };
        if balance < intent.payment {
            debug!(safe = %intent.safe, %balance, payment = %intent.payment, "Safe is not funded.");
            return Ok(facts);
        }

        let facts = self.storage.mark_safe_funded(intent.safe).await?;
        report.funded = true;
        info!(safe = %intent.safe, %balance, "Safe is funded.");
        Ok(facts)
    }

    /// Confirms the outstanding submission once it is mined below the confirmation margin.
    async fn check_confirmation(
        &self,
        facts: FundingFacts,
        head: BlockNumber,
        report: &mut ReconcileReport,
    ) -> Result<FundingFacts, RelayError> {
        let status = status_of(&facts)?;
        if !status.is_unconfirmed() {
            return Ok(facts);
        }
        let Some(kind) = SubmissionKind::for_status(status) else { return Ok(facts) };
        let Some(tx_hash) = facts.tx_hash(kind) else { return Ok(facts) };

        let Some(receipt) = self.node.get_transaction_receipt(tx_hash).await? else {
            return Ok(facts);
        };

        if !receipt.success {
            if let Some(tx) = self.storage.read_transaction(tx_hash).await? {
                self.storage.write_transaction(&tx.with_receipt(&receipt)).await?;
            }
            report.reverted = Some(tx_hash);
            self.metrics.reverted.increment(1);
            error!(safe = %facts.safe, %kind, %tx_hash, block = receipt.block_number, "Submission reverted.");
            return Ok(facts);
        }

        if receipt.block_number.saturating_add(self.config.confirmation_margin) > head {
            debug!(safe = %facts.safe, %kind, %tx_hash, block = receipt.block_number, "Submission is not confirmed yet.");
            return Ok(facts);
        }

        if kind == SubmissionKind::Deployment && self.node.get_code(facts.safe).await?.is_empty() {
            warn!(safe = %facts.safe, %tx_hash, "Deployment is mined but the Safe has no code.");
            return Ok(facts);
        }

        let facts = self.storage.mark_submission_mined(facts.safe, kind, &receipt).await?;
        report.confirmed = Some(kind);
        self.metrics.confirmed.increment(1);
        info!(safe = %facts.safe, %kind, %tx_hash, block = receipt.block_number, "Submission confirmed.");
        Ok(facts)
    }

    /// Walks confirmed blocks past the cursors, storing activity touching the Safe and
    /// adopting reserved submissions that were mined before they were recorded.
    async fn walk(
        &self,
        intent: &DeploymentIntent,
        facts: &mut FundingFacts,
        head: BlockNumber,
        cursor: &mut ScanCursor,
        report: &mut ReconcileReport,
    ) -> Result<(), RelayError> {
        if status_of(facts)? == FundingStatus::NotFunded {
            return Ok(());
        }
        let safe_head = head.saturating_sub(self.config.confirmation_margin);

        let mut reserved = Vec::new();
        for kind in [SubmissionKind::DeployerFunding, SubmissionKind::Deployment] {
            reserved.extend(self.storage.read_pending_submission(intent.safe, kind).await?);
        }

        let last = safe_head.min(cursor.tx_block_number.saturating_add(self.config.max_blocks_per_pass));
        for number in cursor.tx_block_number + 1..=last {
            let block = self
                .node
                .get_block(number)
                .await?
                .ok_or_else(|| NodeError::Unavailable(format!("block {number} is unknown")))?;

            let calls: Vec<_> = block
                .internal_calls
                .into_iter()
                .filter(|call| call.touches(intent.safe))
                .collect();
            let traced: HashSet<B256> = calls.iter().map(|call| call.tx_hash).collect();
            let outstanding: Vec<B256> = [SubmissionKind::DeployerFunding, SubmissionKind::Deployment]
                .into_iter()
                .filter_map(|kind| facts.tx_hash(kind))
                .collect();

            for tx in block.transactions {
                if let Some(kind) = self.adoptable(intent, facts, &reserved, &tx)? {
                    self.adopt(facts, kind, &tx, report).await?;
                }

                let touches = tx.from == intent.safe
                    || tx.to == Some(intent.safe)
                    || traced.contains(&tx.tx_hash)
                    || outstanding.contains(&tx.tx_hash);
                if touches {
                    self.storage.write_transaction(&tx).await?;
                    report.transactions += 1;
                }
            }

            if !calls.is_empty() {
                self.storage.write_internal_calls(&calls).await?;
                report.internal_calls += calls.len();
            }

            cursor.tx_block_number = number;
            self.metrics.blocks.increment(1);
        }

        let from = cursor.erc20_block_number + 1;
        let to = safe_head.min(cursor.erc20_block_number.saturating_add(self.config.max_blocks_per_pass));
        if from <= to {
            let transfers = self.node.get_transfer_logs(intent.safe, from, to).await?;
            if !transfers.is_empty() {
                self.storage.write_token_transfers(&transfers).await?;
                report.token_transfers += transfers.len();
            }
            cursor.erc20_block_number = to;
        }

        Ok(())
    }

    /// The submission `tx` is, if it uses the sender nonce reserved for the current step and
    /// does what that step does.
    fn adoptable(
        &self,
        intent: &DeploymentIntent,
        facts: &FundingFacts,
        reserved: &[PendingSubmission],
        tx: &EthereumTx,
    ) -> Result<Option<SubmissionKind>, RelayError> {
        let status = status_of(facts)?;
        let Some(pending) = reserved
            .iter()
            .find(|pending| pending.kind.required_status() == status && pending.same_slot(tx))
        else {
            return Ok(None);
        };

        let matches = match pending.kind {
            SubmissionKind::DeployerFunding => {
                tx.to == Some(intent.deployer) && tx.value == intent.funding_amount()
            }
            SubmissionKind::Deployment => {
                tx.to == Some(intent.proxy_factory)
                    && tx.data
                        == create_proxy_calldata(
                            intent.master_copy,
                            intent.setup_data.clone(),
                            intent.salt_nonce,
                        )
            }
        };
        Ok(matches.then_some(pending.kind))
    }

    async fn adopt(
        &self,
        facts: &mut FundingFacts,
        kind: SubmissionKind,
        tx: &EthereumTx,
        report: &mut ReconcileReport,
    ) -> Result<(), RelayError> {
        match self.storage.record_submission(facts.safe, kind, tx).await {
            Ok(next) => {
                *facts = next;
                report.adopted = Some(tx.tx_hash);
                self.metrics.adopted.increment(1);
                info!(safe = %facts.safe, %kind, tx_hash = %tx.tx_hash, "Adopted reserved submission.");
                Ok(())
            }
            Err(StorageError::Conflict(reason)) => {
                debug!(safe = %facts.safe, tx_hash = %tx.tx_hash, %reason, "Transaction belongs to another Safe.");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn status_of(facts: &FundingFacts) -> Result<FundingStatus, RelayError> {
    facts.status().map_err(|err| RelayError::from_transition(facts.safe, err.into()))
}
