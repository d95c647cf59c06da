//! Relay storage

mod api;
pub use api::StorageApi;
mod memory;
pub use memory::InMemoryStorage;
mod pg;
pub use pg::PgStorage;

use crate::types::{
    DeploymentIntent, EthereumTx, FundingFacts, InternalCall, MultisigTransaction,
    PendingSubmission, ScanCursor, SubmissionKind, TokenTransfer, TxReceipt,
};
use alloy::primitives::{Address, B256, BlockNumber};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

/// Relay storage interface.
#[derive(Debug, Clone)]
pub struct RelayStorage {
    inner: Arc<dyn StorageApi>,
}

impl RelayStorage {
    /// Create [`RelayStorage`] with a in-memory backend. Used for testing only.
    pub fn in_memory() -> Self {
        Self { inner: Arc::new(InMemoryStorage::default()) }
    }

    /// Create [`RelayStorage`] with a PostgreSQL backend.
    pub fn pg(pool: PgPool) -> Self {
        Self { inner: Arc::new(PgStorage::new(pool)) }
    }
}

#[async_trait]
impl StorageApi for RelayStorage {
    async fn insert_intent(
        &self,
        intent: &DeploymentIntent,
        initial_block: BlockNumber,
    ) -> api::Result<()> {
        self.inner.insert_intent(intent, initial_block).await
    }

    async fn read_intent(&self, safe: Address) -> api::Result<Option<DeploymentIntent>> {
        self.inner.read_intent(safe).await
    }

    async fn read_intent_by_request(
        &self,
        request_key: B256,
    ) -> api::Result<Option<DeploymentIntent>> {
        self.inner.read_intent_by_request(request_key).await
    }

    async fn read_funding(&self, safe: Address) -> api::Result<Option<FundingFacts>> {
        self.inner.read_funding(safe).await
    }

    async fn mark_safe_funded(&self, safe: Address) -> api::Result<FundingFacts> {
        self.inner.mark_safe_funded(safe).await
    }

    async fn reserve_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
        tx: &EthereumTx,
    ) -> api::Result<PendingSubmission> {
        self.inner.reserve_submission(safe, kind, tx).await
    }

    async fn read_pending_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
    ) -> api::Result<Option<PendingSubmission>> {
        self.inner.read_pending_submission(safe, kind).await
    }

    async fn release_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
        tx_hash: B256,
    ) -> api::Result<()> {
        self.inner.release_submission(safe, kind, tx_hash).await
    }

    async fn record_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
        tx: &EthereumTx,
    ) -> api::Result<FundingFacts> {
        self.inner.record_submission(safe, kind, tx).await
    }

    async fn mark_submission_mined(
        &self,
        safe: Address,
        kind: SubmissionKind,
        receipt: &TxReceipt,
    ) -> api::Result<FundingFacts> {
        self.inner.mark_submission_mined(safe, kind, receipt).await
    }

    async fn rollback_mined(&self, safe: Address) -> api::Result<FundingFacts> {
        self.inner.rollback_mined(safe).await
    }

    async fn wallets_to_reconcile(&self) -> api::Result<Vec<Address>> {
        self.inner.wallets_to_reconcile().await
    }

    async fn write_transaction(&self, tx: &EthereumTx) -> api::Result<()> {
        self.inner.write_transaction(tx).await
    }

    async fn read_transaction(&self, tx_hash: B256) -> api::Result<Option<EthereumTx>> {
        self.inner.read_transaction(tx_hash).await
    }

    async fn write_internal_calls(&self, calls: &[InternalCall]) -> api::Result<()> {
        self.inner.write_internal_calls(calls).await
    }

    async fn read_internal_calls(&self, tx_hash: B256) -> api::Result<Vec<InternalCall>> {
        self.inner.read_internal_calls(tx_hash).await
    }

    async fn write_token_transfers(&self, transfers: &[TokenTransfer]) -> api::Result<()> {
        self.inner.write_token_transfers(transfers).await
    }

    async fn read_token_transfers(&self, safe: Address) -> api::Result<Vec<TokenTransfer>> {
        self.inner.read_token_transfers(safe).await
    }

    async fn read_cursor(&self, safe: Address) -> api::Result<Option<ScanCursor>> {
        self.inner.read_cursor(safe).await
    }

    async fn write_cursor(&self, cursor: &ScanCursor) -> api::Result<()> {
        self.inner.write_cursor(cursor).await
    }

    async fn next_multisig_nonce(&self, safe: Address) -> api::Result<Option<u64>> {
        self.inner.next_multisig_nonce(safe).await
    }

    async fn insert_multisig_transaction(
        &self,
        tx: MultisigTransaction,
        expected_nonce: Option<u64>,
    ) -> api::Result<MultisigTransaction> {
        self.inner.insert_multisig_transaction(tx, expected_nonce).await
    }

    async fn attach_multisig_ethereum_tx(
        &self,
        safe: Address,
        nonce: u64,
        tx: &EthereumTx,
    ) -> api::Result<()> {
        self.inner.attach_multisig_ethereum_tx(safe, nonce, tx).await
    }

    async fn read_multisig_transaction(
        &self,
        safe: Address,
        nonce: u64,
    ) -> api::Result<Option<MultisigTransaction>> {
        self.inner.read_multisig_transaction(safe, nonce).await
    }

    async fn read_multisig_transactions_from(
        &self,
        safe: Address,
        nonce: u64,
    ) -> api::Result<Vec<MultisigTransaction>> {
        self.inner.read_multisig_transactions_from(safe, nonce).await
    }

    async fn ping(&self) -> api::Result<()> {
        self.inner.ping().await
    }
}
