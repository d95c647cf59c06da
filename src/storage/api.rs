//! Relay storage api.

use crate::{
    error::StorageError,
    types::{
        DeploymentIntent, EthereumTx, FundingFacts, InternalCall, MultisigTransaction,
        PendingSubmission, ScanCursor, SubmissionKind, TokenTransfer, TxReceipt,
    },
};
use alloy::primitives::{Address, B256, BlockNumber};
use async_trait::async_trait;
use std::fmt::Debug;

/// Type alias for `Result<T, StorageError>`
pub type Result<T> = core::result::Result<T, StorageError>;

/// Storage API.
///
/// Every method that changes [`FundingFacts`] is a single atomic step: it re-reads the facts,
/// applies the transition and writes the result, or fails without writing anything.
#[async_trait]
pub trait StorageApi: Debug + Send + Sync {
    /// Registers a Safe with its deployment intent and a scan cursor starting at
    /// `initial_block`.
    ///
    /// Fails with [`StorageError::Conflict`] if the Safe or the request key is registered.
    async fn insert_intent(
        &self,
        intent: &DeploymentIntent,
        initial_block: BlockNumber,
    ) -> Result<()>;

    /// Reads the deployment intent of a Safe.
    async fn read_intent(&self, safe: Address) -> Result<Option<DeploymentIntent>>;

    /// Reads the deployment intent created for a request key.
    async fn read_intent_by_request(&self, request_key: B256) -> Result<Option<DeploymentIntent>>;

    /// Reads the funding facts of a Safe.
    async fn read_funding(&self, safe: Address) -> Result<Option<FundingFacts>>;

    /// Marks a Safe as funded.
    async fn mark_safe_funded(&self, safe: Address) -> Result<FundingFacts>;

    /// Stores a signed transaction for `kind` before it is broadcast.
    ///
    /// Guarded like [`Self::record_submission`], and by the absence of another reservation for
    /// the same Safe and step. The facts do not change.
    async fn reserve_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
        tx: &EthereumTx,
    ) -> Result<PendingSubmission>;

    /// Reads the reservation for `kind` of a Safe.
    async fn read_pending_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
    ) -> Result<Option<PendingSubmission>>;

    /// Drops the reservation of `tx_hash` after its nonce was taken by another transaction.
    ///
    /// Fails with [`StorageError::Conflict`] if `tx_hash` is not the reservation for `kind`.
    async fn release_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
        tx_hash: B256,
    ) -> Result<()>;

    /// Stores a transaction and records its hash for `kind`.
    ///
    /// Guarded by the expected prior status and by hash uniqueness across all Safes and kinds.
    /// A reservation for `kind` is consumed, and `tx` must use its sender nonce.
    async fn record_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
        tx: &EthereumTx,
    ) -> Result<FundingFacts>;

    /// Confirms the recorded submission of `kind` with its receipt.
    async fn mark_submission_mined(
        &self,
        safe: Address,
        kind: SubmissionKind,
        receipt: &TxReceipt,
    ) -> Result<FundingFacts>;

    /// Rolls back the last confirmed fact after a reorg.
    async fn rollback_mined(&self, safe: Address) -> Result<FundingFacts>;

    /// All registered Safes.
    async fn wallets_to_reconcile(&self) -> Result<Vec<Address>>;

    /// Inserts or updates a transaction. An existing signed envelope is kept.
    async fn write_transaction(&self, tx: &EthereumTx) -> Result<()>;

    /// Reads a transaction.
    async fn read_transaction(&self, tx_hash: B256) -> Result<Option<EthereumTx>>;

    /// Stores internal calls, ignoring ones already stored.
    async fn write_internal_calls(&self, calls: &[InternalCall]) -> Result<()>;

    /// Reads the internal calls of a transaction, ordered by index.
    async fn read_internal_calls(&self, tx_hash: B256) -> Result<Vec<InternalCall>>;

    /// Stores token transfers, ignoring ones already stored.
    async fn write_token_transfers(&self, transfers: &[TokenTransfer]) -> Result<()>;

    /// Reads the token transfers into a Safe, ordered by block and log index.
    async fn read_token_transfers(&self, safe: Address) -> Result<Vec<TokenTransfer>>;

    /// Reads the scan cursor of a Safe.
    async fn read_cursor(&self, safe: Address) -> Result<Option<ScanCursor>>;

    /// Writes the scan cursor of a Safe.
    async fn write_cursor(&self, cursor: &ScanCursor) -> Result<()>;

    /// The nonce following the last stored multisig transaction of a Safe.
    async fn next_multisig_nonce(&self, safe: Address) -> Result<Option<u64>>;

    /// Allocates the next multisig nonce of the Safe and inserts `tx` with it.
    ///
    /// The next nonce is the last stored nonce plus one, or `tx.nonce` if none is stored. With
    /// `expected_nonce` set, a different allocation fails with
    /// [`StorageError::NonceMismatch`]. Returns the stored transaction.
    async fn insert_multisig_transaction(
        &self,
        tx: MultisigTransaction,
        expected_nonce: Option<u64>,
    ) -> Result<MultisigTransaction>;

    /// Links a multisig transaction to the transaction that executes it.
    async fn attach_multisig_ethereum_tx(
        &self,
        safe: Address,
        nonce: u64,
        tx: &EthereumTx,
    ) -> Result<()>;

    /// Reads a multisig transaction.
    async fn read_multisig_transaction(
        &self,
        safe: Address,
        nonce: u64,
    ) -> Result<Option<MultisigTransaction>>;

    /// Reads the multisig transactions of a Safe from `nonce` on, ordered by nonce.
    async fn read_multisig_transactions_from(
        &self,
        safe: Address,
        nonce: u64,
    ) -> Result<Vec<MultisigTransaction>>;

    /// Pings the database, checking if the connection is alive.
    async fn ping(&self) -> Result<()>;
}
