//! Relay storage implementation in-memory. For testing only.

use super::{StorageApi, api::Result};
use crate::{
    error::StorageError,
    types::{
        DeploymentIntent, EthereumTx, FundingFacts, InternalCall, MultisigTransaction,
        PendingSubmission, ScanCursor, SubmissionKind, TokenTransfer, TxReceipt,
        status::TransitionError,
    },
};
use alloy::primitives::{Address, B256, BlockNumber};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// [`StorageApi`] implementation in-memory. Used for testing
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    intents: DashMap<Address, DeploymentIntent>,
    request_keys: DashMap<B256, Address>,
    fundings: DashMap<Address, FundingFacts>,
    /// Submission hashes, unique across all Safes and kinds.
    submissions: DashMap<B256, (Address, SubmissionKind)>,
    pending: DashMap<(Address, SubmissionKind), PendingSubmission>,
    transactions: DashMap<B256, EthereumTx>,
    internal_calls: DashMap<(B256, u32), InternalCall>,
    token_transfers: DashMap<(B256, u64), TokenTransfer>,
    cursors: DashMap<Address, ScanCursor>,
    multisig_txs: DashMap<Address, BTreeMap<u64, MultisigTransaction>>,
    safe_tx_hashes: DashMap<B256, (Address, u64)>,
    /// Serialises every write spanning more than one map.
    write_lock: Mutex<()>,
}

impl InMemoryStorage {
    fn funding(&self, safe: Address) -> Result<FundingFacts> {
        self.fundings.get(&safe).map(|facts| facts.clone()).ok_or(StorageError::UnknownSafe(safe))
    }

    fn upsert_transaction(&self, tx: &EthereumTx) {
        self.transactions
            .entry(tx.tx_hash)
            .and_modify(|stored| {
                let raw = stored.raw.take();
                *stored = tx.clone();
                if stored.raw.is_none() {
                    stored.raw = raw;
                }
            })
            .or_insert_with(|| tx.clone());
    }
}

#[async_trait]
impl StorageApi for InMemoryStorage {
    async fn insert_intent(
        &self,
        intent: &DeploymentIntent,
        initial_block: BlockNumber,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if self.intents.contains_key(&intent.safe) {
            return Err(StorageError::Conflict(format!("safe {} is registered", intent.safe)));
        }
        let request_key = intent.request_key();
        if self.request_keys.contains_key(&request_key) {
            return Err(StorageError::Conflict(format!("request {request_key} is registered")));
        }

        self.request_keys.insert(request_key, intent.safe);
        self.intents.insert(intent.safe, intent.clone());
        self.fundings.insert(intent.safe, FundingFacts::new(intent.safe));
        self.cursors.insert(intent.safe, ScanCursor::new(intent.safe, initial_block));

        Ok(())
    }

    async fn read_intent(&self, safe: Address) -> Result<Option<DeploymentIntent>> {
        Ok(self.intents.get(&safe).map(|intent| intent.clone()))
    }

    async fn read_intent_by_request(&self, request_key: B256) -> Result<Option<DeploymentIntent>> {
        let Some(safe) = self.request_keys.get(&request_key).map(|safe| *safe) else {
            return Ok(None);
        };
        self.read_intent(safe).await
    }

    async fn read_funding(&self, safe: Address) -> Result<Option<FundingFacts>> {
        Ok(self.fundings.get(&safe).map(|facts| facts.clone()))
    }

    async fn mark_safe_funded(&self, safe: Address) -> Result<FundingFacts> {
        let _guard = self.write_lock.lock().await;

        let next = self.funding(safe)?.mark_safe_funded()?;
        self.fundings.insert(safe, next.clone());
        Ok(next)
    }

    async fn reserve_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
        tx: &EthereumTx,
    ) -> Result<PendingSubmission> {
        let _guard = self.write_lock.lock().await;

        self.funding(safe)?.record_submission(kind, tx.tx_hash)?;
        if let Some(pending) = self.pending.get(&(safe, kind)).map(|pending| *pending) {
            return Err(StorageError::Conflict(format!(
                "{kind} of safe {safe} is reserved by {}",
                pending.tx_hash
            )));
        }
        if let Some(owner) = self.submissions.get(&tx.tx_hash).map(|owner| owner.0) {
            return Err(StorageError::Conflict(format!(
                "transaction {} is recorded for safe {owner}",
                tx.tx_hash
            )));
        }

        let pending = PendingSubmission::new(safe, kind, tx);
        self.submissions.insert(tx.tx_hash, (safe, kind));
        self.upsert_transaction(tx);
        self.pending.insert((safe, kind), pending);
        Ok(pending)
    }

    async fn read_pending_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
    ) -> Result<Option<PendingSubmission>> {
        Ok(self.pending.get(&(safe, kind)).map(|pending| *pending))
    }

    async fn release_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
        tx_hash: B256,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        match self.pending.get(&(safe, kind)).map(|pending| *pending) {
            Some(pending) if pending.tx_hash == tx_hash => {
                self.pending.remove(&(safe, kind));
                self.submissions.remove(&tx_hash);
                Ok(())
            }
            _ => Err(StorageError::Conflict(format!(
                "transaction {tx_hash} is not the reserved {kind} of safe {safe}"
            ))),
        }
    }

    async fn record_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
        tx: &EthereumTx,
    ) -> Result<FundingFacts> {
        let _guard = self.write_lock.lock().await;

        let next = self.funding(safe)?.record_submission(kind, tx.tx_hash)?;
        let reserved = self.pending.get(&(safe, kind)).map(|pending| *pending);
        if let Some(pending) = reserved.filter(|pending| !pending.same_slot(tx)) {
            return Err(StorageError::Conflict(format!(
                "nonce {} of {} is reserved for the {kind} of safe {safe}",
                pending.nonce, pending.from
            )));
        }
        let consumes = reserved.is_some_and(|pending| pending.tx_hash == tx.tx_hash);
        let claimed = self.submissions.get(&tx.tx_hash).map(|owner| owner.0);
        if let Some(owner) = claimed.filter(|_| !consumes) {
            return Err(StorageError::Conflict(format!(
                "transaction {} is recorded for safe {owner}",
                tx.tx_hash
            )));
        }

        if let Some(pending) = reserved {
            self.pending.remove(&(safe, kind));
            self.submissions.remove(&pending.tx_hash);
        }
        self.submissions.insert(tx.tx_hash, (safe, kind));
        self.upsert_transaction(tx);
        self.fundings.insert(safe, next.clone());
        Ok(next)
    }

    async fn mark_submission_mined(
        &self,
        safe: Address,
        kind: SubmissionKind,
        receipt: &TxReceipt,
    ) -> Result<FundingFacts> {
        let _guard = self.write_lock.lock().await;

        let current = self.funding(safe)?;
        if current.tx_hash(kind) != Some(receipt.tx_hash) {
            return Err(StorageError::Conflict(format!(
                "transaction {} is not the recorded {kind} of safe {safe}",
                receipt.tx_hash
            )));
        }
        let next = current.mark_mined(kind, receipt.block_number)?;

        if let Some(mut tx) = self.transactions.get_mut(&receipt.tx_hash) {
            *tx = tx.clone().with_receipt(receipt);
        }
        self.fundings.insert(safe, next.clone());
        Ok(next)
    }

    async fn rollback_mined(&self, safe: Address) -> Result<FundingFacts> {
        let _guard = self.write_lock.lock().await;

        let current = self.funding(safe)?;
        let next = current.rollback()?;

        let status = current.status().map_err(TransitionError::from)?;
        let rolled_back = SubmissionKind::for_status(status)
            .and_then(|kind| current.tx_hash(kind));
        if let Some(mut tx) = rolled_back.and_then(|hash| self.transactions.get_mut(&hash)) {
            tx.block_number = None;
            tx.gas_used = None;
            tx.status = None;
        }
        self.fundings.insert(safe, next.clone());
        Ok(next)
    }

    async fn wallets_to_reconcile(&self) -> Result<Vec<Address>> {
        let mut wallets: Vec<_> = self.intents.iter().map(|entry| *entry.key()).collect();
        wallets.sort();
        Ok(wallets)
    }

    async fn write_transaction(&self, tx: &EthereumTx) -> Result<()> {
        self.upsert_transaction(tx);
        Ok(())
    }

    async fn read_transaction(&self, tx_hash: B256) -> Result<Option<EthereumTx>> {
        Ok(self.transactions.get(&tx_hash).map(|tx| tx.clone()))
    }

    async fn write_internal_calls(&self, calls: &[InternalCall]) -> Result<()> {
        for call in calls {
            self.internal_calls.entry((call.tx_hash, call.index)).or_insert_with(|| call.clone());
        }
        Ok(())
    }

    async fn read_internal_calls(&self, tx_hash: B256) -> Result<Vec<InternalCall>> {
        let mut calls: Vec<_> = self
            .internal_calls
            .iter()
            .filter(|entry| entry.key().0 == tx_hash)
            .map(|entry| entry.value().clone())
            .collect();
        calls.sort_by_key(|call| call.index);
        Ok(calls)
    }

    async fn write_token_transfers(&self, transfers: &[TokenTransfer]) -> Result<()> {
        for transfer in transfers {
            self.token_transfers
                .entry((transfer.tx_hash, transfer.log_index))
                .or_insert_with(|| transfer.clone());
        }
        Ok(())
    }

    async fn read_token_transfers(&self, safe: Address) -> Result<Vec<TokenTransfer>> {
        let mut transfers: Vec<_> = self
            .token_transfers
            .iter()
            .filter(|entry| entry.value().to == safe)
            .map(|entry| entry.value().clone())
            .collect();
        transfers.sort_by_key(|transfer| (transfer.block_number, transfer.log_index));
        Ok(transfers)
    }

    async fn read_cursor(&self, safe: Address) -> Result<Option<ScanCursor>> {
        Ok(self.cursors.get(&safe).map(|cursor| *cursor))
    }

    async fn write_cursor(&self, cursor: &ScanCursor) -> Result<()> {
        if !self.intents.contains_key(&cursor.safe) {
            return Err(StorageError::UnknownSafe(cursor.safe));
        }
        self.cursors.insert(cursor.safe, *cursor);
        Ok(())
    }

    async fn next_multisig_nonce(&self, safe: Address) -> Result<Option<u64>> {
        Ok(self
            .multisig_txs
            .get(&safe)
            .and_then(|txs| txs.last_key_value().map(|(nonce, _)| nonce + 1)))
    }

    async fn insert_multisig_transaction(
        &self,
        tx: MultisigTransaction,
        expected_nonce: Option<u64>,
    ) -> Result<MultisigTransaction> {
        let _guard = self.write_lock.lock().await;

        let mut txs = self.multisig_txs.entry(tx.safe).or_default();
        let allocated = txs.last_key_value().map(|(nonce, _)| nonce + 1).unwrap_or(tx.nonce);
        if let Some(expected) = expected_nonce.filter(|expected| *expected != allocated) {
            return Err(StorageError::NonceMismatch { expected, allocated });
        }

        let tx = tx.with_nonce(allocated);
        if self.safe_tx_hashes.contains_key(&tx.safe_tx_hash) {
            return Err(StorageError::Conflict(format!(
                "safe transaction {} is stored",
                tx.safe_tx_hash
            )));
        }

        self.safe_tx_hashes.insert(tx.safe_tx_hash, (tx.safe, allocated));
        txs.insert(allocated, tx.clone());
        Ok(tx)
    }

    async fn attach_multisig_ethereum_tx(
        &self,
        safe: Address,
        nonce: u64,
        tx: &EthereumTx,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut txs = self.multisig_txs.get_mut(&safe).ok_or(StorageError::UnknownSafe(safe))?;
        let multisig = txs.get_mut(&nonce).ok_or_else(|| {
            StorageError::InternalError(eyre::eyre!("no multisig transaction {nonce} for {safe}"))
        })?;
        multisig.ethereum_tx = Some(tx.tx_hash);
        self.upsert_transaction(tx);
        Ok(())
    }

    async fn read_multisig_transaction(
        &self,
        safe: Address,
        nonce: u64,
    ) -> Result<Option<MultisigTransaction>> {
        Ok(self.multisig_txs.get(&safe).and_then(|txs| txs.get(&nonce).cloned()))
    }

    async fn read_multisig_transactions_from(
        &self,
        safe: Address,
        nonce: u64,
    ) -> Result<Vec<MultisigTransaction>> {
        Ok(self
            .multisig_txs
            .get(&safe)
            .map(|txs| txs.range(nonce..).map(|(_, tx)| tx.clone()).collect())
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
