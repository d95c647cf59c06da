//! Relay storage implementation using a PostgreSQL database.

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
use eyre::eyre;
use sqlx::{Connection, PgConnection, PgPool, Row, postgres::PgRow};
use tracing::instrument;

/// PostgreSQL storage implementation.
#[derive(Debug)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Creates a new PostgreSQL storage instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Maps unique violations to [`StorageError::Conflict`].
fn db_err(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::Conflict(db.message().to_string())
        }
        _ => StorageError::InternalError(err.into()),
    }
}

fn to_b256(bytes: &[u8]) -> Result<B256> {
    B256::try_from(bytes).map_err(|_| eyre!("invalid hash of length {}", bytes.len()).into())
}

fn to_address(bytes: &[u8]) -> Result<Address> {
    Address::try_from(bytes).map_err(|_| eyre!("invalid address of length {}", bytes.len()).into())
}

fn funding_from_row(safe: Address, row: &PgRow) -> Result<FundingFacts> {
    let hash = |column: &str| -> Result<Option<B256>> {
        row.try_get::<Option<Vec<u8>>, _>(column)
            .map_err(db_err)?
            .map(|bytes| to_b256(&bytes))
            .transpose()
    };

    Ok(FundingFacts {
        safe,
        safe_funded: row.try_get("safe_funded").map_err(db_err)?,
        deployer_funded_tx_hash: hash("deployer_funded_tx_hash")?,
        deployer_funded: row.try_get("deployer_funded").map_err(db_err)?,
        safe_deployed_tx_hash: hash("safe_deployed_tx_hash")?,
        deployed_block_number: row
            .try_get::<Option<i64>, _>("deployed_block_number")
            .map_err(db_err)?
            .map(|block| block as BlockNumber),
    })
}

/// Reads the funding facts of `safe`, locking the row until the transaction ends.
async fn lock_funding(conn: &mut PgConnection, safe: Address) -> Result<FundingFacts> {
    let row = sqlx::query(
        "select safe_funded, deployer_funded_tx_hash, deployer_funded, safe_deployed_tx_hash, deployed_block_number from fundings where safe = $1 for update",
    )
    .bind(safe.as_slice())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?
    .ok_or(StorageError::UnknownSafe(safe))?;

    funding_from_row(safe, &row)
}

async fn write_funding(conn: &mut PgConnection, facts: &FundingFacts) -> Result<()> {
    sqlx::query(
        "update fundings set safe_funded = $2, deployer_funded_tx_hash = $3, deployer_funded = $4, safe_deployed_tx_hash = $5, deployed_block_number = $6, updated_at = now() where safe = $1",
    )
    .bind(facts.safe.as_slice())
    .bind(facts.safe_funded)
    .bind(facts.deployer_funded_tx_hash.map(|hash| hash.to_vec()))
    .bind(facts.deployer_funded)
    .bind(facts.safe_deployed_tx_hash.map(|hash| hash.to_vec()))
    .bind(facts.deployed_block_number.map(|block| block as i64))
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    Ok(())
}

/// Reads the reservation for `kind` of `safe`, locking it until the transaction ends.
async fn lock_pending(
    conn: &mut PgConnection,
    safe: Address,
    kind: SubmissionKind,
) -> Result<Option<PendingSubmission>> {
    let row = sqlx::query(
        "select tx_hash, sender, nonce from submissions where safe = $1 and kind = $2 and pending for update",
    )
    .bind(safe.as_slice())
    .bind(kind.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;

    row.map(|row| pending_from_row(safe, kind, &row)).transpose()
}

fn pending_from_row(safe: Address, kind: SubmissionKind, row: &PgRow) -> Result<PendingSubmission> {
    Ok(PendingSubmission {
        safe,
        kind,
        tx_hash: to_b256(&row.try_get::<Vec<u8>, _>("tx_hash").map_err(db_err)?)?,
        from: to_address(&row.try_get::<Vec<u8>, _>("sender").map_err(db_err)?)?,
        nonce: row.try_get::<i64, _>("nonce").map_err(db_err)? as u64,
    })
}

/// Upserts a transaction, keeping a stored signed envelope.
async fn upsert_transaction(conn: &mut PgConnection, tx: &EthereumTx) -> Result<()> {
    let mut tx = tx.clone();
    if tx.raw.is_none() {
        let stored: Option<serde_json::Value> =
            sqlx::query_scalar("select tx from ethereum_txs where tx_hash = $1")
                .bind(tx.tx_hash.as_slice())
                .fetch_optional(&mut *conn)
                .await
                .map_err(db_err)?;
        if let Some(stored) = stored {
            tx.raw = serde_json::from_value::<EthereumTx>(stored)?.raw;
        }
    }

    sqlx::query(
        "insert into ethereum_txs (tx_hash, tx, block_number) values ($1, $2, $3) on conflict (tx_hash) do update set tx = excluded.tx, block_number = excluded.block_number",
    )
    .bind(tx.tx_hash.as_slice())
    .bind(serde_json::to_value(&tx)?)
    .bind(tx.block_number.map(|block| block as i64))
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    Ok(())
}

#[async_trait]
impl StorageApi for PgStorage {
    #[instrument(skip_all, fields(safe = %intent.safe))]
    async fn insert_intent(
        &self,
        intent: &DeploymentIntent,
        initial_block: BlockNumber,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(eyre::Error::from)?;

        sqlx::query(
            "insert into wallets (address, master_copy, request_key, intent, created_at) values ($1, $2, $3, $4, $5)",
        )
        .bind(intent.safe.as_slice())
        .bind(intent.master_copy.as_slice())
        .bind(intent.request_key().as_slice())
        .bind(serde_json::to_value(intent)?)
        .bind(intent.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("insert into fundings (safe) values ($1)")
            .bind(intent.safe.as_slice())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let cursor = ScanCursor::new(intent.safe, initial_block);
        sqlx::query(
            "insert into scan_cursors (safe, initial_block_number, tx_block_number, erc20_block_number) values ($1, $2, $3, $4)",
        )
        .bind(cursor.safe.as_slice())
        .bind(cursor.initial_block_number as i64)
        .bind(cursor.tx_block_number as i64)
        .bind(cursor.erc20_block_number as i64)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(eyre::Error::from)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_intent(&self, safe: Address) -> Result<Option<DeploymentIntent>> {
        let intent: Option<serde_json::Value> =
            sqlx::query_scalar("select intent from wallets where address = $1")
                .bind(safe.as_slice())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(intent.map(serde_json::from_value).transpose()?)
    }

    #[instrument(skip(self))]
    async fn read_intent_by_request(&self, request_key: B256) -> Result<Option<DeploymentIntent>> {
        let intent: Option<serde_json::Value> =
            sqlx::query_scalar("select intent from wallets where request_key = $1")
                .bind(request_key.as_slice())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(intent.map(serde_json::from_value).transpose()?)
    }

    #[instrument(skip(self))]
    async fn read_funding(&self, safe: Address) -> Result<Option<FundingFacts>> {
        let row = sqlx::query(
            "select safe_funded, deployer_funded_tx_hash, deployer_funded, safe_deployed_tx_hash, deployed_block_number from fundings where safe = $1",
        )
        .bind(safe.as_slice())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| funding_from_row(safe, &row)).transpose()
    }

    #[instrument(skip(self))]
    async fn mark_safe_funded(&self, safe: Address) -> Result<FundingFacts> {
        let mut tx = self.pool.begin().await.map_err(eyre::Error::from)?;

        let next = lock_funding(&mut tx, safe).await?.mark_safe_funded()?;
        write_funding(&mut tx, &next).await?;

        tx.commit().await.map_err(eyre::Error::from)?;
        Ok(next)
    }

    #[instrument(skip(self, ethereum_tx), fields(tx_hash = %ethereum_tx.tx_hash))]
    async fn reserve_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
        ethereum_tx: &EthereumTx,
    ) -> Result<PendingSubmission> {
        let mut tx = self.pool.begin().await.map_err(eyre::Error::from)?;

        lock_funding(&mut tx, safe).await?.record_submission(kind, ethereum_tx.tx_hash)?;
        upsert_transaction(&mut tx, ethereum_tx).await?;

        // the primary key and the partial index on pending rows reject a second claim
        let pending = PendingSubmission::new(safe, kind, ethereum_tx);
        sqlx::query(
            "insert into submissions (tx_hash, safe, kind, sender, nonce, pending) values ($1, $2, $3, $4, $5, true)",
        )
        .bind(pending.tx_hash.as_slice())
        .bind(safe.as_slice())
        .bind(kind.as_str())
        .bind(pending.from.as_slice())
        .bind(pending.nonce as i64)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(eyre::Error::from)?;
        Ok(pending)
    }

    #[instrument(skip(self))]
    async fn read_pending_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
    ) -> Result<Option<PendingSubmission>> {
        let row = sqlx::query(
            "select tx_hash, sender, nonce from submissions where safe = $1 and kind = $2 and pending",
        )
        .bind(safe.as_slice())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| pending_from_row(safe, kind, &row)).transpose()
    }

    #[instrument(skip(self))]
    async fn release_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
        tx_hash: B256,
    ) -> Result<()> {
        let result = sqlx::query(
            "delete from submissions where tx_hash = $1 and safe = $2 and kind = $3 and pending",
        )
        .bind(tx_hash.as_slice())
        .bind(safe.as_slice())
        .bind(kind.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!(
                "transaction {tx_hash} is not the reserved {kind} of safe {safe}"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, ethereum_tx), fields(tx_hash = %ethereum_tx.tx_hash))]
    async fn record_submission(
        &self,
        safe: Address,
        kind: SubmissionKind,
        ethereum_tx: &EthereumTx,
    ) -> Result<FundingFacts> {
        let mut tx = self.pool.begin().await.map_err(eyre::Error::from)?;

        let next = lock_funding(&mut tx, safe)
            .await?
            .record_submission(kind, ethereum_tx.tx_hash)?;

        let reserved = lock_pending(&mut tx, safe, kind).await?;
        if let Some(pending) = reserved.filter(|pending| !pending.same_slot(ethereum_tx)) {
            return Err(StorageError::Conflict(format!(
                "nonce {} of {} is reserved for the {kind} of safe {safe}",
                pending.nonce, pending.from
            )));
        }
        if let Some(pending) = reserved.filter(|pending| pending.tx_hash != ethereum_tx.tx_hash) {
            sqlx::query("delete from submissions where tx_hash = $1")
                .bind(pending.tx_hash.as_slice())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        upsert_transaction(&mut tx, ethereum_tx).await?;

        // only the reservation of this safe and step may be taken over
        let claimed = sqlx::query(
            "insert into submissions (tx_hash, safe, kind, sender, nonce, pending) values ($1, $2, $3, $4, $5, false) on conflict (tx_hash) do update set pending = false where submissions.safe = excluded.safe and submissions.kind = excluded.kind and submissions.pending",
        )
        .bind(ethereum_tx.tx_hash.as_slice())
        .bind(safe.as_slice())
        .bind(kind.as_str())
        .bind(ethereum_tx.from.as_slice())
        .bind(ethereum_tx.nonce as i64)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if claimed.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!(
                "transaction {} is recorded for another submission",
                ethereum_tx.tx_hash
            )));
        }

        write_funding(&mut tx, &next).await?;

        tx.commit().await.map_err(eyre::Error::from)?;
        Ok(next)
    }

    #[instrument(skip(self, receipt), fields(tx_hash = %receipt.tx_hash))]
    async fn mark_submission_mined(
        &self,
        safe: Address,
        kind: SubmissionKind,
        receipt: &TxReceipt,
    ) -> Result<FundingFacts> {
        let mut tx = self.pool.begin().await.map_err(eyre::Error::from)?;

        let current = lock_funding(&mut tx, safe).await?;
        if current.tx_hash(kind) != Some(receipt.tx_hash) {
            return Err(StorageError::Conflict(format!(
                "transaction {} is not the recorded {kind} of safe {safe}",
                receipt.tx_hash
            )));
        }
        let next = current.mark_mined(kind, receipt.block_number)?;

        let stored: Option<serde_json::Value> =
            sqlx::query_scalar("select tx from ethereum_txs where tx_hash = $1")
                .bind(receipt.tx_hash.as_slice())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
        if let Some(stored) = stored {
            let mined = serde_json::from_value::<EthereumTx>(stored)?.with_receipt(receipt);
            upsert_transaction(&mut tx, &mined).await?;
        }
        write_funding(&mut tx, &next).await?;

        tx.commit().await.map_err(eyre::Error::from)?;
        Ok(next)
    }

    #[instrument(skip(self))]
    async fn rollback_mined(&self, safe: Address) -> Result<FundingFacts> {
        let mut tx = self.pool.begin().await.map_err(eyre::Error::from)?;

        let current = lock_funding(&mut tx, safe).await?;
        let next = current.rollback()?;

        let status = current.status().map_err(TransitionError::from)?;
        if let Some(hash) = SubmissionKind::for_status(status).and_then(|kind| current.tx_hash(kind))
        {
            let stored: Option<serde_json::Value> =
                sqlx::query_scalar("select tx from ethereum_txs where tx_hash = $1")
                    .bind(hash.as_slice())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?;
            if let Some(stored) = stored {
                let mut unmined = serde_json::from_value::<EthereumTx>(stored)?;
                unmined.block_number = None;
                unmined.gas_used = None;
                unmined.status = None;
                upsert_transaction(&mut tx, &unmined).await?;
            }
        }
        write_funding(&mut tx, &next).await?;

        tx.commit().await.map_err(eyre::Error::from)?;
        Ok(next)
    }

    #[instrument(skip(self))]
    async fn wallets_to_reconcile(&self) -> Result<Vec<Address>> {
        let rows: Vec<Vec<u8>> = sqlx::query_scalar("select address from wallets order by address")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(|bytes| to_address(&bytes)).collect()
    }

    #[instrument(skip_all, fields(tx_hash = %tx.tx_hash))]
    async fn write_transaction(&self, tx: &EthereumTx) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(eyre::Error::from)?;
        upsert_transaction(&mut conn, tx).await
    }

    #[instrument(skip(self))]
    async fn read_transaction(&self, tx_hash: B256) -> Result<Option<EthereumTx>> {
        let tx: Option<serde_json::Value> =
            sqlx::query_scalar("select tx from ethereum_txs where tx_hash = $1")
                .bind(tx_hash.as_slice())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(tx.map(serde_json::from_value).transpose()?)
    }

    #[instrument(skip_all, fields(calls = calls.len()))]
    async fn write_internal_calls(&self, calls: &[InternalCall]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(eyre::Error::from)?;

        for call in calls {
            sqlx::query(
                "insert into internal_txs (tx_hash, idx, call) values ($1, $2, $3) on conflict (tx_hash, idx) do nothing",
            )
            .bind(call.tx_hash.as_slice())
            .bind(call.index as i32)
            .bind(serde_json::to_value(call)?)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(eyre::Error::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_internal_calls(&self, tx_hash: B256) -> Result<Vec<InternalCall>> {
        let calls: Vec<serde_json::Value> =
            sqlx::query_scalar("select call from internal_txs where tx_hash = $1 order by idx")
                .bind(tx_hash.as_slice())
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(calls.into_iter().map(serde_json::from_value).collect::<serde_json::Result<_>>()?)
    }

    #[instrument(skip_all, fields(transfers = transfers.len()))]
    async fn write_token_transfers(&self, transfers: &[TokenTransfer]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(eyre::Error::from)?;

        for transfer in transfers {
            sqlx::query(
                "insert into token_transfers (tx_hash, log_index, safe, block_number, transfer) values ($1, $2, $3, $4, $5) on conflict (tx_hash, log_index) do nothing",
            )
            .bind(transfer.tx_hash.as_slice())
            .bind(transfer.log_index as i64)
            .bind(transfer.to.as_slice())
            .bind(transfer.block_number as i64)
            .bind(serde_json::to_value(transfer)?)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(eyre::Error::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_token_transfers(&self, safe: Address) -> Result<Vec<TokenTransfer>> {
        let transfers: Vec<serde_json::Value> = sqlx::query_scalar(
            "select transfer from token_transfers where safe = $1 order by block_number, log_index",
        )
        .bind(safe.as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(transfers.into_iter().map(serde_json::from_value).collect::<serde_json::Result<_>>()?)
    }

    #[instrument(skip(self))]
    async fn read_cursor(&self, safe: Address) -> Result<Option<ScanCursor>> {
        let row = sqlx::query(
            "select initial_block_number, tx_block_number, erc20_block_number from scan_cursors where safe = $1",
        )
        .bind(safe.as_slice())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| {
            Ok(ScanCursor {
                safe,
                initial_block_number: row
                    .try_get::<i64, _>("initial_block_number")
                    .map_err(db_err)? as BlockNumber,
                tx_block_number: row.try_get::<i64, _>("tx_block_number").map_err(db_err)?
                    as BlockNumber,
                erc20_block_number: row.try_get::<i64, _>("erc20_block_number").map_err(db_err)?
                    as BlockNumber,
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn write_cursor(&self, cursor: &ScanCursor) -> Result<()> {
        let result = sqlx::query(
            "update scan_cursors set tx_block_number = $2, erc20_block_number = $3 where safe = $1",
        )
        .bind(cursor.safe.as_slice())
        .bind(cursor.tx_block_number as i64)
        .bind(cursor.erc20_block_number as i64)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::UnknownSafe(cursor.safe));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn next_multisig_nonce(&self, safe: Address) -> Result<Option<u64>> {
        let last: Option<i64> =
            sqlx::query_scalar("select max(nonce) from multisig_txs where safe = $1")
                .bind(safe.as_slice())
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(last.map(|nonce| nonce as u64 + 1))
    }

    #[instrument(skip(self, multisig), fields(safe = %multisig.safe))]
    async fn insert_multisig_transaction(
        &self,
        multisig: MultisigTransaction,
        expected_nonce: Option<u64>,
    ) -> Result<MultisigTransaction> {
        let mut tx = self.pool.begin().await.map_err(eyre::Error::from)?;

        // serialise allocations per safe on the wallet row
        sqlx::query("select 1 from wallets where address = $1 for update")
            .bind(multisig.safe.as_slice())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or(StorageError::UnknownSafe(multisig.safe))?;

        let last: Option<i64> =
            sqlx::query_scalar("select max(nonce) from multisig_txs where safe = $1")
                .bind(multisig.safe.as_slice())
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;
        let allocated = last.map(|nonce| nonce as u64 + 1).unwrap_or(multisig.nonce);
        if let Some(expected) = expected_nonce.filter(|expected| *expected != allocated) {
            return Err(StorageError::NonceMismatch { expected, allocated });
        }

        let multisig = multisig.with_nonce(allocated);
        sqlx::query(
            "insert into multisig_txs (safe, nonce, safe_tx_hash, tx) values ($1, $2, $3, $4)",
        )
        .bind(multisig.safe.as_slice())
        .bind(allocated as i64)
        .bind(multisig.safe_tx_hash.as_slice())
        .bind(serde_json::to_value(&multisig)?)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(eyre::Error::from)?;
        Ok(multisig)
    }

    #[instrument(skip(self, ethereum_tx), fields(tx_hash = %ethereum_tx.tx_hash))]
    async fn attach_multisig_ethereum_tx(
        &self,
        safe: Address,
        nonce: u64,
        ethereum_tx: &EthereumTx,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(eyre::Error::from)?;

        upsert_transaction(&mut tx, ethereum_tx).await?;

        let stored: Option<serde_json::Value> = sqlx::query_scalar(
            "select tx from multisig_txs where safe = $1 and nonce = $2 for update",
        )
        .bind(safe.as_slice())
        .bind(nonce as i64)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;
        let mut multisig = serde_json::from_value::<MultisigTransaction>(
            stored.ok_or_else(|| eyre!("no multisig transaction {nonce} for {safe}"))?,
        )?;
        multisig.ethereum_tx = Some(ethereum_tx.tx_hash);

        sqlx::query(
            "update multisig_txs set ethereum_tx = $3, tx = $4 where safe = $1 and nonce = $2",
        )
        .bind(safe.as_slice())
        .bind(nonce as i64)
        .bind(ethereum_tx.tx_hash.as_slice())
        .bind(serde_json::to_value(&multisig)?)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(eyre::Error::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn read_multisig_transaction(
        &self,
        safe: Address,
        nonce: u64,
    ) -> Result<Option<MultisigTransaction>> {
        let tx: Option<serde_json::Value> =
            sqlx::query_scalar("select tx from multisig_txs where safe = $1 and nonce = $2")
                .bind(safe.as_slice())
                .bind(nonce as i64)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(tx.map(serde_json::from_value).transpose()?)
    }

    #[instrument(skip(self))]
    async fn read_multisig_transactions_from(
        &self,
        safe: Address,
        nonce: u64,
    ) -> Result<Vec<MultisigTransaction>> {
        let txs: Vec<serde_json::Value> = sqlx::query_scalar(
            "select tx from multisig_txs where safe = $1 and nonce >= $2 order by nonce",
        )
        .bind(safe.as_slice())
        .bind(nonce as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(txs.into_iter().map(serde_json::from_value).collect::<serde_json::Result<_>>()?)
    }

    async fn ping(&self) -> Result<()> {
        if let Some(mut connection) = self.pool.try_acquire() {
            connection.ping().await.map_err(eyre::Error::from).map_err(Into::into)
        } else {
            Err(eyre!("no connection to database").into())
        }
    }
}
