//! Behaviour every [`StorageApi`] backend must share.
//!
//! Runs against the in-memory backend, and against Postgres too when `DATABASE_URL` is set.

use alloy::primitives::{Address, B256, Bytes, U256, address};
use chrono::DateTime;
use futures_util::future::join_all;
use safe_relay::{
    error::StorageError,
    storage::{RelayStorage, StorageApi},
    types::{
        CallType, DeploymentIntent, EthereumTx, FundingStatus, InternalCall, MultisigTransaction,
        SafeTxParams, SubmissionKind, TokenTransfer, TxReceipt, status::TransitionError,
    },
};
use sqlx::PgPool;

const INITIAL_BLOCK: u64 = 100;

async fn backends() -> eyre::Result<Vec<RelayStorage>> {
    let mut backends = vec![RelayStorage::in_memory()];
    if let Ok(url) = std::env::var("DATABASE_URL") {
        let pool = PgPool::connect(&url).await?;
        sqlx::migrate!().run(&pool).await?;
        backends.push(RelayStorage::pg(pool));
    }
    Ok(backends)
}

fn intent(safe: Address, salt: U256) -> DeploymentIntent {
    DeploymentIntent {
        safe,
        deployer: address!("0x00000000000000000000000000000000000000de"),
        funder: address!("0x00000000000000000000000000000000000000f0"),
        proxy_factory: address!("0xa6B71E26C5e0845f74c812102Ca7114b6a896AB2"),
        master_copy: address!("0xd9Db270c1B5E3Bd161E8c8503c55cEABeE709552"),
        salt_nonce: salt,
        owners: vec![Address::with_last_byte(1), Address::with_last_byte(2)],
        threshold: 1,
        payment_token: None,
        payment: U256::from(1_000_000u64),
        payment_receiver: address!("0x00000000000000000000000000000000000000f0"),
        setup_data: Bytes::from_static(&[0xb6, 0x3e, 0x80, 0x0d]),
        gas_estimated: 300_000,
        gas_price_estimated: 1_000_000_000,
        created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
    }
}

/// A fresh Safe address, so that runs against a shared database never collide.
fn random_safe() -> Address {
    Address::random()
}

fn sent_tx(tx_hash: B256) -> EthereumTx {
    EthereumTx {
        tx_hash,
        from: address!("0x00000000000000000000000000000000000000f0"),
        to: Some(address!("0x00000000000000000000000000000000000000de")),
        value: U256::from(300_000_000_000_000u64),
        gas: 21_000,
        gas_price: 1_000_000_000,
        data: Bytes::new(),
        nonce: 0,
        raw: Some(Bytes::from_static(&[0xf8, 0x6b])),
        block_number: None,
        gas_used: None,
        status: None,
    }
}

fn sent_with_nonce(tx_hash: B256, nonce: u64) -> EthereumTx {
    EthereumTx { nonce, ..sent_tx(tx_hash) }
}

fn receipt(tx_hash: B256, block_number: u64) -> TxReceipt {
    TxReceipt { tx_hash, block_number, block_hash: B256::random(), gas_used: 21_000, success: true }
}

async fn register(storage: &RelayStorage) -> eyre::Result<Address> {
    let safe = random_safe();
    storage.insert_intent(&intent(safe, rand_salt()), INITIAL_BLOCK).await?;
    Ok(safe)
}

fn rand_salt() -> U256 {
    U256::from_be_bytes(B256::random().0)
}

fn status(facts: &safe_relay::types::FundingFacts) -> FundingStatus {
    facts.status().unwrap()
}

#[tokio::test]
async fn registers_intents_once() -> eyre::Result<()> {
    for storage in backends().await? {
        let safe = random_safe();
        let salt = rand_salt();
        let stored = intent(safe, salt);
        storage.insert_intent(&stored, INITIAL_BLOCK).await?;

        assert_eq!(storage.read_intent(safe).await?, Some(stored.clone()));
        assert_eq!(storage.read_intent_by_request(stored.request_key()).await?, Some(stored.clone()));
        assert_eq!(status(&storage.read_funding(safe).await?.unwrap()), FundingStatus::NotFunded);

        let cursor = storage.read_cursor(safe).await?.unwrap();
        assert_eq!(cursor.tx_block_number, INITIAL_BLOCK);
        assert_eq!(cursor.erc20_block_number, INITIAL_BLOCK);

        // same Safe
        assert!(matches!(
            storage.insert_intent(&stored, INITIAL_BLOCK).await,
            Err(StorageError::Conflict(_))
        ));
        // same request under another address
        assert!(matches!(
            storage.insert_intent(&intent(random_safe(), salt), INITIAL_BLOCK).await,
            Err(StorageError::Conflict(_))
        ));

        assert!(storage.wallets_to_reconcile().await?.contains(&safe));
        assert_eq!(storage.read_intent(random_safe()).await?, None);
    }
    Ok(())
}

#[tokio::test]
async fn status_only_moves_along_the_ladder() -> eyre::Result<()> {
    for storage in backends().await? {
        let safe = register(&storage).await?;
        let funding = B256::random();
        let deployment = B256::random();

        // nothing can be recorded before the Safe is funded
        assert!(matches!(
            storage.record_submission(safe, SubmissionKind::DeployerFunding, &sent_tx(funding)).await,
            Err(StorageError::Transition(TransitionError::Illegal { .. }))
        ));

        storage.mark_safe_funded(safe).await?;
        assert!(matches!(
            storage.mark_safe_funded(safe).await,
            Err(StorageError::Transition(TransitionError::Illegal { .. }))
        ));

        let facts = storage
            .record_submission(safe, SubmissionKind::DeployerFunding, &sent_tx(funding))
            .await?;
        assert_eq!(status(&facts), FundingStatus::DeployerFundedUnconfirmed);
        assert!(matches!(
            storage
                .record_submission(safe, SubmissionKind::DeployerFunding, &sent_tx(B256::random()))
                .await,
            Err(StorageError::Transition(TransitionError::AlreadySubmitted(
                SubmissionKind::DeployerFunding
            )))
        ));

        // a receipt of another transaction confirms nothing
        assert!(matches!(
            storage
                .mark_submission_mined(safe, SubmissionKind::DeployerFunding, &receipt(B256::random(), 101))
                .await,
            Err(StorageError::Conflict(_))
        ));

        let facts = storage
            .mark_submission_mined(safe, SubmissionKind::DeployerFunding, &receipt(funding, 101))
            .await?;
        assert_eq!(status(&facts), FundingStatus::DeployerFunded);
        assert_eq!(storage.read_transaction(funding).await?.unwrap().block_number, Some(101));

        storage.record_submission(safe, SubmissionKind::Deployment, &sent_tx(deployment)).await?;
        let facts = storage
            .mark_submission_mined(safe, SubmissionKind::Deployment, &receipt(deployment, 105))
            .await?;
        assert_eq!(status(&facts), FundingStatus::Deployed);
        assert_eq!(facts.deployed_block_number, Some(105));

        assert!(matches!(
            storage.record_submission(safe, SubmissionKind::Deployment, &sent_tx(B256::random())).await,
            Err(StorageError::Transition(TransitionError::AlreadyDeployed))
        ));
    }
    Ok(())
}

#[tokio::test]
async fn rollback_keeps_the_hash() -> eyre::Result<()> {
    for storage in backends().await? {
        let safe = register(&storage).await?;
        let funding = B256::random();

        assert!(matches!(
            storage.rollback_mined(safe).await,
            Err(StorageError::Transition(TransitionError::NothingToRollBack(
                FundingStatus::NotFunded
            )))
        ));

        storage.mark_safe_funded(safe).await?;
        storage.record_submission(safe, SubmissionKind::DeployerFunding, &sent_tx(funding)).await?;
        storage
            .mark_submission_mined(safe, SubmissionKind::DeployerFunding, &receipt(funding, 101))
            .await?;

        let facts = storage.rollback_mined(safe).await?;
        assert_eq!(status(&facts), FundingStatus::DeployerFundedUnconfirmed);
        assert_eq!(facts.deployer_funded_tx_hash, Some(funding));

        let tx = storage.read_transaction(funding).await?.unwrap();
        assert_eq!(tx.block_number, None);
        assert_eq!(tx.raw, sent_tx(funding).raw);
    }
    Ok(())
}

#[tokio::test]
async fn submission_hashes_belong_to_one_safe() -> eyre::Result<()> {
    for storage in backends().await? {
        let first = register(&storage).await?;
        let second = register(&storage).await?;
        let shared = B256::random();

        for safe in [first, second] {
            storage.mark_safe_funded(safe).await?;
        }
        storage.record_submission(first, SubmissionKind::DeployerFunding, &sent_tx(shared)).await?;
        assert!(matches!(
            storage.record_submission(second, SubmissionKind::DeployerFunding, &sent_tx(shared)).await,
            Err(StorageError::Conflict(_))
        ));
        assert_eq!(
            status(&storage.read_funding(second).await?.unwrap()),
            FundingStatus::FundedAwaitingDeployer
        );
    }
    Ok(())
}

#[tokio::test]
async fn one_hash_is_one_submission() -> eyre::Result<()> {
    for storage in backends().await? {
        let first = register(&storage).await?;
        let second = register(&storage).await?;
        let shared = B256::random();
        let own_funding = B256::random();

        for safe in [first, second] {
            storage.mark_safe_funded(safe).await?;
        }
        storage.record_submission(first, SubmissionKind::DeployerFunding, &sent_tx(shared)).await?;
        storage
            .record_submission(second, SubmissionKind::DeployerFunding, &sent_tx(own_funding))
            .await?;
        storage
            .mark_submission_mined(second, SubmissionKind::DeployerFunding, &receipt(own_funding, 101))
            .await?;

        // another Safe's funding
        assert!(matches!(
            storage.record_submission(second, SubmissionKind::Deployment, &sent_tx(shared)).await,
            Err(StorageError::Conflict(_))
        ));
        assert!(matches!(
            storage.reserve_submission(second, SubmissionKind::Deployment, &sent_tx(shared)).await,
            Err(StorageError::Conflict(_))
        ));
        // its own funding
        assert!(matches!(
            storage
                .record_submission(second, SubmissionKind::Deployment, &sent_tx(own_funding))
                .await,
            Err(StorageError::Conflict(_))
        ));

        let facts = storage.read_funding(second).await?.unwrap();
        assert_eq!(status(&facts), FundingStatus::DeployerFunded);
        assert_eq!(facts.safe_deployed_tx_hash, None);
        assert_eq!(storage.read_pending_submission(second, SubmissionKind::Deployment).await?, None);
    }
    Ok(())
}

#[tokio::test]
async fn reservations_hold_one_sender_slot() -> eyre::Result<()> {
    for storage in backends().await? {
        let safe = register(&storage).await?;
        let kind = SubmissionKind::DeployerFunding;
        let reserved = sent_with_nonce(B256::random(), 3);

        // nothing to reserve before the Safe is funded
        assert!(matches!(
            storage.reserve_submission(safe, kind, &reserved).await,
            Err(StorageError::Transition(TransitionError::Illegal { .. }))
        ));
        storage.mark_safe_funded(safe).await?;

        let pending = storage.reserve_submission(safe, kind, &reserved).await?;
        assert_eq!((pending.tx_hash, pending.from, pending.nonce), (reserved.tx_hash, reserved.from, 3));
        assert_eq!(storage.read_pending_submission(safe, kind).await?, Some(pending));
        assert_eq!(storage.read_transaction(reserved.tx_hash).await?.unwrap().raw, reserved.raw);
        assert_eq!(
            status(&storage.read_funding(safe).await?.unwrap()),
            FundingStatus::FundedAwaitingDeployer
        );

        assert!(matches!(
            storage.reserve_submission(safe, kind, &sent_with_nonce(B256::random(), 4)).await,
            Err(StorageError::Conflict(_))
        ));
        assert!(matches!(
            storage.release_submission(safe, kind, B256::random()).await,
            Err(StorageError::Conflict(_))
        ));
        assert!(matches!(
            storage.record_submission(safe, kind, &sent_with_nonce(B256::random(), 4)).await,
            Err(StorageError::Conflict(_))
        ));
        assert_eq!(storage.read_pending_submission(safe, kind).await?, Some(pending));

        // a transaction in the reserved slot consumes the reservation
        let mined = sent_with_nonce(B256::random(), 3);
        let facts = storage.record_submission(safe, kind, &mined).await?;
        assert_eq!(status(&facts), FundingStatus::DeployerFundedUnconfirmed);
        assert_eq!(facts.deployer_funded_tx_hash, Some(mined.tx_hash));
        assert_eq!(storage.read_pending_submission(safe, kind).await?, None);
    }
    Ok(())
}

#[tokio::test]
async fn released_reservations_free_the_step() -> eyre::Result<()> {
    for storage in backends().await? {
        let safe = register(&storage).await?;
        let kind = SubmissionKind::DeployerFunding;
        storage.mark_safe_funded(safe).await?;

        let stale = sent_with_nonce(B256::random(), 1);
        storage.reserve_submission(safe, kind, &stale).await?;
        storage.release_submission(safe, kind, stale.tx_hash).await?;
        assert_eq!(storage.read_pending_submission(safe, kind).await?, None);

        let fresh = sent_with_nonce(B256::random(), 2);
        storage.reserve_submission(safe, kind, &fresh).await?;
        let facts = storage.record_submission(safe, kind, &fresh).await?;
        assert_eq!(facts.deployer_funded_tx_hash, Some(fresh.tx_hash));
        assert_eq!(storage.read_pending_submission(safe, kind).await?, None);
    }
    Ok(())
}

#[tokio::test]
async fn internal_calls_follow_their_transaction() -> eyre::Result<()> {
    for storage in backends().await? {
        let tx_hash = B256::random();
        let calls: Vec<_> = (0..2u32)
            .map(|index| InternalCall {
                tx_hash,
                index,
                from: Address::with_last_byte(0x10),
                to: Some(Address::with_last_byte(0x20 + index as u8)),
                value: U256::from(index),
                call_type: Some(CallType::Call),
                contract_address: None,
                error: None,
            })
            .collect();

        storage.write_transaction(&sent_tx(tx_hash)).await?;
        storage.write_internal_calls(&calls).await?;
        storage.write_internal_calls(&calls[..1]).await?;
        assert_eq!(storage.read_internal_calls(tx_hash).await?, calls);
        assert!(storage.read_internal_calls(B256::random()).await?.is_empty());
    }
    Ok(())
}

#[tokio::test]
async fn observed_transactions_keep_the_envelope() -> eyre::Result<()> {
    for storage in backends().await? {
        let tx_hash = B256::random();
        storage.write_transaction(&sent_tx(tx_hash)).await?;

        let mut observed = sent_tx(tx_hash);
        observed.raw = None;
        observed = observed.with_receipt(&receipt(tx_hash, 120));
        storage.write_transaction(&observed).await?;

        let stored = storage.read_transaction(tx_hash).await?.unwrap();
        assert_eq!(stored.block_number, Some(120));
        assert_eq!(stored.status, Some(true));
        assert_eq!(stored.raw, sent_tx(tx_hash).raw);
    }
    Ok(())
}

#[tokio::test]
async fn token_transfers_are_stored_once() -> eyre::Result<()> {
    for storage in backends().await? {
        let safe = register(&storage).await?;
        let transfer = TokenTransfer {
            tx_hash: B256::random(),
            log_index: 3,
            token: Address::with_last_byte(0xd1),
            from: Address::with_last_byte(0x33),
            to: safe,
            value: U256::from(5),
            block_number: 110,
        };

        storage.write_token_transfers(&[transfer.clone()]).await?;
        storage.write_token_transfers(&[transfer.clone()]).await?;
        assert_eq!(storage.read_token_transfers(safe).await?, vec![transfer]);

        let mut cursor = storage.read_cursor(safe).await?.unwrap();
        cursor.erc20_block_number = 110;
        storage.write_cursor(&cursor).await?;
        assert_eq!(storage.read_cursor(safe).await?, Some(cursor));
    }
    Ok(())
}

#[tokio::test]
async fn allocates_consecutive_multisig_nonces() -> eyre::Result<()> {
    for storage in backends().await? {
        let safe = register(&storage).await?;
        assert_eq!(storage.next_multisig_nonce(safe).await?, None);

        let inserts = (0..8u64).map(|i| {
            let storage = storage.clone();
            let params = SafeTxParams { value: U256::from(i), ..Default::default() };
            async move {
                storage
                    .insert_multisig_transaction(
                        MultisigTransaction::new(safe, 0, params, Bytes::new()),
                        None,
                    )
                    .await
            }
        });
        let mut nonces = join_all(inserts)
            .await
            .into_iter()
            .map(|stored| stored.map(|tx| tx.nonce))
            .collect::<Result<Vec<_>, _>>()?;
        nonces.sort();
        assert_eq!(nonces, (0..8).collect::<Vec<_>>());
        assert_eq!(storage.next_multisig_nonce(safe).await?, Some(8));

        // the hash follows the allocated nonce
        let stored = storage.read_multisig_transaction(safe, 5).await?.unwrap();
        assert_eq!(stored.safe_tx_hash, stored.params.safe_tx_hash(safe, 5));

        let params = SafeTxParams { value: U256::from(100), ..Default::default() };
        assert!(matches!(
            storage
                .insert_multisig_transaction(
                    MultisigTransaction::new(safe, 3, params.clone(), Bytes::new()),
                    Some(3),
                )
                .await,
            Err(StorageError::NonceMismatch { expected: 3, allocated: 8 })
        ));
        let stored = storage
            .insert_multisig_transaction(MultisigTransaction::new(safe, 8, params, Bytes::new()), Some(8))
            .await?;
        assert_eq!(stored.nonce, 8);

        let exec = B256::random();
        storage.attach_multisig_ethereum_tx(safe, 8, &sent_tx(exec)).await?;
        assert_eq!(
            storage.read_multisig_transaction(safe, 8).await?.unwrap().ethereum_tx,
            Some(exec)
        );
        assert!(storage.read_transaction(exec).await?.is_some());
    }
    Ok(())
}

#[tokio::test]
async fn first_multisig_nonce_follows_the_request() -> eyre::Result<()> {
    for storage in backends().await? {
        let safe = register(&storage).await?;
        let stored = storage
            .insert_multisig_transaction(
                MultisigTransaction::new(safe, 4, SafeTxParams::default(), Bytes::new()),
                Some(4),
            )
            .await?;
        assert_eq!(stored.nonce, 4);
        assert_eq!(storage.next_multisig_nonce(safe).await?, Some(5));
    }
    Ok(())
}

#[tokio::test]
async fn reads_multisig_transactions_from_a_nonce() -> eyre::Result<()> {
    for storage in backends().await? {
        let safe = register(&storage).await?;
        assert!(storage.read_multisig_transactions_from(safe, 0).await?.is_empty());

        for nonce in 0..4u64 {
            let params = SafeTxParams { value: U256::from(nonce), ..Default::default() };
            storage
                .insert_multisig_transaction(
                    MultisigTransaction::new(safe, nonce, params, Bytes::new()),
                    Some(nonce),
                )
                .await?;
        }

        let nonces: Vec<_> = storage
            .read_multisig_transactions_from(safe, 2)
            .await?
            .into_iter()
            .map(|tx| tx.nonce)
            .collect();
        assert_eq!(nonces, vec![2, 3]);
        assert!(storage.read_multisig_transactions_from(safe, 4).await?.is_empty());
    }
    Ok(())
}
