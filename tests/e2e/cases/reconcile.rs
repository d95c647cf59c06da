use crate::e2e::{Environment, PAYMENT_TOKEN, addresses, sorted_owners};
use alloy::primitives::{Address, B256, Bytes, U256};
use safe_relay::{
    error::{LeaseError, RelayError},
    lease::{LeaseConfig, wallet_key},
    storage::StorageApi,
    submission::SubmitOutcome,
    types::{
        CallType, EthereumTx, FundingStatus, InternalCall, SubmissionKind,
        rpc::CreateSafeParameters,
    },
};
use std::time::Duration;

fn external_tx(tx_hash: B256, from: Address, to: Address, value: U256) -> EthereumTx {
    EthereumTx {
        tx_hash,
        from,
        to: Some(to),
        value,
        gas: 21_000,
        gas_price: 1_000_000_000,
        data: Bytes::new(),
        nonce: 0,
        raw: None,
        block_number: None,
        gas_used: None,
        status: None,
    }
}

#[tokio::test]
async fn reorged_deployment_is_rolled_back_and_rebroadcast() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let intent = env.deploy_safe(&addresses(&sorted_owners(1)), 1).await?;
    let facts = env.storage.read_funding(intent.safe).await?.unwrap();
    let deploy_hash = facts.safe_deployed_tx_hash.unwrap();
    let mined_in = facts.deployed_block_number.unwrap();

    env.node.reorg_out(deploy_hash);
    let report = env.reconcile(intent.safe).await?;
    assert!(report.rolled_back);
    assert_eq!(report.status, FundingStatus::DeployedUnconfirmed);

    let facts = env.storage.read_funding(intent.safe).await?.unwrap();
    assert_eq!(facts.safe_deployed_tx_hash, Some(deploy_hash));
    assert_eq!(facts.deployed_block_number, None);
    assert_eq!(env.storage.read_transaction(deploy_hash).await?.unwrap().block_number, None);

    // the very same transaction goes out again
    assert_eq!(
        env.submit(intent.safe).await?,
        SubmitOutcome::Rebroadcast { tx_hash: deploy_hash }
    );

    let block = env.mine_confirmed(deploy_hash);
    assert_ne!(block, mined_in);
    let report = env.reconcile(intent.safe).await?;
    assert_eq!(report.confirmed, Some(SubmissionKind::Deployment));
    assert_eq!(report.status, FundingStatus::Deployed);
    assert_eq!(
        env.storage.read_funding(intent.safe).await?.unwrap().deployed_block_number,
        Some(block)
    );

    Ok(())
}

#[tokio::test]
async fn deep_confirmations_are_not_rechecked() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let intent = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;
    env.node.set_balance(intent.safe, intent.payment);
    env.reconcile(intent.safe).await?;

    let SubmitOutcome::Submitted { tx_hash, .. } = env.submit(intent.safe).await? else {
        panic!("expected the deployer funding");
    };
    env.mine_confirmed(tx_hash);
    assert_eq!(env.reconcile(intent.safe).await?.status, FundingStatus::DeployerFunded);

    env.node.advance(100);
    env.node.reorg_out(tx_hash);
    let report = env.reconcile(intent.safe).await?;
    assert!(!report.rolled_back);
    assert_eq!(report.status, FundingStatus::DeployerFunded);

    Ok(())
}

#[tokio::test]
async fn shallow_reorg_of_deployer_funding() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let intent = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;
    env.node.set_balance(intent.safe, intent.payment);
    env.reconcile(intent.safe).await?;

    let SubmitOutcome::Submitted { tx_hash, .. } = env.submit(intent.safe).await? else {
        panic!("expected the deployer funding");
    };
    env.mine_confirmed(tx_hash);
    assert_eq!(env.reconcile(intent.safe).await?.status, FundingStatus::DeployerFunded);

    env.node.reorg_out(tx_hash);
    let report = env.reconcile(intent.safe).await?;
    assert!(report.rolled_back);
    assert_eq!(report.status, FundingStatus::DeployerFundedUnconfirmed);

    let facts = env.storage.read_funding(intent.safe).await?.unwrap();
    assert_eq!(facts.deployer_funded_tx_hash, Some(tx_hash));

    Ok(())
}

#[tokio::test]
async fn adopts_reserved_funding_mined_before_it_was_recorded() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let intent = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;
    env.node.set_balance(intent.safe, intent.payment);
    env.reconcile(intent.safe).await?;

    // the transfer reaches the node, the answer does not reach the relay
    env.node.set_lose_acks(true);
    assert!(env.submitter.submit_if_authorized(intent.safe).await.is_err());
    env.node.set_lose_acks(false);
    let pending = env
        .storage
        .read_pending_submission(intent.safe, SubmissionKind::DeployerFunding)
        .await?
        .unwrap();

    // a transfer of another amount is not ours
    let foreign = B256::repeat_byte(0xaa);
    env.node.mine_external(
        EthereumTx {
            nonce: 7,
            ..external_tx(foreign, intent.funder, intent.deployer, U256::from(1))
        },
        Vec::new(),
    );
    // neither is one of the same amount with another funder nonce
    let other_nonce = B256::repeat_byte(0xbb);
    env.node.mine_external(
        EthereumTx {
            nonce: pending.nonce + 5,
            ..external_tx(other_nonce, intent.funder, intent.deployer, intent.funding_amount())
        },
        Vec::new(),
    );
    env.mine_confirmed(pending.tx_hash);

    let report = env.reconcile(intent.safe).await?;
    assert_eq!(report.adopted, Some(pending.tx_hash));
    assert_eq!(report.status, FundingStatus::DeployerFundedUnconfirmed);

    let facts = env.storage.read_funding(intent.safe).await?.unwrap();
    assert_eq!(facts.deployer_funded_tx_hash, Some(pending.tx_hash));
    assert_eq!(
        env.storage
            .read_pending_submission(intent.safe, SubmissionKind::DeployerFunding)
            .await?,
        None
    );

    // nothing is sent twice
    assert_eq!(env.submit(intent.safe).await?, SubmitOutcome::AlreadySubmitted);
    assert_eq!(env.node.broadcasts().len(), 1);

    let report = env.reconcile(intent.safe).await?;
    assert_eq!(report.confirmed, Some(SubmissionKind::DeployerFunding));
    assert_eq!(report.status, FundingStatus::DeployerFunded);

    Ok(())
}

#[tokio::test]
async fn funding_is_adopted_only_by_the_safe_that_reserved_it() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let first = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;
    let second = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;
    assert_eq!(first.funding_amount(), second.funding_amount());
    for intent in [&first, &second] {
        env.node.set_balance(intent.safe, intent.payment);
        env.reconcile(intent.safe).await?;
    }

    env.node.set_lose_acks(true);
    assert!(env.submitter.submit_if_authorized(first.safe).await.is_err());
    env.node.set_lose_acks(false);
    let pending = env
        .storage
        .read_pending_submission(first.safe, SubmissionKind::DeployerFunding)
        .await?
        .unwrap();
    env.mine_confirmed(pending.tx_hash);

    // same funder, deployer and amount, but not the second Safe's reservation
    let report = env.reconcile(second.safe).await?;
    assert_eq!(report.adopted, None);
    assert_eq!(report.status, FundingStatus::FundedAwaitingDeployer);

    let report = env.reconcile(first.safe).await?;
    assert_eq!(report.adopted, Some(pending.tx_hash));

    // the second Safe gets its own top-up with the next funder nonce
    let SubmitOutcome::Submitted { tx_hash, .. } = env.submit(second.safe).await? else {
        panic!("expected the deployer funding");
    };
    assert_ne!(tx_hash, pending.tx_hash);
    let funding = env.node.broadcasts().pop().unwrap();
    assert_eq!(funding.tx_hash, tx_hash);
    assert_eq!(funding.nonce, pending.nonce + 1);

    let facts = env.storage.read_funding(second.safe).await?.unwrap();
    assert_eq!(facts.deployer_funded_tx_hash, Some(tx_hash));

    Ok(())
}

#[tokio::test]
async fn token_funding_and_transfers() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let intent = env
        .relay
        .create_intent(CreateSafeParameters {
            owners: addresses(&sorted_owners(1)),
            threshold: 1,
            salt_nonce: U256::ZERO,
            payment_token: Some(PAYMENT_TOKEN),
        })
        .await?;

    // native balance does not count for token-paid Safes
    env.node.set_balance(intent.safe, intent.payment);
    assert!(!env.reconcile(intent.safe).await?.funded);

    let payer = Address::with_last_byte(0x33);
    env.node.transfer_token(PAYMENT_TOKEN, payer, intent.safe, intent.payment);
    let report = env.reconcile(intent.safe).await?;
    assert!(report.funded);
    assert_eq!(report.token_transfers, 0);

    env.node.advance(2);
    let report = env.reconcile(intent.safe).await?;
    assert_eq!(report.token_transfers, 1);
    assert_eq!(report.erc20_block_number, env.node.head() - 2);

    let transfers = env.storage.read_token_transfers(intent.safe).await?;
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].from, payer);
    assert_eq!(transfers[0].value, intent.payment);

    // scanned once
    assert_eq!(env.reconcile(intent.safe).await?.token_transfers, 0);

    Ok(())
}

#[tokio::test]
async fn stores_activity_touching_the_safe() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let intent = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;
    env.node.set_balance(intent.safe, intent.payment);
    env.reconcile(intent.safe).await?;

    let stranger = Address::with_last_byte(0x44);
    let direct = B256::repeat_byte(0x01);
    env.node.mine_external(external_tx(direct, stranger, intent.safe, U256::from(5)), Vec::new());

    let unrelated = B256::repeat_byte(0x02);
    env.node.mine_external(external_tx(unrelated, stranger, stranger, U256::from(5)), Vec::new());

    let through_contract = B256::repeat_byte(0x03);
    let router = Address::with_last_byte(0x55);
    env.node.mine_external(
        external_tx(through_contract, stranger, router, U256::ZERO),
        vec![InternalCall {
            tx_hash: through_contract,
            index: 1,
            from: router,
            to: Some(intent.safe),
            value: U256::from(7),
            call_type: Some(CallType::Call),
            contract_address: None,
            error: None,
        }],
    );
    env.node.advance(2);

    let report = env.reconcile(intent.safe).await?;
    assert_eq!(report.transactions, 2);
    assert_eq!(report.internal_calls, 1);
    assert_eq!(report.tx_block_number, env.node.head() - 2);

    assert!(env.storage.read_transaction(direct).await?.unwrap().is_mined());
    assert!(env.storage.read_transaction(unrelated).await?.is_none());
    assert!(env.storage.read_transaction(through_contract).await?.is_some());
    assert_eq!(env.storage.read_internal_calls(through_contract).await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn busy_wallet_is_skipped() -> eyre::Result<()> {
    let env = Environment::setup_with_leases(LeaseConfig {
        ttl: Duration::from_secs(30),
        wait_timeout: Duration::from_millis(30),
        retry_interval: Duration::from_millis(5),
    })
    .await?;
    let intent = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;
    env.node.set_balance(intent.safe, intent.payment);

    let held = env.leases.acquire_with_timeout(&wallet_key(intent.safe)).await?;
    assert!(held.is_some());

    let err = env.scanner.reconcile_wallet(intent.safe).await.unwrap_err();
    assert!(matches!(err, RelayError::Lease(LeaseError::Busy(_))));
    assert!(err.is_transient());
    assert_eq!(env.submit(intent.safe).await?, SubmitOutcome::Busy);
    assert_eq!(env.status(intent.safe).await?, FundingStatus::NotFunded);

    Ok(())
}

#[tokio::test]
async fn reconciles_every_wallet() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let first = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;
    let second = env.create_intent(&addresses(&sorted_owners(2)), 1).await?;
    env.node.set_balance(second.safe, second.payment);

    let outcomes = env.scanner.reconcile_all().await?;
    assert_eq!(outcomes.len(), 2);
    for (safe, outcome) in outcomes {
        let report = outcome?;
        let expected = if safe == second.safe {
            FundingStatus::FundedAwaitingDeployer
        } else {
            assert_eq!(safe, first.safe);
            FundingStatus::NotFunded
        };
        assert_eq!(report.status, expected);
    }

    Ok(())
}
