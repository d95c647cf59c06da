use crate::e2e::{Environment, PROXY_FACTORY, addresses, sorted_owners};
use alloy::primitives::{U256, bytes};
use safe_relay::{
    address::create_proxy_calldata,
    error::RelayError,
    estimation::deployment_gas,
    storage::StorageApi,
    submission::SubmitOutcome,
    types::{FundingStatus, SubmissionKind},
};

#[tokio::test]
async fn walks_the_deployment_lifecycle() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let intent = env.create_intent(&addresses(&sorted_owners(2)), 2).await?;
    let safe = intent.safe;

    // nothing happens before the Safe holds the payment
    assert_eq!(env.submit(safe).await?, SubmitOutcome::NotAuthorized);
    env.node.set_balance(safe, intent.payment - U256::from(1));
    let report = env.reconcile(safe).await?;
    assert!(!report.funded);
    assert_eq!(report.status, FundingStatus::NotFunded);

    env.node.set_balance(safe, intent.payment);
    let report = env.reconcile(safe).await?;
    assert!(report.funded);
    assert_eq!(report.status, FundingStatus::FundedAwaitingDeployer);

    // deployer top-up
    let SubmitOutcome::Submitted { kind, tx_hash: funding_hash } = env.submit(safe).await? else {
        panic!("expected the deployer funding");
    };
    assert_eq!(kind, SubmissionKind::DeployerFunding);
    assert_eq!(env.status(safe).await?, FundingStatus::DeployerFundedUnconfirmed);

    let funding = env.node.broadcasts().pop().unwrap();
    assert_eq!(funding.from, env.funder.address());
    assert_eq!(funding.to, Some(env.deployer.address()));
    assert_eq!(funding.value, intent.funding_amount());

    // still pending: the node knows it, nothing is sent again
    assert_eq!(env.submit(safe).await?, SubmitOutcome::AlreadySubmitted);
    assert_eq!(env.node.broadcasts().len(), 1);

    // mined but not buried yet
    env.node.mine(&[funding_hash]);
    let report = env.reconcile(safe).await?;
    assert_eq!(report.confirmed, None);
    assert_eq!(report.status, FundingStatus::DeployerFundedUnconfirmed);

    env.node.advance(2);
    let report = env.reconcile(safe).await?;
    assert_eq!(report.confirmed, Some(SubmissionKind::DeployerFunding));
    assert_eq!(report.status, FundingStatus::DeployerFunded);

    // deployment
    let SubmitOutcome::Submitted { kind, tx_hash: deploy_hash } = env.submit(safe).await? else {
        panic!("expected the deployment");
    };
    assert_eq!(kind, SubmissionKind::Deployment);

    let deployment = env.node.broadcasts().pop().unwrap();
    assert_eq!(deployment.from, env.deployer.address());
    assert_eq!(deployment.to, Some(PROXY_FACTORY));
    assert_eq!(
        deployment.data,
        create_proxy_calldata(intent.master_copy, intent.setup_data.clone(), intent.salt_nonce)
    );
    assert_eq!(deployment.gas, deployment_gas(2, false));

    let block = env.mine_confirmed(deploy_hash);

    // mined without code is not a deployment
    let report = env.reconcile(safe).await?;
    assert_eq!(report.status, FundingStatus::DeployedUnconfirmed);

    env.node.set_code(safe, bytes!("0x6080"));
    let report = env.reconcile(safe).await?;
    assert_eq!(report.confirmed, Some(SubmissionKind::Deployment));
    assert_eq!(report.status, FundingStatus::Deployed);

    let status = env.relay.get_status(&safe.to_checksum(None)).await?;
    assert_eq!(status.deployer_funded_tx_hash, Some(funding_hash));
    assert_eq!(status.safe_deployed_tx_hash, Some(deploy_hash));
    assert_eq!(status.block_number, Some(block));

    assert!(matches!(
        env.submitter.submit_if_authorized(safe).await,
        Err(RelayError::AlreadyDeployed(deployed)) if deployed == safe
    ));
    assert_eq!(env.node.broadcasts().len(), 2);

    let stored = env.storage.read_transaction(deploy_hash).await?.unwrap();
    assert_eq!(stored.block_number, Some(block));
    assert_eq!(stored.status, Some(true));
    assert!(stored.raw.is_some());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_submissions_send_one_transaction() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let intent = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;
    env.node.set_balance(intent.safe, intent.payment);
    env.reconcile(intent.safe).await?;

    let (a, b) = tokio::join!(env.submit(intent.safe), env.submit(intent.safe));
    let outcomes = [a?, b?];

    let submitted = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, SubmitOutcome::Submitted { .. }))
        .count();
    assert_eq!(submitted, 1);
    assert!(outcomes.iter().any(|outcome| matches!(
        outcome,
        SubmitOutcome::AlreadySubmitted | SubmitOutcome::Busy
    )));
    assert_eq!(env.node.broadcasts().len(), 1);
    assert_eq!(env.status(intent.safe).await?, FundingStatus::DeployerFundedUnconfirmed);

    Ok(())
}

#[tokio::test]
async fn dropped_submission_is_rebroadcast() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let intent = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;
    env.node.set_balance(intent.safe, intent.payment);
    env.reconcile(intent.safe).await?;

    let SubmitOutcome::Submitted { tx_hash, .. } = env.submit(intent.safe).await? else {
        panic!("expected the deployer funding");
    };
    env.node.drop_pending(tx_hash);

    assert_eq!(env.submit(intent.safe).await?, SubmitOutcome::Rebroadcast { tx_hash });
    assert_eq!(env.node.mempool(), vec![tx_hash]);

    let broadcasts = env.node.broadcasts();
    assert_eq!(broadcasts.len(), 2);
    assert_eq!(broadcasts[0], broadcasts[1]);

    let facts = env.storage.read_funding(intent.safe).await?.unwrap();
    assert_eq!(facts.deployer_funded_tx_hash, Some(tx_hash));

    Ok(())
}

#[tokio::test]
async fn failed_broadcast_sends_the_reserved_transaction_later() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let intent = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;
    env.node.set_balance(intent.safe, intent.payment);
    env.reconcile(intent.safe).await?;

    env.node.set_fail_broadcasts(true);
    let err = env.submitter.submit_if_authorized(intent.safe).await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(env.status(intent.safe).await?, FundingStatus::FundedAwaitingDeployer);

    let pending = env
        .storage
        .read_pending_submission(intent.safe, SubmissionKind::DeployerFunding)
        .await?
        .unwrap();
    assert_eq!(pending.nonce, 0);
    assert!(env.storage.read_transaction(pending.tx_hash).await?.unwrap().raw.is_some());

    // still failing: nothing new is built
    assert!(env.submitter.submit_if_authorized(intent.safe).await.is_err());

    env.node.set_fail_broadcasts(false);
    assert_eq!(
        env.submit(intent.safe).await?,
        SubmitOutcome::Resumed { kind: SubmissionKind::DeployerFunding, tx_hash: pending.tx_hash }
    );
    assert_eq!(env.status(intent.safe).await?, FundingStatus::DeployerFundedUnconfirmed);
    assert_eq!(
        env.storage
            .read_pending_submission(intent.safe, SubmissionKind::DeployerFunding)
            .await?,
        None
    );

    let broadcasts = env.node.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    assert_eq!(broadcasts[0].tx_hash, pending.tx_hash);
    assert_eq!(broadcasts[0].nonce, 0);

    Ok(())
}

#[tokio::test]
async fn lost_broadcast_answer_funds_the_deployer_once() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let intent = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;
    env.node.set_balance(intent.safe, intent.payment);
    env.reconcile(intent.safe).await?;

    // the transfer reaches the node but the answer does not reach the relay
    env.node.set_lose_acks(true);
    assert!(env.submitter.submit_if_authorized(intent.safe).await.is_err());
    env.node.set_lose_acks(false);

    assert_eq!(env.reconcile(intent.safe).await?.status, FundingStatus::FundedAwaitingDeployer);
    let SubmitOutcome::Resumed { kind, tx_hash } = env.submit(intent.safe).await? else {
        panic!("expected the reserved deployer funding");
    };
    assert_eq!(kind, SubmissionKind::DeployerFunding);
    assert_eq!(env.submit(intent.safe).await?, SubmitOutcome::AlreadySubmitted);

    let fundings: Vec<_> = env
        .node
        .broadcasts()
        .into_iter()
        .filter(|tx| tx.from == env.funder.address())
        .collect();
    assert_eq!(fundings.len(), 1);
    assert_eq!(fundings[0].tx_hash, tx_hash);

    let facts = env.storage.read_funding(intent.safe).await?.unwrap();
    assert_eq!(facts.deployer_funded_tx_hash, Some(tx_hash));

    Ok(())
}

#[tokio::test]
async fn lost_deployment_answer_deploys_once() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let intent = env.create_intent(&addresses(&sorted_owners(2)), 2).await?;
    env.node.set_balance(intent.safe, intent.payment);
    env.reconcile(intent.safe).await?;

    let SubmitOutcome::Submitted { tx_hash: funding_hash, .. } = env.submit(intent.safe).await?
    else {
        panic!("expected the deployer funding");
    };
    env.mine_confirmed(funding_hash);
    assert_eq!(env.reconcile(intent.safe).await?.status, FundingStatus::DeployerFunded);

    env.node.set_lose_acks(true);
    assert!(env.submitter.submit_if_authorized(intent.safe).await.is_err());
    env.node.set_lose_acks(false);

    let SubmitOutcome::Resumed { kind, tx_hash: deploy_hash } = env.submit(intent.safe).await?
    else {
        panic!("expected the reserved deployment");
    };
    assert_eq!(kind, SubmissionKind::Deployment);

    let deployments =
        env.node.broadcasts().into_iter().filter(|tx| tx.to == Some(PROXY_FACTORY)).count();
    assert_eq!(deployments, 1);

    env.node.set_code(intent.safe, bytes!("0x6080"));
    env.mine_confirmed(deploy_hash);
    let report = env.reconcile(intent.safe).await?;
    assert_eq!(report.status, FundingStatus::Deployed);
    assert_eq!(report.reverted, None);

    Ok(())
}

#[tokio::test]
async fn reservation_with_a_taken_nonce_is_replaced() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let first = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;
    // another owner count, so the two top-ups differ in value
    let second = env.create_intent(&addresses(&sorted_owners(2)), 1).await?;
    assert_ne!(first.funding_amount(), second.funding_amount());
    for intent in [&first, &second] {
        env.node.set_balance(intent.safe, intent.payment);
        env.reconcile(intent.safe).await?;
    }

    env.node.set_fail_broadcasts(true);
    assert!(env.submitter.submit_if_authorized(first.safe).await.is_err());
    env.node.set_fail_broadcasts(false);
    let stale = env
        .storage
        .read_pending_submission(first.safe, SubmissionKind::DeployerFunding)
        .await?
        .unwrap();

    // the funder nonce goes to the other Safe
    let SubmitOutcome::Submitted { tx_hash: taken, .. } = env.submit(second.safe).await? else {
        panic!("expected the deployer funding");
    };
    assert_eq!(env.node.broadcasts()[0].nonce, stale.nonce);

    let SubmitOutcome::Submitted { kind, tx_hash } = env.submit(first.safe).await? else {
        panic!("expected a new deployer funding");
    };
    assert_eq!(kind, SubmissionKind::DeployerFunding);
    assert_ne!(tx_hash, stale.tx_hash);
    assert_ne!(tx_hash, taken);

    let replacement = env.node.broadcasts().pop().unwrap();
    assert_eq!(replacement.tx_hash, tx_hash);
    assert_eq!(replacement.nonce, stale.nonce + 1);

    Ok(())
}

#[tokio::test]
async fn reverted_submission_stays_unconfirmed() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let intent = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;
    env.node.set_balance(intent.safe, intent.payment);
    env.reconcile(intent.safe).await?;

    let SubmitOutcome::Submitted { tx_hash, .. } = env.submit(intent.safe).await? else {
        panic!("expected the deployer funding");
    };
    env.node.mine_reverted(&[tx_hash]);
    env.node.advance(2);

    let report = env.reconcile(intent.safe).await?;
    assert_eq!(report.reverted, Some(tx_hash));
    assert_eq!(report.status, FundingStatus::DeployerFundedUnconfirmed);

    let stored = env.storage.read_transaction(tx_hash).await?.unwrap();
    assert_eq!(stored.status, Some(false));

    Ok(())
}
