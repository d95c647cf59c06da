use crate::e2e::{Environment, PAYMENT_TOKEN, addresses, sorted_owners};
use alloy::primitives::{Address, U256};
use jsonrpsee::{
    core::client::Error as ClientError,
    http_client::{HttpClient, HttpClientBuilder},
    server::{Server, ServerHandle},
};
use safe_relay::{
    error::NOT_FOUND_CODE,
    rpc::{SafeApiClient, SafeApiServer},
    types::{
        FundingStatus,
        rpc::{CreateSafeParameters, EstimateParameters},
    },
};

async fn serve(env: &Environment) -> eyre::Result<(HttpClient, ServerHandle)> {
    let server = Server::builder().build("127.0.0.1:0").await?;
    let addr = server.local_addr()?;
    let handle = server.start(env.relay.clone().into_rpc());
    let client = HttpClientBuilder::default().build(format!("http://{addr}"))?;
    Ok((client, handle))
}

fn error_code<T: std::fmt::Debug>(result: Result<T, ClientError>) -> i32 {
    match result {
        Err(ClientError::Call(err)) => err.code(),
        other => panic!("expected a call error, got {other:?}"),
    }
}

#[tokio::test]
async fn serves_the_safe_namespace() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let (client, _handle) = serve(&env).await?;

    let health = client.health().await?;
    assert_eq!(health.status, "healthy");
    assert!(!health.version.is_empty());

    let estimate = client
        .estimate(EstimateParameters { number_owners: 2, payment_token: Some(PAYMENT_TOKEN) })
        .await?;
    assert_eq!(estimate.payment_token, PAYMENT_TOKEN);
    assert!(estimate.payment > U256::ZERO);
    assert_eq!(client.estimate_all(2).await?.len(), 2);

    let intent = client
        .create_intent(CreateSafeParameters {
            owners: addresses(&sorted_owners(2)),
            threshold: 2,
            salt_nonce: U256::from(9),
            payment_token: None,
        })
        .await?;
    assert_eq!(client.get_intent(intent.safe).await?, intent);

    let checksummed = intent.safe.to_checksum(None);
    let status = client.get_status(checksummed.clone()).await?;
    assert_eq!(status.safe, intent.safe);
    assert_eq!(status.status, FundingStatus::NotFunded);
    assert_eq!(status.deployer_funded_tx_hash, None);

    env.node.set_balance(intent.safe, intent.payment);
    env.reconcile(intent.safe).await?;
    assert_eq!(
        client.get_status(checksummed.clone()).await?.status,
        FundingStatus::FundedAwaitingDeployer
    );

    assert!(client.force_check(checksummed).await?);

    Ok(())
}

#[tokio::test]
async fn maps_errors_to_rpc_codes() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let (client, _handle) = serve(&env).await?;

    let unknown = Address::with_last_byte(0x77);
    assert_eq!(error_code(client.get_intent(unknown).await), NOT_FOUND_CODE);
    assert_eq!(
        error_code(client.get_status(unknown.to_checksum(None)).await),
        NOT_FOUND_CODE
    );
    assert_eq!(error_code(client.force_check(unknown.to_checksum(None)).await), NOT_FOUND_CODE);

    let lowercase = format!("{:#x}", Address::repeat_byte(0xab));
    assert_eq!(
        error_code(client.get_status(lowercase).await),
        jsonrpsee::types::error::INVALID_PARAMS_CODE
    );

    let unsupported = Address::with_last_byte(0xee);
    assert_eq!(
        error_code(
            client
                .estimate(EstimateParameters { number_owners: 1, payment_token: Some(unsupported) })
                .await
        ),
        jsonrpsee::types::error::INVALID_PARAMS_CODE
    );

    Ok(())
}

#[tokio::test]
async fn health_fails_without_the_node() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let (client, _handle) = serve(&env).await?;

    assert!(client.health().await.is_ok());
    env.node.set_offline(true);
    assert_eq!(
        error_code(client.health().await),
        jsonrpsee::types::error::INTERNAL_ERROR_CODE
    );

    Ok(())
}
