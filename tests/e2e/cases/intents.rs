use crate::e2e::{
    Environment, FALLBACK_HANDLER, INITIAL_HEAD, MASTER_COPY, PAYMENT_TOKEN, PROXY_FACTORY,
    addresses, proxy_creation_code, sorted_owners,
};
use alloy::primitives::{Address, U256};
use safe_relay::{
    address::{SafeSetup, derive},
    error::{RelayError, ValidationError},
    estimation::creation_gas,
    storage::StorageApi,
    types::{FundingStatus, rpc::CreateSafeParameters},
};

fn params(owners: Vec<Address>, salt: u64, payment_token: Option<Address>) -> CreateSafeParameters {
    CreateSafeParameters { owners, threshold: 1, salt_nonce: U256::from(salt), payment_token }
}

#[tokio::test]
async fn intent_address_is_the_create2_address() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let owners = addresses(&sorted_owners(2));

    let intent = env.relay.create_intent(params(owners.clone(), 1, None)).await?;

    let derived = derive(
        PROXY_FACTORY,
        MASTER_COPY,
        &proxy_creation_code(),
        &SafeSetup {
            owners: owners.clone(),
            threshold: 1,
            fallback_handler: FALLBACK_HANDLER,
            payment_token: Address::ZERO,
            payment: intent.payment,
            payment_receiver: env.funder.address(),
        },
        U256::from(1),
    )?;
    assert_eq!(intent.safe, derived.address);
    assert_eq!(intent.setup_data, derived.setup_data);
    assert_eq!(intent.deployer, env.deployer.address());
    assert_eq!(intent.gas_estimated, creation_gas(2, false));
    assert_eq!(
        intent.payment,
        U256::from(intent.gas_estimated) * U256::from(intent.gas_price_estimated)
    );

    let cursor = env.storage.read_cursor(intent.safe).await?.unwrap();
    assert_eq!(cursor.initial_block_number, INITIAL_HEAD);
    assert_eq!(env.status(intent.safe).await?, FundingStatus::NotFunded);

    Ok(())
}

#[tokio::test]
async fn create_intent_is_idempotent() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let owners = addresses(&sorted_owners(3));

    let first = env.relay.create_intent(params(owners.clone(), 7, None)).await?;

    // a new quote must not move the Safe
    env.node.set_gas_price(5_000_000_000);
    let second = env.relay.create_intent(params(owners.clone(), 7, Some(Address::ZERO))).await?;
    assert_eq!(first, second);

    let other_salt = env.relay.create_intent(params(owners, 8, None)).await?;
    assert_ne!(other_salt.safe, first.safe);
    assert!(other_salt.payment > first.payment);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_creates_return_one_intent() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let owners = addresses(&sorted_owners(2));

    let (a, b) = tokio::join!(
        env.relay.create_intent(params(owners.clone(), 3, None)),
        env.relay.create_intent(params(owners.clone(), 3, None)),
    );
    assert_eq!(a?, b?);
    assert_eq!(env.storage.wallets_to_reconcile().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn token_paid_intent() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let owners = addresses(&sorted_owners(1));

    let intent = env.relay.create_intent(params(owners.clone(), 1, Some(PAYMENT_TOKEN))).await?;
    assert_eq!(intent.payment_token, Some(PAYMENT_TOKEN));
    assert_eq!(intent.gas_estimated, creation_gas(1, true));
    // two tokens per ETH
    let native = U256::from(intent.gas_estimated) * U256::from(intent.gas_price_estimated);
    assert_eq!(intent.payment, native * U256::from(2));

    let unsupported = Address::with_last_byte(0xee);
    assert!(matches!(
        env.relay.create_intent(params(owners, 1, Some(unsupported))).await,
        Err(RelayError::UnsupportedPaymentToken(token)) if token == unsupported
    ));

    Ok(())
}

#[tokio::test]
async fn rejects_invalid_owner_sets() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let owners = addresses(&sorted_owners(2));

    let mut duplicated = params(vec![owners[0], owners[0]], 1, None);
    assert!(matches!(
        env.relay.create_intent(duplicated.clone()).await,
        Err(RelayError::Validation(ValidationError::DuplicateOwner(_)))
    ));

    duplicated.owners = owners;
    duplicated.threshold = 3;
    assert!(matches!(
        env.relay.create_intent(duplicated).await,
        Err(RelayError::Validation(ValidationError::InvalidThreshold { threshold: 3, owners: 2 }))
    ));
    assert!(env.storage.wallets_to_reconcile().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn status_requires_checksummed_address() -> eyre::Result<()> {
    let env = Environment::setup().await?;
    let intent = env.create_intent(&addresses(&sorted_owners(1)), 1).await?;

    let status = env.relay.get_status(&intent.safe.to_checksum(None)).await?;
    assert_eq!(status.status, FundingStatus::NotFunded);
    assert_eq!(status.safe_deployed_tx_hash, None);

    let lowercase = format!("{:#x}", intent.safe);
    assert!(matches!(
        env.relay.get_status(&lowercase).await,
        Err(RelayError::Validation(ValidationError::NotChecksummed(_)))
    ));

    let unknown = Address::with_last_byte(0x42).to_checksum(None);
    assert!(matches!(env.relay.get_status(&unknown).await, Err(RelayError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn estimates_every_payment_token() -> eyre::Result<()> {
    let env = Environment::setup().await?;

    let estimates = env.relay.estimate_all(2).await?;
    assert_eq!(estimates.len(), 2);
    assert_eq!(estimates[0].payment_token, Address::ZERO);
    assert_eq!(estimates[1].payment_token, PAYMENT_TOKEN);
    assert_eq!(estimates[0].gas, creation_gas(2, false));
    assert_eq!(estimates[1].gas, creation_gas(2, true));

    assert!(matches!(
        env.relay.estimate(0, None).await,
        Err(RelayError::Validation(ValidationError::NoOwners))
    ));

    Ok(())
}
