//! Safe creation cost estimation.
//!
//! The creation is paid by the Safe itself through the `setup` payment. The payment covers the
//! deployer top-up and the deployment, priced at the current gas price plus a margin.

use crate::{
    constants::{
        FUNDING_TX_GAS, SAFE_CREATION_BASE_GAS, SAFE_CREATION_GAS_PER_OWNER,
        SAFE_CREATION_TOKEN_PAYMENT_GAS,
    },
    error::{RelayError, ValidationError},
    node::NodeClient,
    price::PriceOracle,
    types::{PaymentToken, TokenRegistry, rpc::SafeCreationEstimate},
};
use alloy::primitives::{Address, U256};
use std::sync::Arc;
use tracing::{instrument, warn};

/// Gas of deploying a Safe with `owners` owners, excluding the deployer top-up.
pub const fn deployment_gas(owners: u64, token_payment: bool) -> u64 {
    let gas = SAFE_CREATION_BASE_GAS + owners * SAFE_CREATION_GAS_PER_OWNER;
    if token_payment { gas + SAFE_CREATION_TOKEN_PAYMENT_GAS } else { gas }
}

/// Gas of creating a Safe: the deployer top-up and the deployment.
pub const fn creation_gas(owners: u64, token_payment: bool) -> u64 {
    deployment_gas(owners, token_payment) + FUNDING_TX_GAS
}

/// Converts a native amount into `token` units, rounding up.
///
/// `eth_price` is the price of one whole token in wei.
pub fn native_to_token(amount: U256, token: &PaymentToken, eth_price: U256) -> U256 {
    let scaled = amount * U256::from(10u64).pow(U256::from(token.decimals));
    scaled.div_ceil(eth_price)
}

/// Estimates the cost of creating a Safe.
#[derive(Debug, Clone)]
pub struct Estimator {
    node: Arc<dyn NodeClient>,
    oracle: PriceOracle,
    tokens: TokenRegistry,
    /// Gas price multiplier in percent.
    gas_price_multiplier: u64,
}

impl Estimator {
    /// Creates a new [`Estimator`].
    pub fn new(
        node: Arc<dyn NodeClient>,
        oracle: PriceOracle,
        tokens: TokenRegistry,
        gas_price_multiplier: u64,
    ) -> Self {
        Self { node, oracle, tokens, gas_price_multiplier }
    }

    /// Accepted payment tokens.
    pub const fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    /// Node gas price with the configured margin.
    pub async fn gas_price(&self) -> Result<u128, RelayError> {
        let gas_price = self.node.gas_price().await?;
        Ok(gas_price.saturating_mul(self.gas_price_multiplier as u128) / 100)
    }

    /// Cost of creating a Safe with `owner_count` owners, paid in `payment_token`.
    ///
    /// `None` and the zero address both mean the native token.
    #[instrument(skip(self))]
    pub async fn estimate(
        &self,
        owner_count: u64,
        payment_token: Option<Address>,
    ) -> Result<SafeCreationEstimate, RelayError> {
        if owner_count == 0 {
            return Err(ValidationError::NoOwners.into());
        }
        let gas_price = self.gas_price().await?;
        self.estimate_with_gas_price(owner_count, payment_token, gas_price).await
    }

    /// Like [`Self::estimate`], for a known gas price.
    pub async fn estimate_with_gas_price(
        &self,
        owner_count: u64,
        payment_token: Option<Address>,
        gas_price: u128,
    ) -> Result<SafeCreationEstimate, RelayError> {
        let payment_token = payment_token.filter(|token| !token.is_zero());

        let Some(token_address) = payment_token else {
            let gas = creation_gas(owner_count, false);
            return Ok(SafeCreationEstimate {
                gas,
                gas_price,
                payment: U256::from(gas) * U256::from(gas_price),
                payment_token: Address::ZERO,
            });
        };

        let token = self
            .tokens
            .get(&token_address)
            .ok_or(RelayError::UnsupportedPaymentToken(token_address))?;
        let eth_price = self
            .oracle
            .eth_price(token_address)
            .await
            .ok_or(RelayError::UnsupportedPaymentToken(token_address))?;

        let gas = creation_gas(owner_count, true);
        let native = U256::from(gas) * U256::from(gas_price);

        Ok(SafeCreationEstimate {
            gas,
            gas_price,
            payment: native_to_token(native, token, eth_price),
            payment_token: token_address,
        })
    }

    /// Cost of creating a Safe in the native token and every payment token with a fresh rate.
    #[instrument(skip(self))]
    pub async fn estimate_all(
        &self,
        owner_count: u64,
    ) -> Result<Vec<SafeCreationEstimate>, RelayError> {
        if owner_count == 0 {
            return Err(ValidationError::NoOwners.into());
        }
        let gas_price = self.gas_price().await?;

        let mut estimates = vec![self.estimate_with_gas_price(owner_count, None, gas_price).await?];
        for token in self.tokens.tokens() {
            match self.estimate_with_gas_price(owner_count, Some(token.address), gas_price).await {
                Ok(estimate) => estimates.push(estimate),
                Err(err) => warn!(token = %token.address, %err, "Skipping payment token."),
            }
        }

        Ok(estimates)
    }
}
