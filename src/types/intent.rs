use alloy::{
    primitives::{Address, B256, Bytes, U256, keccak256},
    sol_types::SolValue,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Safe known to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletContract {
    /// Safe address.
    pub address: Address,
    /// Singleton the proxy delegates to.
    pub master_copy: Address,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// Everything needed to deploy a counterfactual Safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentIntent {
    /// Counterfactual Safe address.
    pub safe: Address,
    /// Relay account sending the deployment.
    pub deployer: Address,
    /// Relay account topping up the deployer.
    pub funder: Address,
    /// Proxy factory.
    pub proxy_factory: Address,
    /// Singleton the proxy delegates to.
    pub master_copy: Address,
    /// CREATE2 salt nonce.
    pub salt_nonce: U256,
    /// Owners.
    pub owners: Vec<Address>,
    /// Signature threshold.
    pub threshold: u64,
    /// Payment token, `None` for the native token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_token: Option<Address>,
    /// Creation payment the Safe must hold.
    pub payment: U256,
    /// Receiver of the creation payment.
    pub payment_receiver: Address,
    /// ABI-encoded `setup` initializer.
    pub setup_data: Bytes,
    /// Estimated gas of the deployment.
    #[serde(with = "alloy::serde::quantity")]
    pub gas_estimated: u64,
    /// Gas price the payment was computed with.
    #[serde(with = "alloy::serde::quantity")]
    pub gas_price_estimated: u128,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl DeploymentIntent {
    /// Amount the funder sends to the deployer so it can pay for the deployment.
    pub fn funding_amount(&self) -> U256 {
        U256::from(self.gas_estimated) * U256::from(self.gas_price_estimated)
    }

    /// Key of the creation request this intent answers.
    pub fn request_key(&self) -> B256 {
        request_key(&self.owners, self.threshold, self.salt_nonce, self.payment_token)
    }

    /// The registered wallet.
    pub fn wallet(&self) -> WalletContract {
        WalletContract {
            address: self.safe,
            master_copy: self.master_copy,
            created_at: self.created_at,
        }
    }
}

/// Identifies a creation request independently of the quoted price.
///
/// The payment is part of the `setup` initializer, so a requote would derive another address.
/// Requests are deduplicated on this key instead.
pub fn request_key(
    owners: &[Address],
    threshold: u64,
    salt_nonce: U256,
    payment_token: Option<Address>,
) -> B256 {
    keccak256(
        (owners.to_vec(), U256::from(threshold), salt_nonce, payment_token.unwrap_or_default())
            .abi_encode(),
    )
}
