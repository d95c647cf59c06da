//! Request and response types of the `safe_` namespace.

use super::{FundingFacts, FundingStatus, SafeTxParams};
use alloy::primitives::{Address, B256, BlockNumber, Bytes, U256};
use serde::{Deserialize, Serialize};

/// Health of the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    /// Status.
    pub status: String,
    /// Relay version.
    pub version: String,
}

/// Parameters of `safe_estimate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateParameters {
    /// Number of owners of the Safe.
    pub number_owners: u64,
    /// Payment token, `None` for the native token.
    #[serde(default)]
    pub payment_token: Option<Address>,
}

/// Cost of creating a Safe paid in one token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeCreationEstimate {
    /// Gas of the deployer funding and the deployment.
    #[serde(with = "alloy::serde::quantity")]
    pub gas: u64,
    /// Gas price.
    #[serde(with = "alloy::serde::quantity")]
    pub gas_price: u128,
    /// Payment, in the smallest unit of `payment_token`.
    pub payment: U256,
    /// Payment token, zero for the native token.
    pub payment_token: Address,
}

/// Parameters of `safe_createIntent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSafeParameters {
    /// Owners.
    pub owners: Vec<Address>,
    /// Signature threshold.
    pub threshold: u64,
    /// CREATE2 salt nonce.
    pub salt_nonce: U256,
    /// Payment token, `None` for the native token.
    #[serde(default)]
    pub payment_token: Option<Address>,
}

/// Response of `safe_getStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeStatusResponse {
    /// The Safe.
    pub safe: Address,
    /// Derived lifecycle status.
    pub status: FundingStatus,
    /// Hash of the deployer funding transaction.
    pub deployer_funded_tx_hash: Option<B256>,
    /// Hash of the deployment transaction.
    pub safe_deployed_tx_hash: Option<B256>,
    /// Block the deployment was confirmed in.
    pub block_number: Option<BlockNumber>,
}

impl SafeStatusResponse {
    /// Builds the response from stored facts.
    pub const fn new(facts: &FundingFacts, status: FundingStatus) -> Self {
        Self {
            safe: facts.safe,
            status,
            deployer_funded_tx_hash: facts.deployer_funded_tx_hash,
            safe_deployed_tx_hash: facts.safe_deployed_tx_hash,
            block_number: facts.deployed_block_number,
        }
    }
}

/// Parameters of `safe_relayTransaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    /// The Safe.
    pub safe: Address,
    /// Signed parameters.
    #[serde(flatten)]
    pub params: SafeTxParams,
    /// Nonce the owners signed, `None` to use the next nonce.
    #[serde(default)]
    pub nonce: Option<u64>,
    /// Concatenated 65-byte owner signatures.
    pub signatures: Bytes,
}

/// Response of `safe_relayTransaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayResponse {
    /// Hash of the `execTransaction` transaction.
    pub tx_hash: B256,
    /// EIP-712 hash of the Safe transaction.
    pub safe_tx_hash: B256,
    /// Safe nonce used.
    pub nonce: u64,
}
