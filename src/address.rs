//! Counterfactual Safe address derivation.
//!
//! A Safe deployed through the proxy factory's `createProxyWithNonce` lands at a CREATE2
//! address fully determined by the factory, the master copy, the proxy creation code, the
//! `setup` initializer and the salt nonce.

use crate::{
    constants::SENTINEL_OWNERS,
    error::ValidationError,
    types::{IProxyFactory, ISafe},
};
use alloy::{
    primitives::{Address, B256, Bytes, U256, keccak256},
    sol_types::SolCall,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Parameters of the Safe `setup` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeSetup {
    /// Owners.
    pub owners: Vec<Address>,
    /// Signature threshold.
    pub threshold: u64,
    /// Fallback handler.
    pub fallback_handler: Address,
    /// Token the creation is paid in, zero for the native token.
    pub payment_token: Address,
    /// Creation payment.
    pub payment: U256,
    /// Receiver of the creation payment.
    pub payment_receiver: Address,
}

impl SafeSetup {
    /// Checks the owner set and threshold.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.owners.is_empty() {
            return Err(ValidationError::NoOwners);
        }

        let mut seen = HashSet::with_capacity(self.owners.len());
        for owner in &self.owners {
            if owner.is_zero() || *owner == SENTINEL_OWNERS {
                return Err(ValidationError::InvalidOwner(*owner));
            }
            if !seen.insert(owner) {
                return Err(ValidationError::DuplicateOwner(*owner));
            }
        }

        if self.threshold == 0 || self.threshold > self.owners.len() as u64 {
            return Err(ValidationError::InvalidThreshold {
                threshold: self.threshold,
                owners: self.owners.len(),
            });
        }

        Ok(())
    }
}

/// A derived Safe address with the initializer it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedSafe {
    /// Counterfactual address.
    pub address: Address,
    /// ABI-encoded `setup` call.
    pub setup_data: Bytes,
}

/// ABI-encodes the `setup` initializer. No delegate call is made during setup.
pub fn encode_setup_data(setup: &SafeSetup) -> Result<Bytes, ValidationError> {
    setup.validate()?;

    Ok(ISafe::setupCall {
        _owners: setup.owners.clone(),
        _threshold: U256::from(setup.threshold),
        to: Address::ZERO,
        data: Bytes::new(),
        fallbackHandler: setup.fallback_handler,
        paymentToken: setup.payment_token,
        payment: setup.payment,
        paymentReceiver: setup.payment_receiver,
    }
    .abi_encode()
    .into())
}

/// Computes the CREATE2 address of a proxy deployed by `factory`.
pub fn derive_safe_address(
    factory: Address,
    master_copy: Address,
    proxy_creation_code: &[u8],
    setup_data: &[u8],
    salt_nonce: U256,
) -> Address {
    let mut salt_preimage = [0u8; 64];
    salt_preimage[..32].copy_from_slice(keccak256(setup_data).as_slice());
    salt_preimage[32..].copy_from_slice(&salt_nonce.to_be_bytes::<32>());
    let salt = keccak256(salt_preimage);

    let mut init_code = Vec::with_capacity(proxy_creation_code.len() + 32);
    init_code.extend_from_slice(proxy_creation_code);
    init_code.extend_from_slice(B256::left_padding_from(master_copy.as_slice()).as_slice());

    factory.create2(salt, keccak256(&init_code))
}

/// Validates `setup`, encodes it and derives the Safe address.
pub fn derive(
    factory: Address,
    master_copy: Address,
    proxy_creation_code: &[u8],
    setup: &SafeSetup,
    salt_nonce: U256,
) -> Result<DerivedSafe, ValidationError> {
    let setup_data = encode_setup_data(setup)?;
    let address =
        derive_safe_address(factory, master_copy, proxy_creation_code, &setup_data, salt_nonce);
    Ok(DerivedSafe { address, setup_data })
}

/// Calldata of `createProxyWithNonce` deploying the Safe.
pub fn create_proxy_calldata(master_copy: Address, setup_data: Bytes, salt_nonce: U256) -> Bytes {
    IProxyFactory::createProxyWithNonceCall {
        _mastercopy: master_copy,
        initializer: setup_data,
        saltNonce: salt_nonce,
    }
    .abi_encode()
    .into()
}

/// Parses an address, requiring EIP-55 checksum casing.
pub fn parse_checksummed(address: &str) -> Result<Address, ValidationError> {
    Address::parse_checksummed(address, None)
        .map_err(|_| ValidationError::NotChecksummed(address.to_string()))
}

/// Whether `address` is a valid EIP-55 checksummed address.
pub fn is_checksum_address(address: &str) -> bool {
    parse_checksummed(address).is_ok()
}
