//! Signer abstraction.
//!
//! A signer abstracted over the underlying key source.
use alloy::{
    network::{FullSigner, TxSigner},
    primitives::{Address, B256, Signature},
    signers::{
        k256::ecdsa::SigningKey,
        local::{
            PrivateKeySigner,
            coins_bip39::{English, Mnemonic},
        },
    },
};
use std::{fmt, ops::Deref, str::FromStr, sync::Arc};

/// Abstraction over the relay account keys.
#[derive(Clone)]
pub struct DynSigner(pub Arc<dyn FullSigner<Signature> + Send + Sync>);

impl fmt::Debug for DynSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RelaySigner").field(&self.address()).finish()
    }
}

impl DynSigner {
    /// Derives the signer at `index` from a mnemonic.
    pub fn derive_from_mnemonic(mnemonic: &str, index: u32) -> eyre::Result<Self> {
        let mnemonic = Mnemonic::<English>::new_from_phrase(mnemonic)?;
        let path = format!("m/44'/60'/0'/0/{index}");
        let key = mnemonic.derive_key(path.as_str(), None)?;
        let key: &SigningKey = key.as_ref();
        Ok(Self(Arc::new(PrivateKeySigner::from_signing_key(key.clone()))))
    }

    /// Load a private key.
    pub fn from_signing_key(key: &str) -> eyre::Result<Self> {
        Ok(Self(Arc::new(PrivateKeySigner::from_str(key)?)))
    }

    /// Loads a private key, or a mnemonic when `key` is not a hex key.
    pub fn from_key_or_mnemonic(key: &str) -> eyre::Result<Self> {
        match Self::from_signing_key(key) {
            Ok(signer) => Ok(signer),
            Err(_) => Self::derive_from_mnemonic(key, 0),
        }
    }

    /// Returns the signer's Ethereum Address.
    pub fn address(&self) -> Address {
        TxSigner::address(&self.0)
    }

    /// Signs a raw 32-byte hash.
    pub async fn sign_digest(&self, digest: B256) -> alloy::signers::Result<Signature> {
        self.sign_hash(&digest).await
    }
}

impl Deref for DynSigner {
    type Target = dyn FullSigner<Signature> + Send + Sync;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}
