//! Exclusive, expiring leases on Safes.
//!
//! Every read-decide-write sequence on a Safe runs under its wallet lease. Leases expire on
//! their own, so a crashed holder never blocks a Safe for longer than the lease TTL.

mod memory;
pub use memory::InMemoryLeaseStore;

mod redis;
pub use redis::RedisLeaseStore;

use crate::{
    constants::{
        DEFAULT_LEASE_RETRY_INTERVAL, DEFAULT_LEASE_TTL, DEFAULT_LEASE_WAIT, WALLET_LEASE_PREFIX,
    },
    error::LeaseError,
};
use alloy::primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, future::Future, sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Proof of holding a lease. Only the holder can release it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseToken(String);

impl LeaseToken {
    /// A fresh random token.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The token value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A store of expiring leases.
#[async_trait]
pub trait LeaseStore: Debug + Send + Sync {
    /// Takes the lease on `key` for `ttl` if nobody holds it.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LeaseToken>, LeaseError>;

    /// Releases the lease on `key` if it is still held with `token`. Returns whether it was.
    async fn release(&self, key: &str, token: &LeaseToken) -> Result<bool, LeaseError>;
}

/// Lease timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseConfig {
    /// How long a lease lives without being released.
    #[serde(with = "crate::serde::duration")]
    pub ttl: Duration,
    /// How long to wait for a busy lease.
    #[serde(with = "crate::serde::duration")]
    pub wait_timeout: Duration,
    /// Poll interval while waiting.
    #[serde(with = "crate::serde::duration")]
    pub retry_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_LEASE_TTL,
            wait_timeout: DEFAULT_LEASE_WAIT,
            retry_interval: DEFAULT_LEASE_RETRY_INTERVAL,
        }
    }
}

/// Lease key of a Safe.
pub fn wallet_key(safe: Address) -> String {
    format!("{WALLET_LEASE_PREFIX}:{safe}")
}

/// Wallet leases on top of a [`LeaseStore`].
#[derive(Debug, Clone)]
pub struct Leases {
    store: Arc<dyn LeaseStore>,
    config: LeaseConfig,
}

impl Leases {
    /// Creates [`Leases`] over `store`.
    pub fn new(store: Arc<dyn LeaseStore>, config: LeaseConfig) -> Self {
        Self { store, config }
    }

    /// Creates [`Leases`] with an in-memory store. Only safe within a single process.
    pub fn in_memory(config: LeaseConfig) -> Self {
        Self::new(Arc::new(InMemoryLeaseStore::default()), config)
    }

    /// The lease timing.
    pub const fn config(&self) -> &LeaseConfig {
        &self.config
    }

    /// Takes the lease on `key`, polling until `wait_timeout` elapses.
    pub async fn acquire_with_timeout(&self, key: &str) -> Result<Option<LeaseToken>, LeaseError> {
        let deadline = Instant::now() + self.config.wait_timeout;
        loop {
            if let Some(token) = self.store.acquire(key, self.config.ttl).await? {
                return Ok(Some(token));
            }
            if Instant::now() + self.config.retry_interval > deadline {
                debug!(key, "Lease is busy.");
                return Ok(None);
            }
            tokio::time::sleep(self.config.retry_interval).await;
        }
    }

    /// Runs `f` while holding the lease on `key`.
    ///
    /// Returns `None` without running `f` if the lease stays busy. The lease is released
    /// whatever `f` returns.
    pub async fn run_exclusive<T, F, Fut>(&self, key: &str, f: F) -> Result<Option<T>, LeaseError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Some(token) = self.acquire_with_timeout(key).await? else {
            return Ok(None);
        };

        let output = f().await;

        match self.store.release(key, &token).await {
            Ok(true) => {}
            Ok(false) => warn!(key, "Lease expired before release."),
            Err(err) => warn!(key, %err, "Failed to release lease."),
        }

        Ok(Some(output))
    }

    /// Runs `f` while holding the lease of `safe`.
    pub async fn with_wallet<T, F, Fut>(&self, safe: Address, f: F) -> Result<Option<T>, LeaseError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.run_exclusive(&wallet_key(safe), f).await
    }
}
