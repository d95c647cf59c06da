//! Nonce management of the relay accounts.
//!
//! The deployer and the funder send transactions from several tasks at once. Nonces are
//! allocated locally so that concurrent submissions never reuse one.

use crate::node::{NodeClient, NodeResult};
use alloy::primitives::Address;
use dashmap::DashMap;
use futures_util::lock::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Use `u64::MAX` as a sentinel value to indicate that the nonce has not been fetched yet.
const NONE: u64 = u64::MAX;

/// Allocates nonces per relay account.
#[derive(Clone, Debug, Default)]
pub struct NonceManager {
    nonces: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

impl NonceManager {
    fn slot(&self, address: Address) -> Arc<Mutex<u64>> {
        // Locks dashmap internally for a short duration to clone the `Arc`.
        // We also don't want to hold the dashmap lock through an await point.
        let rm = self.nonces.entry(address).or_insert_with(|| Arc::new(Mutex::new(NONE)));
        Arc::clone(rm.value())
    }

    /// Returns the next nonce of `address`, reading the pending transaction count the first
    /// time the account is seen.
    pub async fn next_nonce(&self, node: &dyn NodeClient, address: Address) -> NodeResult<u64> {
        let slot = self.slot(address);
        let mut nonce = slot.lock().await;
        let new_nonce = if *nonce == NONE {
            node.get_transaction_count(address).await?
        } else {
            *nonce + 1
        };
        *nonce = new_nonce;
        Ok(new_nonce)
    }

    /// Forgets the cached nonce of `address`, e.g. after a failed broadcast. The next
    /// allocation re-reads it from the node.
    pub async fn reset(&self, address: Address) {
        let slot = self.slot(address);
        *slot.lock().await = NONE;
        debug!(%address, "Reset nonce.");
    }
}
