use super::{LeaseStore, LeaseToken};
use crate::error::LeaseError;
use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use std::time::{Duration, Instant};

/// [`LeaseStore`] kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    leases: DashMap<String, (LeaseToken, Instant)>,
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LeaseToken>, LeaseError> {
        let now = Instant::now();
        let token = LeaseToken::random();
        match self.leases.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().1 > now {
                    return Ok(None);
                }
                entry.insert((token.clone(), now + ttl));
            }
            Entry::Vacant(entry) => {
                entry.insert((token.clone(), now + ttl));
            }
        }
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: &LeaseToken) -> Result<bool, LeaseError> {
        Ok(self.leases.remove_if(key, |_, (held, _)| held == token).is_some())
    }
}
