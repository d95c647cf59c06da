use super::{LeaseStore, LeaseToken};
use crate::error::LeaseError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

/// Deletes the key only if it still holds the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// [`LeaseStore`] backed by Redis `SET NX PX`.
pub struct RedisLeaseStore {
    /// Redis connection manager (lazily initialized)
    connection: OnceCell<ConnectionManager>,
    /// Redis URL for connection
    redis_url: String,
}

impl std::fmt::Debug for RedisLeaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLeaseStore").field("redis_url", &self.redis_url).finish_non_exhaustive()
    }
}

impl RedisLeaseStore {
    /// Creates a store connecting lazily to `redis_url`.
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self { connection: OnceCell::new(), redis_url: redis_url.into() }
    }

    /// Get or initialize the Redis connection.
    async fn get_connection(&self) -> Result<ConnectionManager, LeaseError> {
        self.connection
            .get_or_try_init(|| async {
                let client = redis::Client::open(self.redis_url.as_str())?;
                let manager = ConnectionManager::new(client).await?;
                debug!(redis_url = %self.redis_url, "Lease store Redis connection established");
                Ok::<_, LeaseError>(manager)
            })
            .await
            .map(Clone::clone)
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LeaseToken>, LeaseError> {
        let mut conn = self.get_connection().await?;
        let token = LeaseToken::random();

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(reply.map(|_| token))
    }

    async fn release(&self, key: &str, token: &LeaseToken) -> Result<bool, LeaseError> {
        let mut conn = self.get_connection().await?;

        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await?;

        Ok(deleted == 1)
    }
}
