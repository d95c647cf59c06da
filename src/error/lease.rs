/// Errors returned by a [`LeaseStore`](crate::lease::LeaseStore).
#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    /// The Redis backend failed.
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    /// The lease stayed busy for the whole wait.
    #[error("lease {0} is busy")]
    Busy(String),
}
