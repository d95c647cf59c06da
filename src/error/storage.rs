use super::{internal_rpc, invalid_params};
use crate::types::status::TransitionError;
use alloy::primitives::Address;

/// Errors returned by [`StorageApi`](crate::storage::StorageApi).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A unique constraint or guarded update rejected the write.
    #[error("conflicting write: {0}")]
    Conflict(String),
    /// The multisig nonce does not match the next free nonce.
    #[error("multisig nonce {expected} requested, next free nonce is {allocated}")]
    NonceMismatch {
        /// Nonce requested by the caller.
        expected: u64,
        /// Nonce the store would allocate.
        allocated: u64,
    },
    /// The lifecycle transition is not legal for the stored facts.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// The Safe is not registered.
    #[error("safe {0} is not registered")]
    UnknownSafe(Address),
    /// A deserialization error occurred.
    #[error("a deserialization error occurred")]
    SerdeError(#[from] serde_json::Error),
    /// An internal error occurred.
    #[error("an internal error occurred")]
    InternalError(#[from] eyre::Error),
}

impl StorageError {
    /// Whether the failure is in the backend rather than in the write itself.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::InternalError(_))
    }
}

impl From<StorageError> for jsonrpsee::types::error::ErrorObject<'static> {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(..)
            | StorageError::NonceMismatch { .. }
            | StorageError::Transition(..)
            | StorageError::UnknownSafe(..) => invalid_params(err.to_string()),
            StorageError::SerdeError(..) => internal_rpc("an internal error occurred"),
            StorageError::InternalError(..) => internal_rpc("an internal error occurred"),
        }
    }
}
