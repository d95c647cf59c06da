use super::invalid_params;
use alloy::primitives::Address;

/// Errors caused by a malformed request.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// A Safe needs at least one owner.
    #[error("at least one owner is required")]
    NoOwners,
    /// An owner appears more than once.
    #[error("owner {0} is duplicated")]
    DuplicateOwner(Address),
    /// The zero address or the owner list sentinel was used as an owner.
    #[error("{0} is not a valid owner")]
    InvalidOwner(Address),
    /// The threshold is outside `1..=owners`.
    #[error("threshold {threshold} is invalid for {owners} owners")]
    InvalidThreshold {
        /// Requested threshold.
        threshold: u64,
        /// Number of owners.
        owners: usize,
    },
    /// The address is not in EIP-55 checksum format.
    #[error("{0} is not a checksummed address")]
    NotChecksummed(String),
    /// Gas can only be refunded to the relay.
    #[error("refund receiver {0} is not allowed")]
    InvalidRefundReceiver(Address),
    /// The signature blob is malformed.
    #[error("malformed signatures: {0}")]
    MalformedSignatures(String),
}

impl From<ValidationError> for jsonrpsee::types::error::ErrorObject<'static> {
    fn from(err: ValidationError) -> Self {
        invalid_params(err.to_string())
    }
}
