//! Relay error types.
use crate::{transactions::SignerError, types::status::TransitionError};
use alloy::primitives::{Address, Bytes};
use core::fmt;
use jsonrpsee::core::RpcResult;
use thiserror::Error;

mod lease;
pub use lease::LeaseError;

mod node;
pub use node::NodeError;

mod storage;
pub use storage::StorageError;

mod validation;
pub use validation::ValidationError;

/// JSON-RPC error code returned when a Safe is unknown.
pub const NOT_FOUND_CODE: i32 = -32004;

/// The overarching error type returned by the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The request is malformed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The payment token is not accepted, or no fresh rate is known for it.
    #[error("payment token {0} is not supported")]
    UnsupportedPaymentToken(Address),
    /// Not enough valid owner signatures.
    #[error("{valid} valid signatures, {threshold} required")]
    InsufficientSignatures {
        /// Number of valid signatures.
        valid: usize,
        /// Safe threshold.
        threshold: u64,
    },
    /// The multisig nonce is not the next one.
    #[error("invalid nonce {got}, expected {expected}")]
    InvalidNonce {
        /// Next nonce for the Safe.
        expected: u64,
        /// Nonce in the request.
        got: u64,
    },
    /// The Safe is already deployed.
    #[error("safe {0} is already deployed")]
    AlreadyDeployed(Address),
    /// A transaction for this step was already submitted.
    #[error("a transaction for safe {0} was already submitted")]
    AlreadySubmitted(Address),
    /// The Safe must be deployed first.
    #[error("safe {0} is not deployed")]
    WalletNotDeployed(Address),
    /// The Safe is unknown to the relay.
    #[error("safe {0} not found")]
    NotFound(Address),
    /// The node or the database is unreachable.
    #[error("service is unhealthy")]
    Unhealthy,
    /// Errors talking to the node.
    #[error(transparent)]
    Node(#[from] NodeError),
    /// Errors related to storage.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Errors related to leases.
    #[error(transparent)]
    Lease(#[from] LeaseError),
    /// Errors signing or sending a transaction.
    #[error(transparent)]
    Signer(#[from] SignerError),
    /// An internal error occurred.
    #[error(transparent)]
    InternalError(#[from] eyre::Error),
}

impl RelayError {
    /// Whether the operation may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unhealthy | Self::Node(_) | Self::Lease(_) => true,
            Self::Storage(err) => err.is_transient(),
            Self::Signer(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Maps a rejected lifecycle transition of `safe` to the matching relay error.
    pub fn from_transition(safe: Address, err: TransitionError) -> Self {
        match err {
            TransitionError::AlreadyDeployed => Self::AlreadyDeployed(safe),
            TransitionError::AlreadySubmitted(_) => Self::AlreadySubmitted(safe),
            err => Self::Storage(StorageError::Transition(err)),
        }
    }
}

impl From<RelayError> for jsonrpsee::types::error::ErrorObject<'static> {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Validation(inner) => inner.into(),
            RelayError::Storage(inner) => inner.into(),
            RelayError::NotFound(_) => rpc_err(NOT_FOUND_CODE, err.to_string(), None),
            RelayError::UnsupportedPaymentToken(_)
            | RelayError::InsufficientSignatures { .. }
            | RelayError::InvalidNonce { .. }
            | RelayError::AlreadyDeployed(_)
            | RelayError::AlreadySubmitted(_)
            | RelayError::WalletNotDeployed(_) => invalid_params(err),
            RelayError::Unhealthy
            | RelayError::Node(_)
            | RelayError::Lease(_)
            | RelayError::Signer(_)
            | RelayError::InternalError(_) => internal_rpc(err),
        }
    }
}

/// A helper trait to provide an RPC error code.
pub trait ToRpcResult<Ok, Err>: Sized {
    /// Converts result to [`RpcResult`] by converting error variant to
    /// [`jsonrpsee_types::error::ErrorObject`]
    fn to_rpc_result(self) -> RpcResult<Ok>
    where
        Err: fmt::Display;
}

macro_rules! impl_error_helpers {
    ($err:ty) => {
        impl<Ok> ToRpcResult<Ok, $err> for Result<Ok, $err> {
            fn to_rpc_result(self) -> RpcResult<Ok> {
                self.map_err(|err| err.into())
            }
        }

        impl From<$err> for String {
            fn from(err: $err) -> Self {
                err.to_string()
            }
        }
    };
}

impl_error_helpers!(RelayError);
impl_error_helpers!(ValidationError);
impl_error_helpers!(StorageError);

/// Constructs an invalid params JSON‑RPC error.
fn invalid_params(msg: impl Into<String>) -> jsonrpsee::types::error::ErrorObject<'static> {
    rpc_err(jsonrpsee::types::error::INVALID_PARAMS_CODE, msg, None)
}

/// Constructs an internal JSON‑RPC error.
fn internal_rpc(msg: impl Into<String>) -> jsonrpsee::types::error::ErrorObject<'static> {
    rpc_err(jsonrpsee::types::error::INTERNAL_ERROR_CODE, msg, None)
}

/// Constructs a JSON‑RPC error with `code`, `message` and optional `data`.
fn rpc_err(
    code: i32,
    msg: impl Into<String>,
    data: Option<Bytes>,
) -> jsonrpsee::types::error::ErrorObject<'static> {
    jsonrpsee::types::error::ErrorObject::owned(code, msg.into(), data)
}
