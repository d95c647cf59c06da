use alloy::transports::{RpcError, TransportErrorKind};
use std::time::Duration;

/// Errors returned by a [`NodeClient`](crate::node::NodeClient).
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The node did not answer in time.
    #[error("node request timed out after {0:?}")]
    Timeout(Duration),
    /// The node could not be reached or returned an unusable answer.
    #[error("node unavailable: {0}")]
    Unavailable(String),
    /// RPC error.
    #[error(transparent)]
    Rpc(#[from] RpcError<TransportErrorKind>),
    /// An error occurred during ABI encoding/decoding.
    #[error(transparent)]
    AbiError(#[from] alloy::sol_types::Error),
}
