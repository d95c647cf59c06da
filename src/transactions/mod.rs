//! Signing and broadcasting of relay transactions.

mod metrics;
pub use metrics::TransactionMetrics;
mod signer;
pub use signer::*;
