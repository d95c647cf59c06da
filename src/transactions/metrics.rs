use metrics::Counter;
use metrics_derive::Metrics;

/// Metrics for a [`TxSender`](crate::transactions::TxSender).
#[derive(Metrics)]
#[metrics(scope = "transactions")]
pub struct TransactionMetrics {
    /// Number of sent transactions.
    pub sent: Counter,
    /// Number of transactions the node refused.
    pub failed: Counter,
    /// Number of rebroadcast transactions.
    pub rebroadcast: Counter,
}
