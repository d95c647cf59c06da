//! Price metrics

use metrics::{Counter, Gauge};
use metrics_derive::Metrics;

/// Metrics for a payment token's ETH rate.
#[derive(Metrics)]
#[metrics(scope = "oracle")]
pub struct CoinPairMetrics {
    /// Rate for this pair.
    pub rate: Gauge,
    /// Lookups that hit an expired rate.
    pub expired_hits: Counter,
}
