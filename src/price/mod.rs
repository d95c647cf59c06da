//! Price oracle and fetchers.

mod fetchers;
pub use fetchers::*;

mod metrics;

mod oracle;
pub use oracle::{PriceOracle, PriceOracleConfig};
