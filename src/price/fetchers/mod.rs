mod coingecko;
pub use coingecko::*;

/// List of supported price fetchers.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum PriceFetcher {
    /// CoinGecko.
    CoinGecko,
}
