use super::CoinGecko;
use crate::{
    price::{fetchers::PriceFetcher, metrics::CoinPairMetrics},
    types::TokenRegistry,
};
use alloy::primitives::{Address, ChainId, U256};
use std::{
    collections::{HashMap, hash_map::Entry},
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// Token rate taken a certain timestamp.
#[derive(Debug, Clone, Copy)]
struct RateTick {
    /// Price of one whole token in ETH.
    pub rate: f64,
    /// Timestamp when we received the rate update.
    pub timestamp: Instant,
}

/// Messages used by the price oracle task.
#[derive(Debug)]
pub enum PriceOracleMessage {
    /// Message to update token prices in ETH.
    Update { fetcher: PriceFetcher, prices: Vec<(Address, f64)>, timestamp: Instant },
    /// Message to lookup the ETH price of a token.
    Lookup { token: Address, tx: oneshot::Sender<Option<f64>> },
}

/// Configuration for the price oracle.
#[derive(Debug, Clone)]
pub struct PriceOracleConfig {
    /// Duration after which a rate is considered expired.
    pub rate_ttl: Duration,
}

impl Default for PriceOracleConfig {
    fn default() -> Self {
        Self { rate_ttl: Duration::from_secs(300) }
    }
}

/// A price oracle that can be used to lookup or update the ETH price of a payment token.
#[derive(Debug, Clone)]
pub struct PriceOracle {
    /// Channel sender to lookup and update token prices.
    tx: mpsc::UnboundedSender<PriceOracleMessage>,
    /// Fixed rates which take precedence over fetched ones.
    constant_rates: HashMap<Address, f64>,
}

impl Default for PriceOracle {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl PriceOracle {
    /// Return a new [`PriceOracle`].
    pub fn new(config: PriceOracleConfig) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut registry = PriceRegistry::default();
            while let Some(message) = rx.recv().await {
                match message {
                    PriceOracleMessage::Update { fetcher, prices, timestamp } => {
                        trace!(?fetcher, ?timestamp, "Received price updates.");

                        for (token, rate) in prices {
                            trace!(%token, eth_price = rate, "ETH price update");
                            registry.insert(token, RateTick { rate, timestamp });
                        }
                    }
                    PriceOracleMessage::Lookup { token, tx } => {
                        trace!(%token, "Received lookup request.");
                        let _ = tx.send(
                            registry
                                .get(&token)
                                .filter(|info| {
                                    if info.rate.timestamp.elapsed() > config.rate_ttl {
                                        info.metrics.expired_hits.increment(1);
                                        false
                                    } else {
                                        true
                                    }
                                })
                                .map(|info| info.rate.rate),
                        );
                    }
                }
            }
        });

        Self { tx, constant_rates: HashMap::new() }
    }

    /// Returns [`Self`] with a constant rate for `token`.
    pub fn with_constant_rate(mut self, token: Address, rate: f64) -> Self {
        self.constant_rates.insert(token, rate);
        self
    }

    /// Returns [`Self`] with the fixed rates of the registry's tokens.
    pub fn with_registry_rates(self, registry: &TokenRegistry) -> Self {
        registry.tokens().into_iter().fold(self, |oracle, token| match token.fixed_eth_price {
            Some(rate) => oracle.with_constant_rate(token.address, rate),
            None => oracle,
        })
    }

    /// Spawns a price fetcher for the given tokens.
    pub fn spawn_fetcher(&self, fetcher: PriceFetcher, chain_id: ChainId, tokens: &[Address]) {
        match fetcher {
            PriceFetcher::CoinGecko => CoinGecko::launch(chain_id, tokens, self.tx.clone()),
        }
    }

    /// Returns the price of one whole `token` in wei, or `None` if no fresh rate is known.
    pub async fn eth_price(&self, token: Address) -> Option<U256> {
        let rate = match self.constant_rates.get(&token) {
            Some(rate) => Some(*rate),
            None => {
                let (req_tx, req_rx) = oneshot::channel();
                let _ = self.tx.send(PriceOracleMessage::Lookup { token, tx: req_tx });
                req_rx.await.ok().flatten()
            }
        };

        rate.filter(|rate| rate.is_finite() && *rate > 0.0)
            .map(|eth_price| U256::from((eth_price * 1e18) as u128))
            .filter(|price| !price.is_zero())
    }
}

/// Tracks the rate of a token.
#[derive(Debug)]
struct CoinPairInfo {
    /// metrics for this token
    metrics: CoinPairMetrics,
    /// The tracked rate
    rate: RateTick,
}

/// Keeps track of tokens and their rate
#[derive(Debug, Default)]
struct PriceRegistry {
    eth_prices: HashMap<Address, CoinPairInfo>,
}

impl PriceRegistry {
    /// Inserts or updates the ETH rate for the given token
    fn insert(&mut self, token: Address, rate: RateTick) {
        match self.eth_prices.entry(token) {
            Entry::Occupied(mut e) => {
                e.get().metrics.rate.set(rate.rate);
                e.get_mut().rate = rate;
            }
            Entry::Vacant(e) => {
                let info = CoinPairInfo {
                    metrics: CoinPairMetrics::new_with_labels(&[("pair", format!("{token}/ETH"))]),
                    rate,
                };
                info.metrics.rate.set(rate.rate);
                e.insert(info);
            }
        }
    }

    /// Gets the ETH rate for the given token
    fn get(&self, token: &Address) -> Option<&CoinPairInfo> {
        self.eth_prices.get(token)
    }
}
