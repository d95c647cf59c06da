use crate::price::{PriceFetcher, oracle::PriceOracleMessage};
use alloy::primitives::{Address, ChainId};
use alloy_chains::Chain;
use reqwest::get;
use std::{collections::HashMap, str::FromStr, time::Duration};
use tokio::{sync::mpsc, time::interval};
use tracing::{error, trace, warn};

/// The time interval between fetching prices.
static PRICE_FETCH_INTERVAL: Duration = Duration::from_secs(60);

/// CoinGecko price fetcher.
#[derive(Debug)]
pub struct CoinGecko {
    /// URL used to fetch prices.
    request_url: String,
    /// Price oracle sender used to update the price.
    update_tx: mpsc::UnboundedSender<PriceOracleMessage>,
}

impl CoinGecko {
    /// Spawns a task that sends the ETH price of `tokens` to the [`PriceOracle`] every minute.
    ///
    /// [`PriceOracle`]: crate::price::PriceOracle
    pub fn launch(
        chain_id: ChainId,
        tokens: &[Address],
        update_tx: mpsc::UnboundedSender<PriceOracleMessage>,
    ) {
        if tokens.is_empty() {
            warn!("No payment tokens to fetch prices for.");
            return;
        }

        let api_key = std::env::var("GECKO_API").unwrap_or_default();
        let request_url = format!(
            "https://api.coingecko.com/api/v3/simple/token_price/{}?contract_addresses={}&vs_currencies=eth&x_cg_demo_api_key={}",
            Self::platform(chain_id),
            tokens.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(","),
            &api_key
        );

        let gecko = Self { request_url, update_tx };

        tokio::spawn(async move {
            let mut clock = interval(PRICE_FETCH_INTERVAL);

            loop {
                clock.tick().await;
                if let Err(err) = gecko.update_prices().await {
                    error!(%err, "Failed to fetch price from feed.");
                }
            }
        });
    }

    /// Returns the CoinGecko platform identifier for a chain.
    fn platform(chain: ChainId) -> &'static str {
        if chain == Chain::base_sepolia().id() || chain == Chain::base_mainnet().id() {
            "base"
        } else if chain == Chain::optimism_sepolia().id() || chain == Chain::optimism_mainnet().id()
        {
            "optimistic-ethereum"
        } else {
            "ethereum"
        }
    }

    /// Parses a `simple/token_price` response into token rates.
    fn parse_prices(resp: &str) -> Option<Vec<(Address, f64)>> {
        let data = serde_json::from_str::<HashMap<String, HashMap<String, f64>>>(resp).ok()?;
        Some(
            data.into_iter()
                .filter_map(|(addr, inner)| {
                    let price = *inner.get("eth")?;
                    (price.is_finite() && price > 0.0)
                        .then_some((Address::from_str(&addr).ok()?, price))
                })
                .collect(),
        )
    }

    /// Fetches and forwards token prices.
    async fn update_prices(&self) -> Result<(), reqwest::Error> {
        let resp = get(&self.request_url).await?.text().await?;
        trace!(response = ?resp, "CoinGecko response.");

        match Self::parse_prices(&resp) {
            Some(prices) => {
                let _ = self.update_tx.send(PriceOracleMessage::Update {
                    fetcher: PriceFetcher::CoinGecko,
                    prices,
                    timestamp: std::time::Instant::now(),
                });
            }
            None => error!(resp, "Not able to parse CoinGecko response."),
        }

        Ok(())
    }
}
