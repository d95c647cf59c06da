//! # Relay CLI
use crate::{config::RelayConfig, spawn::try_spawn_with_args};
use alloy::primitives::Address;
use clap::Parser;
use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
    time::Duration,
};
use url::Url;

/// The Safe relay deploys counterfactual Safes and relays their multisig transactions.
#[derive(Debug, Parser)]
#[command(author, about = "Safe relay", long_about = None)]
pub struct Args {
    /// The configuration file.
    ///
    /// If missing, a default one will be used and stored in the working directory under
    /// `relay.yaml`.
    #[arg(long, value_name = "CONFIG", env = "RELAY_CONFIG", default_value = "relay.yaml")]
    pub config: PathBuf,
    /// The address to serve the RPC on.
    #[arg(long = "http.addr", value_name = "ADDR", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub address: IpAddr,
    /// The port to serve the RPC on.
    #[arg(long = "http.port", value_name = "PORT", default_value_t = 9119)]
    pub port: u16,
    /// The port to serve the metrics on.
    #[arg(long = "http.metrics-port", value_name = "PORT", default_value_t = 9000)]
    pub metrics_port: u16,
    /// The maximum number of concurrent connections the relay can handle.
    #[arg(long = "max-connections", value_name = "NUM", default_value_t = 1000)]
    pub max_connections: u32,
    /// The RPC endpoint of the chain to send transactions to.
    ///
    /// Must be a valid HTTP or HTTPS URL pointing to an Ethereum JSON-RPC endpoint with the
    /// `trace` namespace enabled.
    #[arg(long = "endpoint", value_name = "RPC_ENDPOINT", env = "RELAY_ENDPOINT")]
    pub endpoint: Option<Url>,
    /// The address of the Safe proxy factory.
    #[arg(long = "proxy-factory", value_name = "ADDRESS")]
    pub proxy_factory: Option<Address>,
    /// The address of the Safe master copy.
    #[arg(long = "master-copy", value_name = "ADDRESS")]
    pub master_copy: Option<Address>,
    /// The fallback handler set up in new Safes.
    #[arg(long = "fallback-handler", value_name = "ADDRESS")]
    pub fallback_handler: Option<Address>,
    /// Receiver of the creation payments. Defaults to the funder.
    #[arg(long = "payment-receiver", value_name = "ADDRESS")]
    pub payment_receiver: Option<Address>,
    /// Multiplier applied to the node gas price, in percent.
    #[arg(long = "gas-price-multiplier", value_name = "PERCENT")]
    pub gas_price_multiplier: Option<u64>,
    /// The lifetime of a token price rate.
    #[arg(long, value_name = "SECONDS", value_parser = parse_duration_secs)]
    pub rate_ttl: Option<Duration>,
    /// Interval between two reconciliation passes.
    #[arg(long = "reconcile-interval", value_name = "SECONDS", value_parser = parse_duration_secs)]
    pub reconcile_interval: Option<Duration>,
    /// Blocks a transaction must be buried under before it counts as mined.
    #[arg(long = "confirmation-margin", value_name = "BLOCKS")]
    pub confirmation_margin: Option<u64>,
    /// Private key or mnemonic of the deployer account.
    #[arg(long = "deployer-key", value_name = "KEY", env = "RELAY_DEPLOYER_KEY")]
    pub deployer_key: Option<String>,
    /// Private key or mnemonic of the funder account.
    #[arg(long = "funder-key", value_name = "KEY", env = "RELAY_FUNDER_KEY")]
    pub funder_key: Option<String>,
    /// The database URL for the relay.
    #[arg(long = "database-url", value_name = "URL", env = "RELAY_DB_URL")]
    pub database_url: Option<String>,
    /// The Redis URL of the lease store.
    #[arg(long = "redis-url", value_name = "URL", env = "RELAY_REDIS_URL")]
    pub redis_url: Option<String>,
}

impl Args {
    /// Run the relayer service.
    pub async fn run(self) -> eyre::Result<()> {
        let config_path = self.config.clone();
        try_spawn_with_args(self, &config_path).await?.server.stopped().await;

        Ok(())
    }

    /// Merges [`Args`] values into an existing [`RelayConfig`] instance.
    pub fn merge_relay_config(self, mut config: RelayConfig) -> RelayConfig {
        if let Some(multiplier) = self.gas_price_multiplier {
            config = config.with_gas_price_multiplier(multiplier);
        }
        if let Some(rate_ttl) = self.rate_ttl {
            config = config.with_rate_ttl(rate_ttl);
        }
        if let Some(interval) = self.reconcile_interval {
            config = config.with_reconcile_interval(interval);
        }
        if let Some(margin) = self.confirmation_margin {
            config = config.with_confirmation_margin(margin);
        }

        config
            .with_address(self.address)
            .with_port(self.port)
            .with_metrics_port(self.metrics_port)
            .with_max_connections(self.max_connections)
            .with_endpoint(self.endpoint)
            .with_proxy_factory(self.proxy_factory)
            .with_master_copy(self.master_copy)
            .with_fallback_handler(self.fallback_handler)
            .with_payment_receiver(self.payment_receiver)
            .with_deployer_key(self.deployer_key)
            .with_funder_key(self.funder_key)
            .with_database_url(self.database_url)
            .with_redis_url(self.redis_url)
    }
}

/// Parses a string representing seconds to a [`Duration`].
fn parse_duration_secs(arg: &str) -> Result<std::time::Duration, std::num::ParseIntError> {
    let seconds = arg.parse()?;
    Ok(std::time::Duration::from_secs(seconds))
}
