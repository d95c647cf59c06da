//! Relay configuration.
use crate::{
    constants::{DEFAULT_GAS_PRICE_MULTIPLIER, DEFAULT_NODE_TIMEOUT, DEFAULT_RECONCILE_INTERVAL},
    lease::LeaseConfig,
    reconcile::ScannerConfig,
    types::PaymentToken,
};
use alloy::primitives::{Address, address};
use eyre::Context;
use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, Ipv4Addr},
    path::Path,
    time::Duration,
};
use url::Url;

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayConfig {
    /// Server configuration.
    pub server: ServerConfig,
    /// Chain configuration.
    pub chain: ChainConfig,
    /// Safe contracts.
    pub contracts: ContractsConfig,
    /// Quote configuration.
    #[serde(default)]
    pub quote: QuoteConfig,
    /// ERC20 tokens accepted as creation payment.
    #[serde(default)]
    pub payment_tokens: Vec<PaymentToken>,
    /// Receiver of the creation payments. Defaults to the funder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_receiver: Option<Address>,
    /// Reconciliation configuration.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// Wallet lease configuration.
    #[serde(default)]
    pub lease: LeaseConfig,
    /// Price feed config.
    #[serde(default)]
    pub pricefeed: PriceFeedConfig,
    /// Secrets.
    #[serde(skip_serializing, default)]
    pub secrets: SecretsConfig,
    /// Database URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Redis URL of the lease store. Leases are kept in memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            chain: ChainConfig::default(),
            contracts: ContractsConfig::default(),
            quote: QuoteConfig::default(),
            payment_tokens: Vec::new(),
            payment_receiver: None,
            reconcile: ReconcileConfig::default(),
            lease: LeaseConfig::default(),
            pricefeed: PriceFeedConfig::default(),
            secrets: SecretsConfig::default(),
            database_url: None,
            redis_url: None,
        }
    }
}

impl RelayConfig {
    /// Sets the IP address to serve the RPC on.
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.server.address = address;
        self
    }

    /// Sets the port to serve the RPC on.
    pub fn with_port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    /// Sets the port to serve the metrics on.
    pub fn with_metrics_port(mut self, port: u16) -> Self {
        self.server.metrics_port = port;
        self
    }

    /// Sets the maximum number of concurrent connections the relay can handle.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.server.max_connections = max_connections;
        self
    }

    /// Sets the node endpoint.
    pub fn with_endpoint(mut self, endpoint: Option<Url>) -> Self {
        self.chain.endpoint = endpoint.or(self.chain.endpoint);
        self
    }

    /// Sets the proxy factory address.
    pub fn with_proxy_factory(mut self, proxy_factory: Option<Address>) -> Self {
        if let Some(proxy_factory) = proxy_factory {
            self.contracts.proxy_factory = proxy_factory;
        }
        self
    }

    /// Sets the master copy address.
    pub fn with_master_copy(mut self, master_copy: Option<Address>) -> Self {
        if let Some(master_copy) = master_copy {
            self.contracts.master_copy = master_copy;
        }
        self
    }

    /// Sets the fallback handler address.
    pub fn with_fallback_handler(mut self, fallback_handler: Option<Address>) -> Self {
        if let Some(fallback_handler) = fallback_handler {
            self.contracts.fallback_handler = fallback_handler;
        }
        self
    }

    /// Sets the gas price multiplier, in percent.
    pub fn with_gas_price_multiplier(mut self, multiplier: u64) -> Self {
        self.quote.gas_price_multiplier = multiplier;
        self
    }

    /// Sets the lifetime duration for token price rates.
    pub fn with_rate_ttl(mut self, rate_ttl: Duration) -> Self {
        self.quote.rate_ttl = rate_ttl;
        self
    }

    /// Extends the accepted payment tokens.
    pub fn with_payment_tokens(mut self, tokens: impl IntoIterator<Item = PaymentToken>) -> Self {
        self.payment_tokens.extend(tokens);
        self
    }

    /// Sets the receiver of the creation payments.
    pub fn with_payment_receiver(mut self, payment_receiver: Option<Address>) -> Self {
        self.payment_receiver = payment_receiver.or(self.payment_receiver);
        self
    }

    /// Sets the reconciliation interval.
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile.interval = interval;
        self
    }

    /// Sets the confirmation margin.
    pub fn with_confirmation_margin(mut self, margin: u64) -> Self {
        self.reconcile.scanner.confirmation_margin = margin;
        self
    }

    /// Sets the deployer key.
    pub fn with_deployer_key(mut self, key: Option<String>) -> Self {
        self.secrets.deployer_key = key.or(self.secrets.deployer_key);
        self
    }

    /// Sets the funder key.
    pub fn with_funder_key(mut self, key: Option<String>) -> Self {
        self.secrets.funder_key = key.or(self.secrets.funder_key);
        self
    }

    /// Sets the database URL.
    pub fn with_database_url(mut self, database_url: Option<String>) -> Self {
        self.database_url = database_url.or(self.database_url);
        self
    }

    /// Sets the Redis URL.
    pub fn with_redis_url(mut self, redis_url: Option<String>) -> Self {
        self.redis_url = redis_url.or(self.redis_url);
        self
    }

    /// Load from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> eyre::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .wrap_err_with(|| format!("failed to read config file: {}", path.display()))?;
        let config = serde_yaml::from_reader(&file)
            .wrap_err_with(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Save to a YAML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> eyre::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// The address to serve the RPC on.
    pub address: IpAddr,
    /// The port to serve the RPC on.
    pub port: u16,
    /// The port to serve the metrics on.
    pub metrics_port: u16,
    /// The maximum number of concurrent connections the relay can handle.
    pub max_connections: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9119,
            metrics_port: 9000,
            max_connections: 1000,
        }
    }
}

/// Node configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// The RPC endpoint of the chain to send transactions to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Url>,
    /// Timeout of a single node request.
    #[serde(with = "crate::serde::duration")]
    pub request_timeout: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout: DEFAULT_NODE_TIMEOUT,
        }
    }
}

/// Safe contracts configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractsConfig {
    /// Proxy factory deploying the Safes.
    pub proxy_factory: Address,
    /// Singleton the Safes delegate to.
    pub master_copy: Address,
    /// Fallback handler set up in new Safes.
    #[serde(default)]
    pub fallback_handler: Address,
}

impl Default for ContractsConfig {
    /// Safe v1.3.0 deployments.
    fn default() -> Self {
        Self {
            proxy_factory: address!("0xa6B71E26C5e0845f74c812102Ca7114b6a896AB2"),
            master_copy: address!("0xd9Db270c1B5E3Bd161E8c8503c55cEABeE709552"),
            fallback_handler: address!("0xf48f2B2d2a534e402487b3ee7C18c33Aec0Fe5e4"),
        }
    }
}

/// Quote configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteConfig {
    /// Multiplier applied to the node gas price, in percent.
    pub gas_price_multiplier: u64,
    /// The lifetime of a price rate.
    #[serde(with = "crate::serde::duration")]
    pub rate_ttl: Duration,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            gas_price_multiplier: DEFAULT_GAS_PRICE_MULTIPLIER,
            rate_ttl: Duration::from_secs(300),
        }
    }
}

/// Reconciliation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileConfig {
    /// Interval between two passes over all Safes.
    #[serde(with = "crate::serde::duration")]
    pub interval: Duration,
    /// Scanner settings.
    #[serde(flatten)]
    pub scanner: ScannerConfig,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { interval: DEFAULT_RECONCILE_INTERVAL, scanner: ScannerConfig::default() }
    }
}

/// Configuration for price feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFeedConfig {
    /// Whether to fetch token rates from CoinGecko.
    #[serde(default)]
    pub coingecko: bool,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self { coingecko: true }
    }
}

/// Secrets (kept out of serialized output).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretsConfig {
    /// Private key or mnemonic of the deployer.
    pub deployer_key: Option<String>,
    /// Private key or mnemonic of the funder.
    pub funder_key: Option<String>,
}
