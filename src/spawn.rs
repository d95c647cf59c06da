//! Relay spawn utilities.
use crate::{
    cli::Args,
    config::RelayConfig,
    estimation::Estimator,
    lease::{Leases, RedisLeaseStore},
    metrics::{self, RpcMetricsService},
    node::{NodeClient, ProviderNode, proxy_creation_code},
    price::{PriceFetcher, PriceOracle, PriceOracleConfig},
    reconcile::Scanner,
    relay::{IntentAccounts, SafeContracts, SafeRelay},
    rpc::SafeApiServer,
    scheduler::ReconciliationService,
    sequencer::Sequencer,
    signers::DynSigner,
    storage::RelayStorage,
    submission::{RelayAccounts, Submitter},
    transactions::TxSender,
    types::TokenRegistry,
};
use alloy::{
    providers::{Provider, ProviderBuilder},
    rpc::client::ClientBuilder,
    transports::layers::RetryBackoffLayer,
};
use eyre::{OptionExt, WrapErr};
use http::header;
use jsonrpsee::server::{
    RpcServiceBuilder, Server, ServerHandle, middleware::http::ProxyGetRequestLayer,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::{net::SocketAddr, path::Path, sync::Arc};
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::{AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, warn};

/// [`RetryBackoffLayer`] used for the chain provider.
///
/// We are allowing max 10 retries with a backoff of 800ms. The CU/s is set to max value to avoid
/// any throttling.
const RETRY_LAYER: RetryBackoffLayer = RetryBackoffLayer::new(10, 800, u64::MAX);

/// Context returned once relay is launched.
#[derive(Debug)]
pub struct RelayHandle {
    /// The socket address to which the server is bound.
    pub local_addr: SocketAddr,
    /// Handle to RPC server.
    pub server: ServerHandle,
    /// Storage of the relay.
    pub storage: RelayStorage,
    /// The reconciliation service task.
    pub reconciliation: JoinHandle<()>,
    /// Metrics collector handle.
    pub metrics: PrometheusHandle,
}

impl RelayHandle {
    /// Returns the url to the http server
    pub fn http_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }
}

/// Attempts to spawn the relay service using CLI arguments and a configuration file.
pub async fn try_spawn_with_args<P: AsRef<Path>>(
    args: Args,
    config_path: P,
) -> eyre::Result<RelayHandle> {
    let config = if !config_path.as_ref().exists() {
        let config = args.merge_relay_config(RelayConfig::default());
        config.save_to_file(&config_path)?;
        config
    } else {
        // File exists: load and override with CLI values.
        args.merge_relay_config(RelayConfig::load_from_file(&config_path)?)
    };

    try_spawn(config).await
}

/// Spawns the relay service using the provided [`RelayConfig`].
pub async fn try_spawn(config: RelayConfig) -> eyre::Result<RelayHandle> {
    // relay accounts
    let deployer = DynSigner::from_key_or_mnemonic(
        config.secrets.deployer_key.as_deref().ok_or_eyre("missing deployer key")?,
    )
    .wrap_err("invalid deployer key")?;
    let funder = DynSigner::from_key_or_mnemonic(
        config.secrets.funder_key.as_deref().ok_or_eyre("missing funder key")?,
    )
    .wrap_err("invalid funder key")?;

    // construct db
    let storage = if let Some(db_url) = &config.database_url {
        info!("Using PostgreSQL as storage.");
        let pool = PgPool::connect(db_url).await?;
        sqlx::migrate!().run(&pool).await?;

        RelayStorage::pg(pool)
    } else {
        info!("Using in-memory storage.");
        RelayStorage::in_memory()
    };

    let leases = if let Some(redis_url) = &config.redis_url {
        info!("Using Redis for wallet leases.");
        Leases::new(Arc::new(RedisLeaseStore::new(redis_url.as_str())), config.lease)
    } else {
        warn!("Using in-memory wallet leases. Do not run more than one relay instance.");
        Leases::in_memory(config.lease)
    };

    // setup metrics exporter
    let metrics =
        metrics::setup_exporter((config.server.address, config.server.metrics_port)).await?;

    // construct provider
    let endpoint = config.chain.endpoint.clone().ok_or_eyre("missing chain endpoint")?;
    let client = ClientBuilder::default().layer(RETRY_LAYER).connect(endpoint.as_str()).await?;
    let provider = ProviderBuilder::new().connect_client(client).erased();
    let node: Arc<dyn NodeClient> =
        Arc::new(ProviderNode::new(provider, config.chain.request_timeout));

    let chain_id = node.chain_id().await.wrap_err("could not reach the chain endpoint")?;
    let creation_code = proxy_creation_code(node.as_ref(), config.contracts.proxy_factory)
        .await
        .wrap_err("could not read the proxy creation code")?;
    if creation_code.is_empty() {
        eyre::bail!("proxy factory {} has no proxy creation code", config.contracts.proxy_factory);
    }

    // construct estimator
    let tokens: TokenRegistry = config.payment_tokens.iter().cloned().collect();
    let price_oracle = PriceOracle::new(PriceOracleConfig { rate_ttl: config.quote.rate_ttl })
        .with_registry_rates(&tokens);
    if config.pricefeed.coingecko {
        let fetched = tokens
            .tokens()
            .into_iter()
            .filter(|token| token.fixed_eth_price.is_none())
            .map(|token| token.address)
            .collect::<Vec<_>>();
        price_oracle.spawn_fetcher(PriceFetcher::CoinGecko, chain_id, &fetched);
    }
    let estimator = Estimator::new(
        node.clone(),
        price_oracle,
        tokens,
        config.quote.gas_price_multiplier,
    );

    // construct engines
    let sender = TxSender::new(node.clone(), chain_id);
    let intent_accounts = IntentAccounts {
        deployer: deployer.address(),
        funder: funder.address(),
        payment_receiver: config.payment_receiver.unwrap_or_else(|| funder.address()),
    };
    let submitter = Submitter::new(
        node.clone(),
        storage.clone(),
        leases.clone(),
        sender.clone(),
        RelayAccounts { deployer: deployer.clone(), funder },
    );
    let sequencer = Sequencer::new(
        node.clone(),
        storage.clone(),
        leases.clone(),
        sender,
        estimator.clone(),
        deployer,
    );
    let scanner = Scanner::new(node.clone(), storage.clone(), leases, config.reconcile.scanner);
    let (queue, reconciliation) = ReconciliationService::spawn(
        scanner,
        submitter,
        sequencer.clone(),
        config.reconcile.interval,
    );

    // construct rpc module
    let contracts = SafeContracts {
        proxy_factory: config.contracts.proxy_factory,
        master_copy: config.contracts.master_copy,
        fallback_handler: config.contracts.fallback_handler,
        proxy_creation_code: creation_code,
    };
    let rpc = SafeRelay::new(
        contracts,
        intent_accounts,
        node,
        storage.clone(),
        estimator,
        sequencer,
        queue,
    )
    .into_rpc();

    // http layers
    let cors = CorsLayer::new()
        .allow_methods(AllowMethods::any())
        .allow_origin(AllowOrigin::any())
        .allow_headers([header::CONTENT_TYPE]);

    // start server
    let server = Server::builder()
        .http_only()
        .max_connections(config.server.max_connections)
        .set_http_middleware(
            ServiceBuilder::new()
                .layer(cors)
                .layer(ProxyGetRequestLayer::new("/health", "health")?),
        )
        .set_rpc_middleware(RpcServiceBuilder::new().layer_fn(RpcMetricsService::new))
        .build((config.server.address, config.server.port))
        .await?;
    let addr = server.local_addr()?;
    info!(%addr, chain_id, "Started relay service");
    info!(
        deployer = %intent_accounts.deployer,
        funder = %intent_accounts.funder,
        payment_receiver = %intent_accounts.payment_receiver,
        "Relay accounts"
    );

    Ok(RelayHandle {
        local_addr: addr,
        server: server.start(rpc),
        storage,
        reconciliation,
        metrics,
    })
}
