//! Request metrics of the `safe` namespace and the Prometheus exporter.

use futures_util::future::BoxFuture;
use jsonrpsee::{
    MethodResponse,
    server::middleware::rpc::RpcServiceT,
    types::{Request, error::METHOD_NOT_FOUND_CODE},
};
use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{
    net::SocketAddr,
    sync::Mutex,
    time::{Duration, Instant},
};

const REQUESTS: &str = "safe_relay.rpc.requests";
const REQUEST_DURATION: &str = "safe_relay.rpc.request_duration";

/// A [`jsonrpsee`] middleware counting and timing relay requests per method.
#[derive(Debug, Clone)]
pub struct RpcMetricsService<S> {
    service: S,
}

impl<S> RpcMetricsService<S> {
    /// Wraps `service`.
    pub fn new(service: S) -> Self {
        Self { service }
    }
}

impl<'a, S> RpcServiceT<'a> for RpcMetricsService<S>
where
    S: RpcServiceT<'a> + Send + Sync + Clone + 'static,
{
    type Future = BoxFuture<'a, MethodResponse>;

    fn call(&self, req: Request<'a>) -> Self::Future {
        let service = self.service.clone();

        Box::pin(async move {
            let method = req.method_name().to_string();
            let started = Instant::now();
            let response = service.call(req).await;

            // unknown methods would blow up the label cardinality
            if let Some(outcome) = outcome(response.as_error_code()) {
                counter!(REQUESTS, "method" => method.clone(), "outcome" => outcome).increment(1);
                histogram!(REQUEST_DURATION, "method" => method)
                    .record(started.elapsed().as_secs_f64());
            }

            response
        })
    }
}

/// Outcome label of a response, `None` for calls to unknown methods.
fn outcome(error_code: Option<i32>) -> Option<String> {
    match error_code {
        None => Some("ok".to_string()),
        Some(METHOD_NOT_FOUND_CODE) => None,
        Some(code) => Some(code.to_string()),
    }
}

/// Installs the global Prometheus recorder and serves it on `metrics_addr`.
///
/// Only the first call installs anything, later calls return the same handle.
pub async fn setup_exporter(metrics_addr: impl Into<SocketAddr>) -> eyre::Result<PrometheusHandle> {
    static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

    let mut installed =
        HANDLE.lock().map_err(|_| eyre::eyre!("metrics handle lock is poisoned"))?;
    if let Some(handle) = installed.as_ref() {
        return Ok(handle.clone());
    }

    let addr: SocketAddr = metrics_addr.into();
    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .upkeep_timeout(Duration::from_secs(5))
        .build()?;
    let handle = recorder.handle();

    metrics::set_global_recorder(recorder)
        .map_err(|err| eyre::eyre!("could not set metrics recorder: {err}"))?;
    tokio::spawn(exporter);

    describe_counter!(REQUESTS, Unit::Count, "Relay RPC requests by method and outcome.");
    describe_histogram!(REQUEST_DURATION, Unit::Seconds, "Relay RPC request duration.");

    tracing::info!(%addr, "Serving metrics.");
    *installed = Some(handle.clone());

    Ok(handle)
}
