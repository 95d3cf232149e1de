//! Metrics exposition endpoint: installs the global `metrics` recorder
//! and serves it over `axum` in the Prometheus text-0.0.4 format.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Installs the global Prometheus recorder with `prefix` applied to every
/// exported metric name (`METRICS_NAME_PREFIX`, default `cdp`). Must run
/// exactly once per process, before any `metrics::counter!`/`metrics::gauge!`
/// call.
pub fn install_recorder(prefix: String) -> PrometheusHandle {
    PrometheusBuilder::new()
        .with_prefix(prefix)
        .install_recorder()
        .expect("failed to install the Prometheus metrics recorder")
}

async fn render(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}

/// Serves `handle`'s rendered text on `path` at `port` until `cancel` fires.
/// This task must be cancelled strictly after the
/// backpressure supervisor's task so a dependent scraping its last gauge
/// value doesn't race the endpoint's shutdown.
pub fn spawn(
    handle: PrometheusHandle,
    port: u16,
    path: String,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let handle = Arc::new(handle);
    let router = Router::new().route(&path, get(render)).with_state(handle);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, %addr, "failed to bind metrics endpoint, metrics disabled");
                return;
            }
        };
        info!(%addr, %path, "metrics endpoint listening");
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            cancel.cancelled().await;
        });
        if let Err(e) = serve.await {
            warn!(error = %e, "metrics endpoint exited with error");
        }
    })
}
