//! Chronologist entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse configuration** — load and validate the environment variables
//!    described in [`config::Config`].
//! 2. **Wire observability** — configure `tracing-subscriber` with the
//!    selected format and level filter. All structured events emitted by every
//!    crate in the workspace flow through this layer.
//! 3. **Construct infrastructure** — annotation store client and chronicle,
//!    the optional metrics sink and its `/metrics` endpoint, the platform
//!    client and carrier source.
//! 4. **Run the controller** — until SIGINT or SIGTERM cancels the shutdown
//!    token, after which in-flight reconciliations drain and the process
//!    exits.
//!
//! Startup failures (missing required configuration, invalid watch-target
//! flags, unreachable platform API) terminate the process with a contextual
//! error; reconciliation failures never do.

mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use chronologist::{Chronicle, ReleaseSink};
use controller::{Controller, Options, WatchTarget};
use informer::KubeCarrierSource;
use metrics::ReleaseMetrics;

use crate::config::{Config, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("load configuration from environment")?;
    init_logging(&config)?;

    let target = WatchTarget::from_flags(config.watch_config_maps, config.watch_secrets)
        .context("resolve watch target")?;

    let grafana_client =
        grafana::Client::new(config.grafana_addr.clone(), config.grafana_api_key.clone());
    let chronicle: Arc<dyn Chronicle> = Arc::new(grafana::Chronicle::new(grafana_client));

    let sink = config
        .metrics_addr
        .map(|_| ReleaseMetrics::new().context("build metrics sink"))
        .transpose()?
        .map(Arc::new);

    let platform = informer::client_for(config.kubeconfig_path.as_deref())
        .await
        .context("create platform client")?;
    let source = KubeCarrierSource::new(platform, target);

    let mut options = Options::new(target);
    options.max_age = config.release_revision_max_age;
    options.workers = config.workers;
    let controller = Controller::new(
        chronicle,
        sink.clone().map(|sink| sink as Arc<dyn ReleaseSink>),
        options,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("received shutdown signal");
            shutdown.cancel();
        }
    });

    if let (Some(addr), Some(sink)) = (config.metrics_addr, sink) {
        tokio::spawn(serve_metrics(addr, sink, shutdown.clone()));
    }

    controller.run(source, shutdown).await
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .context("parse LOG_LEVEL")?;
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            error!(error = %err, "installing SIGTERM handler failed");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

async fn serve_metrics(
    addr: SocketAddr,
    sink: Arc<ReleaseMetrics>,
    shutdown: CancellationToken,
) {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let sink = Arc::clone(&sink);
            async move { render_metrics(&sink) }
        }),
    );

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(addr = %addr, error = %err, "binding metrics listener failed");
            return;
        }
    };

    info!(addr = %addr, "serving metrics");
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown.cancelled().await;
    });
    if let Err(err) = server.await {
        error!(error = %err, "metrics server failed");
    }
}

fn render_metrics(sink: &ReleaseMetrics) -> Result<String, StatusCode> {
    prometheus::TextEncoder::new()
        .encode_to_string(&sink.registry().gather())
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
