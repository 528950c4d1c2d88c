//! Dashboard daemon.
//!
//! Polls the upstream pool API, probes stratum endpoint latency, and serves
//! the results over HTTP. Configured through `POOLSCOPE_*` environment
//! variables; see `poolscope::config`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use poolscope::{
    api::{self, SharedState},
    config::Config,
    dashboard::{Dashboard, DashboardConfig},
    pool_api,
    probe::{Prober, TcpProber},
    tracing::prelude::*,
};

#[tokio::main]
async fn main() -> Result<()> {
    poolscope::tracing::init_journald_or_stdout();

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        upstream = %config.upstream_url,
        hosts = ?config.stratum_hosts,
        "Starting poolscope"
    );

    let shutdown = CancellationToken::new();
    let upstream = pool_api::Client::new(config.upstream_url.clone())?;
    let prober: Arc<dyn Prober> = Arc::new(TcpProber);

    let dashboard = Dashboard::new(
        DashboardConfig::from(&config),
        upstream.clone(),
        Arc::clone(&prober),
        shutdown.clone(),
    );
    let state = SharedState {
        snapshots: dashboard.subscribe(),
        dashboard_cmd_tx: dashboard.commands(),
        upstream,
        prober,
        probe_timeout_ms: config.probe_timeout_ms,
    };

    let dashboard_task = tokio::spawn(dashboard.run());
    let mut api_task = tokio::spawn(api::serve(config.api_addr, state, shutdown.clone()));

    let api_result = tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown requested");
            None
        }
        result = &mut api_task => Some(result),
    };

    shutdown.cancel();
    dashboard_task.await.context("dashboard task panicked")?;

    let api_result = match api_result {
        Some(result) => result,
        None => api_task.await,
    };
    api_result.context("API task panicked")?
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "Cannot listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
