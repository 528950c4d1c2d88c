//! Router assembly and the HTTP server loop.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use super::{commands::DashboardCommand, v0};
use crate::dashboard::DashboardSnapshot;
use crate::pool_api;
use crate::probe::Prober;
use crate::tracing::prelude::*;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "poolscope API",
        description = "Pool statistics and stratum endpoint selection for dashboard views"
    ),
    tags(
        (name = "health", description = "Liveness"),
        (name = "pools", description = "Polled pool data"),
        (name = "endpoints", description = "Stratum endpoint latency and selection"),
        (name = "miners", description = "Per-miner statistics"),
        (name = "probe", description = "On-demand TCP latency probe"),
    )
)]
struct ApiDoc;

/// State shared by all handlers.
#[derive(Clone)]
pub struct SharedState {
    pub snapshots: watch::Receiver<DashboardSnapshot>,
    pub dashboard_cmd_tx: mpsc::Sender<DashboardCommand>,
    /// Used directly for miner lookups, which are not polled.
    pub upstream: pool_api::Client,
    pub prober: Arc<dyn Prober>,
    /// Timeout for `/probe` requests that do not name one.
    pub probe_timeout_ms: u64,
}

/// Build the full application router.
pub fn router(state: SharedState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .nest("/api/v0", v0::routes())
        .split_for_parts();

    router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API on `addr` until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, state: SharedState, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind API listener on {addr}"))?;

    info!(%addr, "API listening");
    info!("Swagger UI available at http://{addr}/swagger-ui");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("API server failed")?;

    info!("API server stopped");
    Ok(())
}
