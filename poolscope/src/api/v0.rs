//! API v0 endpoints.
//!
//! Version 0 signals an unstable API -- breaking changes are expected
//! until the dashboard reaches 1.0.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::time::Duration;

use tokio::sync::oneshot;
use utoipa_axum::{router::OpenApiRouter, routes};

use super::commands::{CommandReply, DashboardCommand};
use super::server::SharedState;
use crate::api_client::types::{
    BlocksResponse, EndpointView, ErrorResponse, PaymentsResponse, PoolResponse, PoolsResponse,
    ProbeRequestBody, ProbeResponse, SelectionRequest,
};
use crate::error::Section;
use crate::pool_api::MinerStats;
use crate::probe::ProbeRequest;
use crate::tracing::prelude::*;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn unknown_pool(id: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, format!("unknown pool {id}"))
}

/// Build the v0 API routes with OpenAPI metadata.
pub fn routes() -> OpenApiRouter<SharedState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(get_pools))
        .routes(routes!(get_pool))
        .routes(routes!(get_blocks))
        .routes(routes!(get_payments))
        .routes(routes!(get_endpoints))
        .routes(routes!(put_selection))
        .routes(routes!(post_retest))
        .routes(routes!(post_refresh))
        .routes(routes!(get_miner))
        .routes(routes!(post_probe))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Server is running", body = String),
    ),
)]
async fn health() -> &'static str {
    "OK"
}

/// Return all pools from the last poll.
#[utoipa::path(
    get,
    path = "/pools",
    tag = "pools",
    responses(
        (status = OK, description = "Pool list and advisory", body = PoolsResponse),
    ),
)]
async fn get_pools(State(state): State<SharedState>) -> Json<PoolsResponse> {
    Json(state.snapshots.borrow().pools.clone())
}

/// Return a single pool by id, or 404 if not found.
#[utoipa::path(
    get,
    path = "/pools/{id}",
    tag = "pools",
    params(
        ("id" = String, Path, description = "Pool id"),
    ),
    responses(
        (status = OK, description = "Pool details", body = PoolResponse),
        (status = NOT_FOUND, description = "Pool not found", body = ErrorResponse),
    ),
)]
async fn get_pool(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<PoolResponse>, ApiError> {
    let snapshot = state.snapshots.borrow();
    let pool = snapshot.pool(&id).cloned().ok_or_else(|| unknown_pool(&id))?;
    Ok(Json(PoolResponse {
        pool,
        advisory: snapshot.pools.advisory.clone(),
    }))
}

/// Return the most recent blocks of a pool.
#[utoipa::path(
    get,
    path = "/pools/{id}/blocks",
    tag = "pools",
    params(
        ("id" = String, Path, description = "Pool id"),
    ),
    responses(
        (status = OK, description = "Blocks and advisory", body = BlocksResponse),
        (status = NOT_FOUND, description = "Pool not found", body = ErrorResponse),
    ),
)]
async fn get_blocks(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<BlocksResponse>, ApiError> {
    let snapshot = state.snapshots.borrow();
    if snapshot.pool(&id).is_none() {
        return Err(unknown_pool(&id));
    }
    let blocks = snapshot
        .blocks
        .get(&id)
        .cloned()
        .unwrap_or_else(|| BlocksResponse {
            pool_id: id,
            ..Default::default()
        });
    Ok(Json(blocks))
}

/// Return the most recent payments of a pool.
#[utoipa::path(
    get,
    path = "/pools/{id}/payments",
    tag = "pools",
    params(
        ("id" = String, Path, description = "Pool id"),
    ),
    responses(
        (status = OK, description = "Payments and advisory", body = PaymentsResponse),
        (status = NOT_FOUND, description = "Pool not found", body = ErrorResponse),
    ),
)]
async fn get_payments(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<PaymentsResponse>, ApiError> {
    let snapshot = state.snapshots.borrow();
    if snapshot.pool(&id).is_none() {
        return Err(unknown_pool(&id));
    }
    let payments = snapshot
        .payments
        .get(&id)
        .cloned()
        .unwrap_or_else(|| PaymentsResponse {
            pool_id: id,
            ..Default::default()
        });
    Ok(Json(payments))
}

/// Return a pool's endpoints, their latency, and the current selection.
#[utoipa::path(
    get,
    path = "/pools/{id}/endpoints",
    tag = "endpoints",
    params(
        ("id" = String, Path, description = "Pool id"),
    ),
    responses(
        (status = OK, description = "Endpoints and selection", body = EndpointView),
        (status = NOT_FOUND, description = "Pool not found", body = ErrorResponse),
    ),
)]
async fn get_endpoints(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<EndpointView>, ApiError> {
    state
        .snapshots
        .borrow()
        .endpoints
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| unknown_pool(&id))
}

/// Change the group and/or endpoint selection of a pool.
#[utoipa::path(
    put,
    path = "/pools/{id}/endpoints/selection",
    tag = "endpoints",
    params(
        ("id" = String, Path, description = "Pool id"),
    ),
    request_body = SelectionRequest,
    responses(
        (status = OK, description = "Updated endpoints and selection", body = EndpointView),
        (status = NOT_FOUND, description = "Pool, host, or port not found", body = ErrorResponse),
        (status = INTERNAL_SERVER_ERROR, description = "Command channel error", body = ErrorResponse),
    ),
)]
async fn put_selection(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<SelectionRequest>,
) -> Result<Json<EndpointView>, ApiError> {
    send_command(&state, |reply| DashboardCommand::SelectEndpoint {
        pool_id: id,
        host: req.host,
        port: req.port,
        reply,
    })
    .await
}

/// Re-probe every endpoint of a pool.
#[utoipa::path(
    post,
    path = "/pools/{id}/endpoints/retest",
    tag = "endpoints",
    params(
        ("id" = String, Path, description = "Pool id"),
    ),
    responses(
        (status = OK, description = "Endpoints with probes in flight", body = EndpointView),
        (status = NOT_FOUND, description = "Pool not found", body = ErrorResponse),
        (status = INTERNAL_SERVER_ERROR, description = "Command channel error", body = ErrorResponse),
    ),
)]
async fn post_retest(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<EndpointView>, ApiError> {
    send_command(&state, |reply| DashboardCommand::Retest { pool_id: id, reply }).await
}

/// Poll the upstream now instead of waiting for the next tick.
#[utoipa::path(
    post,
    path = "/refresh",
    tag = "pools",
    responses(
        (status = ACCEPTED, description = "Poll started"),
        (status = INTERNAL_SERVER_ERROR, description = "Command channel error", body = ErrorResponse),
    ),
)]
async fn post_refresh(State(state): State<SharedState>) -> Result<StatusCode, ApiError> {
    let (tx, rx) = oneshot::channel();
    let unavailable = || api_error(StatusCode::INTERNAL_SERVER_ERROR, "dashboard unavailable");

    state
        .dashboard_cmd_tx
        .send(DashboardCommand::RefreshNow { reply: tx })
        .await
        .map_err(|_| unavailable())?;
    match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
        Ok(Ok(())) => Ok(StatusCode::ACCEPTED),
        _ => Err(unavailable()),
    }
}

async fn send_command(
    state: &SharedState,
    command: impl FnOnce(CommandReply) -> DashboardCommand,
) -> Result<Json<EndpointView>, ApiError> {
    let (tx, rx) = oneshot::channel();
    state
        .dashboard_cmd_tx
        .send(command(tx))
        .await
        .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "dashboard unavailable"))?;

    // Result layers: timeout / channel-closed / command-error.
    match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
        Ok(Ok(Ok(view))) => Ok(Json(view)),
        Ok(Ok(Err(e))) => Err(api_error(StatusCode::NOT_FOUND, e.to_string())),
        _ => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "dashboard did not answer",
        )),
    }
}

/// Look up statistics for one miner address.
#[utoipa::path(
    get,
    path = "/miners/{pool}/{address}",
    tag = "miners",
    params(
        ("pool" = String, Path, description = "Pool id"),
        ("address" = String, Path, description = "Miner wallet address"),
    ),
    responses(
        (status = OK, description = "Miner statistics", body = MinerStats),
        (status = NOT_FOUND, description = "No statistics for this miner", body = ErrorResponse),
        (status = BAD_GATEWAY, description = "Upstream unavailable", body = ErrorResponse),
    ),
)]
async fn get_miner(
    State(state): State<SharedState>,
    Path((pool, address)): Path<(String, String)>,
) -> Result<Json<MinerStats>, ApiError> {
    match state.upstream.fetch_miner_stats(&pool, &address).await {
        Ok(Some(stats)) => Ok(Json(stats)),
        Ok(None) => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No statistics found for miner {address} on pool {pool}. It may not have submitted shares yet."),
        )),
        Err(e) => {
            warn!(pool = %pool, error = %e, "Miner lookup failed");
            Err(api_error(StatusCode::BAD_GATEWAY, e.advisory(Section::Miner)))
        }
    }
}

/// Measure TCP connect latency to a host and port.
///
/// Always answers 200; failures are reported in the body.
#[utoipa::path(
    post,
    path = "/probe",
    tag = "probe",
    request_body = ProbeRequestBody,
    responses(
        (status = OK, description = "Probe outcome", body = ProbeResponse),
    ),
)]
async fn post_probe(
    State(state): State<SharedState>,
    Json(req): Json<ProbeRequestBody>,
) -> Json<ProbeResponse> {
    let outcome = state
        .prober
        .probe(ProbeRequest {
            host: req.host,
            port: req.port,
            timeout_ms: req.timeout.unwrap_or(state.probe_timeout_ms),
        })
        .await;

    Json(ProbeResponse {
        latency: outcome.latency_ms(),
        error: outcome.error(),
    })
}
