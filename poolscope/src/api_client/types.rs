//! API data transfer objects.
//!
//! These types define the API contract shared between the daemon and
//! clients.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::endpoint::{EndpointKey, LatencySample};
use crate::pool_api::{Block, Payment, Pool, VarDiffConfig};
use crate::probe::ProbeError;

/// Pool list with the section's advisory, if the last poll failed.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct PoolsResponse {
    pub pools: Vec<Pool>,
    pub advisory: Option<String>,
    /// Unix time of the last successful poll.
    pub updated_at: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct PoolResponse {
    pub pool: Pool,
    pub advisory: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct BlocksResponse {
    pub pool_id: String,
    pub blocks: Vec<Block>,
    pub advisory: Option<String>,
    pub updated_at: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct PaymentsResponse {
    pub pool_id: String,
    pub payments: Vec<Payment>,
    pub advisory: Option<String>,
    pub updated_at: Option<u64>,
}

/// Lifecycle stage of a latency sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SampleStatus {
    Idle,
    Testing,
    Success,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct SampleView {
    pub status: SampleStatus,
    pub latency_ms: Option<u64>,
    pub error: Option<ProbeError>,
}

impl From<LatencySample> for SampleView {
    fn from(sample: LatencySample) -> Self {
        let (status, latency_ms, error) = match sample {
            LatencySample::Idle => (SampleStatus::Idle, None, None),
            LatencySample::Testing { .. } => (SampleStatus::Testing, None, None),
            LatencySample::Success { latency_ms } => (SampleStatus::Success, Some(latency_ms), None),
            LatencySample::Error { reason } => (SampleStatus::Error, None, Some(reason)),
        };
        Self {
            status,
            latency_ms,
            error,
        }
    }
}

/// One endpoint row.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct EndpointEntry {
    pub host: String,
    pub port: u16,
    pub name: Option<String>,
    pub difficulty: Option<f64>,
    pub var_diff: Option<VarDiffConfig>,
    pub tls: bool,
    pub sample: SampleView,
}

/// All endpoints on one host.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct GroupView {
    pub host: String,
    /// Lowest successful latency in the group.
    pub best_latency_ms: Option<u64>,
    pub endpoints: Vec<EndpointEntry>,
}

/// Endpoints of a pool together with the current selection.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct EndpointView {
    pub pool_id: String,
    pub groups: Vec<GroupView>,
    pub selected_group: Option<String>,
    pub group_manual: bool,
    pub selected: Option<EndpointKey>,
    pub endpoint_manual: bool,
    pub default_endpoint: Option<EndpointKey>,
    pub fastest_endpoint: Option<EndpointKey>,
}

/// Body of `PUT /pools/{id}/endpoints/selection`.
///
/// An absent `host` returns group choice to automatic; an absent `port`
/// does the same for the endpoint.
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct SelectionRequest {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Body of `POST /probe`.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct ProbeRequestBody {
    pub host: String,
    pub port: u16,
    /// Requested timeout in ms; clamped to 500..=10000.
    pub timeout: Option<u64>,
}

/// Answer of `POST /probe`. `latency` is null exactly when `error` is set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct ProbeResponse {
    pub latency: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProbeError>,
}

/// Error body for non-success responses.
#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
