//! Command types sent from API handlers to the dashboard task.
//!
//! Each command carries a oneshot reply channel so the handler can
//! await the result and translate it into an HTTP response.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::api_client::types::EndpointView;
use crate::endpoint::SelectionError;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown pool {0}")]
    UnknownPool(String),

    #[error(transparent)]
    Selection(#[from] SelectionError),
}

pub type CommandReply = oneshot::Sender<Result<EndpointView, CommandError>>;

/// Commands from the API to the dashboard.
pub enum DashboardCommand {
    /// Change a pool's group and/or endpoint choice.
    SelectEndpoint {
        pool_id: String,
        /// Group to pin; `None` with `port` also `None` returns both
        /// choices to automatic.
        host: Option<String>,
        /// Port to pin within the group; `None` for automatic.
        port: Option<u16>,
        reply: CommandReply,
    },

    /// Re-probe every endpoint of a pool, overwriting earlier samples.
    Retest { pool_id: String, reply: CommandReply },

    /// Poll the upstream now instead of waiting for the next tick.
    RefreshNow { reply: oneshot::Sender<()> },
}
