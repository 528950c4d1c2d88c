//! Logging setup.
//!
//! Modules log through [`prelude`] so the macros come from one place.
//! When the daemon runs under systemd (detected via `JOURNAL_STREAM`), logs
//! go to the journal with structured fields intact; otherwise they go to
//! stdout with local timestamps.

use std::env;

use time::macros::format_description;
use tracing_subscriber::{
    EnvFilter, fmt::time::LocalTime, layer::SubscriberExt, util::SubscriberInitExt,
};

pub mod prelude {
    pub use ::tracing::{debug, error, info, trace, warn};
}

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Call once, early in `main`.
pub fn init_journald_or_stdout() {
    if env::var_os("JOURNAL_STREAM").is_some() {
        match tracing_journald::layer() {
            Ok(layer) => {
                tracing_subscriber::registry()
                    .with(env_filter())
                    .with(layer)
                    .init();
                return;
            }
            Err(e) => {
                eprintln!("journald unavailable ({e}), logging to stdout");
            }
        }
    }

    let timer = LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_timer(timer))
        .init();
}
