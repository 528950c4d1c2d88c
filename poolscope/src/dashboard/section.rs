//! One independently failing piece of dashboard data.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{self, Error};
use crate::tracing::prelude::*;

/// Data from the last successful poll plus an advisory while the most
/// recent poll is failing.
#[derive(Clone, Debug, Default)]
pub struct Section<T> {
    pub data: T,
    pub advisory: Option<String>,
    /// Unix time of the last successful poll.
    pub updated_at: Option<u64>,
}

impl<T> Section<T> {
    /// Fold a poll result in. Success replaces the data and clears the
    /// advisory; failure keeps the data and sets the advisory.
    pub fn apply(&mut self, result: error::Result<T>, kind: error::Section, pool_id: Option<&str>) {
        match result {
            Ok(data) => {
                if self.advisory.take().is_some() {
                    info!(section = %kind, pool = ?pool_id, "Section recovered");
                }
                self.data = data;
                self.updated_at = Some(unix_now());
            }
            Err(e) => self.fail(&e, kind, pool_id),
        }
    }

    fn fail(&mut self, err: &Error, kind: error::Section, pool_id: Option<&str>) {
        warn!(section = %kind, pool = ?pool_id, error = %err, "Upstream poll failed");
        self.advisory = Some(err.advisory(kind));
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
