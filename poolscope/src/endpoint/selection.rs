//! Choosing an endpoint.
//!
//! Two deterministic picks feed the automatic choice:
//!
//! - the *default* endpoint, a pure function of the port map that favors a
//!   mid-tier difficulty port, and
//! - the *fastest* endpoint, the lowest successful latency sample.
//!
//! [`Selection`] layers a sticky user override on top.

use std::sync::LazyLock;

use regex::Regex;

use super::{Endpoint, LatencyTable};

/// Upper bound (inclusive) of the difficulty range considered mid-tier when
/// no port is named as such.
pub const DEFAULT_DIFFICULTY_CEILING: f64 = 2048.0;

static MID_TIER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)mid|medium").expect("static regex"));

/// Whether a port name marks it as the mid-tier port.
pub fn is_mid_tier_name(name: &str) -> bool {
    MID_TIER_NAME.is_match(name)
}

/// Pick the default endpoint from `endpoints`.
///
/// In order of preference: the first endpoint whose port name contains
/// "mid" or "medium" (any case); the first whose effective difficulty lies
/// in `(0, DEFAULT_DIFFICULTY_CEILING]`; the first endpoint.
pub fn default_endpoint(endpoints: &[Endpoint]) -> Option<&Endpoint> {
    endpoints
        .iter()
        .find(|e| e.name().is_some_and(is_mid_tier_name))
        .or_else(|| {
            endpoints.iter().find(|e| {
                e.effective_difficulty()
                    .is_some_and(|d| d > 0.0 && d <= DEFAULT_DIFFICULTY_CEILING)
            })
        })
        .or_else(|| endpoints.first())
}

/// Pick the endpoint with the lowest successful latency.
///
/// Endpoints that are idle, testing, or failed are not candidates. Ties go
/// to the earlier endpoint.
pub fn fastest_endpoint<'a>(endpoints: &'a [Endpoint], table: &LatencyTable) -> Option<&'a Endpoint> {
    let mut best: Option<(&Endpoint, u64)> = None;
    for endpoint in endpoints {
        let Some(latency) = table.latency(&endpoint.key) else {
            continue;
        };
        if best.is_none_or(|(_, best_latency)| latency < best_latency) {
            best = Some((endpoint, latency));
        }
    }
    best.map(|(endpoint, _)| endpoint)
}

/// A choice that is either computed or pinned by the user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Selection<T> {
    #[default]
    Automatic,
    Manual(T),
}

impl<T: Clone + PartialEq> Selection<T> {
    pub fn is_manual(&self) -> bool {
        matches!(self, Selection::Manual(_))
    }

    /// Demote a manual choice whose value is no longer among `options`.
    ///
    /// Returns `true` if the selection was demoted.
    pub fn reconcile(&mut self, options: &[T]) -> bool {
        match self {
            Selection::Manual(value) if !options.contains(value) => {
                *self = Selection::Automatic;
                true
            }
            _ => false,
        }
    }

    /// The effective value.
    ///
    /// A manual value present in `options` wins. Otherwise `automatic` is
    /// consulted, and if it has no answer the first option is used.
    pub fn resolve(&self, options: &[T], automatic: impl FnOnce() -> Option<T>) -> Option<T> {
        if let Selection::Manual(value) = self {
            if options.contains(value) {
                return Some(value.clone());
            }
        }
        automatic()
            .filter(|value| options.contains(value))
            .or_else(|| options.first().cloned())
    }
}
