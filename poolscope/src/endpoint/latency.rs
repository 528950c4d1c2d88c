//! Per-endpoint latency samples.
//!
//! ```text
//!           begin()              commit(ok)
//!  Idle ─────────────► Testing ──────────────► Success(ms)
//!                        │  ▲
//!                        │  │ begin() (retest overwrites)
//!                        │  └──────────────── Success / Error
//!                        │    commit(err)
//!                        └───────────────────► Error(reason)
//! ```
//!
//! The table holds at most one sample per [`EndpointKey`]. Starting a probe
//! on a key that is already testing replaces the pending probe; when the
//! older probe finishes its result no longer matches and is dropped.

use std::collections::HashMap;

use super::EndpointKey;
use crate::probe::{ProbeError, ProbeOutcome};

/// Identifies one dispatched probe so late results can be recognized.
pub type ProbeId = u64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LatencySample {
    /// Created, not yet probed.
    #[default]
    Idle,

    /// A probe is in flight.
    Testing { probe_id: ProbeId },

    Success { latency_ms: u64 },

    Error { reason: ProbeError },
}

impl LatencySample {
    pub fn latency_ms(&self) -> Option<u64> {
        match self {
            LatencySample::Success { latency_ms } => Some(*latency_ms),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct LatencyTable {
    samples: HashMap<EndpointKey, LatencySample>,
    next_probe_id: ProbeId,
}

impl LatencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current sample for `key`; unknown keys read as idle.
    pub fn get(&self, key: &EndpointKey) -> LatencySample {
        self.samples.get(key).copied().unwrap_or_default()
    }

    /// Latency in ms if the last probe of `key` succeeded.
    pub fn latency(&self, key: &EndpointKey) -> Option<u64> {
        self.get(key).latency_ms()
    }

    /// Whether `key` has ever had a probe dispatched that is still tracked.
    pub fn has_probe(&self, key: &EndpointKey) -> bool {
        !matches!(self.get(key), LatencySample::Idle)
    }

    /// Mark `key` as testing under a fresh probe id, overwriting whatever
    /// sample it held.
    pub fn begin(&mut self, key: EndpointKey) -> ProbeId {
        self.next_probe_id += 1;
        let probe_id = self.next_probe_id;
        self.samples
            .insert(key, LatencySample::Testing { probe_id });
        probe_id
    }

    /// Record a probe result.
    ///
    /// Applies only when `key` is still testing under `probe_id`; returns
    /// whether the result was applied.
    pub fn commit(&mut self, key: &EndpointKey, probe_id: ProbeId, outcome: ProbeOutcome) -> bool {
        let Some(slot) = self.samples.get_mut(key) else {
            return false;
        };
        if *slot != (LatencySample::Testing { probe_id }) {
            return false;
        }

        *slot = match outcome.into_result() {
            Ok(latency_ms) => LatencySample::Success { latency_ms },
            Err(reason) => LatencySample::Error { reason },
        };
        true
    }

    /// Drop samples for keys that `keep` rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(&EndpointKey) -> bool) {
        self.samples.retain(|key, _| keep(key));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(port: u16) -> EndpointKey {
        EndpointKey::new("eu", port)
    }

    #[test]
    fn unknown_key_is_idle() {
        let table = LatencyTable::new();
        assert_eq!(table.get(&key(1)), LatencySample::Idle);
        assert!(!table.has_probe(&key(1)));
    }

    #[test]
    fn success_records_latency() {
        let mut table = LatencyTable::new();
        let id = table.begin(key(1));
        assert_eq!(table.get(&key(1)), LatencySample::Testing { probe_id: id });

        assert!(table.commit(&key(1), id, ProbeOutcome::success(37)));
        assert_eq!(table.latency(&key(1)), Some(37));
    }

    #[test]
    fn failure_records_reason() {
        let mut table = LatencyTable::new();
        let id = table.begin(key(1));
        table.commit(&key(1), id, ProbeOutcome::failure(ProbeError::Timeout));

        assert_eq!(
            table.get(&key(1)),
            LatencySample::Error {
                reason: ProbeError::Timeout
            }
        );
        assert_eq!(table.latency(&key(1)), None);
    }

    #[test]
    fn newer_probe_overwrites_older() {
        let mut table = LatencyTable::new();
        let first = table.begin(key(1));
        let second = table.begin(key(1));
        assert_eq!(table.len(), 1);

        // The stale result arrives first and is ignored.
        assert!(!table.commit(&key(1), first, ProbeOutcome::success(900)));
        assert!(table.commit(&key(1), second, ProbeOutcome::success(12)));
        assert_eq!(table.latency(&key(1)), Some(12));
    }

    #[test]
    fn settled_sample_ignores_duplicate_commit() {
        let mut table = LatencyTable::new();
        let id = table.begin(key(1));
        assert!(table.commit(&key(1), id, ProbeOutcome::success(10)));
        assert!(!table.commit(&key(1), id, ProbeOutcome::success(99)));
        assert_eq!(table.latency(&key(1)), Some(10));
    }

    #[test]
    fn result_for_removed_key_is_dropped() {
        let mut table = LatencyTable::new();
        let id = table.begin(key(1));
        table.retain(|_| false);

        assert!(!table.commit(&key(1), id, ProbeOutcome::success(5)));
        assert_eq!(table.len(), 0);
    }
}
