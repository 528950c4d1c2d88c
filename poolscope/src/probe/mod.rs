//! TCP connect latency probing.
//!
//! A probe opens a TCP connection to a stratum port, times how long the
//! connection takes to establish, and closes it again without exchanging
//! any data. Every outcome, including failures, is a value: probing never
//! returns an error to the caller.

use std::{future::Future, io, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::tracing::prelude::*;

/// Shortest timeout a probe will wait, whatever the caller asks for.
pub const MIN_TIMEOUT_MS: u64 = 500;

/// Longest timeout a probe will wait, whatever the caller asks for.
pub const MAX_TIMEOUT_MS: u64 = 10_000;

/// Clamp a requested timeout into `[MIN_TIMEOUT_MS, MAX_TIMEOUT_MS]`.
pub fn clamp_timeout(requested_ms: u64) -> u64 {
    requested_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeRequest {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
}

/// Why a probe produced no latency.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ProbeError {
    /// No outcome within the (clamped) timeout.
    Timeout,
    /// The connection attempt was refused or reset.
    ConnectError,
    /// Any other transport failure.
    NetworkError,
    /// The host name resolved to no address at all.
    Unreachable,
}

/// Result of one probe. `latency_ms` is `None` exactly when `error` is set;
/// the constructors are the only way to build one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProbeOutcome {
    latency_ms: Option<u64>,
    error: Option<ProbeError>,
}

impl ProbeOutcome {
    pub fn success(latency_ms: u64) -> Self {
        Self {
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    pub fn failure(error: ProbeError) -> Self {
        Self {
            latency_ms: None,
            error: Some(error),
        }
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.latency_ms
    }

    pub fn error(&self) -> Option<ProbeError> {
        self.error
    }

    pub fn into_result(self) -> Result<u64, ProbeError> {
        match (self.latency_ms, self.error) {
            (Some(ms), None) => Ok(ms),
            (_, Some(e)) => Err(e),
            (None, None) => Err(ProbeError::NetworkError),
        }
    }
}

/// Something that can measure connect latency to a host and port.
///
/// The daemon uses [`TcpProber`]; tests substitute scripted probers.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, request: ProbeRequest) -> ProbeOutcome;
}

/// Probes by opening a real TCP connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, request: ProbeRequest) -> ProbeOutcome {
        let outcome = timed(request.timeout_ms, connect(&request.host, request.port)).await;

        debug!(
            host = %request.host,
            port = request.port,
            latency_ms = ?outcome.latency_ms(),
            error = ?outcome.error(),
            "Probe finished"
        );
        outcome
    }
}

/// Run `attempt` under the clamped timeout and time it.
async fn timed<F>(timeout_ms: u64, attempt: F) -> ProbeOutcome
where
    F: Future<Output = Result<(), ProbeError>>,
{
    let timeout = Duration::from_millis(clamp_timeout(timeout_ms));
    let started = Instant::now();

    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(())) => {
            let elapsed = started.elapsed().as_millis();
            ProbeOutcome::success(u64::try_from(elapsed).unwrap_or(u64::MAX))
        }
        Ok(Err(e)) => ProbeOutcome::failure(e),
        Err(_) => ProbeOutcome::failure(ProbeError::Timeout),
    }
}

/// Resolve and connect, trying each resolved address in turn. The stream
/// is dropped, closing the connection, as soon as it is established.
async fn connect(host: &str, port: u16) -> Result<(), ProbeError> {
    let addrs: Vec<_> = lookup_host((host, port))
        .await
        .map_err(|e| {
            trace!(host, error = %e, "Name resolution failed");
            ProbeError::NetworkError
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ProbeError::Unreachable);
    }

    let mut last = ProbeError::Unreachable;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                drop(stream);
                return Ok(());
            }
            Err(e) => {
                trace!(%addr, error = %e, "Connect attempt failed");
                last = classify(&e);
            }
        }
    }
    Err(last)
}

fn classify(err: &io::Error) -> ProbeError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkUnreachable
        | io::ErrorKind::AddrNotAvailable => ProbeError::ConnectError,
        io::ErrorKind::TimedOut => ProbeError::Timeout,
        _ => ProbeError::NetworkError,
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use test_case::test_case;
    use tokio::net::TcpListener;

    use super::*;

    #[test_case(0, 500 ; "zero raised to floor")]
    #[test_case(499, 500 ; "just below floor")]
    #[test_case(500, 500 ; "floor")]
    #[test_case(3000, 3000 ; "inside range")]
    #[test_case(10_000, 10_000 ; "ceiling")]
    #[test_case(60_000, 10_000 ; "lowered to ceiling")]
    fn timeout_is_clamped(requested: u64, enforced: u64) {
        assert_eq!(clamp_timeout(requested), enforced);
    }

    #[test_case(0, 500 ; "zero waits for floor")]
    #[test_case(3000, 3000 ; "inside range")]
    #[test_case(60_000, 10_000 ; "stops at ceiling")]
    #[tokio::test(start_paused = true)]
    async fn stalled_connect_times_out_at_clamped_bound(requested: u64, enforced: u64) {
        let started = Instant::now();
        let outcome = timed(requested, std::future::pending()).await;

        assert_eq!(outcome.error(), Some(ProbeError::Timeout));
        // The timer wheel rounds deadlines up to the next millisecond.
        let elapsed = started.elapsed();
        let enforced = Duration::from_millis(enforced);
        assert!(elapsed >= enforced, "{elapsed:?}");
        assert!(elapsed < enforced + Duration::from_millis(2), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_measured_until_connected() {
        let outcome = timed(0, async {
            tokio::time::sleep(Duration::from_millis(120)).await;
            Ok(())
        })
        .await;

        let latency = outcome.latency_ms().unwrap();
        assert!((120..=121).contains(&latency), "{latency}");
    }

    #[test]
    fn outcome_has_latency_iff_no_error() {
        let ok = ProbeOutcome::success(42);
        assert_eq!((ok.latency_ms(), ok.error()), (Some(42), None));

        let failed = ProbeOutcome::failure(ProbeError::Timeout);
        assert_eq!(
            (failed.latency_ms(), failed.error()),
            (None, Some(ProbeError::Timeout))
        );
    }

    #[test]
    fn error_codes_are_kebab_case() {
        assert_eq!(ProbeError::ConnectError.to_string(), "connect-error");
        assert_eq!(ProbeError::from_str("network-error"), Ok(ProbeError::NetworkError));
        assert_eq!(
            serde_json::to_string(&ProbeError::Unreachable).unwrap(),
            "\"unreachable\""
        );
    }

    #[test]
    fn refused_connection_is_connect_error() {
        let err = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(classify(&err), ProbeError::ConnectError);
        let err = io::Error::other("weird");
        assert_eq!(classify(&err), ProbeError::NetworkError);
    }

    #[tokio::test]
    async fn open_port_reports_latency() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let outcome = TcpProber
            .probe(ProbeRequest {
                host: "127.0.0.1".into(),
                port,
                timeout_ms: 2000,
            })
            .await;

        assert!(outcome.latency_ms().is_some(), "{outcome:?}");
        assert_eq!(outcome.error(), None);
    }

    #[tokio::test]
    async fn closed_port_reports_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let outcome = TcpProber
            .probe(ProbeRequest {
                host: "127.0.0.1".into(),
                port,
                timeout_ms: 2000,
            })
            .await;

        assert_eq!(outcome.latency_ms(), None);
        assert_eq!(outcome.error(), Some(ProbeError::ConnectError));
    }

    #[tokio::test]
    async fn repeated_probes_classify_the_same() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let request = ProbeRequest {
            host: "127.0.0.1".into(),
            port,
            timeout_ms: 1000,
        };

        for _ in 0..3 {
            let outcome = TcpProber.probe(request.clone()).await;
            assert!(outcome.into_result().is_ok());
        }
    }
}
