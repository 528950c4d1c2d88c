//! Deployment-time configuration read from the environment.

use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use crate::error::{Error, Result};

pub const UPSTREAM_URL_VAR: &str = "POOLSCOPE_UPSTREAM_URL";
pub const STRATUM_HOSTS_VAR: &str = "POOLSCOPE_STRATUM_HOSTS";
pub const API_ADDR_VAR: &str = "POOLSCOPE_API_ADDR";
pub const POLL_INTERVAL_VAR: &str = "POOLSCOPE_POLL_INTERVAL_SECS";
pub const PROBE_TIMEOUT_VAR: &str = "POOLSCOPE_PROBE_TIMEOUT_MS";
pub const PAGE_SIZE_VAR: &str = "POOLSCOPE_PAGE_SIZE";

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the upstream pool API, without the `/api` suffix.
    pub upstream_url: String,

    /// Stratum hostnames advertised to miners. Each host becomes one
    /// endpoint group; every pool port is offered on every host.
    pub stratum_hosts: Vec<String>,

    /// Where the dashboard JSON API listens.
    pub api_addr: SocketAddr,

    /// Time between upstream polls.
    pub poll_interval: Duration,

    /// Timeout for automatic latency probes (clamped by the prober).
    pub probe_timeout_ms: u64,

    /// Page size used when polling blocks and payments.
    pub page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upstream_url: "http://127.0.0.1:4000".to_string(),
            stratum_hosts: vec!["localhost".to_string()],
            api_addr: SocketAddr::from(([127, 0, 0, 1], 7786)),
            poll_interval: Duration::from_secs(30),
            probe_timeout_ms: 3000,
            page_size: 15,
        }
    }
}

impl Config {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup, falling back to
    /// defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(url) = lookup(UPSTREAM_URL_VAR) {
            config.upstream_url = url.trim_end_matches('/').to_string();
        }

        if let Some(hosts) = lookup(STRATUM_HOSTS_VAR) {
            let hosts: Vec<String> = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from)
                .collect();
            if hosts.is_empty() {
                return Err(Error::Config(format!(
                    "{STRATUM_HOSTS_VAR} must name at least one host"
                )));
            }
            config.stratum_hosts = hosts;
        }

        if let Some(addr) = lookup(API_ADDR_VAR) {
            config.api_addr = parse(API_ADDR_VAR, &addr)?;
        }

        if let Some(secs) = lookup(POLL_INTERVAL_VAR) {
            let secs: u64 = parse(POLL_INTERVAL_VAR, &secs)?;
            if secs == 0 {
                return Err(Error::Config(format!("{POLL_INTERVAL_VAR} must be positive")));
            }
            config.poll_interval = Duration::from_secs(secs);
        }

        if let Some(ms) = lookup(PROBE_TIMEOUT_VAR) {
            config.probe_timeout_ms = parse(PROBE_TIMEOUT_VAR, &ms)?;
        }

        if let Some(size) = lookup(PAGE_SIZE_VAR) {
            config.page_size = parse(PAGE_SIZE_VAR, &size)?;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(var: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{var}: cannot parse {value:?}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn unset_environment_uses_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.upstream_url, "http://127.0.0.1:4000");
        assert_eq!(config.stratum_hosts, vec!["localhost"]);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn hosts_are_split_and_trimmed() {
        let config = Config::from_lookup(lookup(&[(
            STRATUM_HOSTS_VAR,
            " eu.pool.example , us.pool.example,,",
        )]))
        .unwrap();
        assert_eq!(
            config.stratum_hosts,
            vec!["eu.pool.example", "us.pool.example"]
        );
    }

    #[test]
    fn empty_host_list_is_rejected() {
        let err = Config::from_lookup(lookup(&[(STRATUM_HOSTS_VAR, " , ")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn bad_number_names_variable() {
        let err = Config::from_lookup(lookup(&[(POLL_INTERVAL_VAR, "soon")])).unwrap_err();
        assert!(err.to_string().contains(POLL_INTERVAL_VAR), "{err}");
    }

    #[test]
    fn trailing_slash_is_stripped_from_upstream() {
        let config =
            Config::from_lookup(lookup(&[(UPSTREAM_URL_VAR, "http://pool:4000/")])).unwrap();
        assert_eq!(config.upstream_url, "http://pool:4000");
    }
}
