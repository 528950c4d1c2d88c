//! Stratum endpoints derived from a pool's port map.
//!
//! Every advertised port is offered on every configured stratum host, so a
//! pool with ports `{3333, 3355}` and hosts `[eu, us]` yields four
//! endpoints. Endpoints on the same host form a group. The endpoint list is
//! kept in host-major, port-ascending order so each group is a contiguous
//! slice and "first endpoint" is well defined.

mod latency;
mod selection;
mod session;

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::pool_api::PortConfig;

pub use latency::{LatencySample, LatencyTable, ProbeId};
pub use selection::{
    DEFAULT_DIFFICULTY_CEILING, Selection, default_endpoint, fastest_endpoint, is_mid_tier_name,
};
pub use session::{EndpointSession, SelectionError};

/// Identifies an endpoint, and the latency sample attached to it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, ToSchema)]
pub struct EndpointKey {
    pub host: String,
    pub port: u16,
}

impl EndpointKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One (host, port) a miner can connect to.
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoint {
    pub key: EndpointKey,
    pub config: PortConfig,
}

impl Endpoint {
    pub fn host(&self) -> &str {
        &self.key.host
    }

    pub fn port(&self) -> u16 {
        self.key.port
    }

    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    pub fn effective_difficulty(&self) -> Option<f64> {
        self.config.effective_difficulty()
    }
}

/// Build the endpoint list for `hosts` x `ports`.
///
/// Duplicate hosts are ignored after their first occurrence.
pub fn endpoints_for(hosts: &[String], ports: &BTreeMap<u16, PortConfig>) -> Vec<Endpoint> {
    let mut seen: Vec<&str> = Vec::with_capacity(hosts.len());
    let mut endpoints = Vec::with_capacity(hosts.len() * ports.len());

    for host in hosts {
        if seen.contains(&host.as_str()) {
            continue;
        }
        seen.push(host);

        for (&port, config) in ports {
            endpoints.push(Endpoint {
                key: EndpointKey::new(host.clone(), port),
                config: config.clone(),
            });
        }
    }

    endpoints
}

/// Distinct hosts of `endpoints`, in order of first appearance.
pub fn group_hosts(endpoints: &[Endpoint]) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::new();
    for endpoint in endpoints {
        if hosts.last().map(String::as_str) != Some(endpoint.host()) {
            hosts.push(endpoint.host().to_string());
        }
    }
    hosts
}

/// The contiguous run of endpoints on `host`.
pub fn group<'a>(endpoints: &'a [Endpoint], host: &str) -> &'a [Endpoint] {
    let Some(start) = endpoints.iter().position(|e| e.host() == host) else {
        return &[];
    };
    let len = endpoints[start..]
        .iter()
        .take_while(|e| e.host() == host)
        .count();
    &endpoints[start..start + len]
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;

    use crate::pool_api::PortConfig;

    pub fn ports(entries: &[(u16, PortConfig)]) -> BTreeMap<u16, PortConfig> {
        entries.iter().cloned().collect()
    }

    pub fn named(name: &str) -> PortConfig {
        PortConfig {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn fixed(difficulty: f64) -> PortConfig {
        PortConfig {
            difficulty: Some(difficulty),
            ..Default::default()
        }
    }

    pub fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|h| h.to_string()).collect()
    }
}
