//! Per-pool endpoint state: the endpoint list, which endpoints have been
//! probed, and the group/endpoint selections.
//!
//! Latency samples live outside the session in a [`LatencyTable`] shared by
//! all pools, since two pools advertising the same (host, port) are the
//! same endpoint.

use std::collections::{BTreeMap, HashSet};

use thiserror::Error;

use super::{
    Endpoint, EndpointKey, LatencyTable, Selection, default_endpoint, endpoints_for,
    fastest_endpoint, group, group_hosts,
};
use crate::api_client::types::{EndpointEntry, EndpointView, GroupView};
use crate::pool_api::PortConfig;
use crate::tracing::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no endpoints on host {0}")]
    UnknownHost(String),

    #[error("port {0} is not offered on the selected host")]
    UnknownPort(u16),

    #[error("the pool has no endpoints")]
    NoEndpoints,
}

#[derive(Debug)]
pub struct EndpointSession {
    pool_id: String,
    hosts: Vec<String>,
    endpoints: Vec<Endpoint>,
    group: Selection<String>,
    endpoint: Selection<u16>,
    /// Endpoints that already had their automatic first probe.
    probed: HashSet<EndpointKey>,
}

impl EndpointSession {
    pub fn new(pool_id: impl Into<String>, hosts: Vec<String>) -> Self {
        Self {
            pool_id: pool_id.into(),
            hosts,
            endpoints: Vec::new(),
            group: Selection::Automatic,
            endpoint: Selection::Automatic,
            probed: HashSet::new(),
        }
    }

    pub fn contains(&self, key: &EndpointKey) -> bool {
        self.endpoints.iter().any(|e| &e.key == key)
    }

    /// Rebuild the endpoint list from a freshly polled port map.
    ///
    /// Returns the endpoints that appeared and have not been probed in this
    /// session; the caller should probe each of them once. Manual selections
    /// whose endpoint vanished revert to automatic.
    pub fn refresh(&mut self, ports: &BTreeMap<u16, PortConfig>) -> Vec<EndpointKey> {
        self.endpoints = endpoints_for(&self.hosts, ports);

        let current: HashSet<&EndpointKey> = self.endpoints.iter().map(|e| &e.key).collect();
        self.probed.retain(|key| current.contains(key));

        let fresh: Vec<EndpointKey> = self
            .endpoints
            .iter()
            .filter(|e| !self.probed.contains(&e.key))
            .map(|e| e.key.clone())
            .collect();
        self.probed.extend(fresh.iter().cloned());

        self.reconcile();
        fresh
    }

    /// Every listed endpoint, for a manual retest.
    pub fn retest(&self) -> Vec<EndpointKey> {
        self.endpoints.iter().map(|e| e.key.clone()).collect()
    }

    fn reconcile(&mut self) {
        let hosts = group_hosts(&self.endpoints);
        if self.group.reconcile(&hosts) {
            info!(pool = %self.pool_id, "Selected host gone; group choice back to automatic");
        }

        // Every host offers the same ports, so any group's ports will do.
        let ports: Vec<u16> = hosts
            .first()
            .map(|host| group(&self.endpoints, host).iter().map(Endpoint::port).collect())
            .unwrap_or_default();
        if self.endpoint.reconcile(&ports) {
            info!(pool = %self.pool_id, "Selected port gone; endpoint choice back to automatic");
        }
    }

    /// Host of the group currently in effect.
    ///
    /// Automatic choice: the host of the fastest endpoint, else of the
    /// default endpoint, else the first host.
    pub fn effective_group(&self, table: &LatencyTable) -> Option<String> {
        let hosts = group_hosts(&self.endpoints);
        self.group.resolve(&hosts, || {
            fastest_endpoint(&self.endpoints, table)
                .or_else(|| default_endpoint(&self.endpoints))
                .map(|e| e.host().to_string())
        })
    }

    /// Endpoint currently in effect, within the effective group.
    ///
    /// Automatic choice: the fastest endpoint of the group, else its default
    /// endpoint, else its first endpoint.
    pub fn effective_endpoint(&self, table: &LatencyTable) -> Option<EndpointKey> {
        let host = self.effective_group(table)?;
        let members = group(&self.endpoints, &host);
        let ports: Vec<u16> = members.iter().map(Endpoint::port).collect();
        let port = self.endpoint.resolve(&ports, || {
            fastest_endpoint(members, table)
                .or_else(|| default_endpoint(members))
                .map(Endpoint::port)
        })?;
        Some(EndpointKey::new(host, port))
    }

    /// Pin the group to `host`, or return it to automatic with `None`.
    ///
    /// A change of group choice returns the endpoint choice to automatic.
    pub fn select_group(&mut self, host: Option<String>) -> Result<(), SelectionError> {
        let selection = match host {
            Some(host) => {
                if !self.endpoints.iter().any(|e| e.host() == host) {
                    return Err(SelectionError::UnknownHost(host));
                }
                Selection::Manual(host)
            }
            None => Selection::Automatic,
        };

        if selection != self.group {
            debug!(pool = %self.pool_id, group = ?selection, "Group selection changed");
            self.group = selection;
            self.endpoint = Selection::Automatic;
        }
        Ok(())
    }

    /// Pin the endpoint to `port` within the effective group, or return it
    /// to automatic with `None`.
    ///
    /// Pinning a port also pins the group it was picked from, so later
    /// latency changes cannot move the choice to another host.
    pub fn select_endpoint(
        &mut self,
        port: Option<u16>,
        table: &LatencyTable,
    ) -> Result<(), SelectionError> {
        let Some(port) = port else {
            self.endpoint = Selection::Automatic;
            return Ok(());
        };

        let host = self
            .effective_group(table)
            .ok_or(SelectionError::NoEndpoints)?;
        if !group(&self.endpoints, &host).iter().any(|e| e.port() == port) {
            return Err(SelectionError::UnknownPort(port));
        }

        info!(pool = %self.pool_id, host = %host, port, "Endpoint pinned");
        self.group = Selection::Manual(host);
        self.endpoint = Selection::Manual(port);
        Ok(())
    }

    /// Apply a group and/or endpoint choice as one change.
    ///
    /// A `host`, or the absence of both `host` and `port`, updates the group
    /// choice first; `port` is then resolved within the resulting group. If
    /// either step is rejected, both choices are left as they were.
    pub fn select(
        &mut self,
        host: Option<String>,
        port: Option<u16>,
        table: &LatencyTable,
    ) -> Result<(), SelectionError> {
        let previous = (self.group.clone(), self.endpoint.clone());

        let result = if host.is_some() || port.is_none() {
            self.select_group(host)
        } else {
            Ok(())
        }
        .and_then(|()| self.select_endpoint(port, table));

        if result.is_err() {
            (self.group, self.endpoint) = previous;
        }
        result
    }

    /// Snapshot for the API.
    pub fn view(&self, table: &LatencyTable) -> EndpointView {
        let groups = group_hosts(&self.endpoints)
            .into_iter()
            .map(|host| {
                let members = group(&self.endpoints, &host);
                GroupView {
                    best_latency_ms: members.iter().filter_map(|e| table.latency(&e.key)).min(),
                    endpoints: members
                        .iter()
                        .map(|e| EndpointEntry {
                            host: e.host().to_string(),
                            port: e.port(),
                            name: e.config.name.clone(),
                            difficulty: e.config.difficulty,
                            var_diff: e.config.var_diff.clone(),
                            tls: e.config.tls,
                            sample: table.get(&e.key).into(),
                        })
                        .collect(),
                    host,
                }
            })
            .collect();

        EndpointView {
            pool_id: self.pool_id.clone(),
            groups,
            selected_group: self.effective_group(table),
            group_manual: self.group.is_manual(),
            selected: self.effective_endpoint(table),
            endpoint_manual: self.endpoint.is_manual(),
            default_endpoint: default_endpoint(&self.endpoints).map(|e| e.key.clone()),
            fastest_endpoint: fastest_endpoint(&self.endpoints, table).map(|e| e.key.clone()),
        }
    }
}
