//! The dashboard task.
//!
//! A single task owns all mutable dashboard state: the polled sections, one
//! [`EndpointSession`] per pool, and the shared [`LatencyTable`]. Upstream
//! fetches and latency probes run as spawned tasks that report back over a
//! channel, so none of them block the task or each other. After every change
//! the task publishes an immutable [`DashboardSnapshot`] through a watch
//! channel for the API to read.
//!
//! Polls are independent: a slow or failed fetch does not delay the next
//! tick, and whichever result arrives last is what gets shown. When the
//! shutdown token fires, in-flight fetches and probes drop their results.

mod section;

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::commands::{CommandError, DashboardCommand};
use crate::api_client::types::{
    BlocksResponse, EndpointView, PaymentsResponse, PoolsResponse,
};
use crate::config::Config;
use crate::endpoint::{EndpointKey, EndpointSession, LatencyTable, ProbeId};
use crate::error::{self, Result};
use crate::pool_api::{self, Block, Payment, Pool};
use crate::probe::{ProbeOutcome, ProbeRequest, Prober};
use crate::tracing::prelude::*;

pub use section::Section;

const COMMAND_CHANNEL_SIZE: usize = 32;
const EVENT_CHANNEL_SIZE: usize = 256;

/// Settings the dashboard task needs from [`Config`].
#[derive(Clone, Debug)]
pub struct DashboardConfig {
    pub stratum_hosts: Vec<String>,
    pub poll_interval: Duration,
    pub probe_timeout_ms: u64,
    pub page_size: u32,
}

impl From<&Config> for DashboardConfig {
    fn from(config: &Config) -> Self {
        Self {
            stratum_hosts: config.stratum_hosts.clone(),
            poll_interval: config.poll_interval,
            probe_timeout_ms: config.probe_timeout_ms,
            page_size: config.page_size,
        }
    }
}

/// Everything the API serves, as of the last change.
#[derive(Clone, Debug, Default)]
pub struct DashboardSnapshot {
    pub pools: PoolsResponse,
    pub blocks: HashMap<String, BlocksResponse>,
    pub payments: HashMap<String, PaymentsResponse>,
    pub endpoints: HashMap<String, EndpointView>,
}

impl DashboardSnapshot {
    pub fn pool(&self, id: &str) -> Option<&Pool> {
        self.pools.pools.iter().find(|p| p.id == id)
    }
}

/// Results coming back from spawned work.
enum Event {
    Pools(Result<Vec<Pool>>),
    Blocks {
        pool_id: String,
        result: Result<Vec<Block>>,
    },
    Payments {
        pool_id: String,
        result: Result<Vec<Payment>>,
    },
    Probe {
        key: EndpointKey,
        probe_id: ProbeId,
        outcome: ProbeOutcome,
    },
}

pub struct Dashboard {
    config: DashboardConfig,
    upstream: pool_api::Client,
    prober: Arc<dyn Prober>,
    shutdown: CancellationToken,

    command_tx: mpsc::Sender<DashboardCommand>,
    command_rx: mpsc::Receiver<DashboardCommand>,
    event_tx: mpsc::Sender<Event>,
    event_rx: mpsc::Receiver<Event>,
    snapshot_tx: watch::Sender<DashboardSnapshot>,

    pools: Section<Vec<Pool>>,
    blocks: HashMap<String, Section<Vec<Block>>>,
    payments: HashMap<String, Section<Vec<Payment>>>,
    sessions: HashMap<String, EndpointSession>,
    latency: LatencyTable,
}

impl Dashboard {
    pub fn new(
        config: DashboardConfig,
        upstream: pool_api::Client,
        prober: Arc<dyn Prober>,
        shutdown: CancellationToken,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (snapshot_tx, _) = watch::channel(DashboardSnapshot::default());

        Self {
            config,
            upstream,
            prober,
            shutdown,
            command_tx,
            command_rx,
            event_tx,
            event_rx,
            snapshot_tx,
            pools: Section::default(),
            blocks: HashMap::new(),
            payments: HashMap::new(),
            sessions: HashMap::new(),
            latency: LatencyTable::new(),
        }
    }

    /// Sender for API commands.
    pub fn commands(&self) -> mpsc::Sender<DashboardCommand> {
        self.command_tx.clone()
    }

    /// Receiver of published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<DashboardSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Run until the shutdown token is cancelled. The first poll happens
    /// immediately.
    pub async fn run(mut self) {
        info!(
            upstream = %self.upstream.base_url(),
            interval_secs = self.config.poll_interval.as_secs(),
            "Dashboard started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                _ = interval.tick() => {
                    self.spawn_pools_fetch();
                }
                Some(event) = self.event_rx.recv() => {
                    self.handle_event(event);
                }
                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command);
                }
            }
        }

        info!("Dashboard stopped");
    }

    /// Spawn `work`, delivering its event unless shutdown happens first.
    fn spawn_work<F>(&self, work: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        let event_tx = self.event_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                event = work => {
                    if !shutdown.is_cancelled() {
                        // Receiver gone means the dashboard stopped.
                        let _ = event_tx.send(event).await;
                    }
                }
            }
        });
    }

    fn spawn_pools_fetch(&self) {
        trace!("Polling pools");
        let upstream = self.upstream.clone();
        self.spawn_work(async move { Event::Pools(upstream.fetch_pools().await) });
    }

    fn spawn_pool_detail_fetches(&self, pool_id: &str) {
        let page_size = self.config.page_size;

        let upstream = self.upstream.clone();
        let id = pool_id.to_string();
        self.spawn_work(async move {
            let result = upstream.fetch_blocks(&id, 0, page_size).await;
            Event::Blocks { pool_id: id, result }
        });

        let upstream = self.upstream.clone();
        let id = pool_id.to_string();
        self.spawn_work(async move {
            let result = upstream.fetch_payments(&id, 0, page_size).await;
            Event::Payments { pool_id: id, result }
        });
    }

    /// Dispatch a probe for `key`, replacing any sample it had.
    fn start_probe(&mut self, key: EndpointKey) {
        let probe_id = self.latency.begin(key.clone());
        let prober = Arc::clone(&self.prober);
        let request = ProbeRequest {
            host: key.host.clone(),
            port: key.port,
            timeout_ms: self.config.probe_timeout_ms,
        };
        self.spawn_work(async move {
            let outcome = prober.probe(request).await;
            Event::Probe {
                key,
                probe_id,
                outcome,
            }
        });
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Pools(result) => self.handle_pools(result),

            Event::Blocks { pool_id, result } => {
                if !self.sessions.contains_key(&pool_id) {
                    trace!(pool = %pool_id, "Dropping blocks for departed pool");
                    return;
                }
                self.blocks.entry(pool_id.clone()).or_default().apply(
                    result,
                    error::Section::Blocks,
                    Some(&pool_id),
                );
            }

            Event::Payments { pool_id, result } => {
                if !self.sessions.contains_key(&pool_id) {
                    trace!(pool = %pool_id, "Dropping payments for departed pool");
                    return;
                }
                self.payments.entry(pool_id.clone()).or_default().apply(
                    result,
                    error::Section::Payments,
                    Some(&pool_id),
                );
            }

            Event::Probe {
                key,
                probe_id,
                outcome,
            } => {
                if !self.latency.commit(&key, probe_id, outcome) {
                    trace!(endpoint = %key, probe_id, "Dropping stale probe result");
                    return;
                }
            }
        }

        self.publish();
    }

    fn handle_pools(&mut self, result: Result<Vec<Pool>>) {
        let pools = match result {
            Ok(pools) => pools,
            Err(e) => {
                self.pools.apply(Err(e), error::Section::Pools, None);
                return;
            }
        };

        debug!(count = pools.len(), "Pools refreshed");

        self.sessions
            .retain(|id, _| pools.iter().any(|p| &p.id == id));
        self.blocks.retain(|id, _| pools.iter().any(|p| &p.id == id));
        self.payments.retain(|id, _| pools.iter().any(|p| &p.id == id));

        let mut to_probe = Vec::new();
        for pool in &pools {
            let session = self
                .sessions
                .entry(pool.id.clone())
                .or_insert_with(|| {
                    EndpointSession::new(pool.id.clone(), self.config.stratum_hosts.clone())
                });
            to_probe.extend(session.refresh(&pool.ports));
        }

        let sessions = &self.sessions;
        self.latency
            .retain(|key| sessions.values().any(|s| s.contains(key)));

        for key in to_probe {
            // Another pool may already have probed the same endpoint.
            if !self.latency.has_probe(&key) {
                self.start_probe(key);
            }
        }

        for pool in &pools {
            self.spawn_pool_detail_fetches(&pool.id);
        }

        self.pools.apply(Ok(pools), error::Section::Pools, None);
    }

    fn handle_command(&mut self, command: DashboardCommand) {
        match command {
            DashboardCommand::SelectEndpoint {
                pool_id,
                host,
                port,
                reply,
            } => {
                let result = self.select(&pool_id, host, port);
                if result.is_ok() {
                    self.publish();
                }
                let _ = reply.send(result);
            }

            DashboardCommand::Retest { pool_id, reply } => {
                let keys = match self.sessions.get(&pool_id) {
                    Some(session) => session.retest(),
                    None => {
                        let _ = reply.send(Err(CommandError::UnknownPool(pool_id)));
                        return;
                    }
                };

                info!(pool = %pool_id, endpoints = keys.len(), "Retesting endpoints");
                for key in keys {
                    self.start_probe(key);
                }
                self.publish();
                let _ = reply.send(self.view(&pool_id));
            }

            DashboardCommand::RefreshNow { reply } => {
                self.spawn_pools_fetch();
                let _ = reply.send(());
            }
        }
    }

    fn select(
        &mut self,
        pool_id: &str,
        host: Option<String>,
        port: Option<u16>,
    ) -> std::result::Result<EndpointView, CommandError> {
        let session = self
            .sessions
            .get_mut(pool_id)
            .ok_or_else(|| CommandError::UnknownPool(pool_id.to_string()))?;

        session.select(host, port, &self.latency)?;
        Ok(session.view(&self.latency))
    }

    fn view(&self, pool_id: &str) -> std::result::Result<EndpointView, CommandError> {
        self.sessions
            .get(pool_id)
            .map(|s| s.view(&self.latency))
            .ok_or_else(|| CommandError::UnknownPool(pool_id.to_string()))
    }

    fn publish(&self) {
        let pools = PoolsResponse {
            pools: self.pools.data.clone(),
            advisory: self.pools.advisory.clone(),
            updated_at: self.pools.updated_at,
        };

        let blocks = self
            .blocks
            .iter()
            .map(|(id, section)| {
                let response = BlocksResponse {
                    pool_id: id.clone(),
                    blocks: section.data.clone(),
                    advisory: section.advisory.clone(),
                    updated_at: section.updated_at,
                };
                (id.clone(), response)
            })
            .collect();

        let payments = self
            .payments
            .iter()
            .map(|(id, section)| {
                let response = PaymentsResponse {
                    pool_id: id.clone(),
                    payments: section.data.clone(),
                    advisory: section.advisory.clone(),
                    updated_at: section.updated_at,
                };
                (id.clone(), response)
            })
            .collect();

        let endpoints = self
            .sessions
            .iter()
            .map(|(id, session)| (id.clone(), session.view(&self.latency)))
            .collect();

        self.snapshot_tx.send_replace(DashboardSnapshot {
            pools,
            blocks,
            payments,
            endpoints,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::{Json, Router, http::StatusCode, routing::get};
    use serde_json::json;
    use tokio::sync::oneshot;

    use super::*;
    use crate::api_client::types::SampleStatus;
    use crate::pool_api::testing::serve;
    use crate::probe::ProbeError;

    /// Answers from a fixed port -> latency table; other ports refuse.
    struct ScriptedProber {
        latencies: HashMap<u16, u64>,
        calls: AtomicUsize,
    }

    impl ScriptedProber {
        fn new(latencies: &[(u16, u64)]) -> Arc<Self> {
            Arc::new(Self {
                latencies: latencies.iter().copied().collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, request: ProbeRequest) -> ProbeOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.latencies.get(&request.port) {
                Some(&ms) => ProbeOutcome::success(ms),
                None => ProbeOutcome::failure(ProbeError::ConnectError),
            }
        }
    }

    fn pool_json() -> serde_json::Value {
        json!({ "pools": [{
            "id": "btc",
            "coin": { "type": "BTC" },
            "ports": {
                "3333": { "difficulty": 8192 },
                "3355": { "name": "Mid" },
                "3377": { "difficulty": 65536 }
            }
        }]})
    }

    fn healthy_upstream() -> Router {
        Router::new()
            .route("/api/pools", get(|| async { Json(pool_json()) }))
            .route(
                "/api/blocks",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .route(
                "/api/payments",
                get(|| async { Json(json!([{ "address": "bc1q", "amount": 0.1 }])) }),
            )
    }

    fn config() -> DashboardConfig {
        DashboardConfig {
            stratum_hosts: vec!["eu".to_string()],
            poll_interval: Duration::from_secs(3600),
            probe_timeout_ms: 1000,
            page_size: 15,
        }
    }

    async fn start(
        upstream: Router,
        prober: Arc<dyn Prober>,
    ) -> (
        mpsc::Sender<DashboardCommand>,
        watch::Receiver<DashboardSnapshot>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let client = pool_api::Client::new(serve(upstream).await).unwrap();
        let shutdown = CancellationToken::new();
        let dashboard = Dashboard::new(config(), client, prober, shutdown.clone());
        let commands = dashboard.commands();
        let snapshots = dashboard.subscribe();
        let handle = tokio::spawn(dashboard.run());
        (commands, snapshots, shutdown, handle)
    }

    async fn wait_for(
        rx: &mut watch::Receiver<DashboardSnapshot>,
        condition: impl FnMut(&DashboardSnapshot) -> bool,
    ) -> DashboardSnapshot {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(condition))
            .await
            .expect("timed out waiting for snapshot")
            .expect("dashboard stopped")
            .clone()
    }

    fn all_settled(snapshot: &DashboardSnapshot) -> bool {
        snapshot.endpoints.get("btc").is_some_and(|view| {
            view.groups
                .iter()
                .flat_map(|g| &g.endpoints)
                .all(|e| matches!(e.sample.status, SampleStatus::Success | SampleStatus::Error))
        })
    }

    #[tokio::test]
    async fn first_poll_probes_and_selects_fastest() {
        let prober = ScriptedProber::new(&[(3333, 40), (3355, 90)]);
        let (_commands, mut snapshots, shutdown, _) =
            start(healthy_upstream(), prober.clone()).await;

        let snapshot = wait_for(&mut snapshots, all_settled).await;
        let view = &snapshot.endpoints["btc"];

        assert_eq!(view.selected, Some(EndpointKey::new("eu", 3333)));
        assert_eq!(view.default_endpoint, Some(EndpointKey::new("eu", 3355)));
        assert_eq!(prober.calls.load(Ordering::SeqCst), 3);

        let failed = &view.groups[0].endpoints[2];
        assert_eq!(failed.port, 3377);
        assert_eq!(failed.sample.error, Some(ProbeError::ConnectError));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn sections_fail_independently() {
        let prober = ScriptedProber::new(&[]);
        let (_commands, mut snapshots, shutdown, _) = start(healthy_upstream(), prober).await;

        let snapshot = wait_for(&mut snapshots, |s| {
            s.blocks.contains_key("btc") && s.payments.contains_key("btc")
        })
        .await;

        assert_eq!(snapshot.pools.pools.len(), 1);
        assert!(snapshot.pools.advisory.is_none());
        assert!(snapshot.blocks["btc"].advisory.is_some());
        assert!(snapshot.blocks["btc"].blocks.is_empty());
        assert!(snapshot.payments["btc"].advisory.is_none());
        assert_eq!(snapshot.payments["btc"].payments.len(), 1);

        shutdown.cancel();
    }

    #[tokio::test]
    async fn pool_list_failure_sets_advisory() {
        let upstream = Router::new().route(
            "/api/pools",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let (_commands, mut snapshots, shutdown, _) =
            start(upstream, ScriptedProber::new(&[])).await;

        let snapshot = wait_for(&mut snapshots, |s| s.pools.advisory.is_some()).await;
        assert!(snapshot.pools.pools.is_empty());
        assert!(snapshot.endpoints.is_empty());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn retest_probes_every_endpoint_again() {
        let prober = ScriptedProber::new(&[(3333, 40)]);
        let (commands, mut snapshots, shutdown, _) =
            start(healthy_upstream(), prober.clone()).await;
        wait_for(&mut snapshots, all_settled).await;

        let (reply, rx) = oneshot::channel();
        commands
            .send(DashboardCommand::Retest {
                pool_id: "btc".into(),
                reply,
            })
            .await
            .unwrap();
        let view = rx.await.unwrap().unwrap();
        assert!(
            view.groups[0]
                .endpoints
                .iter()
                .all(|e| e.sample.status == SampleStatus::Testing)
        );

        let snapshot = wait_for(&mut snapshots, all_settled).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 6);
        // Same network, same classification.
        let statuses: Vec<_> = snapshot.endpoints["btc"].groups[0]
            .endpoints
            .iter()
            .map(|e| e.sample.status)
            .collect();
        assert_eq!(
            statuses,
            vec![SampleStatus::Success, SampleStatus::Error, SampleStatus::Error]
        );

        shutdown.cancel();
    }

    #[tokio::test]
    async fn manual_selection_is_reported() {
        let prober = ScriptedProber::new(&[(3333, 40)]);
        let (commands, mut snapshots, shutdown, _) = start(healthy_upstream(), prober).await;
        wait_for(&mut snapshots, all_settled).await;

        let (reply, rx) = oneshot::channel();
        commands
            .send(DashboardCommand::SelectEndpoint {
                pool_id: "btc".into(),
                host: None,
                port: Some(3377),
                reply,
            })
            .await
            .unwrap();
        let view = rx.await.unwrap().unwrap();
        assert_eq!(view.selected, Some(EndpointKey::new("eu", 3377)));
        assert!(view.endpoint_manual);

        let snapshot = wait_for(&mut snapshots, |s| {
            s.endpoints.get("btc").is_some_and(|v| v.endpoint_manual)
        })
        .await;
        assert_eq!(
            snapshot.endpoints["btc"].selected,
            Some(EndpointKey::new("eu", 3377))
        );

        shutdown.cancel();
    }

    #[tokio::test]
    async fn unknown_pool_command_is_rejected() {
        let (commands, _snapshots, shutdown, _) =
            start(healthy_upstream(), ScriptedProber::new(&[])).await;

        let (reply, rx) = oneshot::channel();
        commands
            .send(DashboardCommand::Retest {
                pool_id: "nope".into(),
                reply,
            })
            .await
            .unwrap();
        assert!(matches!(
            rx.await.unwrap(),
            Err(CommandError::UnknownPool(id)) if id == "nope"
        ));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn cancellation_stops_the_task() {
        let (_commands, _snapshots, shutdown, handle) =
            start(healthy_upstream(), ScriptedProber::new(&[])).await;

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("dashboard did not stop")
            .unwrap();
    }
}
