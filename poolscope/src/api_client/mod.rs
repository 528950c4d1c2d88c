//! Client for the daemon's HTTP API.

pub mod types;

use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};
use crate::pool_api::MinerStats;
use types::{
    BlocksResponse, EndpointView, ErrorResponse, PaymentsResponse, PoolResponse, PoolsResponse,
    ProbeRequestBody, ProbeResponse, SelectionRequest,
};

pub const DEFAULT_URL: &str = "http://127.0.0.1:7786";

const API_PREFIX: [&str; 2] = ["api", "v0"];

/// Long enough for a `/probe` at its 10 s ceiling to answer.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Outcome of a miner lookup.
#[derive(Debug)]
pub enum MinerLookup {
    Found(MinerStats),
    /// The daemon's explanation of why there is nothing to show.
    NotFound(String),
}

pub struct Client {
    base_url: Url,
    http: reqwest::Client,
}

impl Client {
    /// Client for a daemon at [`DEFAULT_URL`].
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_URL)
    }

    pub fn with_base_url(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let base_url =
            Url::parse(&url).map_err(|e| Error::Config(format!("invalid API URL {url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("API URL {base_url} cannot be a base")));
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { base_url, http })
    }

    pub async fn get_pools(&self) -> Result<PoolsResponse> {
        self.get(&["pools"]).await
    }

    pub async fn get_pool(&self, id: &str) -> Result<PoolResponse> {
        self.get(&["pools", id]).await
    }

    pub async fn get_blocks(&self, id: &str) -> Result<BlocksResponse> {
        self.get(&["pools", id, "blocks"]).await
    }

    pub async fn get_payments(&self, id: &str) -> Result<PaymentsResponse> {
        self.get(&["pools", id, "payments"]).await
    }

    pub async fn get_endpoints(&self, id: &str) -> Result<EndpointView> {
        self.get(&["pools", id, "endpoints"]).await
    }

    pub async fn select(&self, id: &str, selection: &SelectionRequest) -> Result<EndpointView> {
        let request = self
            .http
            .put(self.url(&["pools", id, "endpoints", "selection"]))
            .json(selection);
        decode(request.send().await?).await
    }

    pub async fn retest(&self, id: &str) -> Result<EndpointView> {
        let request = self
            .http
            .post(self.url(&["pools", id, "endpoints", "retest"]));
        decode(request.send().await?).await
    }

    /// Ask the daemon to poll the upstream immediately.
    pub async fn refresh(&self) -> Result<()> {
        let response = self.http.post(self.url(&["refresh"])).send().await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            status => Err(Error::Status(status)),
        }
    }

    pub async fn get_miner(&self, pool: &str, address: &str) -> Result<MinerLookup> {
        let response = self
            .http
            .get(self.url(&["miners", pool, address]))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            let body: ErrorResponse = response.json().await?;
            return Ok(MinerLookup::NotFound(body.error));
        }
        decode(response).await.map(MinerLookup::Found)
    }

    pub async fn probe(&self, body: &ProbeRequestBody) -> Result<ProbeResponse> {
        self.post(&["probe"], body).await
    }

    /// `{base}/api/v0/{segments..}`, each segment percent-encoded on its own.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `with_base_url`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(API_PREFIX).extend(segments);
        }
        url
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        decode(self.http.get(self.url(segments)).send().await?).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, segments: &[&str], body: &B) -> Result<T> {
        decode(self.http.post(self.url(segments)).json(body).send().await?).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    // Prefer the daemon's own message when it sent one.
    match response.json::<ErrorResponse>().await {
        Ok(body) => Err(Error::Other(body.error)),
        Err(_) => Err(Error::Status(status)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{Json, Router, extract::Path, routing::get};
    use serde_json::json;
    use tokio::sync::{mpsc, watch};

    use super::*;
    use crate::api::{SharedState, router};
    use crate::dashboard::DashboardSnapshot;
    use crate::pool_api::{self, Pool, testing::serve};
    use crate::probe::TcpProber;

    async fn daemon(snapshot: DashboardSnapshot) -> (Client, watch::Sender<DashboardSnapshot>) {
        daemon_with_upstream(snapshot, "http://127.0.0.1:9").await
    }

    async fn daemon_with_upstream(
        snapshot: DashboardSnapshot,
        upstream: &str,
    ) -> (Client, watch::Sender<DashboardSnapshot>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(snapshot);
        let (cmd_tx, _cmd_rx) = mpsc::channel(1);
        let state = SharedState {
            snapshots: snapshot_rx,
            dashboard_cmd_tx: cmd_tx,
            upstream: pool_api::Client::new(upstream).unwrap(),
            prober: Arc::new(TcpProber),
            probe_timeout_ms: 1000,
        };
        let url = serve(router(state)).await;
        (Client::with_base_url(url).unwrap(), snapshot_tx)
    }

    #[tokio::test]
    async fn reads_pools() {
        let mut snapshot = DashboardSnapshot::default();
        snapshot.pools.pools.push(Pool {
            id: "ltc".into(),
            ..Default::default()
        });
        snapshot.pools.advisory = Some("stale".into());
        let (client, _tx) = daemon(snapshot).await;

        let pools = client.get_pools().await.unwrap();
        assert_eq!(pools.pools[0].id, "ltc");
        assert_eq!(pools.advisory.as_deref(), Some("stale"));
    }

    #[tokio::test]
    async fn daemon_error_message_is_surfaced() {
        let (client, _tx) = daemon(DashboardSnapshot::default()).await;

        let err = client.get_endpoints("nope").await.unwrap_err();
        assert_eq!(err.to_string(), "unknown pool nope");
    }

    #[tokio::test]
    async fn probe_round_trip() {
        let (client, _tx) = daemon(DashboardSnapshot::default()).await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let response = client
            .probe(&ProbeRequestBody {
                host: "127.0.0.1".into(),
                port,
                timeout: None,
            })
            .await
            .unwrap();
        assert!(response.latency.is_some());
        assert_eq!(response.error, None);
    }

    #[tokio::test]
    async fn miner_address_survives_both_hops() {
        let upstream = Router::new().route(
            "/api/miners/{pool}/{address}",
            get(|Path((pool, address)): Path<(String, String)>| async move {
                Json(json!({ "lastPayment": format!("{pool}|{address}") }))
            }),
        );
        let upstream = serve(upstream).await;
        let (client, _tx) = daemon_with_upstream(DashboardSnapshot::default(), &upstream).await;

        for address in ["abc?x=1", "abc#frag", "abc/def"] {
            let stats = match client.get_miner("btc", address).await.unwrap() {
                MinerLookup::Found(stats) => stats,
                MinerLookup::NotFound(message) => panic!("{address}: {message}"),
            };
            assert_eq!(stats.last_payment, Some(format!("btc|{address}")));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_daemon_times_out() {
        // Connections land in the backlog and are never answered.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client =
            Client::with_base_url(format!("http://{}", listener.local_addr().unwrap())).unwrap();

        let err = client.get_pools().await.unwrap_err();
        assert!(matches!(&err, Error::Http(e) if e.is_timeout()), "{err:?}");
    }

    #[test]
    fn malformed_url_is_config_error() {
        assert!(matches!(
            Client::with_base_url("127.0.0.1:7786"),
            Err(Error::Config(_))
        ));
    }
}
