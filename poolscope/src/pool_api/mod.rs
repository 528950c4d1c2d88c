//! Client for the upstream pool API.
//!
//! Read-only access to pools, blocks, payments, and per-miner statistics.
//! List responses go through [`envelope::normalize_list`], so a response in
//! an unexpected shape comes back as an empty list rather than an error.
//! Transport failures and non-success statuses are returned as errors for
//! the caller to turn into a section advisory.

pub mod envelope;
pub mod types;

use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::tracing::prelude::*;

pub use types::{
    Block, Coin, MinerPerformance, MinerStats, Payment, PaymentProcessing, Pool, PoolStats,
    PortConfig, VarDiffConfig, WorkerStats,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upstream pool API client.
#[derive(Clone, Debug)]
pub struct Client {
    base_url: Url,
    http: reqwest::Client,
}

impl Client {
    /// Create a client for the API rooted at `base_url` (e.g.
    /// `http://pool:4000`); request paths start with `/api`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let base_url = Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("invalid upstream URL {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("upstream URL {base_url} cannot be a base")));
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// `GET /api/pools`. An empty list is a valid answer.
    pub async fn fetch_pools(&self) -> Result<Vec<Pool>> {
        let body = self.get_json(&["pools"], &[]).await?;
        Ok(envelope::normalize_list(body, envelope::POOLS_KEYS))
    }

    /// `GET /api/blocks?pool=..&page=..&pageSize=..`
    pub async fn fetch_blocks(&self, pool_id: &str, page: u32, page_size: u32) -> Result<Vec<Block>> {
        let body = self
            .get_json(&["blocks"], &page_query(pool_id, page, page_size))
            .await?;
        Ok(envelope::normalize_list(body, envelope::BLOCKS_KEYS))
    }

    /// `GET /api/payments?pool=..&page=..&pageSize=..`
    pub async fn fetch_payments(
        &self,
        pool_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Payment>> {
        let body = self
            .get_json(&["payments"], &page_query(pool_id, page, page_size))
            .await?;
        Ok(envelope::normalize_list(body, envelope::PAYMENTS_KEYS))
    }

    /// `GET /api/miners/{pool}/{address}`.
    ///
    /// Returns `Ok(None)` when the upstream does not know the miner, either
    /// by answering 404 or with a JSON `null`.
    pub async fn fetch_miner_stats(&self, pool_id: &str, address: &str) -> Result<Option<MinerStats>> {
        let url = self.url(&["miners", pool_id, address]);
        let response = self.http.get(url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(pool = %pool_id, address = %address, "Miner unknown to upstream");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Status(response.status()));
        }

        let body: Value = serde_json::from_slice(&response.bytes().await?)?;
        if body.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(body)?))
    }

    /// `{base}/api/{segments..}`, each segment percent-encoded on its own.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("api").extend(segments);
        }
        url
    }

    async fn get_json(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Value> {
        let url = self.url(segments);
        trace!(url = %url, "Upstream request");

        let response = self.http.get(url).query(query).send().await?;
        if !response.status().is_success() {
            return Err(Error::Status(response.status()));
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn page_query(pool_id: &str, page: u32, page_size: u32) -> [(&'static str, String); 3] {
    [
        ("pool", pool_id.to_string()),
        ("page", page.to_string()),
        ("pageSize", page_size.to_string()),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    //! A stand-in upstream API served from a local listener.

    use axum::Router;
    use tokio::net::TcpListener;

    /// Serve `router` on an ephemeral local port and return its base URL.
    pub async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }
}
