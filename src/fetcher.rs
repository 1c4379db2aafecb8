//! # External API access.
//!
//! [`ApiClient`] is the trait seam between the runtime and the external
//! dashboard API; [`HttpFetcher`] is its production implementation over
//! `reqwest`. Tests substitute stub clients at this seam.
//!
//! ## Endpoints
//! ```text
//! GET dashboard/sale            sales summary (daily/monthly/hourly figures)
//! GET dashboard/sale/company    per-store list + aggregate percentage
//! GET dashboard/returns?days=N  per-day return buckets
//! GET supervisors/<id>          per-entity sales data
//! ```
//!
//! ## Rules
//! - Every call is bounded by the configured timeout.
//! - Non-2xx statuses and transport errors both surface as typed
//!   [`FetchError`]s; an undecodable body is a protocol error.
//! - `fetch_dashboard_data` is pure request/response: no retries, no
//!   caching. Retry cadence belongs to the orchestrator; caching belongs to
//!   the cache manager.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::Config;
use crate::error::FetchError;

/// Opaque dashboard payload: the merged JSON map produced by
/// [`ApiClient::fetch_dashboard_data`].
pub type Payload = Value;

/// Read-only access to the external dashboard API.
#[async_trait]
pub trait ApiClient: Send + Sync + 'static {
    /// Retrieves and merges the sales summary and the companies list into a
    /// single payload. Both underlying requests must succeed; there is no
    /// partial merge.
    async fn fetch_dashboard_data(&self) -> Result<Payload, FetchError>;

    /// Retrieves sales data for one monitored entity.
    async fn fetch_supervisor(&self, id: &str) -> Result<Payload, FetchError>;

    /// Retrieves the per-day return buckets for the given lookback window.
    async fn fetch_returns(&self, days: u32) -> Result<Value, FetchError>;
}

/// `reqwest`-backed [`ApiClient`].
pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    /// Builds a fetcher from the runtime config (base URL + call timeout).
    pub fn new(cfg: &Config) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(cfg.fetch_timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, endpoint: &str) -> Result<Value, FetchError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                endpoint: endpoint.to_string(),
            });
        }

        response.json::<Value>().await.map_err(|e| FetchError::Decode {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ApiClient for HttpFetcher {
    async fn fetch_dashboard_data(&self) -> Result<Payload, FetchError> {
        let (summary, companies) = tokio::try_join!(
            self.get_json("dashboard/sale"),
            self.get_json("dashboard/sale/company"),
        )?;
        Ok(merge_payload(summary, companies))
    }

    async fn fetch_supervisor(&self, id: &str) -> Result<Payload, FetchError> {
        self.get_json(&format!("supervisors/{id}")).await
    }

    async fn fetch_returns(&self, days: u32) -> Result<Value, FetchError> {
        self.get_json(&format!("dashboard/returns?days={days}")).await
    }
}

/// Shallow map union: every key of the company response is written into the
/// sales summary, so the `companies` list and the aggregate percentage
/// override anything of the same name in the summary. The summary already
/// carries the pre-computed per-store average-ticket figure.
fn merge_payload(summary: Value, companies: Value) -> Payload {
    let mut base = match summary {
        Value::Object(map) => map,
        other => {
            // Non-object summaries are preserved under a named key rather
            // than silently discarded.
            let mut map = serde_json::Map::new();
            map.insert("summary".to_string(), other);
            map
        }
    };
    if let Value::Object(extra) = companies {
        for (k, v) in extra {
            base.insert(k, v);
        }
    }
    Value::Object(base)
}
