//! # Returns-diff poller.
//!
//! [`ReturnsMonitor`] independently polls the returns endpoint over a fixed
//! lookback window and detects newly appeared return records via a
//! poll-to-poll set difference.
//!
//! ## Detection rule
//! ```text
//! current_count = Σ bucket.returns.len()
//! current_ids   = ⋃ bucket.returns[].returnId
//!
//! count strictly greater than last poll
//!   AND new_ids = current_ids − last_ids non-empty
//!     → broadcast {count, ids, timestamp, returns: [records with new ids]}
//! ```
//! The membership diff, not the count alone, decides the notification:
//! counts can tie while membership changes (no event), and a shrinking set
//! never fires.
//!
//! ## Failure isolation
//! A fetch or decode failure bumps the error counter and stamps
//! `last_check`, but leaves the tracking set untouched, so a transient
//! failure cannot manufacture a spurious "new returns" signal on the next
//! successful poll.
//!
//! The tracking set is in-memory only and recomputed from scratch each
//! tick; losing it across restarts is an accepted availability tradeoff.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcaster::EventBroadcaster;
use crate::error::{ChildError, FetchError};
use crate::fetcher::ApiClient;
use crate::tree::Child;

/// One per-day bucket from the returns endpoint.
#[derive(Debug, Deserialize)]
struct ReturnsBucket {
    #[allow(dead_code)]
    date: Option<String>,
    #[serde(default)]
    returns: Vec<Value>,
}

struct ReturnsState {
    polling: bool,
    last_check: Option<DateTime<Utc>>,
    last_count: usize,
    last_ids: HashSet<i64>,
    error_count: u64,
}

/// Snapshot returned by [`ReturnsMonitor::get_status`].
#[derive(Clone, Debug)]
pub struct ReturnsMonitorStatus {
    /// Whether the tick currently polls.
    pub polling: bool,
    /// Timestamp of the last poll attempt (success or failure).
    pub last_check: Option<DateTime<Utc>>,
    /// Total return records seen on the last successful poll.
    pub last_count: usize,
    /// Failed polls since start.
    pub error_count: u64,
}

/// Detects newly appeared return records via set difference.
pub struct ReturnsMonitor {
    fetcher: Arc<dyn ApiClient>,
    broadcaster: Arc<EventBroadcaster>,
    period: Duration,
    lookback_days: u32,
    state: RwLock<ReturnsState>,
}

impl ReturnsMonitor {
    /// Wires the monitor; `poll_on_start` selects the initial polling state.
    pub fn new(
        fetcher: Arc<dyn ApiClient>,
        broadcaster: Arc<EventBroadcaster>,
        period: Duration,
        lookback_days: u32,
        poll_on_start: bool,
    ) -> Self {
        Self {
            fetcher,
            broadcaster,
            period,
            lookback_days,
            state: RwLock::new(ReturnsState {
                polling: poll_on_start,
                last_check: None,
                last_count: 0,
                last_ids: HashSet::new(),
                error_count: 0,
            }),
        }
    }

    /// Enables the periodic poll.
    pub async fn start_polling(&self) {
        self.state.write().await.polling = true;
    }

    /// Disables the periodic poll; the tick keeps running but does nothing.
    pub async fn stop_polling(&self) {
        self.state.write().await.polling = false;
    }

    /// Returns a state snapshot.
    pub async fn get_status(&self) -> ReturnsMonitorStatus {
        let state = self.state.read().await;
        ReturnsMonitorStatus {
            polling: state.polling,
            last_check: state.last_check,
            last_count: state.last_count,
            error_count: state.error_count,
        }
    }

    /// Runs one poll. Public for tests; the supervised loop calls this on
    /// every tick while polling is enabled.
    pub async fn poll_once(&self) {
        if !self.state.read().await.polling {
            return;
        }

        match self.fetcher.fetch_returns(self.lookback_days).await {
            Ok(body) => self.apply_poll(body).await,
            Err(e) => {
                warn!(error = %e, label = e.as_label(), "returns poll failed");
                let mut state = self.state.write().await;
                state.error_count += 1;
                state.last_check = Some(Utc::now());
                // Tracking state intentionally untouched.
            }
        }
    }

    async fn apply_poll(&self, body: Value) {
        let buckets = match decode_buckets(body) {
            Ok(buckets) => buckets,
            Err(e) => {
                warn!(error = %e, "returns body undecodable");
                let mut state = self.state.write().await;
                state.error_count += 1;
                state.last_check = Some(Utc::now());
                return;
            }
        };

        let current_count: usize = buckets.iter().map(|b| b.returns.len()).sum();
        let mut current_ids = HashSet::new();
        let mut records = Vec::new();
        for bucket in &buckets {
            for record in &bucket.returns {
                if let Some(id) = record.get("returnId").and_then(|v| v.as_i64()) {
                    current_ids.insert(id);
                    records.push((id, record.clone()));
                }
            }
        }

        let mut state = self.state.write().await;
        let grew = current_count > state.last_count;
        if grew {
            let new_ids: HashSet<i64> =
                current_ids.difference(&state.last_ids).copied().collect();
            if !new_ids.is_empty() {
                let new_records: Vec<Value> = records
                    .iter()
                    .filter(|(id, _)| new_ids.contains(id))
                    .map(|(_, r)| r.clone())
                    .collect();
                let mut ids: Vec<i64> = new_ids.iter().copied().collect();
                ids.sort_unstable();

                info!(count = new_records.len(), "new returns detected");
                self.broadcaster
                    .broadcast_new_returns(json!({
                        "count": new_records.len(),
                        "ids": ids,
                        "timestamp": Utc::now().to_rfc3339(),
                        "returns": new_records,
                    }))
                    .await;
            } else {
                debug!("returns count grew but id set did not, skipping");
            }
        }

        // Tracking state is replaced wholesale on every successful poll.
        state.last_ids = current_ids;
        state.last_count = current_count;
        state.last_check = Some(Utc::now());
    }
}

fn decode_buckets(body: Value) -> Result<Vec<ReturnsBucket>, FetchError> {
    serde_json::from_value(body).map_err(|e| FetchError::Decode {
        endpoint: "dashboard/returns".to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Child for ReturnsMonitor {
    fn name(&self) -> &str {
        "returns_monitor"
    }

    async fn run(&self, token: CancellationToken) -> Result<(), ChildError> {
        let mut tick = tokio::time::interval(self.period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    self.poll_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Bus, Notice};
    use crate::fetcher::Payload;
    use std::sync::Mutex;

    struct ScriptedReturns {
        responses: Mutex<Vec<Result<Value, FetchError>>>,
    }

    impl ScriptedReturns {
        fn new(mut responses: Vec<Result<Value, FetchError>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl ApiClient for ScriptedReturns {
        async fn fetch_dashboard_data(&self) -> Result<Payload, FetchError> {
            Err(FetchError::Transport("not scripted".into()))
        }

        async fn fetch_supervisor(&self, _id: &str) -> Result<Payload, FetchError> {
            Err(FetchError::Transport("not scripted".into()))
        }

        async fn fetch_returns(&self, _days: u32) -> Result<Value, FetchError> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(FetchError::Transport("script exhausted".into())))
        }
    }

    fn body(ids: &[i64]) -> Value {
        let returns: Vec<Value> = ids
            .iter()
            .map(|id| json!({"returnId": id, "valor": 10.0}))
            .collect();
        json!([{"date": "2026-08-23", "returns": returns}])
    }

    fn fixture(
        responses: Vec<Result<Value, FetchError>>,
    ) -> (ReturnsMonitor, tokio::sync::broadcast::Receiver<Notice>) {
        let broadcaster = Arc::new(EventBroadcaster::new(Bus::new(64)));
        let rx = broadcaster.subscribe();
        let monitor = ReturnsMonitor::new(
            ScriptedReturns::new(responses),
            broadcaster,
            Duration::from_secs(30),
            30,
            true,
        );
        (monitor, rx)
    }

    fn drain_returns(rx: &mut tokio::sync::broadcast::Receiver<Notice>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            if n.kind == "new_returns" {
                out.push(n.payload);
            }
        }
        out
    }

    #[tokio::test]
    async fn new_id_fires_exactly_one_event() {
        let (m, mut rx) = fixture(vec![Ok(body(&[1, 2, 3])), Ok(body(&[1, 2, 3, 4]))]);

        m.poll_once().await;
        // First poll establishes the baseline; count grew from 0 but
        // last_ids was empty too, so ids 1..3 are all "new".
        let first = drain_returns(&mut rx);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0]["ids"], json!([1, 2, 3]));

        m.poll_once().await;
        let second = drain_returns(&mut rx);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0]["ids"], json!([4]));
        assert_eq!(second[0]["count"], 1);
        assert_eq!(second[0]["returns"][0]["returnId"], 4);
    }

    #[tokio::test]
    async fn identical_poll_fires_nothing() {
        let (m, mut rx) = fixture(vec![Ok(body(&[1, 2, 3])), Ok(body(&[1, 2, 3]))]);
        m.poll_once().await;
        drain_returns(&mut rx);

        m.poll_once().await;
        assert!(drain_returns(&mut rx).is_empty());
        assert_eq!(m.get_status().await.last_count, 3);
    }

    #[tokio::test]
    async fn shrinking_set_fires_nothing_even_with_membership_change() {
        let (m, mut rx) = fixture(vec![Ok(body(&[1, 2, 3])), Ok(body(&[2, 3]))]);
        m.poll_once().await;
        drain_returns(&mut rx);

        m.poll_once().await;
        assert!(drain_returns(&mut rx).is_empty());
        // Tracking set still replaced wholesale.
        assert_eq!(m.get_status().await.last_count, 2);
    }

    #[tokio::test]
    async fn count_tie_with_membership_change_fires_nothing() {
        let (m, mut rx) = fixture(vec![Ok(body(&[1, 2, 3])), Ok(body(&[1, 2, 4]))]);
        m.poll_once().await;
        drain_returns(&mut rx);

        m.poll_once().await;
        assert!(drain_returns(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn transient_failure_cannot_manufacture_new_returns() {
        let (m, mut rx) = fixture(vec![
            Ok(body(&[1, 2, 3])),
            Err(FetchError::Transport("flaky".into())),
            Ok(body(&[1, 2, 3])),
        ]);
        m.poll_once().await;
        drain_returns(&mut rx);

        m.poll_once().await; // failure: counters bump, tracking untouched
        assert_eq!(m.get_status().await.error_count, 1);

        m.poll_once().await; // same ids as before the failure
        assert!(drain_returns(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn stop_polling_suppresses_ticks() {
        let (m, mut rx) = fixture(vec![Ok(body(&[1]))]);
        m.stop_polling().await;
        m.poll_once().await;
        assert!(drain_returns(&mut rx).is_empty());
        assert!(m.get_status().await.last_check.is_none());

        m.start_polling().await;
        m.poll_once().await;
        assert_eq!(drain_returns(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn undecodable_body_counts_as_error() {
        let (m, _rx) = fixture(vec![Ok(json!({"not": "a list"}))]);
        m.poll_once().await;
        let status = m.get_status().await;
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_count, 0);
    }
}
