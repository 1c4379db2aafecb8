//! # Per-entity ("supervisor") polling.
//!
//! [`SupervisorMonitor`] refreshes only the entities that currently have at
//! least one active viewer: an entity enters the subscribed set on
//! [`subscribe`](SupervisorMonitor::subscribe), leaves it on
//! [`unsubscribe`](SupervisorMonitor::unsubscribe), and membership decides
//! whether the periodic tick refreshes it.
//!
//! ## Rules
//! - `subscribe` performs one immediate refresh in addition to adding the
//!   id, so a freshly opened view does not wait for the next tick.
//! - Each per-id fetch failure is logged and skipped; it affects neither
//!   the other ids nor the tick loop.
//! - A successful fetch is handed to the celebration detector
//!   (entity-scoped check) and then broadcast on `supervisor:<id>`.
//! - The subscribed set is in-memory only and resets on restart.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broadcaster::EventBroadcaster;
use crate::celebrations::CelebrationManager;
use crate::error::ChildError;
use crate::fetcher::ApiClient;
use crate::tree::Child;

struct MonitorState {
    subscribed: HashSet<String>,
    last_update: Option<DateTime<Utc>>,
}

/// Snapshot returned by [`SupervisorMonitor::get_status`].
#[derive(Clone, Debug)]
pub struct SupervisorMonitorStatus {
    /// Currently subscribed entity ids, sorted.
    pub subscribed: Vec<String>,
    /// Timestamp of the last successful per-id refresh.
    pub last_update: Option<DateTime<Utc>>,
}

/// Polls subscribed entities and fans their data out per-entity.
pub struct SupervisorMonitor {
    fetcher: Arc<dyn ApiClient>,
    celebrations: Arc<CelebrationManager>,
    broadcaster: Arc<EventBroadcaster>,
    period: Duration,
    state: RwLock<MonitorState>,
}

impl SupervisorMonitor {
    /// Wires the monitor to its collaborators.
    pub fn new(
        fetcher: Arc<dyn ApiClient>,
        celebrations: Arc<CelebrationManager>,
        broadcaster: Arc<EventBroadcaster>,
        period: Duration,
    ) -> Self {
        Self {
            fetcher,
            celebrations,
            broadcaster,
            period,
            state: RwLock::new(MonitorState {
                subscribed: HashSet::new(),
                last_update: None,
            }),
        }
    }

    /// Adds `id` to the subscribed set and refreshes it immediately.
    pub async fn subscribe(&self, id: &str) {
        let inserted = self.state.write().await.subscribed.insert(id.to_string());
        if inserted {
            debug!(id, "supervisor subscribed");
        }
        self.refresh(id).await;
    }

    /// Removes `id`; it will no longer be refreshed by the tick.
    pub async fn unsubscribe(&self, id: &str) {
        let removed = self.state.write().await.subscribed.remove(id);
        if removed {
            debug!(id, "supervisor unsubscribed");
        }
    }

    /// Forces one immediate fetch for `id`. Failures are logged and
    /// swallowed; they never reach the other ids or the tick loop.
    pub async fn refresh(&self, id: &str) {
        match self.fetcher.fetch_supervisor(id).await {
            Ok(data) => {
                self.celebrations.process_supervisor_data(id, &data).await;
                self.broadcaster.broadcast_supervisor_update(id, data).await;
                self.state.write().await.last_update = Some(Utc::now());
            }
            Err(e) => {
                warn!(id, error = %e, label = e.as_label(), "supervisor refresh failed");
            }
        }
    }

    /// Returns a state snapshot.
    pub async fn get_status(&self) -> SupervisorMonitorStatus {
        let state = self.state.read().await;
        let mut subscribed: Vec<String> = state.subscribed.iter().cloned().collect();
        subscribed.sort_unstable();
        SupervisorMonitorStatus {
            subscribed,
            last_update: state.last_update,
        }
    }

    /// Refreshes every currently subscribed id, sequentially.
    pub async fn tick(&self) {
        let ids: Vec<String> = {
            let state = self.state.read().await;
            state.subscribed.iter().cloned().collect()
        };
        for id in ids {
            self.refresh(&id).await;
        }
    }
}

#[async_trait]
impl Child for SupervisorMonitor {
    fn name(&self) -> &str {
        "supervisor_monitor"
    }

    async fn run(&self, token: CancellationToken) -> Result<(), ChildError> {
        let mut tick = tokio::time::interval(self.period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::celebrations::ThresholdTable;
    use crate::error::FetchError;
    use crate::events::Bus;
    use crate::fetcher::Payload;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Stub API: records per-id fetch counts, fails ids prefixed "bad".
    #[derive(Default)]
    struct CountingApi {
        calls: AtomicU64,
    }

    #[async_trait]
    impl ApiClient for CountingApi {
        async fn fetch_dashboard_data(&self) -> Result<Payload, FetchError> {
            Err(FetchError::Transport("not used".into()))
        }

        async fn fetch_supervisor(&self, id: &str) -> Result<Payload, FetchError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if id.starts_with("bad") {
                Err(FetchError::Status {
                    status: 500,
                    endpoint: format!("supervisors/{id}"),
                })
            } else {
                Ok(json!({"venda_dia": 200.0, "meta_dia": 100.0}))
            }
        }

        async fn fetch_returns(&self, _days: u32) -> Result<serde_json::Value, FetchError> {
            Err(FetchError::Transport("not used".into()))
        }
    }

    fn monitor(api: Arc<CountingApi>) -> (SupervisorMonitor, tokio::sync::broadcast::Receiver<crate::Notice>) {
        let broadcaster = Arc::new(EventBroadcaster::new(Bus::new(64)));
        let rx = broadcaster.subscribe();
        let celebrations = Arc::new(CelebrationManager::new(
            broadcaster.clone(),
            ThresholdTable::default(),
            Duration::from_secs(3600),
            Duration::from_secs(600),
        ));
        (
            SupervisorMonitor::new(api, celebrations, broadcaster, Duration::from_secs(30)),
            rx,
        )
    }

    #[tokio::test]
    async fn subscribe_triggers_immediate_refresh_and_broadcast() {
        let api = Arc::new(CountingApi::default());
        let (m, mut rx) = monitor(api.clone());

        m.subscribe("7").await;
        assert_eq!(api.calls.load(Ordering::Relaxed), 1);

        // Entity qualifies for a daily-goal celebration, then its update.
        let mut kinds = Vec::new();
        while let Ok(n) = rx.try_recv() {
            kinds.push((n.kind.to_string(), n.topic.render()));
        }
        assert!(kinds
            .iter()
            .any(|(k, t)| k == "supervisor_updated" && t == "supervisor:7"));
        assert!(kinds.iter().any(|(k, _)| k == "new_celebration"));
    }

    #[tokio::test]
    async fn tick_refreshes_only_subscribed_ids() {
        let api = Arc::new(CountingApi::default());
        let (m, _rx) = monitor(api.clone());

        m.subscribe("1").await;
        m.subscribe("2").await;
        m.unsubscribe("1").await;
        let after_setup = api.calls.load(Ordering::Relaxed);

        m.tick().await;
        assert_eq!(api.calls.load(Ordering::Relaxed), after_setup + 1);
        assert_eq!(m.get_status().await.subscribed, vec!["2"]);
    }

    #[tokio::test]
    async fn per_id_failure_does_not_stop_the_tick() {
        let api = Arc::new(CountingApi::default());
        let (m, _rx) = monitor(api.clone());

        m.subscribe("bad-1").await;
        m.subscribe("ok-2").await;

        let before = api.calls.load(Ordering::Relaxed);
        m.tick().await;
        // Both ids were attempted despite the failure.
        assert_eq!(api.calls.load(Ordering::Relaxed), before + 2);
    }
}
