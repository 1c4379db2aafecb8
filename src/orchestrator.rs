//! # Refresh cycle driver and cache-aside read path.
//!
//! [`Orchestrator`] owns the periodic fetch→validate→store→cache→broadcast
//! cycle and serves reads to external callers.
//!
//! ## Cycle (every `refresh_period`)
//! ```text
//! 1. store.update_status(Loading), broadcast system:status(loading)
//! 2. fetcher.fetch_dashboard_data()
//!      └─ Err → error counter++, store.update_status(Error, reason),
//!               broadcast system:status(error), stop this cycle
//! 3. structural validation: payload must contain "companies"
//!      └─ failure treated identically to a fetch failure
//! 4. devolution strictly greater than last cycle's value
//!      └─ broadcast dashboard:devolucao {anterior, atual}
//! 5. celebrations.process_api_data(payload)      (side-effecting)
//! 6. store.update_data, cache.delete(read key),
//!    broadcast dashboard:updated + system:status(ok)
//! 7. fetch counter++, timestamp, error counter reset,
//!    devolution baseline remembered for the next cycle
//! ```
//! A failed cycle is fully recovered locally: logged, reflected in the
//! store status and a status broadcast, retried on the next tick. It never
//! crashes the loop.
//!
//! ## Reads
//! `get_data` is cache-aside: cache first; on miss, a store read bounded by
//! `store_read_timeout`, then the cache is repopulated with the default TTL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcaster::EventBroadcaster;
use crate::cache::CacheManager;
use crate::celebrations::CelebrationManager;
use crate::error::{ChildError, FetchError, StoreError};
use crate::fetcher::{ApiClient, Payload};
use crate::store::{DataAnswer, DataStore, Status, StatusReport};
use crate::tree::Child;

/// Cache key used by the cache-aside read path.
pub const DASHBOARD_CACHE_KEY: &str = "dashboard:data";

/// Cycle counters exposed through [`Orchestrator::get_status`].
#[derive(Clone, Debug, Default)]
pub struct CycleMetrics {
    /// Successful refresh cycles since start.
    pub fetch_count: u64,
    /// Consecutive failed cycles (reset on success).
    pub error_count: u64,
    /// Timestamp of the last successful cycle.
    pub last_fetch_at: Option<DateTime<Utc>>,
    /// Devolution value recorded by the last successful cycle.
    pub last_devolution: Option<f64>,
}

/// Combined status snapshot for external callers.
#[derive(Clone, Debug)]
pub struct OrchestratorStatus {
    /// Store status (state machine + last update + data presence).
    pub store: StatusReport,
    /// Cycle counters.
    pub metrics: CycleMetrics,
}

/// Drives the periodic refresh cycle and serves cached reads.
pub struct Orchestrator {
    fetcher: Arc<dyn ApiClient>,
    store: Arc<DataStore>,
    cache: Arc<CacheManager>,
    broadcaster: Arc<EventBroadcaster>,
    celebrations: Arc<CelebrationManager>,
    refresh_period: Duration,
    store_read_timeout: Duration,
    metrics: RwLock<CycleMetrics>,
}

impl Orchestrator {
    /// Wires the orchestrator to its collaborators.
    pub fn new(
        fetcher: Arc<dyn ApiClient>,
        store: Arc<DataStore>,
        cache: Arc<CacheManager>,
        broadcaster: Arc<EventBroadcaster>,
        celebrations: Arc<CelebrationManager>,
        refresh_period: Duration,
        store_read_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            store,
            cache,
            broadcaster,
            celebrations,
            refresh_period,
            store_read_timeout,
            metrics: RwLock::new(CycleMetrics::default()),
        }
    }

    /// Cache-aside read: cache hit, or store read (bounded) + repopulate.
    pub async fn get_data(&self) -> Result<DataAnswer, StoreError> {
        if let Ok(cached) = self.cache.get(DASHBOARD_CACHE_KEY).await {
            return Ok(DataAnswer::Ready(cached));
        }

        let answer = self.store.get_data(self.store_read_timeout).await?;
        if let DataAnswer::Ready(payload) = &answer {
            self.cache
                .put(DASHBOARD_CACHE_KEY, payload.clone(), None)
                .await;
        }
        Ok(answer)
    }

    /// Store status plus cycle counters.
    pub async fn get_status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            store: self.store.get_status().await,
            metrics: self.metrics.read().await.clone(),
        }
    }

    /// Runs one refresh cycle. Failures are recovered here; the caller's
    /// loop keeps ticking regardless of the outcome.
    pub async fn refresh_cycle(&self) {
        self.store.update_status(Status::Loading, None).await;
        self.broadcaster
            .broadcast_system_status(Status::Loading, "refreshing dashboard data")
            .await;

        let payload = match self.fetch_validated().await {
            Ok(payload) => payload,
            Err(e) => {
                self.fail_cycle(&e).await;
                return;
            }
        };

        let devolution = payload.get("devolution").and_then(|v| v.as_f64());
        self.maybe_broadcast_devolution(devolution).await;

        self.celebrations.process_api_data(&payload).await;

        self.store.update_data(payload.clone()).await;
        self.cache.delete(DASHBOARD_CACHE_KEY).await;
        self.broadcaster.broadcast_dashboard_update(payload).await;
        self.broadcaster
            .broadcast_system_status(Status::Ok, "dashboard data updated")
            .await;

        let mut metrics = self.metrics.write().await;
        metrics.fetch_count += 1;
        metrics.error_count = 0;
        metrics.last_fetch_at = Some(Utc::now());
        if devolution.is_some() {
            metrics.last_devolution = devolution;
        }
        info!(fetch_count = metrics.fetch_count, "refresh cycle completed");
    }

    async fn fetch_validated(&self) -> Result<Payload, FetchError> {
        let payload = self.fetcher.fetch_dashboard_data().await?;
        // Cheap structural validation, not full schema validation.
        if payload.get("companies").is_none() {
            return Err(FetchError::Validation(
                "payload is missing the companies key".to_string(),
            ));
        }
        Ok(payload)
    }

    async fn fail_cycle(&self, error: &FetchError) {
        warn!(error = %error, label = error.as_label(), "refresh cycle failed");
        {
            let mut metrics = self.metrics.write().await;
            metrics.error_count += 1;
        }
        self.store
            .update_status(Status::Error, Some(error.to_string()))
            .await;
        self.broadcaster
            .broadcast_system_status(Status::Error, &error.to_string())
            .await;
    }

    /// Broadcasts only when the new value is strictly greater than the
    /// previous cycle's; the first observed value is a silent baseline.
    async fn maybe_broadcast_devolution(&self, current: Option<f64>) {
        let Some(current) = current else { return };
        let previous = self.metrics.read().await.last_devolution;
        if let Some(previous) = previous {
            if current > previous {
                self.broadcaster
                    .broadcast_devolution_increase(previous, current)
                    .await;
            }
        }
    }
}

#[async_trait]
impl Child for Orchestrator {
    fn name(&self) -> &str {
        "orchestrator"
    }

    async fn run(&self, token: CancellationToken) -> Result<(), ChildError> {
        let mut tick = tokio::time::interval(self.refresh_period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    self.refresh_cycle().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::celebrations::ThresholdTable;
    use crate::events::{Bus, Notice};
    use serde_json::json;
    use std::sync::Mutex;

    /// Stub API: pops one canned response per call.
    struct ScriptedApi {
        responses: Mutex<Vec<Result<Payload, FetchError>>>,
    }

    impl ScriptedApi {
        fn new(mut responses: Vec<Result<Payload, FetchError>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl ApiClient for ScriptedApi {
        async fn fetch_dashboard_data(&self) -> Result<Payload, FetchError> {
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(FetchError::Transport("script exhausted".into())))
        }

        async fn fetch_supervisor(&self, _id: &str) -> Result<Payload, FetchError> {
            Err(FetchError::Transport("not scripted".into()))
        }

        async fn fetch_returns(&self, _days: u32) -> Result<serde_json::Value, FetchError> {
            Err(FetchError::Transport("not scripted".into()))
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        store: Arc<DataStore>,
        cache: Arc<CacheManager>,
        rx: tokio::sync::broadcast::Receiver<Notice>,
    }

    fn fixture(responses: Vec<Result<Payload, FetchError>>) -> Fixture {
        let store = Arc::new(DataStore::new());
        let cache = Arc::new(CacheManager::new(
            Duration::from_secs(30),
            Duration::from_secs(60),
        ));
        let broadcaster = Arc::new(EventBroadcaster::new(Bus::new(128)));
        let rx = broadcaster.subscribe();
        let celebrations = Arc::new(CelebrationManager::new(
            broadcaster.clone(),
            ThresholdTable::default(),
            Duration::from_secs(3600),
            Duration::from_secs(600),
        ));
        let orchestrator = Orchestrator::new(
            ScriptedApi::new(responses),
            store.clone(),
            cache.clone(),
            broadcaster,
            celebrations,
            Duration::from_secs(30),
            Duration::from_secs(1),
        );
        Fixture {
            orchestrator,
            store,
            cache,
            rx,
        }
    }

    fn payload_with_devolution(devolution: f64) -> Payload {
        json!({ "companies": [], "devolution": devolution })
    }

    async fn drain_kinds(rx: &mut tokio::sync::broadcast::Receiver<Notice>) -> Vec<String> {
        let mut kinds = Vec::new();
        while let Ok(notice) = rx.try_recv() {
            kinds.push(notice.kind.to_string());
        }
        kinds
    }

    #[tokio::test]
    async fn successful_cycle_stores_caches_and_broadcasts() {
        let mut f = fixture(vec![Ok(json!({
            "companies": [{"nome": "Loja X", "venda_dia": 1200.0, "meta_dia": 1000.0}],
            "devolution": 50.0
        }))]);

        f.orchestrator.refresh_cycle().await;

        // Store holds the payload, status Ok.
        let report = f.store.get_status().await;
        assert_eq!(report.status, Status::Ok);
        assert!(report.has_data);

        let kinds = drain_kinds(&mut f.rx).await;
        // loading → celebration (both topics) → dashboard_updated → ok
        assert_eq!(
            kinds,
            vec![
                "status_update",
                "new_celebration",
                "goal_achieved_real",
                "dashboard_updated",
                "status_update"
            ]
        );

        let status = f.orchestrator.get_status().await;
        assert_eq!(status.metrics.fetch_count, 1);
        assert_eq!(status.metrics.error_count, 0);
        assert_eq!(status.metrics.last_devolution, Some(50.0));
    }

    #[tokio::test]
    async fn failed_fetch_reflects_error_and_keeps_old_data() {
        let mut f = fixture(vec![
            Ok(payload_with_devolution(10.0)),
            Err(FetchError::Transport("connection refused".into())),
        ]);

        f.orchestrator.refresh_cycle().await;
        drain_kinds(&mut f.rx).await;

        f.orchestrator.refresh_cycle().await;

        let status = f.orchestrator.get_status().await;
        assert_eq!(status.store.status, Status::Error);
        assert_eq!(status.metrics.error_count, 1);
        assert_eq!(status.metrics.fetch_count, 1);

        // Old payload still served.
        assert!(matches!(
            f.orchestrator.get_data().await.unwrap(),
            DataAnswer::Ready(_)
        ));

        let kinds = drain_kinds(&mut f.rx).await;
        assert_eq!(kinds, vec!["status_update", "status_update"]);
    }

    #[tokio::test]
    async fn missing_companies_key_is_a_validation_failure() {
        let mut f = fixture(vec![Ok(json!({"devolution": 1.0}))]);
        f.orchestrator.refresh_cycle().await;

        let status = f.orchestrator.get_status().await;
        assert_eq!(status.store.status, Status::Error);
        assert_eq!(status.metrics.error_count, 1);

        let kinds = drain_kinds(&mut f.rx).await;
        assert!(!kinds.contains(&"dashboard_updated".to_string()));
    }

    #[tokio::test]
    async fn devolution_fires_only_on_strict_increase() {
        let mut f = fixture(vec![
            Ok(payload_with_devolution(100.0)), // baseline, no event
            Ok(payload_with_devolution(150.0)), // increase → event {100,150}
            Ok(payload_with_devolution(150.0)), // equal → no event
            Ok(payload_with_devolution(120.0)), // decrease → no event
        ]);

        let mut devolution_events = Vec::new();
        for _ in 0..4 {
            f.orchestrator.refresh_cycle().await;
            while let Ok(notice) = f.rx.try_recv() {
                if notice.kind == "devolucao_aumentou" {
                    devolution_events.push(notice.payload.clone());
                }
            }
        }

        assert_eq!(devolution_events.len(), 1);
        assert_eq!(devolution_events[0]["anterior"], 100.0);
        assert_eq!(devolution_events[0]["atual"], 150.0);

        // Baseline tracks the latest successful cycle even after a decrease.
        assert_eq!(
            f.orchestrator.get_status().await.metrics.last_devolution,
            Some(120.0)
        );
    }

    #[tokio::test]
    async fn get_data_populates_cache_on_miss() {
        let f = fixture(vec![Ok(payload_with_devolution(1.0))]);
        f.orchestrator.refresh_cycle().await;

        // Cycle invalidated the cache; first read repopulates it.
        assert!(f.cache.get(DASHBOARD_CACHE_KEY).await.is_err());
        let _ = f.orchestrator.get_data().await.unwrap();
        assert!(f.cache.get(DASHBOARD_CACHE_KEY).await.is_ok());
    }

    #[tokio::test]
    async fn get_data_before_first_cycle_is_loading() {
        let f = fixture(vec![]);
        assert!(matches!(
            f.orchestrator.get_data().await.unwrap(),
            DataAnswer::Loading
        ));
    }
}
