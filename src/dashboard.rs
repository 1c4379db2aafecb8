//! # Dashboard runtime facade.
//!
//! [`Dashboard`] wires every component onto one shared bus, hands them to
//! the [`SupervisionTree`] in dependency order, and exposes the external
//! call surface (reads, subscriptions, introspection).
//!
//! # High-level architecture:
//!
//! ```text
//!                         ┌─────────────┐
//!                         │  Dashboard  │
//!                         └──────┬──────┘
//!                          build + run
//!                                ▼
//!                       ┌─────────────────┐
//!                       │ SupervisionTree │ (rest-for-one)
//!                       └────────┬────────┘
//!    store ► cache ► broadcaster ► fetcher ► celebrations
//!          ► orchestrator ► supervisor_monitor ► returns_monitor
//!                                │
//!                     Bus.publish(Notice) ──► subscribers
//! ```
//!
//! Shutdown path:
//!   wait_for_shutdown_signal()
//!             └─► runtime_token.cancel()   → propagates to child tokens
//!             └─► tree joins children within cfg.grace
//!
//! ## Rules
//! - Child order is fixed: stateful holders first, the cycle driver after
//!   its collaborators, satellite pollers last.
//! - All handles are `Arc`s shared between the tree and the facade, so a
//!   restarted child keeps its accumulated state.
//! - `run` returns when every child stopped, on the first fatal runtime
//!   error, or after a termination signal completed the grace protocol.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broadcaster::{BroadcastStats, EventBroadcaster};
use crate::cache::{CacheManager, CacheStats};
use crate::celebrations::{CelebrationManager, ThresholdTable};
use crate::config::Config;
use crate::error::{FetchError, RuntimeError, StoreError};
use crate::events::{Bus, Notice};
use crate::fetcher::{ApiClient, HttpFetcher};
use crate::monitors::{ReturnsMonitor, ReturnsMonitorStatus, SupervisorMonitor, SupervisorMonitorStatus};
use crate::orchestrator::{Orchestrator, OrchestratorStatus};
use crate::shutdown::{self, ShutdownSignal};
use crate::store::{DataAnswer, DataStore};
use crate::tree::{Child, ChildRef, ChildSpec, ChildStatus, SupervisionTree};

/// Holds the fetcher's slot in the restart ordering.
///
/// The fetcher itself is call-driven and stateless between calls, so its
/// child only parks; a crash below it in the order still restarts it.
struct FetcherSlot;

#[async_trait::async_trait]
impl Child for FetcherSlot {
    fn name(&self) -> &str {
        "fetcher"
    }

    async fn run(&self, token: CancellationToken) -> Result<(), crate::error::ChildError> {
        token.cancelled().await;
        Ok(())
    }
}

/// Builder for [`Dashboard`].
///
/// The API client defaults to [`HttpFetcher`] over the configured base URL;
/// tests substitute a stub at the same seam.
pub struct DashboardBuilder {
    config: Config,
    thresholds: ThresholdTable,
    api: Option<Arc<dyn ApiClient>>,
}

impl DashboardBuilder {
    /// Starts from the default [`Config`] and [`ThresholdTable`].
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            thresholds: ThresholdTable::default(),
            api: None,
        }
    }

    /// Replaces the runtime configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Replaces the celebration threshold table.
    pub fn thresholds(mut self, thresholds: ThresholdTable) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Substitutes the API client used by every component.
    pub fn api_client(mut self, api: Arc<dyn ApiClient>) -> Self {
        self.api = Some(api);
        self
    }

    /// Wires the components and the supervision tree.
    pub fn build(self) -> Result<Dashboard, FetchError> {
        let config = self.config;

        let fetcher: Arc<dyn ApiClient> = match self.api {
            Some(api) => api,
            None => Arc::new(HttpFetcher::new(&config)?),
        };

        let bus = Bus::new(config.bus_capacity_clamped());
        let store = Arc::new(DataStore::new());
        let cache = Arc::new(CacheManager::new(config.cache_ttl, config.cache_sweep_period));
        let broadcaster = Arc::new(EventBroadcaster::new(bus));
        let celebrations = Arc::new(CelebrationManager::new(
            broadcaster.clone(),
            self.thresholds,
            config.celebration_generic_ttl,
            config.celebration_sweep_period,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            fetcher.clone(),
            store.clone(),
            cache.clone(),
            broadcaster.clone(),
            celebrations.clone(),
            config.refresh_period,
            config.store_read_timeout,
        ));
        let supervisor_monitor = Arc::new(SupervisorMonitor::new(
            fetcher.clone(),
            celebrations.clone(),
            broadcaster.clone(),
            config.supervisor_period,
        ));
        let returns_monitor = Arc::new(ReturnsMonitor::new(
            fetcher.clone(),
            broadcaster.clone(),
            config.returns_period,
            config.returns_lookback_days,
            config.returns_poll_on_start,
        ));

        let children: Vec<ChildRef> = vec![
            store.clone(),
            cache.clone(),
            broadcaster.clone(),
            Arc::new(FetcherSlot),
            celebrations.clone(),
            orchestrator.clone(),
            supervisor_monitor.clone(),
            returns_monitor.clone(),
        ];
        let specs: Vec<ChildSpec> = children.into_iter().map(ChildSpec::new).collect();

        let token = CancellationToken::new();
        let tree = Arc::new(SupervisionTree::new(
            specs,
            token.clone(),
            config.max_restarts,
            config.restart_window,
            config.grace,
        ));

        Ok(Dashboard {
            cache,
            broadcaster,
            orchestrator,
            supervisor_monitor,
            returns_monitor,
            tree,
            token,
        })
    }
}

impl Default for DashboardBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// External call surface of the supervised dashboard runtime.
pub struct Dashboard {
    cache: Arc<CacheManager>,
    broadcaster: Arc<EventBroadcaster>,
    orchestrator: Arc<Orchestrator>,
    supervisor_monitor: Arc<SupervisorMonitor>,
    returns_monitor: Arc<ReturnsMonitor>,
    tree: Arc<SupervisionTree>,
    token: CancellationToken,
}

impl Dashboard {
    /// Returns a builder with default configuration.
    pub fn builder() -> DashboardBuilder {
        DashboardBuilder::new()
    }

    /// Runs the supervision tree until every child stopped, a fatal runtime
    /// error occurred, or a termination signal completed the grace protocol.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        let tree = self.tree.clone();
        let mut runner = tokio::spawn(async move { tree.run().await });

        tokio::select! {
            outcome = shutdown::wait_for_shutdown_signal() => {
                self.on_signal_outcome(outcome);
                // When registration failed the token stays uncancelled and
                // the runner keeps going until it stops on its own.
                (&mut runner).await.unwrap_or(Ok(()))
            }
            joined = &mut runner => joined.unwrap_or(Ok(())),
        }
    }

    /// A received signal triggers the grace protocol; a listener that could
    /// not be registered is logged and the runtime keeps running.
    fn on_signal_outcome(&self, outcome: std::io::Result<ShutdownSignal>) {
        match outcome {
            Ok(received) => {
                info!(signal = received.as_label(), "termination signal received, shutting down");
                self.token.cancel();
            }
            Err(e) => {
                warn!(error = %e, "signal listener unavailable, waiting for explicit shutdown");
            }
        }
    }

    /// Requests a graceful shutdown; `run` then drives the grace protocol.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Hands out a bus receiver for all topics.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Notice> {
        self.broadcaster.subscribe()
    }

    /// Cache-aside dashboard read.
    pub async fn get_data(&self) -> Result<DataAnswer, StoreError> {
        self.orchestrator.get_data().await
    }

    /// Store status plus cycle counters.
    pub async fn get_status(&self) -> OrchestratorStatus {
        self.orchestrator.get_status().await
    }

    /// Cache hit/miss/eviction counters.
    pub fn get_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Broadcast counters.
    pub async fn get_broadcast_stats(&self) -> BroadcastStats {
        self.broadcaster.get_stats().await
    }

    /// Starts per-entity polling for `id` (immediate first refresh).
    pub async fn subscribe_supervisor(&self, id: &str) {
        self.supervisor_monitor.subscribe(id).await;
    }

    /// Stops per-entity polling for `id`.
    pub async fn unsubscribe_supervisor(&self, id: &str) {
        self.supervisor_monitor.unsubscribe(id).await;
    }

    /// Per-entity poller snapshot.
    pub async fn supervisor_status(&self) -> SupervisorMonitorStatus {
        self.supervisor_monitor.get_status().await
    }

    /// Enables the returns poll.
    pub async fn start_returns_polling(&self) {
        self.returns_monitor.start_polling().await;
    }

    /// Disables the returns poll.
    pub async fn stop_returns_polling(&self) {
        self.returns_monitor.stop_polling().await;
    }

    /// Returns poller snapshot.
    pub async fn returns_status(&self) -> ReturnsMonitorStatus {
        self.returns_monitor.get_status().await
    }

    /// Child names in start order.
    pub async fn which_children(&self) -> Vec<String> {
        self.tree.which_children().await
    }

    /// Number of supervised children.
    pub fn count_children(&self) -> usize {
        self.tree.count_children()
    }

    /// Manual rest-for-one restart of `name` and everything after it.
    pub async fn restart_child(&self, name: &str) -> bool {
        self.tree.restart_child(name).await
    }

    /// Introspection snapshot for one child.
    pub async fn get_child_status(&self, name: &str) -> Option<ChildStatus> {
        self.tree.get_child_status(name).await
    }

    /// Healthy/unhealthy flag per child.
    pub async fn health_check(&self) -> std::collections::HashMap<String, bool> {
        self.tree.health_check().await
    }
}
