//! # dashvisor
//!
//! **Dashvisor** is the supervised backend core of a real-time sales
//! dashboard.
//!
//! It periodically pulls sales figures from an external API, validates and
//! stores them, serves reads through a TTL cache, and fans domain events
//! out to subscribers. Every component runs as a supervised child of a
//! rest-for-one tree with a bounded restart budget.
//!
//! ## Architecture
//! ### Overview
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Dashboard (facade)                                               │
//! │  - Bus (broadcast notices)                                        │
//! │  - SupervisionTree (rest-for-one, bounded restart window)         │
//! └──────┬────────────────────────────────────────────────────────────┘
//!        │ children, in start order:
//!        ▼
//!   DataStore ── CacheManager ── EventBroadcaster ── fetcher slot
//!        ── CelebrationManager ── Orchestrator
//!        ── SupervisorMonitor ── ReturnsMonitor
//!
//!   Orchestrator cycle (every refresh_period):
//!     fetch ─► validate ─► celebrations ─► store ─► cache invalidate
//!           ─► Bus.publish(dashboard:updated, system:status)
//!
//!   Satellite loops:
//!     SupervisorMonitor ─► per-entity fetch ─► supervisor:<id>
//!     ReturnsMonitor    ─► set diff of return ids ─► returns:new
//! ```
//!
//! ### Failure model
//! ```text
//! API failure        ─► recovered inside the cycle (status + retry next tick)
//! child crash/panic  ─► rest-for-one restart (crashed child + later ones)
//! crash loop         ─► > max_restarts within restart_window ─► fatal stop
//! OS signal          ─► cancel token ─► children join within grace
//! ```
//!
//! ## Features
//! | Area              | Description                                             | Key types                                      |
//! |-------------------|---------------------------------------------------------|------------------------------------------------|
//! | **Facade**        | Build, run, and query the whole runtime.                | [`Dashboard`], [`DashboardBuilder`]            |
//! | **Pipeline**      | Periodic fetch/validate/store/broadcast cycle.          | [`Orchestrator`], [`DataStore`]                |
//! | **Caching**       | TTL cache with counters and a background sweep.         | [`CacheManager`], [`CacheStats`]               |
//! | **Events**        | Topic-addressed pub/sub notices.                        | [`Bus`], [`Notice`], [`Topic`]                 |
//! | **Celebrations**  | Threshold detection with per-day deduplication.         | [`CelebrationManager`], [`ThresholdTable`]     |
//! | **Monitors**      | Per-entity poller and returns set-diff poller.          | [`SupervisorMonitor`], [`ReturnsMonitor`]      |
//! | **Supervision**   | Rest-for-one tree with bounded restarts.                | [`SupervisionTree`], [`Child`], [`ChildSpec`]  |
//! | **Errors**        | Typed errors with stable log labels.                    | [`FetchError`], [`RuntimeError`]               |
//!
//! ## Example
//! ```rust,no_run
//! use dashvisor::{Config, Dashboard};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.base_url = "http://localhost:4000/api".to_string();
//!
//!     let dashboard = Dashboard::builder().config(cfg).build()?;
//!
//!     let mut notices = dashboard.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(notice) = notices.recv().await {
//!             println!("{} {}", notice.topic, notice.kind);
//!         }
//!     });
//!
//!     dashboard.run().await?;
//!     Ok(())
//! }
//! ```

mod broadcaster;
mod cache;
mod celebrations;
mod config;
mod dashboard;
mod error;
mod events;
mod fetcher;
mod monitors;
mod orchestrator;
mod shutdown;
mod store;
mod tree;

// ---- Public re-exports ----

pub use broadcaster::{BroadcastStats, EventBroadcaster};
pub use cache::{CacheManager, CacheStats};
pub use celebrations::{
    Celebration, CelebrationData, CelebrationKind, CelebrationLevel, CelebrationManager,
    ThresholdTable,
};
pub use config::Config;
pub use dashboard::{Dashboard, DashboardBuilder};
pub use error::{CacheError, ChildError, FetchError, RuntimeError, StoreError};
pub use events::{Bus, Notice, Topic};
pub use fetcher::{ApiClient, HttpFetcher, Payload};
pub use monitors::{ReturnsMonitor, ReturnsMonitorStatus, SupervisorMonitor, SupervisorMonitorStatus};
pub use orchestrator::{CycleMetrics, Orchestrator, OrchestratorStatus, DASHBOARD_CACHE_KEY};
pub use shutdown::{wait_for_shutdown_signal, ShutdownSignal};
pub use store::{DataAnswer, DataStore, Status, StatusReport};
pub use tree::{Child, ChildRef, ChildSpec, ChildStatus, SupervisionTree};
