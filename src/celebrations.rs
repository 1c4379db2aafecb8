//! # Achievement detection with per-store-per-day deduplication.
//!
//! [`CelebrationManager`] inspects fetched payloads against a threshold
//! table and emits at most one notification per qualifying achievement.
//! Input is stateless (any payload can be re-processed); output is stateful
//! (dedup caches suppress repeats).
//!
//! ## Dedup caches
//! Two independent maps, swept together by the supervised loop:
//! - **daily map** `"<store>:<date>" → date` backs the once-per-store-
//!   per-calendar-day guarantee for the daily-goal kind. The day boundary is
//!   the UTC calendar date; percentage plays no role in dedup.
//! - **generic map** `key → inserted_at` with a fixed TTL backs every
//!   other kind in the threshold table (hourly goal, exceptional
//!   performance, monthly milestone, top seller). Those checks are disabled
//!   in the default table, but the plumbing stays so re-enabling one needs
//!   no new wiring.
//!
//! ## Sweep
//! Every `celebration_sweep_period` the loop drops generic entries older
//! than `celebration_generic_ttl` and daily entries whose date is not today.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Timelike, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broadcaster::EventBroadcaster;
use crate::error::ChildError;
use crate::fetcher::Payload;
use crate::tree::Child;

/// Kinds of detectable achievements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CelebrationKind {
    /// Daily sales exceeded the daily goal.
    DailyGoal,
    /// Hourly sales exceeded the hourly goal.
    HourlyGoal,
    /// Daily sales exceeded the goal by the exceptional multiplier.
    ExceptionalPerformance,
    /// Monthly sales crossed the monthly goal.
    MonthlyMilestone,
    /// A seller leads the store's daily ranking above the goal share.
    TopSeller,
}

impl CelebrationKind {
    fn as_label(&self) -> &'static str {
        match self {
            CelebrationKind::DailyGoal => "daily_goal",
            CelebrationKind::HourlyGoal => "hourly_goal",
            CelebrationKind::ExceptionalPerformance => "exceptional_performance",
            CelebrationKind::MonthlyMilestone => "monthly_milestone",
            CelebrationKind::TopSeller => "top_seller",
        }
    }
}

/// Notification weight attached to a celebration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CelebrationLevel {
    /// Regular goal notification.
    Standard,
    /// High-multiplier achievement.
    Exceptional,
}

/// Amounts behind a detected achievement.
#[derive(Clone, Debug, Serialize)]
pub struct CelebrationData {
    /// Value actually reached.
    pub achieved: f64,
    /// Goal the value is measured against.
    pub target: f64,
    /// Store (or entity) the record belongs to.
    pub store_name: String,
}

/// One detected achievement, ready for broadcast.
#[derive(Clone, Debug, Serialize)]
pub struct Celebration {
    /// Achievement kind.
    #[serde(rename = "type")]
    pub kind: CelebrationKind,
    /// `achieved / target * 100`.
    pub percentage: f64,
    /// Underlying amounts.
    pub data: CelebrationData,
    /// Detection timestamp (UTC, RFC 3339 via serde).
    pub timestamp: chrono::DateTime<Utc>,
    /// Notification weight.
    pub level: CelebrationLevel,
}

/// Which checks run and at which multipliers.
///
/// The default table activates only the daily-goal check; the other kinds
/// keep their plumbing (generic dedup keys, evaluation code) so flipping a
/// flag is all that re-enabling takes.
#[derive(Clone, Debug)]
pub struct ThresholdTable {
    /// Daily sale vs daily goal.
    pub daily_goal: bool,
    /// Hourly sale vs hourly goal.
    pub hourly_goal: bool,
    /// Daily sale vs goal × `exceptional_multiplier`.
    pub exceptional_performance: bool,
    /// Multiplier for the exceptional check.
    pub exceptional_multiplier: f64,
    /// Monthly sale vs monthly goal.
    pub monthly_milestone: bool,
    /// Best-seller share of the store's daily sale.
    pub top_seller: bool,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            daily_goal: true,
            hourly_goal: false,
            exceptional_performance: false,
            exceptional_multiplier: 1.5,
            monthly_milestone: false,
            top_seller: false,
        }
    }
}

struct DedupState {
    generic: HashMap<String, Instant>,
    daily: HashMap<String, NaiveDate>,
}

/// Threshold evaluator and dedup gatekeeper for achievements.
pub struct CelebrationManager {
    broadcaster: Arc<EventBroadcaster>,
    thresholds: ThresholdTable,
    generic_ttl: Duration,
    sweep_period: Duration,
    dedup: RwLock<DedupState>,
}

impl CelebrationManager {
    /// Creates a manager broadcasting through `broadcaster`.
    pub fn new(
        broadcaster: Arc<EventBroadcaster>,
        thresholds: ThresholdTable,
        generic_ttl: Duration,
        sweep_period: Duration,
    ) -> Self {
        Self {
            broadcaster,
            thresholds,
            generic_ttl,
            sweep_period,
            dedup: RwLock::new(DedupState {
                generic: HashMap::new(),
                daily: HashMap::new(),
            }),
        }
    }

    /// Evaluates a full dashboard payload: every record in `companies` is
    /// checked against the threshold table. Qualifying, non-duplicate
    /// celebrations are broadcast and returned.
    pub async fn process_api_data(&self, payload: &Payload) -> Vec<Celebration> {
        let today = Utc::now().date_naive();
        let records: Vec<&Payload> = payload
            .get("companies")
            .and_then(|c| c.as_array())
            .map(|list| list.iter().collect())
            .unwrap_or_default();

        let mut emitted = Vec::new();
        for record in records {
            emitted.extend(self.process_record(record, today).await);
        }
        emitted
    }

    /// Entity-scoped variant: the supervisor payload itself is the record.
    pub async fn process_supervisor_data(&self, id: &str, payload: &Payload) -> Vec<Celebration> {
        let today = Utc::now().date_naive();
        // Per-entity payloads carry the same daily fields as a company
        // record; fall back to the entity id when no name is present.
        if payload.get("nome").is_some() {
            self.process_record(payload, today).await
        } else {
            let mut named = payload.clone();
            if let Some(map) = named.as_object_mut() {
                map.insert(
                    "nome".to_string(),
                    serde_json::Value::String(format!("supervisor:{id}")),
                );
            }
            self.process_record(&named, today).await
        }
    }

    async fn process_record(&self, record: &Payload, today: NaiveDate) -> Vec<Celebration> {
        let mut emitted = Vec::new();

        if self.thresholds.daily_goal {
            if let Some(c) = self.check_daily_goal(record, today).await {
                emitted.push(c);
            }
        }
        if self.thresholds.hourly_goal {
            if let Some(c) = self.check_hourly_goal(record, today).await {
                emitted.push(c);
            }
        }
        if self.thresholds.exceptional_performance {
            if let Some(c) = self.check_exceptional(record, today).await {
                emitted.push(c);
            }
        }
        if self.thresholds.monthly_milestone {
            if let Some(c) = self.check_monthly(record, today).await {
                emitted.push(c);
            }
        }
        if self.thresholds.top_seller {
            if let Some(c) = self.check_top_seller(record, today).await {
                emitted.push(c);
            }
        }

        for celebration in &emitted {
            self.publish(celebration).await;
        }
        emitted
    }

    /// Daily goal: `target > 0 && achieved > target`, at most once per store
    /// per UTC calendar day regardless of percentage.
    async fn check_daily_goal(&self, record: &Payload, today: NaiveDate) -> Option<Celebration> {
        let store = store_name(record)?;
        let achieved = number(record, "venda_dia")?;
        let target = number(record, "meta_dia")?;
        if target <= 0.0 || achieved <= target {
            return None;
        }

        let key = format!("{store}:{today}");
        {
            let mut dedup = self.dedup.write().await;
            if dedup.daily.contains_key(&key) {
                debug!(store = %store, "daily goal already notified today");
                return None;
            }
            dedup.daily.insert(key, today);
        }

        Some(build(
            CelebrationKind::DailyGoal,
            CelebrationLevel::Standard,
            achieved,
            target,
            store,
        ))
    }

    async fn check_hourly_goal(&self, record: &Payload, today: NaiveDate) -> Option<Celebration> {
        let store = store_name(record)?;
        let achieved = number(record, "venda_hora")?;
        let target = number(record, "meta_hora")?;
        if target <= 0.0 || achieved <= target {
            return None;
        }

        let hour = Utc::now().hour();
        let key = generic_key(CelebrationKind::HourlyGoal, &[&store, &today.to_string(), &hour.to_string()]);
        if !self.mark_generic(key).await {
            return None;
        }

        Some(build(
            CelebrationKind::HourlyGoal,
            CelebrationLevel::Standard,
            achieved,
            target,
            store,
        ))
    }

    async fn check_exceptional(&self, record: &Payload, today: NaiveDate) -> Option<Celebration> {
        let store = store_name(record)?;
        let achieved = number(record, "venda_dia")?;
        let target = number(record, "meta_dia")?;
        let bar = target * self.thresholds.exceptional_multiplier;
        if target <= 0.0 || achieved <= bar {
            return None;
        }

        // Bucketed by 50% steps so a slowly growing figure does not renotify
        // on every cycle.
        let bucket = ((achieved / target * 100.0) / 50.0) as u64;
        let key = generic_key(
            CelebrationKind::ExceptionalPerformance,
            &[&store, &today.to_string(), &bucket.to_string()],
        );
        if !self.mark_generic(key).await {
            return None;
        }

        Some(build(
            CelebrationKind::ExceptionalPerformance,
            CelebrationLevel::Exceptional,
            achieved,
            target,
            store,
        ))
    }

    async fn check_monthly(&self, record: &Payload, today: NaiveDate) -> Option<Celebration> {
        let store = store_name(record)?;
        let achieved = number(record, "venda_mes")?;
        let target = number(record, "meta_mes")?;
        if target <= 0.0 || achieved <= target {
            return None;
        }

        let month = format!("{}-{:02}", today.year(), today.month());
        let key = generic_key(CelebrationKind::MonthlyMilestone, &[&store, &month]);
        if !self.mark_generic(key).await {
            return None;
        }

        Some(build(
            CelebrationKind::MonthlyMilestone,
            CelebrationLevel::Standard,
            achieved,
            target,
            store,
        ))
    }

    async fn check_top_seller(&self, record: &Payload, today: NaiveDate) -> Option<Celebration> {
        let store = store_name(record)?;
        let seller = record.get("melhor_vendedor")?;
        let seller_name = seller.get("nome")?.as_str()?.to_string();
        let achieved = number(seller, "venda")?;
        let target = number(record, "meta_dia")?;
        if target <= 0.0 || achieved <= target {
            return None;
        }

        let key = generic_key(
            CelebrationKind::TopSeller,
            &[&store, &seller_name, &today.to_string()],
        );
        if !self.mark_generic(key).await {
            return None;
        }

        Some(build(
            CelebrationKind::TopSeller,
            CelebrationLevel::Standard,
            achieved,
            target,
            format!("{store}/{seller_name}"),
        ))
    }

    /// Inserts `key` into the generic cache; returns false when a live
    /// entry already suppresses this notification.
    async fn mark_generic(&self, key: String) -> bool {
        let mut dedup = self.dedup.write().await;
        let now = Instant::now();
        if let Some(inserted) = dedup.generic.get(&key) {
            if now.duration_since(*inserted) < self.generic_ttl {
                return false;
            }
        }
        dedup.generic.insert(key, now);
        true
    }

    async fn publish(&self, celebration: &Celebration) {
        let value = serde_json::to_value(celebration).unwrap_or_default();
        self.broadcaster.broadcast_celebration(value.clone()).await;
        self.broadcaster.broadcast_goal_achieved(value).await;

        if celebration.kind == CelebrationKind::DailyGoal {
            info!(
                store = %celebration.data.store_name,
                achieved = celebration.data.achieved,
                target = celebration.data.target,
                percentage = celebration.percentage,
                "daily goal achieved"
            );
        } else {
            debug!(
                kind = celebration.kind.as_label(),
                store = %celebration.data.store_name,
                "celebration detected"
            );
        }
    }

    /// Drops generic entries older than the TTL and daily entries whose
    /// date is not today. Called by the sweep loop.
    pub async fn sweep(&self) -> (usize, usize) {
        let now = Instant::now();
        let today = Utc::now().date_naive();
        let mut dedup = self.dedup.write().await;

        let generic_before = dedup.generic.len();
        let ttl = self.generic_ttl;
        dedup
            .generic
            .retain(|_, inserted| now.duration_since(*inserted) < ttl);

        let daily_before = dedup.daily.len();
        dedup.daily.retain(|_, date| *date == today);

        let removed = (
            generic_before - dedup.generic.len(),
            daily_before - dedup.daily.len(),
        );
        if removed.0 > 0 || removed.1 > 0 {
            debug!(generic = removed.0, daily = removed.1, "celebration dedup sweep");
        }
        removed
    }

    #[cfg(test)]
    async fn forget_daily(&self, store: &str, date: NaiveDate) {
        self.dedup
            .write()
            .await
            .daily
            .remove(&format!("{store}:{date}"));
    }
}

fn store_name(record: &Payload) -> Option<String> {
    record.get("nome")?.as_str().map(|s| s.to_string())
}

fn number(record: &Payload, key: &str) -> Option<f64> {
    record.get(key)?.as_f64()
}

fn generic_key(kind: CelebrationKind, parts: &[&str]) -> String {
    format!("{}:{}", kind.as_label(), parts.join(":"))
}

fn build(
    kind: CelebrationKind,
    level: CelebrationLevel,
    achieved: f64,
    target: f64,
    store_name: String,
) -> Celebration {
    Celebration {
        kind,
        percentage: achieved / target * 100.0,
        data: CelebrationData {
            achieved,
            target,
            store_name,
        },
        timestamp: Utc::now(),
        level,
    }
}

#[async_trait]
impl Child for CelebrationManager {
    fn name(&self) -> &str {
        "celebrations"
    }

    async fn run(&self, token: CancellationToken) -> Result<(), ChildError> {
        let mut tick = tokio::time::interval(self.sweep_period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    self.sweep().await;
                }
            }
        }
    }
}
