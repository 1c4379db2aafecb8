//! # Named-topic fan-out with per-topic counters.
//!
//! [`EventBroadcaster`] resolves each logical event to a `(topic, kind,
//! payload)` [`Notice`] and publishes it on the shared [`Bus`]. Fan-out is
//! entirely the bus's job; the broadcaster holds no subscriber list of its
//! own, so its state is only the broadcast counters.
//!
//! ## Rules
//! - Broadcasts are best-effort and loss-tolerant: a publish with no
//!   attached receivers is logged at debug and the counters are simply not
//!   incremented for that attempt. No retry, no buffering. Subscribers
//!   re-derive state from the store/cache on demand.
//! - Counters: total count, last broadcast timestamp, and a per-topic map.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ChildError;
use crate::events::{Bus, Notice, Topic};
use crate::fetcher::Payload;
use crate::store::Status;
use crate::tree::Child;

/// Counter snapshot returned by [`EventBroadcaster::get_stats`].
#[derive(Clone, Debug)]
pub struct BroadcastStats {
    /// Total notices delivered to at least one receiver.
    pub broadcast_count: u64,
    /// Timestamp of the last delivered notice.
    pub last_broadcast_at: Option<DateTime<Utc>>,
    /// Delivered notices per rendered topic name.
    pub per_topic: HashMap<String, u64>,
}

struct Counters {
    broadcast_count: u64,
    last_broadcast_at: Option<DateTime<Utc>>,
    per_topic: HashMap<String, u64>,
}

/// Publishes dashboard notices on the shared bus and counts them.
pub struct EventBroadcaster {
    bus: Bus,
    counters: RwLock<Counters>,
}

impl EventBroadcaster {
    /// Creates a broadcaster over the given bus.
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            counters: RwLock::new(Counters {
                broadcast_count: 0,
                last_broadcast_at: None,
                per_topic: HashMap::new(),
            }),
        }
    }

    /// Hands out a receiver for all topics.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Notice> {
        self.bus.subscribe()
    }

    /// Full dashboard payload replaced.
    pub async fn broadcast_dashboard_update(&self, payload: Payload) {
        self.send(Topic::DashboardUpdated, "dashboard_updated", payload)
            .await;
    }

    /// Individual sale notification.
    pub async fn broadcast_new_sale(&self, data: Value) {
        self.send(Topic::SalesFeed, "new_sale", data).await;
    }

    /// Detected achievement celebration.
    pub async fn broadcast_celebration(&self, celebration: Value) {
        self.send(Topic::Celebrations, "new_celebration", celebration)
            .await;
    }

    /// Pipeline status transition.
    pub async fn broadcast_system_status(&self, status: Status, message: &str) {
        self.send(
            Topic::SystemStatus,
            "status_update",
            json!({ "status": status.as_label(), "message": message }),
        )
        .await;
    }

    /// Newly appeared return records.
    pub async fn broadcast_new_returns(&self, summary: Value) {
        self.send(Topic::ReturnsNew, "new_returns", summary).await;
    }

    /// Per-entity refresh on the templated `supervisor:<id>` topic.
    pub async fn broadcast_supervisor_update(&self, id: &str, data: Payload) {
        self.send(Topic::Supervisor(id.to_string()), "supervisor_updated", data)
            .await;
    }

    /// Devolution value strictly increased between cycles.
    pub async fn broadcast_devolution_increase(&self, previous: f64, current: f64) {
        self.send(
            Topic::Devolution,
            "devolucao_aumentou",
            json!({ "anterior": previous, "atual": current }),
        )
        .await;
    }

    /// Real goal-achievement notification.
    pub async fn broadcast_goal_achieved(&self, celebration: Value) {
        self.send(Topic::Goals, "goal_achieved_real", celebration)
            .await;
    }

    /// Returns a counter snapshot.
    pub async fn get_stats(&self) -> BroadcastStats {
        let counters = self.counters.read().await;
        BroadcastStats {
            broadcast_count: counters.broadcast_count,
            last_broadcast_at: counters.last_broadcast_at,
            per_topic: counters.per_topic.clone(),
        }
    }

    async fn send(&self, topic: Topic, kind: &'static str, payload: Value) {
        let rendered = topic.render();
        let notice = Notice::now(topic, kind).with_payload(payload);

        match self.bus.publish(notice) {
            Ok(_receivers) => {
                let mut counters = self.counters.write().await;
                counters.broadcast_count += 1;
                counters.last_broadcast_at = Some(Utc::now());
                *counters.per_topic.entry(rendered).or_insert(0) += 1;
            }
            Err(_dropped) => {
                debug!(topic = %rendered, kind, "notice dropped, no receivers attached");
            }
        }
    }
}

#[async_trait]
impl Child for EventBroadcaster {
    fn name(&self) -> &str {
        "broadcaster"
    }

    /// Fan-out is delegated to the bus; nothing to loop over. Parks until
    /// shutdown so the broadcaster holds its slot in the restart ordering.
    async fn run(&self, token: CancellationToken) -> Result<(), ChildError> {
        token.cancelled().await;
        Ok(())
    }
}
