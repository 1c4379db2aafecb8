//! # Pub/sub bus for dashboard notices.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking publishing from many writers (orchestrator, monitors,
//! celebration detector) to many readers (UI feeds, loggers, tests).
//!
//! ```text
//! Publishers (many):                    Subscribers (many):
//!   Orchestrator  ──┐                  ┌──► UI feed
//!   ReturnsMonitor ─┼────► Bus ────────┼──► logger
//!   Celebrations  ──┘  (broadcast)     └──► tests
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks or awaits.
//! - **Best-effort, at-most-once**: no persistence; a notice published while
//!   no receiver is attached is dropped.
//! - **Lag handling**: a slow receiver observes `RecvError::Lagged(n)` and
//!   skips the `n` oldest notices; subscribers re-derive state from the
//!   store/cache on demand, so losing notices is tolerated.
//! - **No cross-topic ordering**: all topics share one channel; use
//!   [`Notice::seq`](super::Notice) where ordering matters.

use tokio::sync::broadcast;

use super::notice::Notice;

/// Broadcast channel for dashboard notices.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Notice>,
}

impl Bus {
    /// Creates a new bus with the given ring-buffer capacity (clamped ≥ 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Notice>(capacity);
        Self { tx }
    }

    /// Publishes a notice to all active subscribers.
    ///
    /// Returns the number of receivers the notice was delivered to, or an
    /// error when no receiver is currently attached (the notice is dropped).
    pub fn publish(&self, notice: Notice) -> Result<usize, Notice> {
        self.tx.send(notice).map_err(|e| e.0)
    }

    /// Creates a new receiver that observes subsequent notices only.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// Number of currently attached receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Topic;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(Notice::now(Topic::SystemStatus, "status_update"))
            .expect("one receiver attached");
        let got = rx.recv().await.expect("notice delivered");
        assert_eq!(got.kind, "status_update");
    }

    #[tokio::test]
    async fn publish_without_receivers_is_dropped() {
        let bus = Bus::new(8);
        assert!(bus
            .publish(Notice::now(Topic::SystemStatus, "status_update"))
            .is_err());
    }
}
