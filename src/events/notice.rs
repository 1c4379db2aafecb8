//! # Notices published on the pub/sub bus.
//!
//! A [`Notice`] is one message on one [`Topic`]: a message tag (`kind`), an
//! opaque JSON payload, a wall-clock timestamp, and a globally monotonic
//! sequence number.
//!
//! ## Ordering guarantees
//! Each notice has a globally unique sequence number (`seq`) that increases
//! monotonically across all topics. The bus itself guarantees no ordering
//! across topics; use `seq` to restore order where it matters.
//!
//! ## Example
//! ```rust
//! use dashvisor::{Notice, Topic};
//! use serde_json::json;
//!
//! let n = Notice::now(Topic::SystemStatus, "status_update")
//!     .with_payload(json!({"status": "ok"}));
//!
//! assert_eq!(n.kind, "status_update");
//! assert_eq!(n.topic, Topic::SystemStatus);
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::topic::Topic;

/// Global sequence counter for notice ordering.
static NOTICE_SEQ: AtomicU64 = AtomicU64::new(0);

/// One message published on the bus.
#[derive(Clone, Debug)]
pub struct Notice {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: DateTime<Utc>,
    /// Topic the message belongs to.
    pub topic: Topic,
    /// Message tag, e.g. `"dashboard_updated"` or `"new_returns"`.
    pub kind: &'static str,
    /// Opaque JSON payload.
    pub payload: Value,
}

impl Notice {
    /// Creates a notice with the current timestamp and next sequence number.
    pub fn now(topic: Topic, kind: &'static str) -> Self {
        Self {
            seq: NOTICE_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: Utc::now(),
            topic,
            kind,
            payload: Value::Null,
        }
    }

    /// Attaches a JSON payload.
    #[inline]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}
