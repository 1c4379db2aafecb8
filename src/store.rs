//! # Authoritative last-known-good state holder.
//!
//! [`DataStore`] owns the single [`DashboardState`] instance and mutates it
//! only through [`update_data`](DataStore::update_data) and
//! [`update_status`](DataStore::update_status).
//!
//! ## Status machine
//! ```text
//! Initializing ──► Loading ──► Ok
//!                     │         ▲
//!                     └──► Error│
//!       Ok/Error ──► Loading ──►┴── (each refresh cycle)
//! ```
//! No terminal state; the store lives as long as the process.
//!
//! ## Rules
//! - Staleness is preferred over unavailability: once any payload was ever
//!   stored, reads return the last good payload even while the status is
//!   `Loading` or `Error`.
//! - `update_data` always sets `Ok`, clears the stored error, and stamps
//!   `last_update`.
//! - `update_status(Error, reason)` keeps previously stored data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{ChildError, StoreError};
use crate::fetcher::Payload;
use crate::tree::Child;

/// Pipeline status of the dashboard data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Process started, no cycle has run yet.
    Initializing,
    /// A refresh cycle is in flight.
    Loading,
    /// Last cycle stored a valid payload.
    Ok,
    /// Last cycle failed; see the stored reason.
    Error,
}

impl Status {
    /// Stable snake_case name for logs and status broadcasts.
    pub fn as_label(&self) -> &'static str {
        match self {
            Status::Initializing => "initializing",
            Status::Loading => "loading",
            Status::Ok => "ok",
            Status::Error => "error",
        }
    }
}

/// The single authoritative dashboard state.
#[derive(Clone, Debug)]
struct DashboardState {
    data: Option<Payload>,
    last_update: Option<DateTime<Utc>>,
    status: Status,
    error: Option<String>,
}

/// Outcome of a successful [`DataStore::get_data`] call.
#[derive(Clone, Debug, PartialEq)]
pub enum DataAnswer {
    /// The last good payload (possibly stale).
    Ready(Payload),
    /// No payload was ever stored and a cycle is (or will be) in flight.
    Loading,
}

/// Snapshot returned by [`DataStore::get_status`].
#[derive(Clone, Debug)]
pub struct StatusReport {
    /// Current pipeline status.
    pub status: Status,
    /// Timestamp of the last successful `update_data`.
    pub last_update: Option<DateTime<Utc>>,
    /// Whether any payload was ever stored.
    pub has_data: bool,
    /// Last recorded failure reason, if the status is `Error`.
    pub error: Option<String>,
}

/// Holder of the last-known-good dashboard payload.
pub struct DataStore {
    state: RwLock<DashboardState>,
}

impl DataStore {
    /// Creates a store in the `Initializing` status with no data.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(DashboardState {
                data: None,
                last_update: None,
                status: Status::Initializing,
                error: None,
            }),
        }
    }

    /// Reads the current payload, bounded by `timeout`.
    ///
    /// - Returns [`DataAnswer::Loading`] only while the status is
    ///   `Initializing`/`Loading` **and** no payload was ever stored.
    /// - Once any payload exists it is returned as `Ready` regardless of a
    ///   later `Loading`/`Error` status.
    /// - With no payload and an `Error` status, the stored reason surfaces
    ///   as [`StoreError::Unavailable`].
    pub async fn get_data(&self, timeout: Duration) -> Result<DataAnswer, StoreError> {
        let state = tokio::time::timeout(timeout, self.state.read())
            .await
            .map_err(|_| StoreError::Timeout { timeout })?;

        if let Some(data) = &state.data {
            return Ok(DataAnswer::Ready(data.clone()));
        }
        match state.status {
            Status::Initializing | Status::Loading => Ok(DataAnswer::Loading),
            Status::Error | Status::Ok => Err(StoreError::Unavailable {
                reason: state
                    .error
                    .clone()
                    .unwrap_or_else(|| "no data stored".to_string()),
            }),
        }
    }

    /// Stores a new payload: sets `Ok`, clears the error, stamps
    /// `last_update`.
    pub async fn update_data(&self, payload: Payload) {
        let mut state = self.state.write().await;
        state.data = Some(payload);
        state.status = Status::Ok;
        state.error = None;
        state.last_update = Some(Utc::now());
    }

    /// Updates the status; an `Error` status records the reason but never
    /// clears previously stored data.
    pub async fn update_status(&self, status: Status, error: Option<String>) {
        let mut state = self.state.write().await;
        state.status = status;
        if status == Status::Error {
            state.error = error;
        }
    }

    /// Returns a status snapshot.
    pub async fn get_status(&self) -> StatusReport {
        let state = self.state.read().await;
        StatusReport {
            status: state.status,
            last_update: state.last_update,
            has_data: state.data.is_some(),
            error: state.error.clone(),
        }
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Child for DataStore {
    fn name(&self) -> &str {
        "store"
    }

    /// The store has no periodic work; it parks until shutdown so it holds
    /// the first slot in the restart ordering.
    async fn run(&self, token: CancellationToken) -> Result<(), ChildError> {
        token.cancelled().await;
        Ok(())
    }
}
