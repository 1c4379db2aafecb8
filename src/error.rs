//! Error types used by the dashvisor runtime and its components.
//!
//! This module defines the error taxonomy of the core:
//!
//! - [`FetchError`] — transport, protocol, and validation failures against
//!   the external API.
//! - [`CacheError`] — cache read outcomes that are control-flow signals,
//!   not faults (`NotFound`, `Expired`).
//! - [`StoreError`] — bounded reads against [`DataStore`](crate::DataStore)
//!   that could not produce an answer in time.
//! - [`RuntimeError`] — errors raised by the supervision runtime itself.
//! - [`ChildError`] — terminal failure of a supervised child, reported to
//!   the tree for restart accounting.
//!
//! All types provide `as_label()` for stable snake_case identifiers in
//! logs/metrics.

use std::time::Duration;
use thiserror::Error;

/// Failures while talking to the external dashboard API.
///
/// Transport and protocol errors are recovered locally by the calling
/// cycle (logged, reflected in store status, retried on the next tick);
/// they never crash a component.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FetchError {
    /// Connection-level failure or request timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// The API answered with a non-2xx status.
    #[error("unexpected status {status} from {endpoint}")]
    Status {
        /// HTTP status code returned.
        status: u16,
        /// Endpoint path that was called.
        endpoint: String,
    },

    /// The response body could not be decoded as JSON.
    #[error("undecodable body from {endpoint}: {reason}")]
    Decode {
        /// Endpoint path that was called.
        endpoint: String,
        /// Decoder message.
        reason: String,
    },

    /// The payload decoded but is structurally invalid (missing required key).
    #[error("invalid payload: {0}")]
    Validation(String),
}

impl FetchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "fetch_transport",
            FetchError::Status { .. } => "fetch_status",
            FetchError::Decode { .. } => "fetch_decode",
            FetchError::Validation(_) => "fetch_validation",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(err.to_string())
    }
}

/// Cache read outcomes.
///
/// Neither variant is a fault: a miss or an expired entry simply sends the
/// caller down the cache-aside path to the source of truth.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CacheError {
    /// No entry exists for the key.
    #[error("key not found")]
    NotFound,

    /// An entry existed but its TTL had passed; it has been evicted.
    #[error("entry expired")]
    Expired,
}

impl CacheError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CacheError::NotFound => "cache_not_found",
            CacheError::Expired => "cache_expired",
        }
    }
}

/// Errors surfaced by bounded [`DataStore`](crate::DataStore) reads.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// The read did not complete within the caller's timeout.
    #[error("store read timed out after {timeout:?}")]
    Timeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// No data was ever stored and the store is in the Error status.
    #[error("no data available: {reason}")]
    Unavailable {
        /// Last recorded failure reason.
        reason: String,
    },
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Timeout { .. } => "store_timeout",
            StoreError::Unavailable { .. } => "store_unavailable",
        }
    }
}

/// Terminal failure of a supervised child.
///
/// A child returning this (or panicking) counts against the tree's bounded
/// restart window and triggers a rest-for-one restart.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ChildError {
    /// The child's run loop failed with an unrecoverable error.
    #[error("child failed: {0}")]
    Failed(String),

    /// The child panicked; the panic was caught by the tree.
    #[error("child panicked: {0}")]
    Panicked(String),
}

impl ChildError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ChildError::Failed(_) => "child_failed",
            ChildError::Panicked(_) => "child_panicked",
        }
    }
}

/// Errors produced by the supervision runtime itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A child crashed more than `max_restarts` times within the sliding
    /// window; the whole subsystem is stopped instead of churning.
    #[error("restart budget exhausted: {restarts} restarts within {window:?} (last: {child})")]
    RestartBudgetExceeded {
        /// Number of restarts observed inside the window.
        restarts: usize,
        /// The sliding window duration.
        window: Duration,
        /// Name of the child whose crash tripped the budget.
        child: String,
    },

    /// Shutdown grace period was exceeded; some children remained stuck.
    #[error("shutdown grace {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of children that did not stop in time.
        stuck: Vec<String>,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::RestartBudgetExceeded { .. } => "runtime_restart_budget",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
        }
    }
}
