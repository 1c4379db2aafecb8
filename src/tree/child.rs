//! # Supervised child abstraction.
//!
//! A [`Child`] is an async, cancelable unit owned by the
//! [`SupervisionTree`](super::SupervisionTree): it has a stable name and a
//! `run` method that receives a [`CancellationToken`]. Components with
//! periodic work loop inside `run`; components that only serve calls park
//! until cancellation so they still hold a slot in the restart ordering.
//!
//! `run` must be re-runnable: the tree calls it again after every restart,
//! so per-run state belongs inside the method, not the struct.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//! use dashvisor::{Child, ChildError};
//!
//! struct Heartbeat;
//!
//! #[async_trait]
//! impl Child for Heartbeat {
//!     fn name(&self) -> &str { "heartbeat" }
//!
//!     async fn run(&self, token: CancellationToken) -> Result<(), ChildError> {
//!         token.cancelled().await;
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ChildError;

/// Shared handle to a supervised child.
pub type ChildRef = Arc<dyn Child>;

/// Asynchronous, cancelable, restartable unit of the supervision tree.
#[async_trait]
pub trait Child: Send + Sync + 'static {
    /// Returns a stable, human-readable child name.
    fn name(&self) -> &str;

    /// Executes the child until cancellation or failure.
    ///
    /// Returning `Ok(())` after the token is cancelled is a graceful exit;
    /// returning `Err` (or panicking) counts as a crash and triggers a
    /// rest-for-one restart.
    async fn run(&self, token: CancellationToken) -> Result<(), ChildError>;
}

/// Name + handle pair, in tree start order.
#[derive(Clone)]
pub struct ChildSpec {
    name: String,
    child: ChildRef,
}

impl ChildSpec {
    /// Creates a spec for the given child, using the child's own name.
    pub fn new(child: ChildRef) -> Self {
        Self {
            name: child.name().to_string(),
            child,
        }
    }

    /// Returns the child's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the child handle.
    pub fn child(&self) -> &ChildRef {
        &self.child
    }
}
