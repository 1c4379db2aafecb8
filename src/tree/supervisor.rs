//! # Supervision tree with rest-for-one restarts.
//!
//! [`SupervisionTree`] starts its children in a fixed dependency order and
//! keeps them running:
//!
//! ```text
//! start order:  store → cache → broadcaster → fetcher → celebrations
//!               → orchestrator → supervisor_monitor → returns_monitor
//!
//! child i crashes (Err or panic)
//!   ├─► cancel + join children i..N      (later children depend on i)
//!   ├─► respawn children i..N in order   (earlier children untouched)
//!   └─► record crash in sliding window
//!         └─ window exceeded → cancel everything, fatal error
//! ```
//!
//! ## Rules
//! - **Rest-for-one**: a crashed child and every child started after it are
//!   restarted together; children started before it keep their state.
//! - **Bounded restarts**: more than `max_restarts` crashes within
//!   `restart_window` stop the whole tree with
//!   [`RuntimeError::RestartBudgetExceeded`]; crash loops are fatal instead
//!   of being churned through.
//! - **Graceful exits don't restart**: a child returning `Ok(())` outside
//!   shutdown is left stopped (our children only do that when cancelled).
//! - **Panic isolation**: child panics are caught (`catch_unwind`) and
//!   handled like any other crash.
//! - Each respawn bumps the child's epoch; exit messages from a previous
//!   incarnation are ignored as stale.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::child::ChildSpec;
use crate::error::{ChildError, RuntimeError};

/// Introspection snapshot for one child.
#[derive(Clone, Debug)]
pub struct ChildStatus {
    /// Child name.
    pub name: String,
    /// Whether an incarnation is currently running.
    pub running: bool,
    /// Times this child has been (re)spawned beyond the initial start.
    pub restarts: u64,
    /// Message of the last abnormal exit, if any.
    pub last_exit: Option<String>,
}

struct ChildCell {
    name: String,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
    epoch: u64,
    running: bool,
    restarts: u64,
    last_exit: Option<String>,
}

struct ChildExit {
    index: usize,
    epoch: u64,
    error: Option<ChildError>,
}

enum Control {
    Restart(String),
}

/// Ordered supervisor applying the rest-for-one restart strategy.
pub struct SupervisionTree {
    specs: Vec<ChildSpec>,
    cells: RwLock<Vec<ChildCell>>,
    exit_tx: mpsc::UnboundedSender<ChildExit>,
    exit_rx: Mutex<Option<mpsc::UnboundedReceiver<ChildExit>>>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<Control>>>,
    runtime_token: CancellationToken,
    max_restarts: usize,
    restart_window: Duration,
    grace: Duration,
}

impl SupervisionTree {
    /// Creates a tree over the given specs (start order = vec order).
    pub fn new(
        specs: Vec<ChildSpec>,
        runtime_token: CancellationToken,
        max_restarts: usize,
        restart_window: Duration,
        grace: Duration,
    ) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let cells = specs
            .iter()
            .map(|spec| ChildCell {
                name: spec.name().to_string(),
                cancel: runtime_token.child_token(),
                join: None,
                epoch: 0,
                running: false,
                restarts: 0,
                last_exit: None,
            })
            .collect();
        Self {
            specs,
            cells: RwLock::new(cells),
            exit_tx,
            exit_rx: Mutex::new(Some(exit_rx)),
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
            runtime_token,
            max_restarts,
            restart_window,
            grace,
        }
    }

    /// Child names in start order.
    pub async fn which_children(&self) -> Vec<String> {
        self.cells.read().await.iter().map(|c| c.name.clone()).collect()
    }

    /// Number of supervised children.
    pub fn count_children(&self) -> usize {
        self.specs.len()
    }

    /// Introspection snapshot for one child.
    pub async fn get_child_status(&self, name: &str) -> Option<ChildStatus> {
        self.cells.read().await.iter().find(|c| c.name == name).map(|c| ChildStatus {
            name: c.name.clone(),
            running: c.running,
            restarts: c.restarts,
            last_exit: c.last_exit.clone(),
        })
    }

    /// Healthy/unhealthy flag per child.
    pub async fn health_check(&self) -> HashMap<String, bool> {
        self.cells
            .read()
            .await
            .iter()
            .map(|c| (c.name.clone(), c.running))
            .collect()
    }

    /// Requests a manual rest-for-one restart of `name` (and everything
    /// started after it). Returns false for an unknown child. Manual
    /// restarts do not count against the crash budget.
    pub async fn restart_child(&self, name: &str) -> bool {
        let known = self.cells.read().await.iter().any(|c| c.name == name);
        if known {
            let _ = self.control_tx.send(Control::Restart(name.to_string()));
        }
        known
    }

    /// Runs the tree until shutdown (runtime token cancelled), until every
    /// child has stopped on its own, or until the restart budget trips.
    pub async fn run(&self) -> Result<(), RuntimeError> {
        // The receivers are taken exactly once; a second run is a no-op.
        let Some(mut exit_rx) = self.exit_rx.lock().await.take() else {
            warn!("supervision tree is already running");
            return Ok(());
        };
        let Some(mut control_rx) = self.control_rx.lock().await.take() else {
            warn!("supervision tree is already running");
            return Ok(());
        };

        for index in 0..self.specs.len() {
            self.spawn_child(index).await;
        }
        info!(children = self.specs.len(), "supervision tree started");

        let mut crash_log: VecDeque<Instant> = VecDeque::new();

        loop {
            tokio::select! {
                _ = self.runtime_token.cancelled() => {
                    return self.shutdown_all().await;
                }
                Some(control) = control_rx.recv() => {
                    let Control::Restart(name) = control;
                    if let Some(index) = self.index_of(&name).await {
                        info!(child = %name, "manual restart requested");
                        self.rest_for_one(index).await;
                    }
                }
                Some(exit) = exit_rx.recv() => {
                    if let Some(fatal) = self.handle_exit(exit, &mut crash_log).await {
                        return Err(fatal);
                    }
                    if self.all_stopped().await {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn index_of(&self, name: &str) -> Option<usize> {
        self.cells.read().await.iter().position(|c| c.name == name)
    }

    async fn all_stopped(&self) -> bool {
        self.cells.read().await.iter().all(|c| !c.running)
    }

    /// Applies one exit message. Returns `Some(err)` when the restart
    /// budget tripped (the tree is already cancelled at that point).
    async fn handle_exit(
        &self,
        exit: ChildExit,
        crash_log: &mut VecDeque<Instant>,
    ) -> Option<RuntimeError> {
        let name = {
            let mut cells = self.cells.write().await;
            let cell = &mut cells[exit.index];
            if exit.epoch != cell.epoch {
                return None; // stale incarnation
            }
            cell.running = false;
            cell.last_exit = exit.error.as_ref().map(|e| e.to_string());
            cell.name.clone()
        };

        let Some(err) = exit.error else {
            // Graceful exit: during shutdown the token branch handles
            // cleanup; outside shutdown the child is simply left stopped.
            return None;
        };

        warn!(child = %name, error = %err, label = err.as_label(), "child crashed");

        let now = Instant::now();
        crash_log.push_back(now);
        while let Some(front) = crash_log.front() {
            if now.duration_since(*front) > self.restart_window {
                crash_log.pop_front();
            } else {
                break;
            }
        }
        if crash_log.len() > self.max_restarts {
            error!(
                restarts = crash_log.len(),
                window = ?self.restart_window,
                child = %name,
                "restart budget exhausted, stopping subsystem"
            );
            self.runtime_token.cancel();
            let _ = self.shutdown_all().await;
            return Some(RuntimeError::RestartBudgetExceeded {
                restarts: crash_log.len(),
                window: self.restart_window,
                child: name,
            });
        }

        self.rest_for_one(exit.index).await;
        None
    }

    /// Cancels, joins, and respawns children `index..N` in start order.
    /// Children before `index` are untouched.
    async fn rest_for_one(&self, index: usize) {
        let handles: Vec<(usize, Option<JoinHandle<()>>)> = {
            let mut cells = self.cells.write().await;
            (index..cells.len())
                .map(|i| {
                    let cell = &mut cells[i];
                    cell.cancel.cancel();
                    // Bump the epoch first so the cancelled incarnation's
                    // exit message is discarded as stale.
                    cell.epoch += 1;
                    (i, cell.join.take())
                })
                .collect()
        };

        for (i, join) in handles {
            if let Some(join) = join {
                let _ = join.await;
            }
            self.respawn(i).await;
        }
    }

    /// Respawns child `i` with a fresh token, bumping its restart counter.
    async fn respawn(&self, index: usize) {
        {
            let mut cells = self.cells.write().await;
            cells[index].restarts += 1;
        }
        self.spawn_child(index).await;
        let name = self.specs[index].name();
        info!(child = %name, "child restarted");
    }

    async fn spawn_child(&self, index: usize) {
        let child = self.specs[index].child().clone();
        let token = self.runtime_token.child_token();
        let exit_tx = self.exit_tx.clone();

        let epoch = {
            let mut cells = self.cells.write().await;
            let cell = &mut cells[index];
            cell.cancel = token.clone();
            cell.running = true;
            cell.epoch
        };

        let run_token = token.clone();
        let handle = tokio::spawn(async move {
            let outcome = std::panic::AssertUnwindSafe(child.run(run_token))
                .catch_unwind()
                .await;
            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e),
                Err(panic) => Some(ChildError::Panicked(panic_message(&panic))),
            };
            let _ = exit_tx.send(ChildExit { index, epoch, error });
        });

        self.cells.write().await[index].join = Some(handle);
    }

    /// Cancels every child and waits up to the grace period for them to
    /// stop. Child tokens derive from the runtime token, so cancelling the
    /// parent reaches everyone.
    async fn shutdown_all(&self) -> Result<(), RuntimeError> {
        self.runtime_token.cancel();

        let handles: Vec<(String, Option<JoinHandle<()>>)> = {
            let mut cells = self.cells.write().await;
            cells
                .iter_mut()
                .map(|cell| {
                    cell.running = false;
                    (cell.name.clone(), cell.join.take())
                })
                .collect()
        };

        // One deadline shared by all joins; a handle that already finished
        // still joins past the deadline, so `stuck` names only the children
        // that truly did not stop in time.
        let deadline = tokio::time::Instant::now() + self.grace;
        let mut stuck = Vec::new();
        for (name, join) in handles {
            let Some(join) = join else { continue };
            if tokio::time::timeout_at(deadline, join).await.is_err() {
                stuck.push(name);
            }
        }

        if stuck.is_empty() {
            info!("all children stopped within grace");
            Ok(())
        } else {
            Err(RuntimeError::GraceExceeded {
                grace: self.grace,
                stuck,
            })
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Child, ChildRef};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// Child that counts its starts and optionally fails its first N runs.
    struct Probe {
        name: &'static str,
        starts: AtomicU64,
        fail_first: u64,
    }

    impl Probe {
        fn arc(name: &'static str, fail_first: u64) -> Arc<Self> {
            Arc::new(Self {
                name,
                starts: AtomicU64::new(0),
                fail_first,
            })
        }
    }

    #[async_trait]
    impl Child for Probe {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, token: CancellationToken) -> Result<(), ChildError> {
            let start = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
            if start <= self.fail_first {
                return Err(ChildError::Failed(format!("{} boom {start}", self.name)));
            }
            token.cancelled().await;
            Ok(())
        }
    }

    fn tree_over(children: Vec<ChildRef>, max_restarts: usize) -> (Arc<SupervisionTree>, CancellationToken) {
        let token = CancellationToken::new();
        let specs = children.into_iter().map(ChildSpec::new).collect();
        let tree = Arc::new(SupervisionTree::new(
            specs,
            token.clone(),
            max_restarts,
            Duration::from_secs(60),
            Duration::from_secs(5),
        ));
        (tree, token)
    }

    #[tokio::test]
    async fn rest_for_one_restarts_crashed_child_and_later_siblings() {
        let early = Probe::arc("early", 0);
        let flaky = Probe::arc("flaky", 1);
        let late = Probe::arc("late", 0);

        let (tree, token) = tree_over(
            vec![
                early.clone() as ChildRef,
                flaky.clone() as ChildRef,
                late.clone() as ChildRef,
            ],
            3,
        );

        let runner = {
            let tree = tree.clone();
            tokio::spawn(async move { tree.run().await })
        };

        // Wait until the flaky child's second incarnation is up.
        for _ in 0..100 {
            if flaky.starts.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(early.starts.load(Ordering::SeqCst), 1, "earlier child untouched");
        assert_eq!(flaky.starts.load(Ordering::SeqCst), 2, "crashed child restarted");
        assert_eq!(late.starts.load(Ordering::SeqCst), 2, "later child restarted too");

        let health = tree.health_check().await;
        assert_eq!(health.get("early"), Some(&true));
        assert_eq!(health.get("flaky"), Some(&true));

        token.cancel();
        assert!(runner.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn restart_budget_exhaustion_is_fatal() {
        // Fails forever: every respawn crashes again immediately.
        let hopeless = Probe::arc("hopeless", u64::MAX);
        let (tree, _token) = tree_over(vec![hopeless as ChildRef], 3);

        let result = tree.run().await;
        match result {
            Err(RuntimeError::RestartBudgetExceeded { restarts, child, .. }) => {
                assert!(restarts > 3);
                assert_eq!(child, "hopeless");
            }
            other => panic!("expected budget exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn manual_restart_child_applies_rest_for_one() {
        let a = Probe::arc("a", 0);
        let b = Probe::arc("b", 0);
        let c = Probe::arc("c", 0);
        let (tree, token) = tree_over(
            vec![a.clone() as ChildRef, b.clone() as ChildRef, c.clone() as ChildRef],
            3,
        );

        let runner = {
            let tree = tree.clone();
            tokio::spawn(async move { tree.run().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(tree.restart_child("b").await);
        for _ in 0..100 {
            if c.starts.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(a.starts.load(Ordering::SeqCst), 1);
        assert_eq!(b.starts.load(Ordering::SeqCst), 2);
        assert_eq!(c.starts.load(Ordering::SeqCst), 2);

        assert!(!tree.restart_child("unknown").await);

        token.cancel();
        assert!(runner.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn panicking_child_is_treated_as_a_crash() {
        struct Bomb {
            starts: AtomicU64,
        }

        #[async_trait]
        impl Child for Bomb {
            fn name(&self) -> &str {
                "bomb"
            }
            async fn run(&self, token: CancellationToken) -> Result<(), ChildError> {
                if self.starts.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("kaboom");
                }
                token.cancelled().await;
                Ok(())
            }
        }

        let bomb = Arc::new(Bomb {
            starts: AtomicU64::new(0),
        });
        let (tree, token) = tree_over(vec![bomb.clone() as ChildRef], 3);

        let runner = {
            let tree = tree.clone();
            tokio::spawn(async move { tree.run().await })
        };
        for _ in 0..100 {
            if bomb.starts.load(Ordering::SeqCst) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let status = tree.get_child_status("bomb").await.unwrap();
        assert_eq!(status.restarts, 1);
        assert!(status.last_exit.unwrap().contains("kaboom"));

        token.cancel();
        assert!(runner.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn grace_timeout_reports_only_children_that_did_not_stop() {
        // Ignores its token entirely; never stops.
        struct Stubborn;

        #[async_trait]
        impl Child for Stubborn {
            fn name(&self) -> &str {
                "stubborn"
            }
            async fn run(&self, _token: CancellationToken) -> Result<(), ChildError> {
                loop {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
            }
        }

        let polite = Probe::arc("polite", 0);
        let token = CancellationToken::new();
        let specs = vec![
            ChildSpec::new(polite as ChildRef),
            ChildSpec::new(Arc::new(Stubborn) as ChildRef),
        ];
        let tree = Arc::new(SupervisionTree::new(
            specs,
            token.clone(),
            3,
            Duration::from_secs(60),
            Duration::from_millis(100),
        ));

        let runner = {
            let tree = tree.clone();
            tokio::spawn(async move { tree.run().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        match runner.await.unwrap() {
            Err(RuntimeError::GraceExceeded { stuck, .. }) => {
                assert_eq!(stuck, vec!["stubborn"]);
            }
            other => panic!("expected grace violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn which_children_preserves_start_order() {
        let (tree, _token) = tree_over(
            vec![
                Probe::arc("one", 0) as ChildRef,
                Probe::arc("two", 0) as ChildRef,
                Probe::arc("three", 0) as ChildRef,
            ],
            3,
        );
        assert_eq!(tree.which_children().await, vec!["one", "two", "three"]);
        assert_eq!(tree.count_children(), 3);
    }
}
