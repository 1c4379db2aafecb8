//! # Termination signal listener.
//!
//! [`wait_for_shutdown_signal`] resolves with the [`ShutdownSignal`] that
//! asked the runtime to stop, so the facade can log which one it was before
//! cancelling the tree.
//!
//! On Unix the listener covers `SIGINT`, `SIGTERM` (systemd/Kubernetes stop),
//! and `SIGQUIT`, with [`tokio::signal::ctrl_c`] as a fallback. On other
//! platforms only Ctrl-C is available.

use std::fmt;

/// Which termination signal stopped the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// `SIGINT` (Ctrl-C in a terminal).
    Interrupt,
    /// `SIGTERM` (default kill signal).
    Terminate,
    /// `SIGQUIT`.
    Quit,
    /// Ctrl-C via the portable [`tokio::signal::ctrl_c`] listener.
    CtrlC,
}

impl ShutdownSignal {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "sigint",
            ShutdownSignal::Terminate => "sigterm",
            ShutdownSignal::Quit => "sigquit",
            ShutdownSignal::CtrlC => "ctrl_c",
        }
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Waits for a termination signal and reports which one arrived.
///
/// Each call creates independent listeners. Returns `Err` if listener
/// registration fails; the caller decides whether to keep running without
/// signal handling.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let received = tokio::select! {
        _ = tokio::signal::ctrl_c() => ShutdownSignal::CtrlC,
        _ = sigint.recv()  => ShutdownSignal::Interrupt,
        _ = sigterm.recv() => ShutdownSignal::Terminate,
        _ = sigquit.recv() => ShutdownSignal::Quit,
    };
    Ok(received)
}

/// Waits for a termination signal and reports which one arrived.
///
/// Each call creates independent listeners. Returns `Err` if listener
/// registration fails; the caller decides whether to keep running without
/// signal handling.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(ShutdownSignal::CtrlC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(ShutdownSignal::Interrupt.as_label(), "sigint");
        assert_eq!(ShutdownSignal::Terminate.as_label(), "sigterm");
        assert_eq!(ShutdownSignal::Quit.as_label(), "sigquit");
        assert_eq!(ShutdownSignal::CtrlC.as_label(), "ctrl_c");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "sigterm");
    }
}
