//! Cooperative shutdown shared by every long-running task.
//!
//! A single root signal is fanned out through cloned [`Shutdown`]
//! receivers; each blocking select in the agent and the server includes
//! a `cancelled()` arm. Cancelling also arms a detached watchdog that
//! force-exits the process if tasks fail to wind down in time.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

/// Receiver half; cheap to clone, one per task.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sender half, held by the signal listener (and tests).
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
    force_exit_after: Duration,
}

/// Create a shutdown pair. `force_exit_after` is how long the watchdog
/// waits after cancellation before terminating the process.
pub fn channel(force_exit_after: Duration) -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (
        ShutdownHandle {
            tx,
            force_exit_after,
        },
        Shutdown { rx },
    )
}

impl Shutdown {
    /// Resolve once shutdown has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means the handle was dropped, which also counts as shutdown.
        let _ = rx.wait_for(|stop| *stop).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

impl ShutdownHandle {
    /// Request shutdown and arm the force-exit watchdog.
    pub fn cancel(&self) {
        if self.tx.send(true).is_err() {
            return;
        }
        let after = self.force_exit_after;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            warn!("tasks did not stop within {:?}, forcing exit", after);
            std::process::exit(1);
        });
    }
}

/// Spawn the OS signal listener that cancels the root shutdown handle.
pub fn listen_for_signals(handle: ShutdownHandle) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        handle.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to register SIGTERM handler: {}", e);
            return;
        }
    };
    let mut int = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to register SIGINT handler: {}", e);
            return;
        }
    };
    let mut quit = match signal(SignalKind::quit()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to register SIGQUIT handler: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
        _ = quit.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
