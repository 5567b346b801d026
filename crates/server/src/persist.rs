//! Periodic NDJSON dumps of the in-memory store.
//!
//! With a zero interval the store is dumped only at shutdown; either
//! way one final dump runs after cancellation so restarts pick up the
//! latest state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use pulse_core::shutdown::Shutdown;
use pulse_storage::memory::MemStorage;

pub async fn run_dump_loop(
    store: Arc<MemStorage>,
    path: PathBuf,
    interval_secs: u64,
    shutdown: Shutdown,
) {
    if interval_secs > 0 {
        let interval = Duration::from_secs(interval_secs);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    match store.save_to_file(&path).await {
                        Ok(()) => debug!("metrics dumped to {}", path.display()),
                        Err(e) => error!("dump to {} failed: {}", path.display(), e),
                    }
                }
            }
        }
    } else {
        shutdown.cancelled().await;
    }

    match store.save_to_file(&path).await {
        Ok(()) => info!("final dump written to {}", path.display()),
        Err(e) => error!("final dump to {} failed: {}", path.display(), e),
    }
}
