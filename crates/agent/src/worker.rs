//! Fixed-size shipping pool.
//!
//! Workers pull prepared payloads from a bounded job channel and
//! report per-job outcomes on a result channel of the same capacity.
//! Each job runs under its own timeout, scoped to the iteration, and
//! every blocking point selects against shutdown so no task outlives
//! cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use pulse_core::shutdown::Shutdown;
use pulse_core::PulseError;

use crate::encode::Payload;
use crate::transport::Transport;

pub const WORKER_COUNT: usize = 3;

/// A prepared payload queued for shipment.
#[derive(Debug, Clone)]
pub struct Job {
    pub payload: Payload,
}

pub type JobOutcome = Result<(), PulseError>;

pub fn spawn_workers(
    count: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    results: mpsc::Sender<JobOutcome>,
    transport: Arc<Transport>,
    job_timeout: Duration,
    shutdown: Shutdown,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|worker_id| {
            let jobs = jobs.clone();
            let results = results.clone();
            let transport = transport.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                run_worker(worker_id, jobs, results, transport, job_timeout, shutdown).await;
            })
        })
        .collect()
}

async fn run_worker(
    worker_id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    results: mpsc::Sender<JobOutcome>,
    transport: Arc<Transport>,
    job_timeout: Duration,
    shutdown: Shutdown,
) {
    loop {
        let maybe_job = {
            let mut rx = jobs.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = maybe_job else { break };

        let outcome = match tokio::time::timeout(job_timeout, transport.send(&job.payload)).await {
            Ok(result) => result,
            Err(_) => Err(PulseError::Transport(format!(
                "shipment timed out after {:?}",
                job_timeout
            ))),
        };
        if let Err(e) = &outcome {
            warn!(worker = worker_id, "shipment failed: {}", e);
        }
        if results.send(outcome).await.is_err() {
            break;
        }
    }
    debug!(worker = worker_id, "worker stopped");
}
