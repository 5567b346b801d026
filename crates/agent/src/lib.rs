//! Telemetry agent: concurrent collection-and-shipping engine.
//!
//! Two periodic samplers feed a snapshot buffer; a single shipper
//! loop drains the buffer into encoded batches and hands them to a
//! fixed pool of shipping workers. Everything is wired to one root
//! shutdown signal.

pub mod encode;
pub mod sampler;
pub mod transport;
pub mod worker;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

use pulse_core::shutdown::Shutdown;
use pulse_core::{AgentConfig, Metric, PulseError};
use pulse_storage::retry::Retrier;

use crate::encode::Payload;
use crate::sampler::{OsReadings, OsSampler, RuntimeReadings, RuntimeSampler, RUNTIME_GAUGES};
use crate::transport::{GrpcSender, HttpSender, Transport};
use crate::worker::{Job, WORKER_COUNT};

/// Run the agent until shutdown. Fatal configuration problems abort
/// immediately; everything after startup is best-effort.
pub async fn run(cfg: AgentConfig, shutdown: Shutdown) -> Result<(), PulseError> {
    cfg.validate()?;
    cfg.log_summary();

    let real_ip = transport::local_outbound_ip(&cfg.server_addr)?;
    info!("outbound address towards {} is {}", cfg.server_addr, real_ip);

    let retrier = Retrier::new();
    let job_timeout = retrier.timeout();
    let transport = Arc::new(if cfg.grpc {
        Transport::Grpc(GrpcSender::new(&cfg, real_ip, retrier))
    } else {
        Transport::Http(HttpSender::new(&cfg, real_ip, retrier)?)
    });

    // Samplers.
    let poll_count = Arc::new(AtomicI64::new(0));
    let runtime_sampler = RuntimeSampler::new(poll_count.clone());
    let runtime_readings = runtime_sampler.readings();
    let os_sampler = OsSampler::new();
    let os_readings = os_sampler.readings();

    let poll_interval = Duration::from_secs(cfg.poll_interval);
    let (runtime_ready_tx, runtime_ready_rx) = oneshot::channel();
    let (os_ready_tx, os_ready_rx) = oneshot::channel();
    tokio::spawn(runtime_sampler.run(poll_interval, runtime_ready_tx, shutdown.clone()));
    tokio::spawn(os_sampler.run(poll_interval, os_ready_tx, shutdown.clone()));

    // Worker pool.
    let (job_tx, job_rx) = mpsc::channel::<Job>(cfg.rate_limit);
    let (result_tx, mut result_rx) = mpsc::channel(cfg.rate_limit);
    let workers = worker::spawn_workers(
        WORKER_COUNT,
        Arc::new(Mutex::new(job_rx)),
        result_tx,
        transport,
        job_timeout,
        shutdown.clone(),
    );

    let buffer: Arc<RwLock<Vec<Metric>>> = Arc::new(RwLock::new(Vec::new()));

    // First cycle must not race the samplers.
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = async {
            let _ = runtime_ready_rx.await;
            let _ = os_ready_rx.await;
        } => {
            info!("samplers ready, starting shipment loop");
            shipper_loop(&cfg, &shutdown, &buffer, &runtime_readings, &os_readings, &poll_count, &job_tx, &mut result_rx).await?;
        }
    }

    drop(job_tx);
    for worker in workers {
        let _ = worker.await;
    }
    info!("agent stopped");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn shipper_loop(
    cfg: &AgentConfig,
    shutdown: &Shutdown,
    buffer: &Arc<RwLock<Vec<Metric>>>,
    runtime_readings: &Arc<RwLock<RuntimeReadings>>,
    os_readings: &Arc<RwLock<OsReadings>>,
    poll_count: &AtomicI64,
    job_tx: &mpsc::Sender<Job>,
    result_rx: &mut mpsc::Receiver<worker::JobOutcome>,
) -> Result<(), PulseError> {
    let report_interval = Duration::from_secs(cfg.report_interval);
    loop {
        collect_snapshot(buffer, runtime_readings, os_readings, poll_count).await;

        let payload = if cfg.grpc {
            Payload::Proto(encode::encode_proto(buffer).await)
        } else {
            Payload::Json(encode::encode_json(buffer).await?)
        };
        // Cleared whether or not the shipment goes through.
        buffer.write().await.clear();

        tokio::select! {
            _ = shutdown.cancelled() => break,
            sent = job_tx.send(Job { payload }) => {
                if sent.is_err() {
                    break;
                }
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            outcome = result_rx.recv() => match outcome {
                Some(Ok(())) => {
                    poll_count.store(0, Ordering::SeqCst);
                    debug!("batch acknowledged");
                }
                Some(Err(e)) => {
                    // poll_count keeps counting so the next batch
                    // carries the missed cycles.
                    warn!("batch not delivered: {}", e);
                }
                None => break,
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(report_interval) => {}
        }
    }
    Ok(())
}

/// Append both sampler snapshots plus the agent's own counters to the
/// buffer. Lock order is buffer first, then sampler output.
async fn collect_snapshot(
    buffer: &RwLock<Vec<Metric>>,
    runtime_readings: &RwLock<RuntimeReadings>,
    os_readings: &RwLock<OsReadings>,
    poll_count: &AtomicI64,
) {
    let mut buf = buffer.write().await;

    {
        let runtime = runtime_readings.read().await;
        for (name, accessor) in RUNTIME_GAUGES.iter() {
            buf.push(Metric::gauge(*name, accessor(&runtime.stats)));
        }
        buf.push(Metric::gauge("random_value", runtime.random_value));
    }

    {
        let os = os_readings.read().await;
        buf.push(Metric::gauge("total_memory", os.total_memory));
        buf.push(Metric::gauge("free_memory", os.free_memory));
        for (core, usage) in os.cpu_utilization.iter().enumerate() {
            buf.push(Metric::gauge(format!("cpu_utilization{}", core + 1), *usage));
        }
    }

    buf.push(Metric::counter("poll_count", poll_count.load(Ordering::SeqCst)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::MetricValue;

    #[tokio::test]
    async fn test_collect_snapshot_shapes_the_batch() {
        let buffer = RwLock::new(Vec::new());
        let runtime = RwLock::new(RuntimeReadings::default());
        let os = RwLock::new(OsReadings {
            total_memory: 100.0,
            free_memory: 40.0,
            cpu_utilization: vec![10.0, 20.0],
        });
        let poll_count = AtomicI64::new(3);

        collect_snapshot(&buffer, &runtime, &os, &poll_count).await;

        let buf = buffer.read().await;
        // 27 runtime gauges + random_value + 2 memory gauges + 2 cores + poll_count
        assert_eq!(buf.len(), 27 + 1 + 2 + 2 + 1);
        assert!(buf.iter().any(|m| m.id == "random_value"));
        assert!(buf.iter().any(|m| m.id == "cpu_utilization2"));
        let poll = buf.iter().find(|m| m.id == "poll_count").unwrap();
        assert_eq!(poll.value, MetricValue::Counter(3));
    }
}
