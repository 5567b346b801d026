//! Periodic metric producers.
//!
//! Two independent samplers run in parallel: the runtime sampler reads
//! a fixed registry of process and host counters, the OS sampler reads
//! memory totals and per-core CPU utilization. Both are best-effort:
//! probe failures are logged and swallowed, the loops never halt.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, warn};

use pulse_core::shutdown::Shutdown;

/// One refresh of the process and host counters the runtime sampler
/// publishes. All values are gauges.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcStats {
    pub process_memory_bytes: f64,
    pub process_virtual_memory_bytes: f64,
    pub process_cpu_percent: f64,
    pub process_run_time_seconds: f64,
    pub process_start_time_seconds: f64,
    pub process_disk_read_bytes: f64,
    pub process_disk_written_bytes: f64,
    pub process_disk_read_bytes_total: f64,
    pub process_disk_written_bytes_total: f64,
    pub process_task_count: f64,
    pub system_total_memory_bytes: f64,
    pub system_used_memory_bytes: f64,
    pub system_free_memory_bytes: f64,
    pub system_available_memory_bytes: f64,
    pub system_total_swap_bytes: f64,
    pub system_used_swap_bytes: f64,
    pub system_free_swap_bytes: f64,
    pub system_cpu_percent: f64,
    pub system_cpu_count: f64,
    pub system_physical_core_count: f64,
    pub system_process_count: f64,
    pub system_load_avg_1: f64,
    pub system_load_avg_5: f64,
    pub system_load_avg_15: f64,
    pub system_uptime_seconds: f64,
    pub system_boot_time_seconds: f64,
    pub agent_uptime_seconds: f64,
}

pub type GaugeAccessor = fn(&ProcStats) -> f64;

/// Static registry of the runtime gauges, in stable shipping order.
pub const RUNTIME_GAUGES: [(&str, GaugeAccessor); 27] = [
    ("process_memory_bytes", |s| s.process_memory_bytes),
    ("process_virtual_memory_bytes", |s| s.process_virtual_memory_bytes),
    ("process_cpu_percent", |s| s.process_cpu_percent),
    ("process_run_time_seconds", |s| s.process_run_time_seconds),
    ("process_start_time_seconds", |s| s.process_start_time_seconds),
    ("process_disk_read_bytes", |s| s.process_disk_read_bytes),
    ("process_disk_written_bytes", |s| s.process_disk_written_bytes),
    ("process_disk_read_bytes_total", |s| s.process_disk_read_bytes_total),
    ("process_disk_written_bytes_total", |s| s.process_disk_written_bytes_total),
    ("process_task_count", |s| s.process_task_count),
    ("system_total_memory_bytes", |s| s.system_total_memory_bytes),
    ("system_used_memory_bytes", |s| s.system_used_memory_bytes),
    ("system_free_memory_bytes", |s| s.system_free_memory_bytes),
    ("system_available_memory_bytes", |s| s.system_available_memory_bytes),
    ("system_total_swap_bytes", |s| s.system_total_swap_bytes),
    ("system_used_swap_bytes", |s| s.system_used_swap_bytes),
    ("system_free_swap_bytes", |s| s.system_free_swap_bytes),
    ("system_cpu_percent", |s| s.system_cpu_percent),
    ("system_cpu_count", |s| s.system_cpu_count),
    ("system_physical_core_count", |s| s.system_physical_core_count),
    ("system_process_count", |s| s.system_process_count),
    ("system_load_avg_1", |s| s.system_load_avg_1),
    ("system_load_avg_5", |s| s.system_load_avg_5),
    ("system_load_avg_15", |s| s.system_load_avg_15),
    ("system_uptime_seconds", |s| s.system_uptime_seconds),
    ("system_boot_time_seconds", |s| s.system_boot_time_seconds),
    ("agent_uptime_seconds", |s| s.agent_uptime_seconds),
];

/// Latest runtime sampler output.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeReadings {
    pub stats: ProcStats,
    pub random_value: f64,
}

pub struct RuntimeSampler {
    readings: Arc<RwLock<RuntimeReadings>>,
    poll_count: Arc<AtomicI64>,
    started: Instant,
}

impl RuntimeSampler {
    pub fn new(poll_count: Arc<AtomicI64>) -> Self {
        Self {
            readings: Arc::new(RwLock::new(RuntimeReadings::default())),
            poll_count,
            started: Instant::now(),
        }
    }

    pub fn readings(&self) -> Arc<RwLock<RuntimeReadings>> {
        self.readings.clone()
    }

    /// Sample every `poll_interval` until shutdown, signalling `ready`
    /// after the first successful refresh.
    pub async fn run(self, poll_interval: Duration, ready: oneshot::Sender<()>, shutdown: Shutdown) {
        let mut sys = System::new();
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(e) => {
                warn!("runtime sampler disabled, cannot resolve own pid: {}", e);
                let _ = ready.send(());
                return;
            }
        };

        let mut ready = Some(ready);
        loop {
            if let Some(stats) = sample_proc_stats(&mut sys, pid, self.started) {
                let mut readings = self.readings.write().await;
                readings.stats = stats;
                readings.random_value = rand::random::<f64>();
                drop(readings);
                self.poll_count.fetch_add(1, Ordering::SeqCst);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(());
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
        debug!("runtime sampler stopped");
    }
}

fn sample_proc_stats(sys: &mut System, pid: Pid, started: Instant) -> Option<ProcStats> {
    sys.refresh_memory();
    sys.refresh_cpu_usage();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    let process = match sys.process(pid) {
        Some(p) => p,
        None => {
            warn!("own process {} not visible to the probe, skipping sample", pid);
            return None;
        }
    };
    let disk = process.disk_usage();
    let load = System::load_average();

    Some(ProcStats {
        process_memory_bytes: process.memory() as f64,
        process_virtual_memory_bytes: process.virtual_memory() as f64,
        process_cpu_percent: process.cpu_usage() as f64,
        process_run_time_seconds: process.run_time() as f64,
        process_start_time_seconds: process.start_time() as f64,
        process_disk_read_bytes: disk.read_bytes as f64,
        process_disk_written_bytes: disk.written_bytes as f64,
        process_disk_read_bytes_total: disk.total_read_bytes as f64,
        process_disk_written_bytes_total: disk.total_written_bytes as f64,
        process_task_count: process.tasks().map(|t| t.len()).unwrap_or(0) as f64,
        system_total_memory_bytes: sys.total_memory() as f64,
        system_used_memory_bytes: sys.used_memory() as f64,
        system_free_memory_bytes: sys.free_memory() as f64,
        system_available_memory_bytes: sys.available_memory() as f64,
        system_total_swap_bytes: sys.total_swap() as f64,
        system_used_swap_bytes: sys.used_swap() as f64,
        system_free_swap_bytes: sys.free_swap() as f64,
        system_cpu_percent: sys.global_cpu_usage() as f64,
        system_cpu_count: sys.cpus().len() as f64,
        system_physical_core_count: sys.physical_core_count().unwrap_or(0) as f64,
        system_process_count: sys.processes().len() as f64,
        system_load_avg_1: load.one,
        system_load_avg_5: load.five,
        system_load_avg_15: load.fifteen,
        system_uptime_seconds: System::uptime() as f64,
        system_boot_time_seconds: System::boot_time() as f64,
        agent_uptime_seconds: started.elapsed().as_secs_f64(),
    })
}

// ── OS sampler ────────────────────────────────────────────────

/// CPU utilization window width. Two refreshes this far apart give
/// sysinfo a meaningful usage delta.
const CPU_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Latest OS sampler output.
#[derive(Debug, Clone, Default)]
pub struct OsReadings {
    pub total_memory: f64,
    pub free_memory: f64,
    /// One entry per core, percent.
    pub cpu_utilization: Vec<f64>,
}

pub struct OsSampler {
    readings: Arc<RwLock<OsReadings>>,
}

impl Default for OsSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl OsSampler {
    pub fn new() -> Self {
        Self {
            readings: Arc::new(RwLock::new(OsReadings::default())),
        }
    }

    pub fn readings(&self) -> Arc<RwLock<OsReadings>> {
        self.readings.clone()
    }

    pub async fn run(self, poll_interval: Duration, ready: oneshot::Sender<()>, shutdown: Shutdown) {
        let mut sys = System::new();
        let mut ready = Some(ready);
        loop {
            sys.refresh_cpu_usage();
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(CPU_SAMPLE_WINDOW) => {}
            }
            sys.refresh_cpu_usage();
            sys.refresh_memory();

            {
                let mut readings = self.readings.write().await;
                readings.total_memory = sys.total_memory() as f64;
                readings.free_memory = sys.free_memory() as f64;
                readings.cpu_utilization =
                    sys.cpus().iter().map(|c| c.cpu_usage() as f64).collect();
            }
            if let Some(tx) = ready.take() {
                let _ = tx.send(());
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
        debug!("os sampler stopped");
    }
}
