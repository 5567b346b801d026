//! In-memory store: two maps behind a single reader-writer lock, with
//! optional NDJSON persistence (one envelope per line).

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};

use pulse_core::{Metric, MetricEnvelope, MetricKind, MetricValue, PulseError};

use crate::{render_listing, MetricStore};

#[derive(Debug, Default)]
struct Maps {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

impl Maps {
    fn apply(&mut self, id: &str, value: MetricValue) -> Result<(), PulseError> {
        match value {
            MetricValue::Gauge(v) => {
                if self.counters.contains_key(id) {
                    return Err(PulseError::WrongMetricType);
                }
                self.gauges.insert(id.to_string(), v);
            }
            MetricValue::Counter(d) => {
                if self.gauges.contains_key(id) {
                    return Err(PulseError::WrongMetricType);
                }
                *self.counters.entry(id.to_string()).or_insert(0) += d;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemStorage {
    inner: RwLock<Maps>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dump every entry as one JSON envelope per line. No header, no
    /// trailer; an empty store writes an empty file.
    pub async fn save_to_file(&self, path: &Path) -> Result<(), PulseError> {
        let mut out = String::new();
        {
            let maps = self.inner.read().await;
            let mut counters: Vec<_> = maps.counters.iter().collect();
            counters.sort_by(|a, b| a.0.cmp(b.0));
            for (id, delta) in counters {
                let env = MetricEnvelope::from(&Metric::counter(id.clone(), *delta));
                out.push_str(&serde_json::to_string(&env).map_err(|e| {
                    PulseError::Store(format!("serialize {}: {}", id, e))
                })?);
                out.push('\n');
            }
            let mut gauges: Vec<_> = maps.gauges.iter().collect();
            gauges.sort_by(|a, b| a.0.cmp(b.0));
            for (id, value) in gauges {
                let env = MetricEnvelope::from(&Metric::gauge(id.clone(), *value));
                out.push_str(&serde_json::to_string(&env).map_err(|e| {
                    PulseError::Store(format!("serialize {}: {}", id, e))
                })?);
                out.push('\n');
            }
        }
        tokio::fs::write(path, out).await?;
        Ok(())
    }

    /// Populate from an NDJSON dump. Gauges replace and counters are
    /// **set**, not accumulated: restoring twice yields the same state.
    /// A missing or empty file is legal and leaves the store untouched.
    pub async fn read_from_file(&self, path: &Path) -> Result<(), PulseError> {
        let data = match tokio::fs::read_to_string(path).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no dump file at {}, starting empty", path.display());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut maps = self.inner.write().await;
        let mut restored = 0usize;
        for line in data.lines() {
            if line.is_empty() {
                continue;
            }
            let env: MetricEnvelope = serde_json::from_str(line)
                .map_err(|e| PulseError::Decode(format!("dump line: {}", e)))?;
            match Metric::try_from(&env) {
                Ok(m) => {
                    match m.value {
                        MetricValue::Gauge(v) => {
                            maps.gauges.insert(m.id, v);
                        }
                        MetricValue::Counter(d) => {
                            maps.counters.insert(m.id, d);
                        }
                    }
                    restored += 1;
                }
                Err(e) => warn!("skipping dump entry '{}': {}", env.id, e),
            }
        }
        info!("restored {} metrics from {}", restored, path.display());
        Ok(())
    }
}

#[async_trait]
impl MetricStore for MemStorage {
    async fn write_metric(&self, id: &str, value: MetricValue) -> Result<(), PulseError> {
        let mut maps = self.inner.write().await;
        maps.apply(id, value)
    }

    async fn write_batch(&self, metrics: &[Metric]) -> Result<(), PulseError> {
        let mut maps = self.inner.write().await;
        for m in metrics {
            if let Err(e) = maps.apply(&m.id, m.value) {
                warn!("skipping batch entry '{}': {}", m.id, e);
            }
        }
        Ok(())
    }

    async fn get_metric(&self, kind: MetricKind, id: &str) -> Result<MetricValue, PulseError> {
        let maps = self.inner.read().await;
        match kind {
            MetricKind::Gauge => maps
                .gauges
                .get(id)
                .copied()
                .map(MetricValue::Gauge)
                .ok_or(PulseError::NoValue),
            MetricKind::Counter => maps
                .counters
                .get(id)
                .copied()
                .map(MetricValue::Counter)
                .ok_or(PulseError::NoValue),
        }
    }

    async fn get_all_text(&self) -> Result<String, PulseError> {
        let maps = self.inner.read().await;
        let mut counters: Vec<(String, i64)> =
            maps.counters.iter().map(|(k, v)| (k.clone(), *v)).collect();
        counters.sort_by(|a, b| a.0.cmp(&b.0));
        let mut gauges: Vec<(String, f64)> =
            maps.gauges.iter().map(|(k, v)| (k.clone(), *v)).collect();
        gauges.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(render_listing(&counters, &gauges))
    }

    async fn ping(&self) -> Result<(), PulseError> {
        Ok(())
    }
}
