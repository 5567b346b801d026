//! Per-operation retry: Fibonacci backoff, bounded attempts, and a
//! fixed non-retriable error set that short-circuits immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use pulse_core::{Metric, MetricKind, MetricValue, PulseError};

use crate::MetricStore;

/// Fibonacci term used to scale the backoff delay: 1, 1, 2, 3, 5, ...
fn fibonacci(n: u32) -> u32 {
    let (mut a, mut b) = (0u32, 1u32);
    for _ in 0..n {
        let next = a + b;
        a = b;
        b = next;
    }
    a
}

/// Value-typed retry wrapper applied to every store operation and to
/// the agent's transport sends.
#[derive(Debug, Clone)]
pub struct Retrier {
    max_retries: u32,
    base_delay: Duration,
    timeout: Duration,
}

impl Default for Retrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Retrier {
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_params(base_delay: Duration, timeout: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay,
            timeout,
        }
    }

    /// Per-call deadline applied around the whole attempt loop.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Drive `op` until it succeeds, exhausts `max_retries`, returns a
    /// non-retriable error, or the deadline elapses.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, PulseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PulseError>>,
    {
        let attempts = async {
            let mut attempt = 0u32;
            loop {
                match op().await {
                    Ok(v) => return Ok(v),
                    Err(e) if e.is_non_retriable() => return Err(e),
                    Err(e) => {
                        if attempt >= self.max_retries {
                            return Err(e);
                        }
                        attempt += 1;
                        let delay = self.base_delay * fibonacci(attempt);
                        warn!("attempt {} failed: {}, retrying in {:?}", attempt, e, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        };
        match tokio::time::timeout(self.timeout, attempts).await {
            Ok(res) => res,
            Err(_) => Err(PulseError::Transport(format!(
                "operation timed out after {:?}",
                self.timeout
            ))),
        }
    }

    // ── Typed wrappers, one per store operation signature ─────────

    pub async fn write_metric(
        &self,
        store: &dyn MetricStore,
        id: &str,
        value: MetricValue,
    ) -> Result<(), PulseError> {
        self.run(|| store.write_metric(id, value)).await
    }

    pub async fn write_batch(
        &self,
        store: &dyn MetricStore,
        metrics: &[Metric],
    ) -> Result<(), PulseError> {
        self.run(|| store.write_batch(metrics)).await
    }

    pub async fn get_metric(
        &self,
        store: &dyn MetricStore,
        kind: MetricKind,
        id: &str,
    ) -> Result<MetricValue, PulseError> {
        self.run(|| store.get_metric(kind, id)).await
    }

    pub async fn get_all_text(&self, store: &dyn MetricStore) -> Result<String, PulseError> {
        self.run(|| store.get_all_text()).await
    }

    pub async fn ping(&self, store: &dyn MetricStore) -> Result<(), PulseError> {
        self.run(|| store.ping()).await
    }

    /// Retry a startup population step (schema creation, file restore).
    pub async fn populate<F, Fut>(&self, op: F) -> Result<(), PulseError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), PulseError>>,
    {
        self.run(op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> Retrier {
        Retrier::with_params(Duration::from_millis(1), Duration::from_secs(5), 3)
    }

    #[test]
    fn test_fibonacci_sequence() {
        let terms: Vec<u32> = (1..=5).map(fibonacci).collect();
        assert_eq!(terms, vec![1, 1, 2, 3, 5]);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = fast()
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(PulseError::Store("flaky".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retriable_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(PulseError::NoValue) }
            })
            .await;
        assert!(matches!(result, Err(PulseError::NoValue)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast()
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(PulseError::Transport("down".to_string())) }
            })
            .await;
        assert!(matches!(result, Err(PulseError::Transport(_))));
        // initial attempt + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_deadline_cuts_off_retries() {
        let retrier = Retrier::with_params(
            Duration::from_secs(10),
            Duration::from_millis(20),
            3,
        );
        let result: Result<(), _> = retrier
            .run(|| async { Err(PulseError::Store("down".to_string())) })
            .await;
        assert!(matches!(result, Err(PulseError::Transport(_))));
    }
}
