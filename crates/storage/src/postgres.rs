//! PostgreSQL store: one `monitoring` table keyed by metric id.
//!
//! Gauge upserts replace `value`; counter upserts add to `delta`. Both
//! upserts are kind-guarded so that reusing an id with the other kind
//! updates zero rows and surfaces as a kind conflict instead of
//! silently switching the column that is read back.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use pulse_core::{Metric, MetricKind, MetricValue, PulseError};

use crate::{render_listing, MetricStore};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS monitoring (
    id text PRIMARY KEY,
    mtype text NOT NULL,
    delta bigint,
    value double precision
)";

const UPSERT_GAUGE: &str = "INSERT INTO monitoring (id, mtype, value)
    VALUES ($1, 'gauge', $2)
    ON CONFLICT (id) DO UPDATE SET value = EXCLUDED.value
    WHERE monitoring.mtype = 'gauge'";

const UPSERT_COUNTER: &str = "INSERT INTO monitoring (id, mtype, delta)
    VALUES ($1, 'counter', $2)
    ON CONFLICT (id) DO UPDATE SET delta = monitoring.delta + EXCLUDED.delta
    WHERE monitoring.mtype = 'counter'";

const GET_GAUGE: &str = "SELECT value FROM monitoring WHERE id = $1 AND mtype = 'gauge'";
const GET_COUNTER: &str = "SELECT delta FROM monitoring WHERE id = $1 AND mtype = 'counter'";

const LIST_GAUGES: &str =
    "SELECT id, value FROM monitoring WHERE mtype = 'gauge' ORDER BY id";
const LIST_COUNTERS: &str =
    "SELECT id, delta FROM monitoring WHERE mtype = 'counter' ORDER BY id";

fn store_err(e: sqlx::Error) -> PulseError {
    PulseError::Store(e.to_string())
}

pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub async fn connect(dsn: &str) -> Result<Self, PulseError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(dsn)
            .await
            .map_err(store_err)?;
        Ok(Self { pool })
    }

    /// Idempotent schema setup; runs through the retry wrapper at startup.
    pub async fn populate(&self) -> Result<(), PulseError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

#[async_trait]
impl MetricStore for PgStorage {
    async fn write_metric(&self, id: &str, value: MetricValue) -> Result<(), PulseError> {
        let result = match value {
            MetricValue::Gauge(v) => sqlx::query(UPSERT_GAUGE)
                .bind(id)
                .bind(v)
                .execute(&self.pool)
                .await
                .map_err(store_err)?,
            MetricValue::Counter(d) => sqlx::query(UPSERT_COUNTER)
                .bind(id)
                .bind(d)
                .execute(&self.pool)
                .await
                .map_err(store_err)?,
        };
        // The kind guard turns a conflicting upsert into a no-op.
        if result.rows_affected() == 0 {
            return Err(PulseError::WrongMetricType);
        }
        Ok(())
    }

    async fn write_batch(&self, metrics: &[Metric]) -> Result<(), PulseError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for m in metrics {
            let result = match m.value {
                MetricValue::Gauge(v) => sqlx::query(UPSERT_GAUGE)
                    .bind(m.id.as_str())
                    .bind(v)
                    .execute(&mut *tx)
                    .await
                    .map_err(store_err)?,
                MetricValue::Counter(d) => sqlx::query(UPSERT_COUNTER)
                    .bind(m.id.as_str())
                    .bind(d)
                    .execute(&mut *tx)
                    .await
                    .map_err(store_err)?,
            };
            if result.rows_affected() == 0 {
                // Dropping the transaction rolls back every prior row.
                return Err(PulseError::WrongMetricType);
            }
        }
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn get_metric(&self, kind: MetricKind, id: &str) -> Result<MetricValue, PulseError> {
        match kind {
            MetricKind::Gauge => {
                let row = sqlx::query(GET_GAUGE)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(store_err)?
                    .ok_or(PulseError::NoValue)?;
                let value: f64 = row.try_get("value").map_err(store_err)?;
                Ok(MetricValue::Gauge(value))
            }
            MetricKind::Counter => {
                let row = sqlx::query(GET_COUNTER)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(store_err)?
                    .ok_or(PulseError::NoValue)?;
                let delta: i64 = row.try_get("delta").map_err(store_err)?;
                Ok(MetricValue::Counter(delta))
            }
        }
    }

    async fn get_all_text(&self) -> Result<String, PulseError> {
        let counter_rows = sqlx::query(LIST_COUNTERS)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        let mut counters = Vec::with_capacity(counter_rows.len());
        for row in &counter_rows {
            counters.push((
                row.try_get::<String, _>("id").map_err(store_err)?,
                row.try_get::<i64, _>("delta").map_err(store_err)?,
            ));
        }

        let gauge_rows = sqlx::query(LIST_GAUGES)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        let mut gauges = Vec::with_capacity(gauge_rows.len());
        for row in &gauge_rows {
            gauges.push((
                row.try_get::<String, _>("id").map_err(store_err)?,
                row.try_get::<f64, _>("value").map_err(store_err)?,
            ));
        }

        Ok(render_listing(&counters, &gauges))
    }

    async fn ping(&self) -> Result<(), PulseError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
