// Metric source over the `metric_events` table.

use async_trait::async_trait;
use gestor_core::source::{evaluate_formula, EventLog};
use gestor_core::{EngineError, EngineResult, MetricEvent, MetricSource, TimeWindow};
use sqlx::{Pool, Row, Sqlite};

#[derive(Clone)]
pub struct SqlMetricSource {
    pool: Pool<Sqlite>,
}

impl SqlMetricSource {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLog for SqlMetricSource {
    async fn append_events(&self, events: &[MetricEvent]) -> EngineResult<()> {
        let mut tx = self.pool.begin().await.map_err(EngineError::storage)?;
        for event in events {
            sqlx::query("INSERT INTO metric_events (tenant_id, metric, value, recorded_at) VALUES (?, ?, ?, ?)")
                .bind(&event.tenant_id)
                .bind(&event.metric)
                .bind(event.value)
                .bind(event.recorded_at.timestamp_millis())
                .execute(&mut *tx)
                .await
                .map_err(EngineError::storage)?;
        }
        tx.commit().await.map_err(EngineError::storage)?;
        Ok(())
    }

    async fn values(&self, tenant_id: &str, metric: &str, window: &TimeWindow) -> EngineResult<Vec<f64>> {
        let rows = sqlx::query(
            "SELECT value FROM metric_events
             WHERE tenant_id = ? AND metric = ? AND recorded_at >= ? AND recorded_at < ?
             ORDER BY recorded_at, id",
        )
        .bind(tenant_id)
        .bind(metric)
        .bind(window.start.timestamp_millis())
        .bind(window.end.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::storage)?;

        rows.iter()
            .map(|row| row.try_get::<f64, _>("value").map_err(EngineError::storage))
            .collect()
    }
}

#[async_trait]
impl MetricSource for SqlMetricSource {
    async fn query(&self, tenant_id: &str, formula: &str, window: &TimeWindow) -> EngineResult<f64> {
        evaluate_formula(self, tenant_id, formula, window).await
    }
}
