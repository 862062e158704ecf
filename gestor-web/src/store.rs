// SQLite-backed repositories for the analytics engine.

use async_trait::async_trait;
use gestor_core::alerts::{AlertRule, AlertTrigger};
use gestor_core::benchmark::{Benchmark, BenchmarkQuery};
use gestor_core::dashboard::Dashboard;
use gestor_core::kpi::{KpiDefinition, KpiSnapshot};
use gestor_core::store::{
    AlertRuleRepository, BenchmarkRepository, DashboardRepository, KpiRepository, SnapshotRepository,
    TriggerFilter, TriggerRepository,
};
use gestor_core::{EngineError, EngineResult, RoleLevel, TimeWindow};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

fn db_err(e: sqlx::Error) -> EngineError {
    EngineError::storage(e)
}

fn encode<T: Serialize>(value: &T) -> EngineResult<String> {
    serde_json::to_string(value).map_err(EngineError::storage)
}

fn decode<T: DeserializeOwned>(row: &SqliteRow) -> EngineResult<T> {
    let payload: String = row.try_get("payload").map_err(db_err)?;
    serde_json::from_str(&payload).map_err(EngineError::storage)
}

fn decode_all<T: DeserializeOwned>(rows: &[SqliteRow]) -> EngineResult<Vec<T>> {
    rows.iter().map(decode).collect()
}

/// `is_default` is owned by its column so `set_default` can flip it for a
/// whole (tenant, role) group without rewriting payloads.
fn decode_dashboard(row: &SqliteRow) -> EngineResult<Dashboard> {
    let mut dashboard: Dashboard = decode(row)?;
    dashboard.is_default = row.try_get("is_default").map_err(db_err)?;
    Ok(dashboard)
}

#[async_trait]
impl KpiRepository for SqliteStore {
    async fn insert_kpi(&self, definition: &KpiDefinition) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO kpi_definitions (id, tenant_id, name, active, payload, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&definition.id)
        .bind(&definition.tenant_id)
        .bind(&definition.name)
        .bind(definition.active)
        .bind(encode(definition)?)
        .bind(definition.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_kpi(&self, definition: &KpiDefinition) -> EngineResult<()> {
        let result = sqlx::query(
            "UPDATE kpi_definitions SET name = ?, active = ?, payload = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&definition.name)
        .bind(definition.active)
        .bind(encode(definition)?)
        .bind(definition.updated_at.timestamp_millis())
        .bind(&definition.id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::UnknownKpi(definition.id.clone()));
        }
        Ok(())
    }

    async fn get_kpi(&self, id: &str) -> EngineResult<Option<KpiDefinition>> {
        let row = sqlx::query("SELECT payload FROM kpi_definitions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode).transpose()
    }

    async fn find_kpi_by_name(&self, tenant_id: &str, name: &str) -> EngineResult<Option<KpiDefinition>> {
        let row = sqlx::query("SELECT payload FROM kpi_definitions WHERE tenant_id = ? AND name = ?")
            .bind(tenant_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode).transpose()
    }

    async fn list_kpis(&self, tenant_id: &str, active_only: bool) -> EngineResult<Vec<KpiDefinition>> {
        let rows = sqlx::query(
            "SELECT payload FROM kpi_definitions
             WHERE tenant_id = ? AND (? = 0 OR active = 1)
             ORDER BY name",
        )
        .bind(tenant_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        decode_all(&rows)
    }

    async fn list_kpis_named(&self, name: &str) -> EngineResult<Vec<KpiDefinition>> {
        let rows = sqlx::query("SELECT payload FROM kpi_definitions WHERE name = ? AND active = 1")
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        decode_all(&rows)
    }

    async fn delete_kpi(&self, id: &str) -> EngineResult<bool> {
        let result = sqlx::query("DELETE FROM kpi_definitions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn kpi_tenants(&self) -> EngineResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT tenant_id FROM kpi_definitions ORDER BY tenant_id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("tenant_id").map_err(db_err))
            .collect()
    }
}

#[async_trait]
impl SnapshotRepository for SqliteStore {
    async fn append_snapshot(&self, snapshot: &KpiSnapshot) -> EngineResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO kpi_snapshots (id, kpi_id, tenant_id, tick_id, computed_at, payload)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.kpi_id)
        .bind(&snapshot.tenant_id)
        .bind(&snapshot.tick_id)
        .bind(snapshot.computed_at.timestamp_millis())
        .bind(encode(snapshot)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn latest_snapshot(&self, kpi_id: &str, tenant_id: &str) -> EngineResult<Option<KpiSnapshot>> {
        let row = sqlx::query(
            "SELECT payload FROM kpi_snapshots
             WHERE kpi_id = ? AND tenant_id = ?
             ORDER BY computed_at DESC LIMIT 1",
        )
        .bind(kpi_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(decode).transpose()
    }

    async fn snapshots_in(
        &self,
        kpi_id: &str,
        tenant_id: &str,
        window: &TimeWindow,
    ) -> EngineResult<Vec<KpiSnapshot>> {
        let rows = sqlx::query(
            "SELECT payload FROM kpi_snapshots
             WHERE kpi_id = ? AND tenant_id = ? AND computed_at >= ? AND computed_at < ?
             ORDER BY computed_at",
        )
        .bind(kpi_id)
        .bind(tenant_id)
        .bind(window.start.timestamp_millis())
        .bind(window.end.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        decode_all(&rows)
    }
}

#[async_trait]
impl AlertRuleRepository for SqliteStore {
    async fn insert_rule(&self, rule: &AlertRule) -> EngineResult<()> {
        sqlx::query("INSERT INTO alert_rules (id, tenant_id, created_at, payload) VALUES (?, ?, ?, ?)")
            .bind(&rule.id)
            .bind(&rule.tenant_id)
            .bind(rule.created_at.timestamp_millis())
            .bind(encode(rule)?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn update_rule(&self, rule: &AlertRule) -> EngineResult<()> {
        let result = sqlx::query("UPDATE alert_rules SET payload = ? WHERE id = ?")
            .bind(encode(rule)?)
            .bind(&rule.id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(EngineError::UnknownRule(rule.id.clone()));
        }
        Ok(())
    }

    async fn get_rule(&self, id: &str) -> EngineResult<Option<AlertRule>> {
        let row = sqlx::query("SELECT payload FROM alert_rules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode).transpose()
    }

    async fn delete_rule(&self, id: &str) -> EngineResult<bool> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_rules(&self, tenant_id: &str) -> EngineResult<Vec<AlertRule>> {
        let rows = sqlx::query("SELECT payload FROM alert_rules WHERE tenant_id = ? ORDER BY created_at")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        decode_all(&rows)
    }

    async fn rule_tenants(&self) -> EngineResult<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT tenant_id FROM alert_rules ORDER BY tenant_id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("tenant_id").map_err(db_err))
            .collect()
    }
}

#[async_trait]
impl TriggerRepository for SqliteStore {
    async fn record_firing(&self, rule: &AlertRule, trigger: &AlertTrigger) -> EngineResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result = sqlx::query("UPDATE alert_rules SET payload = ? WHERE id = ?")
            .bind(encode(rule)?)
            .bind(&rule.id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(EngineError::UnknownRule(rule.id.clone()));
        }

        sqlx::query(
            "INSERT INTO alert_triggers (id, rule_id, tenant_id, resolved, triggered_at, payload)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&trigger.id)
        .bind(&trigger.rule_id)
        .bind(&trigger.tenant_id)
        .bind(trigger.resolved)
        .bind(trigger.triggered_at.timestamp_millis())
        .bind(encode(trigger)?)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn update_trigger(&self, trigger: &AlertTrigger) -> EngineResult<()> {
        let result = sqlx::query("UPDATE alert_triggers SET resolved = ?, payload = ? WHERE id = ?")
            .bind(trigger.resolved)
            .bind(encode(trigger)?)
            .bind(&trigger.id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(EngineError::UnknownTrigger(trigger.id.clone()));
        }
        Ok(())
    }

    async fn get_trigger(&self, id: &str) -> EngineResult<Option<AlertTrigger>> {
        let row = sqlx::query("SELECT payload FROM alert_triggers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode).transpose()
    }

    async fn list_triggers(&self, tenant_id: &str, filter: &TriggerFilter) -> EngineResult<Vec<AlertTrigger>> {
        let since = filter.since.map(|s| s.timestamp_millis());
        // SQLite treats a negative LIMIT as unbounded
        let limit = filter.limit.map_or(-1, |l| l as i64);

        let rows = sqlx::query(
            "SELECT payload FROM alert_triggers
             WHERE tenant_id = ?
               AND (? IS NULL OR rule_id = ?)
               AND (? = 0 OR resolved = 0)
               AND (? IS NULL OR triggered_at >= ?)
             ORDER BY triggered_at DESC
             LIMIT ?",
        )
        .bind(tenant_id)
        .bind(&filter.rule_id)
        .bind(&filter.rule_id)
        .bind(filter.unresolved_only)
        .bind(since)
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        decode_all(&rows)
    }
}

#[async_trait]
impl BenchmarkRepository for SqliteStore {
    async fn find_benchmarks(&self, query: &BenchmarkQuery) -> EngineResult<Vec<Benchmark>> {
        let rows = sqlx::query(
            "SELECT payload FROM benchmarks WHERE metric = ? AND (? IS NULL OR year = ?)",
        )
        .bind(&query.metric)
        .bind(query.year)
        .bind(query.year)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let benchmarks: Vec<Benchmark> = decode_all(&rows)?;
        Ok(benchmarks.into_iter().filter(|b| query.matches(b)).collect())
    }

    async fn upsert_benchmark(&self, benchmark: &Benchmark) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO benchmarks (id, metric, year, payload) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET metric = excluded.metric, year = excluded.year, payload = excluded.payload",
        )
        .bind(&benchmark.id)
        .bind(&benchmark.metric)
        .bind(benchmark.year)
        .bind(encode(benchmark)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl DashboardRepository for SqliteStore {
    async fn insert_dashboard(&self, dashboard: &Dashboard) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO dashboards (id, tenant_id, role, name, is_default, active, payload)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&dashboard.id)
        .bind(&dashboard.tenant_id)
        .bind(dashboard.role.as_str())
        .bind(&dashboard.name)
        .bind(dashboard.is_default)
        .bind(dashboard.active)
        .bind(encode(dashboard)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_dashboard(&self, dashboard: &Dashboard) -> EngineResult<()> {
        // is_default is evaluated against the old role before SET applies
        let result = sqlx::query(
            "UPDATE dashboards
             SET is_default = (is_default AND role = ?), role = ?, name = ?, active = ?, payload = ?
             WHERE id = ?",
        )
        .bind(dashboard.role.as_str())
        .bind(dashboard.role.as_str())
        .bind(&dashboard.name)
        .bind(dashboard.active)
        .bind(encode(dashboard)?)
        .bind(&dashboard.id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(EngineError::UnknownDashboard(dashboard.id.clone()));
        }
        Ok(())
    }

    async fn get_dashboard(&self, id: &str) -> EngineResult<Option<Dashboard>> {
        let row = sqlx::query("SELECT payload, is_default FROM dashboards WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(decode_dashboard).transpose()
    }

    async fn delete_dashboard(&self, id: &str) -> EngineResult<bool> {
        let result = sqlx::query("DELETE FROM dashboards WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_dashboards(&self, tenant_id: &str, role: Option<RoleLevel>) -> EngineResult<Vec<Dashboard>> {
        let role = role.map(|r| r.as_str());
        let rows = sqlx::query(
            "SELECT payload, is_default FROM dashboards
             WHERE tenant_id = ? AND (? IS NULL OR role = ?)
             ORDER BY name",
        )
        .bind(tenant_id)
        .bind(role)
        .bind(role)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(decode_dashboard).collect()
    }

    async fn find_default(&self, tenant_id: &str, role: RoleLevel) -> EngineResult<Option<Dashboard>> {
        let row = sqlx::query(
            "SELECT payload, is_default FROM dashboards
             WHERE tenant_id = ? AND role = ? AND is_default = 1 AND active = 1
             LIMIT 1",
        )
        .bind(tenant_id)
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(decode_dashboard).transpose()
    }

    async fn set_default(&self, id: &str) -> EngineResult<Dashboard> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query("SELECT tenant_id, role FROM dashboards WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .ok_or_else(|| EngineError::UnknownDashboard(id.to_string()))?;
        let tenant_id: String = row.try_get("tenant_id").map_err(db_err)?;
        let role: String = row.try_get("role").map_err(db_err)?;

        sqlx::query("UPDATE dashboards SET is_default = (id = ?) WHERE tenant_id = ? AND role = ?")
            .bind(id)
            .bind(&tenant_id)
            .bind(&role)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let row = sqlx::query("SELECT payload, is_default FROM dashboards WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        let dashboard = decode_dashboard(&row)?;

        tx.commit().await.map_err(db_err)?;
        Ok(dashboard)
    }
}
