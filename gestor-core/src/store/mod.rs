//! Repository seams. The engine owns these records; the web crate backs
//! them with SQLite, tests and demos with [`InMemoryStore`].

pub mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::alerts::{AlertRule, AlertTrigger};
use crate::benchmark::{Benchmark, BenchmarkQuery};
use crate::dashboard::Dashboard;
use crate::error::EngineResult;
use crate::kpi::{KpiDefinition, KpiSnapshot};
use crate::source::TimeWindow;
use crate::tenant::RoleLevel;

#[async_trait]
pub trait KpiRepository: Send + Sync {
    async fn insert_kpi(&self, definition: &KpiDefinition) -> EngineResult<()>;
    async fn update_kpi(&self, definition: &KpiDefinition) -> EngineResult<()>;
    async fn get_kpi(&self, id: &str) -> EngineResult<Option<KpiDefinition>>;
    async fn find_kpi_by_name(&self, tenant_id: &str, name: &str) -> EngineResult<Option<KpiDefinition>>;
    async fn list_kpis(&self, tenant_id: &str, active_only: bool) -> EngineResult<Vec<KpiDefinition>>;
    /// Active KPIs with this name across every tenant.
    async fn list_kpis_named(&self, name: &str) -> EngineResult<Vec<KpiDefinition>>;
    async fn delete_kpi(&self, id: &str) -> EngineResult<bool>;
    async fn kpi_tenants(&self) -> EngineResult<Vec<String>>;
}

/// Append-only snapshot log.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Returns `false` without writing when a snapshot with the same
    /// `(kpi_id, tenant_id, tick_id)` already exists.
    async fn append_snapshot(&self, snapshot: &KpiSnapshot) -> EngineResult<bool>;
    async fn latest_snapshot(&self, kpi_id: &str, tenant_id: &str) -> EngineResult<Option<KpiSnapshot>>;
    /// Oldest first.
    async fn snapshots_in(
        &self,
        kpi_id: &str,
        tenant_id: &str,
        window: &TimeWindow,
    ) -> EngineResult<Vec<KpiSnapshot>>;
}

#[async_trait]
pub trait AlertRuleRepository: Send + Sync {
    async fn insert_rule(&self, rule: &AlertRule) -> EngineResult<()>;
    async fn update_rule(&self, rule: &AlertRule) -> EngineResult<()>;
    async fn get_rule(&self, id: &str) -> EngineResult<Option<AlertRule>>;
    async fn delete_rule(&self, id: &str) -> EngineResult<bool>;
    async fn list_rules(&self, tenant_id: &str) -> EngineResult<Vec<AlertRule>>;
    async fn rule_tenants(&self) -> EngineResult<Vec<String>>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerFilter {
    pub rule_id: Option<String>,
    pub unresolved_only: bool,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[async_trait]
pub trait TriggerRepository: Send + Sync {
    /// Insert `trigger` and overwrite `rule` (carrying its new
    /// `last_triggered` and `trigger_count`) in one transaction. Fails with
    /// `UnknownRule`, writing nothing, when the rule is gone.
    async fn record_firing(&self, rule: &AlertRule, trigger: &AlertTrigger) -> EngineResult<()>;
    async fn update_trigger(&self, trigger: &AlertTrigger) -> EngineResult<()>;
    async fn get_trigger(&self, id: &str) -> EngineResult<Option<AlertTrigger>>;
    /// Newest first.
    async fn list_triggers(&self, tenant_id: &str, filter: &TriggerFilter) -> EngineResult<Vec<AlertTrigger>>;
}

#[async_trait]
pub trait BenchmarkRepository: Send + Sync {
    async fn find_benchmarks(&self, query: &BenchmarkQuery) -> EngineResult<Vec<Benchmark>>;
    /// Used by the out-of-band refresh job only.
    async fn upsert_benchmark(&self, benchmark: &Benchmark) -> EngineResult<()>;
}

#[async_trait]
pub trait DashboardRepository: Send + Sync {
    async fn insert_dashboard(&self, dashboard: &Dashboard) -> EngineResult<()>;
    /// Ignores `dashboard.is_default`: the stored flag is kept, or cleared
    /// when the role changes.
    async fn update_dashboard(&self, dashboard: &Dashboard) -> EngineResult<()>;
    async fn get_dashboard(&self, id: &str) -> EngineResult<Option<Dashboard>>;
    async fn delete_dashboard(&self, id: &str) -> EngineResult<bool>;
    async fn list_dashboards(&self, tenant_id: &str, role: Option<RoleLevel>) -> EngineResult<Vec<Dashboard>>;
    async fn find_default(&self, tenant_id: &str, role: RoleLevel) -> EngineResult<Option<Dashboard>>;
    /// Marks `id` as the default for its (tenant, role) and clears any
    /// previous default for that pair in one atomic step.
    async fn set_default(&self, id: &str) -> EngineResult<Dashboard>;
}

/// Bundle of repositories handed to the engines.
#[derive(Clone)]
pub struct Stores {
    pub kpis: Arc<dyn KpiRepository>,
    pub snapshots: Arc<dyn SnapshotRepository>,
    pub rules: Arc<dyn AlertRuleRepository>,
    pub triggers: Arc<dyn TriggerRepository>,
    pub benchmarks: Arc<dyn BenchmarkRepository>,
    pub dashboards: Arc<dyn DashboardRepository>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self::from_shared(Arc::new(InMemoryStore::new()))
    }

    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: KpiRepository
            + SnapshotRepository
            + AlertRuleRepository
            + TriggerRepository
            + BenchmarkRepository
            + DashboardRepository
            + 'static,
    {
        Self {
            kpis: store.clone(),
            snapshots: store.clone(),
            rules: store.clone(),
            triggers: store.clone(),
            benchmarks: store.clone(),
            dashboards: store,
        }
    }
}
