use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

use super::{
    AlertRuleRepository, BenchmarkRepository, DashboardRepository, KpiRepository, SnapshotRepository,
    TriggerFilter, TriggerRepository,
};
use crate::alerts::{AlertRule, AlertTrigger};
use crate::benchmark::{Benchmark, BenchmarkQuery};
use crate::dashboard::Dashboard;
use crate::error::{EngineError, EngineResult};
use crate::kpi::{KpiDefinition, KpiSnapshot};
use crate::source::TimeWindow;
use crate::tenant::RoleLevel;

/// Process-local store implementing every repository.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    kpis: RwLock<HashMap<String, KpiDefinition>>,
    snapshots: RwLock<Vec<KpiSnapshot>>,
    rules: RwLock<HashMap<String, AlertRule>>,
    triggers: RwLock<HashMap<String, AlertTrigger>>,
    benchmarks: RwLock<Vec<Benchmark>>,
    dashboards: RwLock<HashMap<String, Dashboard>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KpiRepository for InMemoryStore {
    async fn insert_kpi(&self, definition: &KpiDefinition) -> EngineResult<()> {
        self.kpis
            .write()
            .await
            .insert(definition.id.clone(), definition.clone());
        Ok(())
    }

    async fn update_kpi(&self, definition: &KpiDefinition) -> EngineResult<()> {
        let mut kpis = self.kpis.write().await;
        match kpis.get_mut(&definition.id) {
            Some(existing) => {
                *existing = definition.clone();
                Ok(())
            }
            None => Err(EngineError::UnknownKpi(definition.id.clone())),
        }
    }

    async fn get_kpi(&self, id: &str) -> EngineResult<Option<KpiDefinition>> {
        Ok(self.kpis.read().await.get(id).cloned())
    }

    async fn find_kpi_by_name(&self, tenant_id: &str, name: &str) -> EngineResult<Option<KpiDefinition>> {
        Ok(self
            .kpis
            .read()
            .await
            .values()
            .find(|k| k.tenant_id == tenant_id && k.name == name)
            .cloned())
    }

    async fn list_kpis(&self, tenant_id: &str, active_only: bool) -> EngineResult<Vec<KpiDefinition>> {
        let mut list: Vec<KpiDefinition> = self
            .kpis
            .read()
            .await
            .values()
            .filter(|k| k.tenant_id == tenant_id && (!active_only || k.active))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn list_kpis_named(&self, name: &str) -> EngineResult<Vec<KpiDefinition>> {
        Ok(self
            .kpis
            .read()
            .await
            .values()
            .filter(|k| k.active && k.name == name)
            .cloned()
            .collect())
    }

    async fn delete_kpi(&self, id: &str) -> EngineResult<bool> {
        Ok(self.kpis.write().await.remove(id).is_some())
    }

    async fn kpi_tenants(&self) -> EngineResult<Vec<String>> {
        let tenants: BTreeSet<String> = self
            .kpis
            .read()
            .await
            .values()
            .map(|k| k.tenant_id.clone())
            .collect();
        Ok(tenants.into_iter().collect())
    }
}

#[async_trait]
impl SnapshotRepository for InMemoryStore {
    async fn append_snapshot(&self, snapshot: &KpiSnapshot) -> EngineResult<bool> {
        let mut snapshots = self.snapshots.write().await;
        if snapshot.tick_id.is_some()
            && snapshots.iter().any(|s| {
                s.kpi_id == snapshot.kpi_id
                    && s.tenant_id == snapshot.tenant_id
                    && s.tick_id == snapshot.tick_id
            })
        {
            return Ok(false);
        }
        snapshots.push(snapshot.clone());
        Ok(true)
    }

    async fn latest_snapshot(&self, kpi_id: &str, tenant_id: &str) -> EngineResult<Option<KpiSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .await
            .iter()
            .filter(|s| s.kpi_id == kpi_id && s.tenant_id == tenant_id)
            .max_by_key(|s| s.computed_at)
            .cloned())
    }

    async fn snapshots_in(
        &self,
        kpi_id: &str,
        tenant_id: &str,
        window: &TimeWindow,
    ) -> EngineResult<Vec<KpiSnapshot>> {
        let mut list: Vec<KpiSnapshot> = self
            .snapshots
            .read()
            .await
            .iter()
            .filter(|s| s.kpi_id == kpi_id && s.tenant_id == tenant_id && window.contains(s.computed_at))
            .cloned()
            .collect();
        list.sort_by_key(|s| s.computed_at);
        Ok(list)
    }
}

#[async_trait]
impl AlertRuleRepository for InMemoryStore {
    async fn insert_rule(&self, rule: &AlertRule) -> EngineResult<()> {
        self.rules.write().await.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn update_rule(&self, rule: &AlertRule) -> EngineResult<()> {
        let mut rules = self.rules.write().await;
        match rules.get_mut(&rule.id) {
            Some(existing) => {
                *existing = rule.clone();
                Ok(())
            }
            None => Err(EngineError::UnknownRule(rule.id.clone())),
        }
    }

    async fn get_rule(&self, id: &str) -> EngineResult<Option<AlertRule>> {
        Ok(self.rules.read().await.get(id).cloned())
    }

    async fn delete_rule(&self, id: &str) -> EngineResult<bool> {
        Ok(self.rules.write().await.remove(id).is_some())
    }

    async fn list_rules(&self, tenant_id: &str) -> EngineResult<Vec<AlertRule>> {
        let mut list: Vec<AlertRule> = self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(list)
    }

    async fn rule_tenants(&self) -> EngineResult<Vec<String>> {
        let tenants: BTreeSet<String> = self
            .rules
            .read()
            .await
            .values()
            .map(|r| r.tenant_id.clone())
            .collect();
        Ok(tenants.into_iter().collect())
    }
}

#[async_trait]
impl TriggerRepository for InMemoryStore {
    async fn record_firing(&self, rule: &AlertRule, trigger: &AlertTrigger) -> EngineResult<()> {
        // rules before triggers, held together
        let mut rules = self.rules.write().await;
        let mut triggers = self.triggers.write().await;
        let existing = rules
            .get_mut(&rule.id)
            .ok_or_else(|| EngineError::UnknownRule(rule.id.clone()))?;
        *existing = rule.clone();
        triggers.insert(trigger.id.clone(), trigger.clone());
        Ok(())
    }

    async fn update_trigger(&self, trigger: &AlertTrigger) -> EngineResult<()> {
        let mut triggers = self.triggers.write().await;
        match triggers.get_mut(&trigger.id) {
            Some(existing) => {
                *existing = trigger.clone();
                Ok(())
            }
            None => Err(EngineError::UnknownTrigger(trigger.id.clone())),
        }
    }

    async fn get_trigger(&self, id: &str) -> EngineResult<Option<AlertTrigger>> {
        Ok(self.triggers.read().await.get(id).cloned())
    }

    async fn list_triggers(&self, tenant_id: &str, filter: &TriggerFilter) -> EngineResult<Vec<AlertTrigger>> {
        let mut list: Vec<AlertTrigger> = self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| t.tenant_id == tenant_id)
            .filter(|t| filter.rule_id.as_ref().map_or(true, |r| &t.rule_id == r))
            .filter(|t| !filter.unresolved_only || !t.resolved)
            .filter(|t| filter.since.map_or(true, |since| t.triggered_at >= since))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        if let Some(limit) = filter.limit {
            list.truncate(limit);
        }
        Ok(list)
    }
}

#[async_trait]
impl BenchmarkRepository for InMemoryStore {
    async fn find_benchmarks(&self, query: &BenchmarkQuery) -> EngineResult<Vec<Benchmark>> {
        Ok(self
            .benchmarks
            .read()
            .await
            .iter()
            .filter(|b| query.matches(b))
            .cloned()
            .collect())
    }

    async fn upsert_benchmark(&self, benchmark: &Benchmark) -> EngineResult<()> {
        let mut benchmarks = self.benchmarks.write().await;
        match benchmarks.iter_mut().find(|b| b.id == benchmark.id) {
            Some(existing) => *existing = benchmark.clone(),
            None => benchmarks.push(benchmark.clone()),
        }
        Ok(())
    }
}

#[async_trait]
impl DashboardRepository for InMemoryStore {
    async fn insert_dashboard(&self, dashboard: &Dashboard) -> EngineResult<()> {
        self.dashboards
            .write()
            .await
            .insert(dashboard.id.clone(), dashboard.clone());
        Ok(())
    }

    async fn update_dashboard(&self, dashboard: &Dashboard) -> EngineResult<()> {
        let mut dashboards = self.dashboards.write().await;
        match dashboards.get_mut(&dashboard.id) {
            Some(existing) => {
                let is_default = existing.is_default && existing.role == dashboard.role;
                *existing = Dashboard {
                    is_default,
                    ..dashboard.clone()
                };
                Ok(())
            }
            None => Err(EngineError::UnknownDashboard(dashboard.id.clone())),
        }
    }

    async fn get_dashboard(&self, id: &str) -> EngineResult<Option<Dashboard>> {
        Ok(self.dashboards.read().await.get(id).cloned())
    }

    async fn delete_dashboard(&self, id: &str) -> EngineResult<bool> {
        Ok(self.dashboards.write().await.remove(id).is_some())
    }

    async fn list_dashboards(&self, tenant_id: &str, role: Option<RoleLevel>) -> EngineResult<Vec<Dashboard>> {
        let mut list: Vec<Dashboard> = self
            .dashboards
            .read()
            .await
            .values()
            .filter(|d| d.tenant_id == tenant_id && role.map_or(true, |r| d.role == r))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn find_default(&self, tenant_id: &str, role: RoleLevel) -> EngineResult<Option<Dashboard>> {
        Ok(self
            .dashboards
            .read()
            .await
            .values()
            .find(|d| d.tenant_id == tenant_id && d.role == role && d.is_default && d.active)
            .cloned())
    }

    async fn set_default(&self, id: &str) -> EngineResult<Dashboard> {
        // one write guard covers both the clear and the set
        let mut dashboards = self.dashboards.write().await;
        let (tenant_id, role) = match dashboards.get(id) {
            Some(d) => (d.tenant_id.clone(), d.role),
            None => return Err(EngineError::UnknownDashboard(id.to_string())),
        };
        for dashboard in dashboards.values_mut() {
            if dashboard.tenant_id == tenant_id && dashboard.role == role {
                dashboard.is_default = dashboard.id == id;
            }
        }
        dashboards
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownDashboard(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertCondition, AlertType, Channel, EvaluationFrequency, NewAlertRule};
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn rule() -> AlertRule {
        AlertRule::from_new(
            "city-a",
            NewAlertRule {
                name: "Queue".into(),
                alert_type: AlertType::Load,
                metric: "queue_length".into(),
                condition: AlertCondition::Greater,
                threshold: 10.0,
                threshold2: None,
                frequency: EvaluationFrequency::Realtime,
                recipients: Vec::new(),
                channels: vec![Channel::Web],
                cooldown_secs: 60,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_record_firing_writes_rule_and_trigger_together() {
        let store = InMemoryStore::new();
        let mut stored = rule();
        store.insert_rule(&stored).await.unwrap();

        let now = Utc::now();
        let trigger = AlertTrigger::new(&stored, 12.0, now);
        stored.last_triggered = Some(now);
        stored.trigger_count += 1;
        store.record_firing(&stored, &trigger).await.unwrap();
        assert_eq!(store.get_rule(&stored.id).await.unwrap().unwrap().trigger_count, 1);
        assert!(store.get_trigger(&trigger.id).await.unwrap().is_some());

        let orphan = rule();
        let lost = AlertTrigger::new(&orphan, 12.0, now);
        assert_matches!(
            store.record_firing(&orphan, &lost).await,
            Err(EngineError::UnknownRule(_))
        );
        assert!(store.get_trigger(&lost.id).await.unwrap().is_none());
    }
}
