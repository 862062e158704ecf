//! Periodic KPI recalculation and cadence-aligned alert evaluation.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alerts::{AlertEngine, AlertRule, EvaluationFrequency, EvaluationOutcome};
use crate::clock::Clock;
use crate::config::SchedulerSettings;
use crate::error::{EngineError, EngineResult};
use crate::kpi::{KpiEngine, RecalculationReport, UpdateFrequency};
use crate::source::{FormulaRef, MetricEvent, MetricSource, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    KpiRecalc,
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    pub const ALL: [Cadence; 4] = [Cadence::KpiRecalc, Cadence::Daily, Cadence::Weekly, Cadence::Monthly];

    fn alert_frequency(&self) -> Option<EvaluationFrequency> {
        match self {
            Cadence::KpiRecalc => None,
            Cadence::Daily => Some(EvaluationFrequency::Daily),
            Cadence::Weekly => Some(EvaluationFrequency::Weekly),
            Cadence::Monthly => Some(EvaluationFrequency::Monthly),
        }
    }

    /// Look-back window for raw metrics evaluated at this cadence.
    fn window(&self) -> Duration {
        match self {
            Cadence::KpiRecalc | Cadence::Daily => Duration::days(1),
            Cadence::Weekly => Duration::days(7),
            Cadence::Monthly => Duration::days(30),
        }
    }
}

/// Key identifying the tick a cadence belongs to at `now`. Running the same
/// key twice is a no-op.
pub fn tick_key(cadence: Cadence, now: DateTime<Utc>, kpi_interval_secs: u64) -> String {
    match cadence {
        Cadence::KpiRecalc => {
            let interval = kpi_interval_secs.max(1) as i64;
            format!("kpi:{}", now.timestamp().div_euclid(interval))
        }
        Cadence::Daily => format!("daily:{}", now.format("%Y-%m-%d")),
        Cadence::Weekly => {
            let week = now.iso_week();
            format!("weekly:{}-W{:02}", week.year(), week.week())
        }
        Cadence::Monthly => format!("monthly:{}", now.format("%Y-%m")),
    }
}

/// Tick key of a KPI update frequency; a KPI is recomputed once per key.
/// Realtime KPIs follow the recalculation interval.
pub fn kpi_tick_key(frequency: UpdateFrequency, now: DateTime<Utc>, kpi_interval_secs: u64) -> String {
    match frequency {
        UpdateFrequency::Realtime => tick_key(Cadence::KpiRecalc, now, kpi_interval_secs),
        UpdateFrequency::Hourly => format!("hourly:{}", now.format("%Y-%m-%dT%H")),
        UpdateFrequency::Daily => tick_key(Cadence::Daily, now, kpi_interval_secs),
        UpdateFrequency::Weekly => tick_key(Cadence::Weekly, now, kpi_interval_secs),
        UpdateFrequency::Monthly => tick_key(Cadence::Monthly, now, kpi_interval_secs),
    }
}

#[derive(Debug, Default)]
struct RunState {
    cadences: HashMap<Cadence, String>,
    kpi_frequencies: HashMap<UpdateFrequency, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    /// Tick keys executed by this call; already-run keys are absent.
    pub ran: Vec<String>,
    pub kpi_reports: Vec<RecalculationReport>,
    pub rules_evaluated: usize,
    pub alerts_fired: usize,
    pub failures: Vec<String>,
}

pub struct Scheduler {
    kpis: Arc<KpiEngine>,
    alerts: Arc<AlertEngine>,
    source: Arc<dyn MetricSource>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    // last keys run; held for the whole tick
    last_run: Mutex<RunState>,
}

impl Scheduler {
    pub fn new(
        kpis: Arc<KpiEngine>,
        alerts: Arc<AlertEngine>,
        source: Arc<dyn MetricSource>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            kpis,
            alerts,
            source,
            clock,
            settings,
            last_run: Mutex::new(RunState::default()),
        }
    }

    /// Run every cadence whose tick key changed since its last run. Failures
    /// of one tenant or rule land in the report and never stop the others.
    pub async fn run_due(&self, now: DateTime<Utc>) -> EngineResult<TickReport> {
        let mut state = self.last_run.lock().await;
        let mut report = TickReport::default();

        for cadence in Cadence::ALL {
            let key = tick_key(cadence, now, self.settings.kpi_recalc_interval_secs);
            if state.cadences.get(&cadence) == Some(&key) {
                continue;
            }

            let completed = match cadence.alert_frequency() {
                None => self.recalculate_kpis(now, &mut state, &mut report).await,
                Some(frequency) => self.evaluate_rules(cadence, frequency, now, &mut report).await,
            };
            if completed {
                state.cadences.insert(cadence, key.clone());
                report.ran.push(key);
            }
        }

        if !report.ran.is_empty() || !report.failures.is_empty() {
            info!(
                ticks = ?report.ran,
                rules = report.rules_evaluated,
                fired = report.alerts_fired,
                failures = report.failures.len(),
                "Scheduler tick finished"
            );
        }
        Ok(report)
    }

    /// Recompute the KPIs whose frequency reached a new tick key. Returns
    /// `false` when the tenants could not be listed, so the tick is retried.
    async fn recalculate_kpis(&self, now: DateTime<Utc>, state: &mut RunState, report: &mut TickReport) -> bool {
        let due: HashMap<UpdateFrequency, String> = UpdateFrequency::ALL
            .into_iter()
            .map(|f| (f, kpi_tick_key(f, now, self.settings.kpi_recalc_interval_secs)))
            .filter(|(f, key)| state.kpi_frequencies.get(f) != Some(key))
            .collect();
        if due.is_empty() {
            return true;
        }

        let tenants = match self.kpis.tenants().await {
            Ok(tenants) => tenants,
            Err(e) => {
                error!("Listing KPI tenants failed: {}", e);
                report.failures.push(format!("kpi tenants: {}", e));
                return false;
            }
        };
        for tenant_id in tenants {
            match self.kpis.recalculate_due(&tenant_id, &due).await {
                Ok(tenant_report) => report.kpi_reports.push(tenant_report),
                Err(e) => {
                    warn!(tenant_id = %tenant_id, "KPI tick failed: {}", e);
                    report.failures.push(format!("{}: {}", tenant_id, e));
                }
            }
        }
        state.kpi_frequencies.extend(due);
        true
    }

    async fn evaluate_rules(
        &self,
        cadence: Cadence,
        frequency: EvaluationFrequency,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> bool {
        let tenants = match self.alerts.tenants().await {
            Ok(tenants) => tenants,
            Err(e) => {
                error!("Listing alert tenants failed: {}", e);
                report.failures.push(format!("alert tenants: {}", e));
                return false;
            }
        };
        for tenant_id in tenants {
            let rules = match self.alerts.rules_due(&tenant_id, frequency).await {
                Ok(rules) => rules,
                Err(e) => {
                    warn!(tenant_id = %tenant_id, "Loading scheduled rules failed: {}", e);
                    report.failures.push(format!("{}: {}", tenant_id, e));
                    continue;
                }
            };
            for rule in rules {
                report.rules_evaluated += 1;
                match self.evaluate_one(&rule, cadence, now).await {
                    Ok(outcome) => {
                        if outcome.fired.as_ref().is_some_and(|f| f.trigger().is_some()) {
                            report.alerts_fired += 1;
                        }
                    }
                    Err(e) => {
                        warn!(tenant_id = %tenant_id, rule_id = %rule.id, "Scheduled evaluation failed: {}", e);
                        report.failures.push(format!("{}: {}", rule.id, e));
                    }
                }
            }
        }
        true
    }

    async fn evaluate_one(&self, rule: &AlertRule, cadence: Cadence, now: DateTime<Utc>) -> EngineResult<EvaluationOutcome> {
        let value = self.metric_value(&rule.tenant_id, &rule.metric, cadence.window(), now).await?;
        self.alerts.evaluate_rule(rule, value).await
    }

    /// A rule metric naming a KPI reads its latest snapshot; anything else is
    /// queried from the metric source over the cadence window.
    async fn metric_value(&self, tenant_id: &str, metric: &str, window: Duration, now: DateTime<Utc>) -> EngineResult<f64> {
        match self.kpis.resolve_reference(tenant_id, metric).await {
            Ok(definition) => self
                .kpis
                .latest(&definition)
                .await?
                .map(|s| s.value)
                .ok_or_else(|| EngineError::metric_unavailable(metric, "KPI has not been computed yet")),
            Err(EngineError::UnknownKpi(_)) => {
                self.source
                    .query(tenant_id, metric, &TimeWindow::trailing(now, window))
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Evaluate the tenant's realtime rules that read `event.metric`, after
    /// the event has been stored.
    ///
    /// A rule on a formula reference is judged on the formula over the
    /// realtime window, a rule on a KPI on a fresh (unsaved) evaluation of
    /// that KPI, and a rule on the bare metric name on the event value.
    pub async fn on_metric_event(&self, event: &MetricEvent) -> EngineResult<Vec<EvaluationOutcome>> {
        debug!(tenant_id = %event.tenant_id, metric = %event.metric, "Realtime metric event");
        let rules = self
            .alerts
            .rules_due(&event.tenant_id, EvaluationFrequency::Realtime)
            .await?;

        let mut pending = Vec::new();
        for rule in rules {
            match self.realtime_value(&rule, event).await {
                Ok(Some(value)) => pending.push((rule, value)),
                Ok(None) => {}
                Err(e) => warn!(tenant_id = %event.tenant_id, rule_id = %rule.id, "Realtime value unavailable: {}", e),
            }
        }
        Ok(self.alerts.evaluate_all(&pending).await)
    }

    /// `None` when the rule does not read the event's metric.
    async fn realtime_value(&self, rule: &AlertRule, event: &MetricEvent) -> EngineResult<Option<f64>> {
        // the window must include the event itself
        let end = self.clock.now().max(event.recorded_at) + Duration::seconds(1);

        if let Ok(formula) = rule.metric.parse::<FormulaRef>() {
            if !formula.metrics().contains(&event.metric.as_str()) {
                return Ok(None);
            }
            let length = self.kpis.settings().window_for(UpdateFrequency::Realtime);
            let value = self
                .source
                .query(&event.tenant_id, &rule.metric, &TimeWindow::trailing(end, length))
                .await?;
            return Ok(Some(value));
        }

        match self.kpis.resolve_reference(&event.tenant_id, &rule.metric).await {
            Ok(definition) => {
                let reads_event = definition
                    .formula
                    .parse::<FormulaRef>()
                    .is_ok_and(|f| f.metrics().contains(&event.metric.as_str()));
                if !reads_event || !definition.active {
                    return Ok(None);
                }
                self.kpis.evaluate_definition(&definition, end).await.map(Some)
            }
            Err(EngineError::UnknownKpi(_)) => Ok((rule.metric == event.metric).then_some(event.value)),
            Err(e) => Err(e),
        }
    }

    /// Drive `run_due` from an interval until `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = std::time::Duration::from_secs(self.settings.tick_interval_secs.max(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = period.as_secs(), "Scheduler started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Scheduler stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.run_due(self.clock.now()).await {
                            error!("Scheduler tick failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertCondition, AlertType, Channel, LoggingSink, NewAlertRule};
    use crate::clock::ManualClock;
    use crate::config::{AlertSettings, KpiSettings};
    use crate::kpi::{KpiCategory, NewKpi, Polarity, Thresholds, UpdateFrequency};
    use crate::source::InMemoryMetricSource;
    use crate::store::{AlertRuleRepository, InMemoryStore, Stores, TriggerFilter};
    use crate::tenant::{RoleLevel, TenantContext};
    use async_trait::async_trait;
    use chrono::TimeZone;

    #[test]
    fn test_tick_keys() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 10, 30, 0).unwrap();
        assert_eq!(tick_key(Cadence::Daily, at, 900), "daily:2026-01-01");
        assert_eq!(tick_key(Cadence::Weekly, at, 900), "weekly:2026-W01");
        assert_eq!(tick_key(Cadence::Monthly, at, 900), "monthly:2026-01");

        let later = at + Duration::minutes(15);
        assert_ne!(tick_key(Cadence::KpiRecalc, at, 900), tick_key(Cadence::KpiRecalc, later, 900));
        assert_eq!(
            tick_key(Cadence::KpiRecalc, at, 900),
            tick_key(Cadence::KpiRecalc, at + Duration::minutes(5), 900)
        );
    }

    struct Fixture {
        scheduler: Scheduler,
        kpis: Arc<KpiEngine>,
        alerts: Arc<AlertEngine>,
        source: Arc<InMemoryMetricSource>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        fixture_with(Stores::in_memory())
    }

    fn fixture_with(stores: Stores) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()));
        let source = Arc::new(InMemoryMetricSource::new());
        let kpis = Arc::new(KpiEngine::new(&stores, source.clone(), clock.clone(), KpiSettings::default()));
        let alerts = Arc::new(AlertEngine::new(
            &stores,
            Arc::new(LoggingSink),
            clock.clone(),
            &AlertSettings::default(),
        ));
        let scheduler = Scheduler::new(
            kpis.clone(),
            alerts.clone(),
            source.clone(),
            clock.clone(),
            SchedulerSettings::default(),
        );
        Fixture {
            scheduler,
            kpis,
            alerts,
            source,
            clock,
        }
    }

    async fn seed(f: &Fixture) {
        let ctx = TenantContext::new("city-a", "admin", RoleLevel::Manager);
        f.kpis
            .create_definition(
                &ctx,
                NewKpi {
                    name: "open_requests".into(),
                    description: None,
                    category: KpiCategory::Operational,
                    formula: "count(service_request)".into(),
                    unit: "requests".into(),
                    thresholds: Thresholds::default(),
                    polarity: Polarity::LowerIsBetter,
                    frequency: UpdateFrequency::Daily,
                    window_secs: None,
                },
            )
            .await
            .unwrap();
        f.alerts
            .create_rule(
                &ctx,
                NewAlertRule {
                    name: "Daily overdue check".into(),
                    alert_type: AlertType::Deadline,
                    metric: "count(overdue_protocol)".into(),
                    condition: AlertCondition::Greater,
                    threshold: 0.0,
                    threshold2: None,
                    frequency: EvaluationFrequency::Daily,
                    recipients: Vec::new(),
                    channels: vec![Channel::Web],
                    cooldown_secs: 3600,
                },
            )
            .await
            .unwrap();
        for metric in ["service_request", "overdue_protocol"] {
            f.source
                .record(MetricEvent {
                    tenant_id: "city-a".into(),
                    metric: metric.into(),
                    value: 1.0,
                    recorded_at: f.clock.now() - Duration::hours(1),
                })
                .await;
        }
    }

    #[tokio::test]
    async fn test_repeated_tick_is_idempotent() {
        let f = fixture();
        seed(&f).await;
        let now = f.clock.now();

        let first = f.scheduler.run_due(now).await.unwrap();
        assert_eq!(first.ran.len(), 4);
        assert_eq!(first.kpi_reports[0].computed.len(), 1);
        assert_eq!(first.alerts_fired, 1);

        let second = f.scheduler.run_due(now).await.unwrap();
        assert!(second.ran.is_empty());

        let triggers = f.alerts.list_triggers("city-a", &TriggerFilter::default()).await.unwrap();
        assert_eq!(triggers.len(), 1);
    }

    #[tokio::test]
    async fn test_new_day_runs_daily_rules_again() {
        let f = fixture();
        seed(&f).await;
        f.scheduler.run_due(f.clock.now()).await.unwrap();

        f.clock.advance(Duration::days(1));
        let next = f.scheduler.run_due(f.clock.now()).await.unwrap();
        assert!(next.ran.iter().any(|k| k == "daily:2026-03-03"));
        assert_eq!(next.rules_evaluated, 1);
    }

    fn ctx() -> TenantContext {
        TenantContext::new("city-a", "admin", RoleLevel::Manager)
    }

    fn kpi(name: &str, formula: &str, frequency: UpdateFrequency) -> NewKpi {
        NewKpi {
            name: name.into(),
            description: None,
            category: KpiCategory::Operational,
            formula: formula.into(),
            unit: "count".into(),
            thresholds: Thresholds::default(),
            polarity: Polarity::LowerIsBetter,
            frequency,
            window_secs: None,
        }
    }

    fn realtime_rule(metric: &str, threshold: f64) -> NewAlertRule {
        NewAlertRule {
            name: format!("Watch {}", metric),
            alert_type: AlertType::Load,
            metric: metric.into(),
            condition: AlertCondition::Greater,
            threshold,
            threshold2: None,
            frequency: EvaluationFrequency::Realtime,
            recipients: Vec::new(),
            channels: vec![Channel::Web],
            cooldown_secs: 3600,
        }
    }

    async fn ingest(f: &Fixture, metric: &str, value: f64) -> Vec<EvaluationOutcome> {
        let event = MetricEvent {
            tenant_id: "city-a".into(),
            metric: metric.into(),
            value,
            recorded_at: f.clock.now(),
        };
        f.source.record(event.clone()).await;
        f.scheduler.on_metric_event(&event).await.unwrap()
    }

    #[tokio::test]
    async fn test_kpis_recompute_only_on_their_own_cadence() {
        let f = fixture();
        seed(&f).await;
        f.kpis
            .create_definition(&ctx(), kpi("monthly_requests", "count(service_request)", UpdateFrequency::Monthly))
            .await
            .unwrap();

        let first = f.scheduler.run_due(f.clock.now()).await.unwrap();
        assert_eq!(first.kpi_reports[0].computed.len(), 2);
        let ticks: Vec<_> = first.kpi_reports[0]
            .computed
            .iter()
            .filter_map(|s| s.tick_id.clone())
            .collect();
        assert!(ticks.contains(&"daily:2026-03-02".to_string()));
        assert!(ticks.contains(&"monthly:2026-03".to_string()));

        // next recalculation interval, same day and month
        f.clock.advance(Duration::minutes(16));
        let later = f.scheduler.run_due(f.clock.now()).await.unwrap();
        assert!(later.ran.iter().any(|k| k.starts_with("kpi:")));
        assert!(later.kpi_reports.iter().all(|r| r.computed.is_empty()));

        f.clock.advance(Duration::days(1));
        let next_day = f.scheduler.run_due(f.clock.now()).await.unwrap();
        let computed: Vec<_> = next_day.kpi_reports.iter().flat_map(|r| r.computed.iter()).collect();
        assert_eq!(computed.len(), 1);
        assert_eq!(computed[0].tick_id.as_deref(), Some("daily:2026-03-03"));
    }

    struct BrokenTenantRules {
        inner: Arc<InMemoryStore>,
        broken: &'static str,
    }

    #[async_trait]
    impl AlertRuleRepository for BrokenTenantRules {
        async fn insert_rule(&self, rule: &AlertRule) -> EngineResult<()> {
            self.inner.insert_rule(rule).await
        }
        async fn update_rule(&self, rule: &AlertRule) -> EngineResult<()> {
            self.inner.update_rule(rule).await
        }
        async fn get_rule(&self, id: &str) -> EngineResult<Option<AlertRule>> {
            self.inner.get_rule(id).await
        }
        async fn delete_rule(&self, id: &str) -> EngineResult<bool> {
            self.inner.delete_rule(id).await
        }
        async fn list_rules(&self, tenant_id: &str) -> EngineResult<Vec<AlertRule>> {
            if tenant_id == self.broken {
                return Err(EngineError::storage("database is locked"));
            }
            self.inner.list_rules(tenant_id).await
        }
        async fn rule_tenants(&self) -> EngineResult<Vec<String>> {
            self.inner.rule_tenants().await
        }
    }

    #[tokio::test]
    async fn test_store_error_in_one_tenant_does_not_skip_the_rest() {
        let shared = Arc::new(InMemoryStore::new());
        let mut stores = Stores::from_shared(shared.clone());
        stores.rules = Arc::new(BrokenTenantRules {
            inner: shared,
            broken: "city-a",
        });
        let f = fixture_with(stores);
        seed(&f).await;

        let other = TenantContext::new("city-b", "admin", RoleLevel::Manager);
        let mut rule = realtime_rule("count(overdue_protocol)", 0.0);
        rule.frequency = EvaluationFrequency::Daily;
        f.alerts.create_rule(&other, rule).await.unwrap();
        f.source
            .record(MetricEvent {
                tenant_id: "city-b".into(),
                metric: "overdue_protocol".into(),
                value: 1.0,
                recorded_at: f.clock.now() - Duration::hours(1),
            })
            .await;

        let report = f.scheduler.run_due(f.clock.now()).await.unwrap();
        assert_eq!(report.rules_evaluated, 1);
        assert_eq!(report.alerts_fired, 1);
        assert!(report.failures.iter().any(|msg| msg.starts_with("city-a")));
        let fired = f.alerts.list_triggers("city-b", &TriggerFilter::default()).await.unwrap();
        assert_eq!(fired.len(), 1);
    }

    #[tokio::test]
    async fn test_realtime_formula_rule_judges_the_aggregate() {
        let f = fixture();
        f.alerts
            .create_rule(&ctx(), realtime_rule("count(protocols_overdue)", 2.0))
            .await
            .unwrap();

        let first = ingest(&f, "protocols_overdue", 50.0).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].value, 1.0);
        assert!(!first[0].condition_met);

        ingest(&f, "protocols_overdue", 1.0).await;
        let third = ingest(&f, "protocols_overdue", 1.0).await;
        assert_eq!(third[0].value, 3.0);
        assert!(third[0].fired.as_ref().is_some_and(|o| o.trigger().is_some()));

        assert!(ingest(&f, "service_request", 9.0).await.is_empty());
    }

    #[tokio::test]
    async fn test_realtime_rules_on_kpis_and_raw_metrics() {
        let f = fixture();
        f.kpis
            .create_definition(&ctx(), kpi("waiting_total", "sum(queue_wait)", UpdateFrequency::Daily))
            .await
            .unwrap();
        f.alerts
            .create_rule(&ctx(), realtime_rule("waiting_total", 10.0))
            .await
            .unwrap();
        f.alerts
            .create_rule(&ctx(), realtime_rule("queue_wait", 6.0))
            .await
            .unwrap();

        ingest(&f, "queue_wait", 5.0).await;
        let outcomes = ingest(&f, "queue_wait", 7.0).await;
        assert_eq!(outcomes.len(), 2);
        let mut values: Vec<f64> = outcomes.iter().map(|o| o.value).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        // the raw rule sees the event, the KPI rule the KPI's sum
        assert_eq!(values, vec![7.0, 12.0]);
        assert!(outcomes.iter().all(|o| o.condition_met));
        // evaluating for a rule stores no snapshot
        assert!(f.kpis.current_values("city-a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_stops_on_cancel() {
        let f = fixture();
        let scheduler = Arc::new(f.scheduler);
        let token = CancellationToken::new();
        let handle = scheduler.clone().spawn(token.clone());
        token.cancel();
        handle.await.unwrap();
    }
}
