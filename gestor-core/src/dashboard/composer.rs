use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::templates::{template_for, DashboardTemplate};
use super::widgets::{DashboardWidget, KpiCardData, RenderedWidget, WidgetConfig, WidgetPayload, WidgetState};
use super::{Dashboard, NewDashboard, RenderedDashboard};
use crate::alerts::AlertEngine;
use crate::benchmark::{BenchmarkComparator, BenchmarkQuery};
use crate::clock::Clock;
use crate::config::DashboardSettings;
use crate::error::{EngineError, EngineResult};
use crate::kpi::KpiEngine;
use crate::store::{DashboardRepository, Stores};
use crate::tenant::{RoleLevel, TenantContext};

/// Owns saved dashboards and binds their widgets to engine outputs at
/// render time.
pub struct DashboardComposer {
    kpis: Arc<KpiEngine>,
    alerts: Arc<AlertEngine>,
    benchmarks: Arc<BenchmarkComparator>,
    repo: Arc<dyn DashboardRepository>,
    clock: Arc<dyn Clock>,
    widget_timeout: Duration,
}

impl DashboardComposer {
    pub fn new(
        stores: &Stores,
        kpis: Arc<KpiEngine>,
        alerts: Arc<AlertEngine>,
        benchmarks: Arc<BenchmarkComparator>,
        clock: Arc<dyn Clock>,
        settings: &DashboardSettings,
    ) -> Self {
        Self {
            kpis,
            alerts,
            benchmarks,
            repo: stores.dashboards.clone(),
            clock,
            widget_timeout: Duration::from_millis(settings.widget_timeout_ms),
        }
    }

    pub fn template_for(&self, level: &str) -> EngineResult<DashboardTemplate> {
        template_for(level)
    }

    // --- management -------------------------------------------------------

    pub async fn save(&self, ctx: &TenantContext, new: NewDashboard) -> EngineResult<Dashboard> {
        let dashboard = Dashboard::from_new(&ctx.tenant_id, new, self.clock.now());
        dashboard.validate()?;
        self.repo.insert_dashboard(&dashboard).await?;
        info!(tenant_id = %ctx.tenant_id, dashboard_id = %dashboard.id, "Saved dashboard '{}'", dashboard.name);
        Ok(dashboard)
    }

    /// Replace name, layout and refresh rate. Only `set_default` writes the
    /// default flag; the store clears it when the role changes.
    pub async fn update(&self, ctx: &TenantContext, id: &str, new: NewDashboard) -> EngineResult<Dashboard> {
        let mut dashboard = self.get(ctx, id).await?;
        dashboard.name = new.name.trim().to_string();
        dashboard.role = new.role;
        dashboard.department = new.department;
        dashboard.widgets = new.widgets;
        dashboard.refresh_secs = new.refresh_secs;
        dashboard.updated_at = self.clock.now();
        dashboard.validate()?;

        self.repo.update_dashboard(&dashboard).await?;
        self.repo
            .get_dashboard(&dashboard.id)
            .await?
            .ok_or(EngineError::UnknownDashboard(dashboard.id))
    }

    pub async fn get(&self, ctx: &TenantContext, id: &str) -> EngineResult<Dashboard> {
        match self.repo.get_dashboard(id).await? {
            Some(d) if ctx.can_access(&d.tenant_id) => Ok(d),
            _ => Err(EngineError::UnknownDashboard(id.to_string())),
        }
    }

    pub async fn list(&self, ctx: &TenantContext, role: Option<RoleLevel>) -> EngineResult<Vec<Dashboard>> {
        self.repo.list_dashboards(&ctx.tenant_id, role).await
    }

    pub async fn delete(&self, ctx: &TenantContext, id: &str) -> EngineResult<()> {
        let dashboard = self.get(ctx, id).await?;
        self.repo.delete_dashboard(&dashboard.id).await?;
        Ok(())
    }

    /// Persist the role template for the tenant. It becomes the default when
    /// the role has none yet.
    pub async fn instantiate_template(&self, ctx: &TenantContext, level: &str) -> EngineResult<Dashboard> {
        let template = template_for(level)?;
        let role = template.role;
        let dashboard = template.into_dashboard(&ctx.tenant_id, self.clock.now());
        dashboard.validate()?;
        self.repo.insert_dashboard(&dashboard).await?;

        if self.repo.find_default(&ctx.tenant_id, role).await?.is_none() {
            return self.repo.set_default(&dashboard.id).await;
        }
        Ok(dashboard)
    }

    /// Exactly one default per (tenant, role); the previous one is cleared.
    pub async fn set_default(&self, ctx: &TenantContext, id: &str) -> EngineResult<Dashboard> {
        let dashboard = self.get(ctx, id).await?;
        let updated = self.repo.set_default(&dashboard.id).await?;
        info!(tenant_id = %updated.tenant_id, role = %updated.role, dashboard_id = %updated.id, "Default dashboard changed");
        Ok(updated)
    }

    // --- rendering --------------------------------------------------------

    /// Render every widget concurrently, each bounded by the widget timeout.
    /// A failing or slow widget becomes an error placeholder; the dashboard
    /// itself only fails when the caller may not see it. Dropping the
    /// returned future abandons in-flight widget fetches.
    pub async fn resolve(&self, dashboard: &Dashboard, ctx: &TenantContext) -> EngineResult<RenderedDashboard> {
        if !ctx.can_access(&dashboard.tenant_id) {
            return Err(EngineError::UnknownDashboard(dashboard.id.clone()));
        }
        Ok(self.render(dashboard, ctx, Some(dashboard.id.clone())).await)
    }

    pub async fn resolve_by_id(&self, ctx: &TenantContext, id: &str) -> EngineResult<RenderedDashboard> {
        let dashboard = self.get(ctx, id).await?;
        self.resolve(&dashboard, ctx).await
    }

    /// The tenant's default dashboard for `level`, or the unsaved template.
    pub async fn resolve_for_role(&self, ctx: &TenantContext, level: &str) -> EngineResult<RenderedDashboard> {
        let template = template_for(level)?;
        match self.repo.find_default(&ctx.tenant_id, template.role).await? {
            Some(dashboard) => Ok(self.render(&dashboard, ctx, Some(dashboard.id.clone())).await),
            None => {
                debug!(tenant_id = %ctx.tenant_id, level, "No saved default, rendering template");
                let dashboard = template.into_dashboard(&ctx.tenant_id, self.clock.now());
                Ok(self.render(&dashboard, ctx, None).await)
            }
        }
    }

    async fn render(&self, dashboard: &Dashboard, ctx: &TenantContext, dashboard_id: Option<String>) -> RenderedDashboard {
        // widgets read the dashboard owner's data, even for a superadmin viewer
        let scope = TenantContext {
            tenant_id: dashboard.tenant_id.clone(),
            ..ctx.clone()
        };

        let widgets = join_all(dashboard.widgets.iter().map(|w| self.render_widget(w, &scope))).await;

        let rendered = RenderedDashboard {
            dashboard_id,
            name: dashboard.name.clone(),
            role: dashboard.role,
            tenant_id: dashboard.tenant_id.clone(),
            refresh_secs: dashboard.refresh_secs,
            rendered_at: self.clock.now(),
            widgets,
        };
        debug!(
            tenant_id = %rendered.tenant_id,
            widgets = rendered.widgets.len(),
            errors = rendered.error_count(),
            "Dashboard rendered"
        );
        rendered
    }

    async fn render_widget(&self, widget: &DashboardWidget, ctx: &TenantContext) -> RenderedWidget {
        let result = match timeout(self.widget_timeout, self.fetch_widget(&widget.config, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::WidgetTimeout(self.widget_timeout.as_millis() as u64)),
        };

        let state = match result {
            Ok(data) => WidgetState::Ready { data },
            Err(e) => {
                warn!(tenant_id = %ctx.tenant_id, widget_id = %widget.id, "Widget degraded: {}", e);
                WidgetState::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                }
            }
        };

        RenderedWidget {
            id: widget.id.clone(),
            title: widget.title.clone(),
            widget_type: widget.config.type_name().to_string(),
            position: widget.position,
            refresh_secs: widget.refresh_secs,
            state,
        }
    }

    async fn fetch_widget(&self, config: &WidgetConfig, ctx: &TenantContext) -> EngineResult<WidgetPayload> {
        let tenant_id = ctx.tenant_id.as_str();
        match config {
            WidgetConfig::KpiCard { kpi } => {
                let definition = self.kpis.resolve_reference(tenant_id, kpi).await?;
                let snapshot = self.kpis.latest(&definition).await?.ok_or_else(|| {
                    EngineError::metric_unavailable(&definition.formula, "KPI has not been computed yet")
                })?;
                Ok(WidgetPayload::KpiCard(KpiCardData {
                    kpi_id: definition.id,
                    name: definition.name,
                    unit: definition.unit,
                    polarity: definition.polarity,
                    target: definition.thresholds.target,
                    value: snapshot.value,
                    status: snapshot.status,
                    trend: snapshot.trend,
                    computed_at: snapshot.computed_at,
                }))
            }
            WidgetConfig::KpiTrend { kpi, period } => {
                let definition = self.kpis.resolve_reference(tenant_id, kpi).await?;
                let points = self.kpis.history(ctx, &definition.id, *period).await?;
                Ok(WidgetPayload::KpiTrend {
                    kpi_id: definition.id,
                    name: definition.name,
                    points,
                })
            }
            WidgetConfig::ScoreSummary { category } => {
                let breakdown = self.kpis.tenant_score(tenant_id).await?;
                let (score, kpi_count) = match category {
                    None => (breakdown.overall, breakdown.kpi_count),
                    Some(category) => breakdown
                        .categories
                        .iter()
                        .find(|c| c.category == *category)
                        .map_or((0.0, 0), |c| (c.score, c.kpi_count)),
                };
                Ok(WidgetPayload::ScoreSummary { score, kpi_count })
            }
            WidgetConfig::AlertList { alert_types, limit } => {
                let triggers = self
                    .alerts
                    .active_triggers(tenant_id)
                    .await?
                    .into_iter()
                    .filter(|t| alert_types.is_empty() || alert_types.contains(&t.alert_type))
                    .take(*limit)
                    .collect();
                Ok(WidgetPayload::AlertList { triggers })
            }
            WidgetConfig::AlertCounter { alert_type } => {
                let stats = self.alerts.stats(tenant_id).await?;
                let count = match alert_type {
                    Some(t) => stats.active_by_type.get(t.as_str()).copied().unwrap_or(0),
                    None => stats.active_triggers,
                };
                Ok(WidgetPayload::AlertCounter { stats, count })
            }
            WidgetConfig::BenchmarkGauge {
                kpi,
                metric,
                region,
                population_bucket,
            } => {
                let query = BenchmarkQuery {
                    metric: metric.clone(),
                    region: region.clone(),
                    population_bucket: population_bucket.clone(),
                    ..Default::default()
                };
                let benchmark = self.benchmarks.benchmark_kpi(ctx, kpi, query).await?;
                Ok(WidgetPayload::Benchmark(benchmark))
            }
            WidgetConfig::Ranking { kpi_name, limit } => {
                let ranking = self.benchmarks.ranking(ctx, kpi_name, *limit).await?;
                Ok(WidgetPayload::Ranking(ranking))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::LoggingSink;
    use crate::clock::ManualClock;
    use crate::config::{AlertSettings, KpiSettings};
    use crate::dashboard::widgets::WidgetPosition;
    use crate::kpi::{KpiCategory, NewKpi, Polarity, Thresholds, UpdateFrequency};
    use crate::source::{InMemoryMetricSource, MetricEvent};
    use crate::kpi::KpiSnapshot;
    use crate::source::TimeWindow;
    use crate::store::{InMemoryStore, SnapshotRepository};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Snapshot log whose reads stall for the listed KPI ids.
    struct StalledSnapshots {
        inner: Arc<InMemoryStore>,
        stalled: Mutex<Vec<String>>,
    }

    impl StalledSnapshots {
        fn stall(&self, kpi_id: &str) {
            self.stalled.lock().unwrap().push(kpi_id.to_string());
        }

        fn is_stalled(&self, kpi_id: &str) -> bool {
            self.stalled.lock().unwrap().iter().any(|id| id == kpi_id)
        }
    }

    #[async_trait]
    impl SnapshotRepository for StalledSnapshots {
        async fn append_snapshot(&self, snapshot: &KpiSnapshot) -> EngineResult<bool> {
            self.inner.append_snapshot(snapshot).await
        }

        async fn latest_snapshot(&self, kpi_id: &str, tenant_id: &str) -> EngineResult<Option<KpiSnapshot>> {
            if self.is_stalled(kpi_id) {
                tokio::time::sleep(Duration::from_secs(600)).await;
            }
            self.inner.latest_snapshot(kpi_id, tenant_id).await
        }

        async fn snapshots_in(
            &self,
            kpi_id: &str,
            tenant_id: &str,
            window: &TimeWindow,
        ) -> EngineResult<Vec<KpiSnapshot>> {
            self.inner.snapshots_in(kpi_id, tenant_id, window).await
        }
    }

    struct Fixture {
        composer: DashboardComposer,
        kpis: Arc<KpiEngine>,
        source: Arc<InMemoryMetricSource>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        fixture_with(Stores::in_memory())
    }

    fn fixture_with(stores: Stores) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let source = Arc::new(InMemoryMetricSource::new());
        let kpis = Arc::new(KpiEngine::new(&stores, source.clone(), clock.clone(), KpiSettings::default()));
        let alerts = Arc::new(AlertEngine::new(
            &stores,
            Arc::new(LoggingSink),
            clock.clone(),
            &AlertSettings::default(),
        ));
        let benchmarks = Arc::new(BenchmarkComparator::new(&stores, kpis.clone(), clock.clone()));
        let composer = DashboardComposer::new(
            &stores,
            kpis.clone(),
            alerts,
            benchmarks,
            clock.clone(),
            &DashboardSettings::default(),
        );
        Fixture {
            composer,
            kpis,
            source,
            clock,
        }
    }

    fn ctx() -> TenantContext {
        TenantContext::new("city-a", "manager-1", RoleLevel::Manager)
    }

    fn layout() -> NewDashboard {
        NewDashboard {
            name: "Operations".into(),
            role: RoleLevel::Manager,
            department: None,
            widgets: vec![
                DashboardWidget::new(
                    "satisfaction",
                    "Satisfaction",
                    WidgetConfig::KpiCard {
                        kpi: "citizen_satisfaction".into(),
                    },
                    WidgetPosition::new(0, 0, 4, 2),
                ),
                DashboardWidget::new(
                    "missing",
                    "Not configured",
                    WidgetConfig::KpiCard {
                        kpi: "does_not_exist".into(),
                    },
                    WidgetPosition::new(4, 0, 4, 2),
                ),
                DashboardWidget::new(
                    "score",
                    "Score",
                    WidgetConfig::ScoreSummary { category: None },
                    WidgetPosition::new(8, 0, 4, 2),
                ),
            ],
            refresh_secs: 60,
        }
    }

    async fn computed_satisfaction(f: &Fixture) {
        let kpi = f
            .kpis
            .create_definition(
                &ctx(),
                NewKpi {
                    name: "citizen_satisfaction".into(),
                    description: None,
                    category: KpiCategory::Quality,
                    formula: "avg(satisfaction_score)".into(),
                    unit: "%".into(),
                    thresholds: Thresholds {
                        target: Some(85.0),
                        warning: Some(70.0),
                        critical: Some(50.0),
                    },
                    polarity: Polarity::HigherIsBetter,
                    frequency: UpdateFrequency::Daily,
                    window_secs: None,
                },
            )
            .await
            .unwrap();
        f.source
            .record(MetricEvent {
                tenant_id: "city-a".into(),
                metric: "satisfaction_score".into(),
                value: 90.0,
                recorded_at: f.clock.now() - chrono::Duration::minutes(5),
            })
            .await;
        f.kpis.compute_value(&kpi.id, "city-a").await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_widget_degrades_to_placeholder() {
        let f = fixture();
        computed_satisfaction(&f).await;
        let dashboard = f.composer.save(&ctx(), layout()).await.unwrap();

        let rendered = f.composer.resolve(&dashboard, &ctx()).await.unwrap();
        assert_eq!(rendered.widgets.len(), 3);
        assert_eq!(rendered.error_count(), 1);

        let missing = rendered.widgets.iter().find(|w| w.id == "missing").unwrap();
        assert_matches!(&missing.state, WidgetState::Error { code, .. } if code == "UNKNOWN_KPI");

        let card = rendered.widgets.iter().find(|w| w.id == "satisfaction").unwrap();
        assert_matches!(
            &card.state,
            WidgetState::Ready { data: WidgetPayload::KpiCard(data) } if data.value == 90.0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_widget_times_out_while_siblings_render() {
        let shared = Arc::new(InMemoryStore::new());
        let snapshots = Arc::new(StalledSnapshots {
            inner: shared.clone(),
            stalled: Mutex::new(Vec::new()),
        });
        let f = fixture_with(Stores {
            snapshots: snapshots.clone(),
            ..Stores::from_shared(shared)
        });
        computed_satisfaction(&f).await;

        let slow = f
            .kpis
            .create_definition(
                &ctx(),
                NewKpi {
                    name: "permit_backlog".into(),
                    description: None,
                    category: KpiCategory::Operational,
                    formula: "count(open_permits)".into(),
                    unit: "permits".into(),
                    thresholds: Thresholds::default(),
                    polarity: Polarity::LowerIsBetter,
                    frequency: UpdateFrequency::Daily,
                    window_secs: None,
                },
            )
            .await
            .unwrap();
        snapshots.stall(&slow.id);

        let mut new = layout();
        new.widgets[1] = DashboardWidget::new(
            "backlog",
            "Permit backlog",
            WidgetConfig::KpiCard {
                kpi: "permit_backlog".into(),
            },
            WidgetPosition::new(4, 0, 4, 2),
        );
        new.widgets[2] = DashboardWidget::new(
            "alerts",
            "Active alerts",
            WidgetConfig::AlertCounter { alert_type: None },
            WidgetPosition::new(8, 0, 4, 2),
        );
        let dashboard = f.composer.save(&ctx(), new).await.unwrap();

        let started = tokio::time::Instant::now();
        let rendered = f.composer.resolve(&dashboard, &ctx()).await.unwrap();
        let elapsed = started.elapsed();
        let budget = Duration::from_millis(DashboardSettings::default().widget_timeout_ms);
        assert!(elapsed >= budget);
        assert!(elapsed < Duration::from_secs(600));

        assert_eq!(rendered.error_count(), 1);
        let backlog = rendered.widgets.iter().find(|w| w.id == "backlog").unwrap();
        assert_matches!(&backlog.state, WidgetState::Error { code, .. } if code == "WIDGET_TIMEOUT");

        let card = rendered.widgets.iter().find(|w| w.id == "satisfaction").unwrap();
        assert_matches!(
            &card.state,
            WidgetState::Ready { data: WidgetPayload::KpiCard(data) } if data.value == 90.0
        );
        let alerts = rendered.widgets.iter().find(|w| w.id == "alerts").unwrap();
        assert_matches!(
            &alerts.state,
            WidgetState::Ready { data: WidgetPayload::AlertCounter { count: 0, .. } }
        );
    }

    #[tokio::test]
    async fn test_single_default_per_role() {
        let f = fixture();
        let first = f.composer.instantiate_template(&ctx(), "manager").await.unwrap();
        assert!(first.is_default);

        let second = f.composer.save(&ctx(), layout()).await.unwrap();
        f.composer.set_default(&ctx(), &second.id).await.unwrap();

        let defaults: Vec<_> = f
            .composer
            .list(&ctx(), Some(RoleLevel::Manager))
            .await
            .unwrap()
            .into_iter()
            .filter(|d| d.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, second.id);
    }

    #[tokio::test]
    async fn test_update_never_restores_a_stale_default() {
        let f = fixture();
        let first = f.composer.instantiate_template(&ctx(), "manager").await.unwrap();
        assert!(first.is_default);
        let second = f.composer.save(&ctx(), layout()).await.unwrap();

        // `first` was loaded as default; another caller moves the default away
        let stale = f.composer.get(&ctx(), &first.id).await.unwrap();
        f.composer.set_default(&ctx(), &second.id).await.unwrap();
        let mut edit = layout();
        edit.name = stale.name.clone();
        edit.widgets.truncate(1);
        let updated = f.composer.update(&ctx(), &first.id, edit).await.unwrap();
        assert!(!updated.is_default);

        let defaults: Vec<_> = f
            .composer
            .list(&ctx(), Some(RoleLevel::Manager))
            .await
            .unwrap()
            .into_iter()
            .filter(|d| d.is_default)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, second.id);

        // moving the default dashboard to another role drops the flag
        let mut moved = layout();
        moved.role = RoleLevel::Executive;
        let moved = f.composer.update(&ctx(), &second.id, moved).await.unwrap();
        assert!(!moved.is_default);
    }

    #[tokio::test]
    async fn test_resolve_for_role_falls_back_to_template() {
        let f = fixture();
        let rendered = f.composer.resolve_for_role(&ctx(), "executive").await.unwrap();
        assert_eq!(rendered.dashboard_id, None);
        assert_eq!(rendered.role, RoleLevel::Executive);
        assert!(!rendered.widgets.is_empty());

        assert_matches!(
            f.composer.resolve_for_role(&ctx(), "mayor").await,
            Err(EngineError::NoTemplate(_))
        );
    }

    #[tokio::test]
    async fn test_invalid_layout_is_rejected_on_save() {
        let f = fixture();
        let mut new = layout();
        new.widgets[1].position = WidgetPosition::new(2, 1, 4, 2);
        assert_matches!(f.composer.save(&ctx(), new).await, Err(EngineError::InvalidDashboard(_)));
    }

    #[tokio::test]
    async fn test_other_tenant_cannot_render() {
        let f = fixture();
        let dashboard = f.composer.save(&ctx(), layout()).await.unwrap();
        let stranger = TenantContext::new("city-b", "x", RoleLevel::Manager);
        assert_matches!(
            f.composer.resolve(&dashboard, &stranger).await,
            Err(EngineError::UnknownDashboard(_))
        );
    }
}
