// Engine Integration Tests
// End-to-end flows across KPI, alert, benchmark and dashboard components

use chrono::{Duration, TimeZone, Utc};
use gestor_core::alerts::{AlertCondition, AlertType, Channel, EvaluationFrequency, LoggingSink, NewAlertRule};
use gestor_core::config::EngineConfig;
use gestor_core::dashboard::{DashboardWidget, NewDashboard, WidgetConfig, WidgetPosition, WidgetState};
use gestor_core::kpi::{KpiCategory, NewKpi, Thresholds, UpdateFrequency};
use gestor_core::store::{BenchmarkRepository, TriggerFilter};
use gestor_core::*;
use std::sync::Arc;

struct Harness {
    engine: AnalyticsEngine,
    source: Arc<InMemoryMetricSource>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let source = Arc::new(InMemoryMetricSource::new());
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap()));
    let engine = AnalyticsEngine::new(
        Stores::in_memory(),
        source.clone(),
        Arc::new(LoggingSink),
        clock.clone(),
        &EngineConfig::default(),
    );
    Harness { engine, source, clock }
}

fn manager(tenant: &str) -> TenantContext {
    TenantContext::new(tenant, "manager-1", RoleLevel::Manager)
}

fn satisfaction_kpi() -> NewKpi {
    NewKpi {
        name: "citizen_satisfaction".into(),
        description: Some("Average survey score".into()),
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
    }
}

async fn record(h: &Harness, tenant: &str, metric: &str, value: f64) {
    h.source
        .record(MetricEvent {
            tenant_id: tenant.into(),
            metric: metric.into(),
            value,
            recorded_at: h.clock.now() - Duration::minutes(1),
        })
        .await;
}

#[tokio::test]
async fn test_kpi_at_sixty_is_warning() {
    let h = harness();
    let kpi = h
        .engine
        .kpis
        .create_definition(&manager("city-a"), satisfaction_kpi())
        .await
        .unwrap();
    record(&h, "city-a", "satisfaction_score", 60.0).await;

    let snapshot = h.engine.kpis.compute_value(&kpi.id, "city-a").await.unwrap();
    assert_eq!(snapshot.status, KpiStatus::Warning);
    assert_eq!(snapshot.trend, Trend::Stable);
}

#[tokio::test]
async fn test_repeated_condition_inside_cooldown_triggers_once() {
    let h = harness();
    let ctx = manager("city-a");
    let rule = h
        .engine
        .alerts
        .create_rule(
            &ctx,
            NewAlertRule {
                name: "Overdue protocols".into(),
                alert_type: AlertType::Deadline,
                metric: "overdue_protocols".into(),
                condition: AlertCondition::Greater,
                threshold: 0.0,
                threshold2: None,
                frequency: EvaluationFrequency::Realtime,
                recipients: vec!["ops@city-a.gov".into()],
                channels: vec![Channel::Email, Channel::Web],
                cooldown_secs: 3600,
            },
        )
        .await
        .unwrap();

    for offset in [0, 10, 20] {
        if offset > 0 {
            h.clock.advance(Duration::seconds(10));
        }
        h.engine.alerts.evaluate_and_fire(&rule.id, 1.0).await.unwrap();
    }

    let triggers = h
        .engine
        .alerts
        .list_triggers("city-a", &TriggerFilter::default())
        .await
        .unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].triggered_at, Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap());
}

#[tokio::test]
async fn test_value_at_p75_benchmarks_excellent() {
    let h = harness();
    let ctx = manager("city-a");
    h.engine
        .stores
        .benchmarks
        .upsert_benchmark(&Benchmark {
            id: "sat-2025".into(),
            metric: "citizen_satisfaction".into(),
            category: Some("quality".into()),
            region: Some("south".into()),
            population_bucket: Some("50k-100k".into()),
            p25: Some(40.0),
            p50: Some(60.0),
            p75: Some(80.0),
            average: Some(61.0),
            sample_size: 84,
            period: "annual".into(),
            year: 2025,
            source: "state survey".into(),
            updated_at: h.clock.now(),
        })
        .await
        .unwrap();

    let kpi = h.engine.kpis.create_definition(&ctx, satisfaction_kpi()).await.unwrap();
    record(&h, "city-a", "satisfaction_score", 80.0).await;
    h.engine.kpis.compute_value(&kpi.id, "city-a").await.unwrap();

    let result = h
        .engine
        .benchmarks
        .benchmark_kpi(&ctx, "citizen_satisfaction", BenchmarkQuery::for_metric("citizen_satisfaction"))
        .await
        .unwrap();
    assert_eq!(result.comparisons.len(), 1);
    let comparison = &result.comparisons[0].comparison;
    assert_eq!(comparison.status, BenchmarkStatus::Excellent);
    assert_eq!(comparison.percentile, 75);
    assert!(!result.suggestions.is_empty());
}

#[tokio::test]
async fn test_dashboard_renders_with_one_failed_widget() {
    let h = harness();
    let ctx = manager("city-a");
    let kpi = h.engine.kpis.create_definition(&ctx, satisfaction_kpi()).await.unwrap();
    record(&h, "city-a", "satisfaction_score", 88.0).await;
    h.engine.kpis.compute_value(&kpi.id, "city-a").await.unwrap();

    let dashboard = h
        .engine
        .dashboards
        .save(
            &ctx,
            NewDashboard {
                name: "Quality".into(),
                role: RoleLevel::Manager,
                department: None,
                widgets: vec![
                    DashboardWidget::new(
                        "card",
                        "Satisfaction",
                        WidgetConfig::KpiCard { kpi: kpi.id.clone() },
                        WidgetPosition::new(0, 0, 4, 2),
                    ),
                    DashboardWidget::new(
                        "score",
                        "Score",
                        WidgetConfig::ScoreSummary { category: None },
                        WidgetPosition::new(4, 0, 4, 2),
                    ),
                    DashboardWidget::new(
                        "broken",
                        "Budget",
                        WidgetConfig::KpiCard {
                            kpi: "budget_execution".into(),
                        },
                        WidgetPosition::new(8, 0, 4, 2),
                    ),
                ],
                refresh_secs: 60,
            },
        )
        .await
        .unwrap();

    let rendered = h.engine.dashboards.resolve(&dashboard, &ctx).await.unwrap();
    assert_eq!(rendered.widgets.len(), 3);
    assert_eq!(rendered.error_count(), 1);
    let ready = rendered
        .widgets
        .iter()
        .filter(|w| matches!(w.state, WidgetState::Ready { .. }))
        .count();
    assert_eq!(ready, 2);
}

#[tokio::test]
async fn test_ranking_masks_other_tenants() {
    let h = harness();
    for (tenant, score) in [("city-a", 70.0), ("city-b", 90.0), ("city-c", 50.0)] {
        let kpi = h
            .engine
            .kpis
            .create_definition(&manager(tenant), satisfaction_kpi())
            .await
            .unwrap();
        record(&h, tenant, "satisfaction_score", score).await;
        h.engine.kpis.compute_value(&kpi.id, tenant).await.unwrap();
    }

    let ranking = h
        .engine
        .benchmarks
        .ranking(&manager("city-a"), "citizen_satisfaction", 10)
        .await
        .unwrap();
    assert_eq!(ranking.total, 3);
    assert_eq!(ranking.position, Some(2));
    assert_eq!(ranking.entries[0].tenant_id, None);
    assert_eq!(ranking.entries[1].tenant_id.as_deref(), Some("city-a"));

    let admin = TenantContext::new("platform", "root", RoleLevel::Superadmin);
    let full = h
        .engine
        .benchmarks
        .ranking(&admin, "citizen_satisfaction", 10)
        .await
        .unwrap();
    assert_eq!(full.entries[0].tenant_id.as_deref(), Some("city-b"));
    assert_eq!(full.position, None);
}

#[tokio::test]
async fn test_kpi_referenced_by_rule_cannot_be_deleted() {
    let h = harness();
    let ctx = manager("city-a");
    let kpi = h.engine.kpis.create_definition(&ctx, satisfaction_kpi()).await.unwrap();
    h.engine
        .alerts
        .create_rule(
            &ctx,
            NewAlertRule {
                name: "Low satisfaction".into(),
                alert_type: AlertType::Satisfaction,
                metric: "citizen_satisfaction".into(),
                condition: AlertCondition::Less,
                threshold: 60.0,
                threshold2: None,
                frequency: EvaluationFrequency::Daily,
                recipients: Vec::new(),
                channels: vec![Channel::Web],
                cooldown_secs: 86_400,
            },
        )
        .await
        .unwrap();

    let result = h.engine.kpis.delete_definition(&ctx, &kpi.id).await;
    assert!(matches!(result, Err(EngineError::KpiInUse(_))));

    let deactivated = h.engine.kpis.deactivate(&ctx, &kpi.id).await.unwrap();
    assert!(!deactivated.active);
}
