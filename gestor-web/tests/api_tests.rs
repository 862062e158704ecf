// API Integration Tests
// Drive the HTTP surface over an in-memory SQLite database

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use gestor_core::config::EngineConfig;
use gestor_core::SystemClock;
use gestor_web::{create_app, AppState, WebConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn create_test_app() -> Router {
    let state = AppState::build(WebConfig::in_memory(), &EngineConfig::default(), Arc::new(SystemClock))
        .await
        .expect("Failed to create test state");
    create_app(state)
}

async fn send(app: &Router, method: &str, uri: &str, tenant: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(tenant) = tenant {
        builder = builder
            .header("x-tenant-id", tenant)
            .header("x-actor-id", "manager-1")
            .header("x-role-level", "manager");
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn satisfaction_kpi() -> Value {
    json!({
        "name": "citizen_satisfaction",
        "category": "quality",
        "formula": "avg(satisfaction_score)",
        "unit": "%",
        "thresholds": { "target": 85.0, "warning": 70.0, "critical": 50.0 },
        "polarity": "higher_is_better",
        "frequency": "daily"
    })
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app().await;
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_requests_without_tenant_are_rejected() {
    let app = create_test_app().await;
    let (status, body) = send(&app, "GET", "/api/kpis", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "TENANT_CONTEXT_REQUIRED");
}

#[tokio::test]
async fn test_kpi_lifecycle() {
    let app = create_test_app().await;
    let (status, kpi) = send(&app, "POST", "/api/kpis", Some("city-a"), Some(satisfaction_kpi())).await;
    assert_eq!(status, StatusCode::OK);
    let kpi_id = kpi["id"].as_str().unwrap().to_string();

    // no observations yet
    let uri = format!("/api/kpis/{}/calculate", kpi_id);
    let (status, body) = send(&app, "POST", &uri, Some("city-a"), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "METRIC_UNAVAILABLE");

    let events = json!({ "events": [{ "metric": "satisfaction_score", "value": 60.0 }] });
    let (status, _) = send(&app, "POST", "/api/metrics/events", Some("city-a"), Some(events)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, snapshot) = send(&app, "POST", &uri, Some("city-a"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["status"], "warning");
    assert_eq!(snapshot["trend"], "stable");

    let (status, history) = send(
        &app,
        "GET",
        &format!("/api/kpis/{}/history?period=7d", kpi_id),
        Some("city-a"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().unwrap().len(), 1);

    // other tenants cannot see it
    let (status, _) = send(&app, "GET", &format!("/api/kpis/{}", kpi_id), Some("city-b"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "POST", "/api/kpis", Some("city-a"), Some(satisfaction_kpi())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_KPI");
}

#[tokio::test]
async fn test_realtime_rule_respects_cooldown_and_resolution() {
    let app = create_test_app().await;
    let rule = json!({
        "name": "Overdue protocols",
        "alert_type": "deadline",
        "metric": "overdue_protocols",
        "condition": "greater",
        "threshold": 0.0,
        "frequency": "realtime",
        "channels": ["web"],
        "cooldown_secs": 3600
    });
    let (status, rule) = send(&app, "POST", "/api/alerts/rules", Some("city-a"), Some(rule)).await;
    assert_eq!(status, StatusCode::OK);
    let rule_id = rule["id"].as_str().unwrap().to_string();

    let events = json!({ "events": [{ "metric": "overdue_protocols", "value": 3.0 }] });
    let (_, first) = send(&app, "POST", "/api/metrics/events", Some("city-a"), Some(events.clone())).await;
    assert_eq!(first["accepted"], 1);
    assert!(first["failures"].as_array().unwrap().is_empty());
    assert_eq!(first["evaluations"][0]["fired"]["outcome"], "triggered");
    let (_, second) = send(&app, "POST", "/api/metrics/events", Some("city-a"), Some(events)).await;
    assert_eq!(second["evaluations"][0]["fired"]["outcome"], "cooldown_active");

    let (status, triggers) = send(
        &app,
        "GET",
        &format!("/api/alerts/triggers?rule_id={}", rule_id),
        Some("city-a"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let triggers = triggers.as_array().unwrap();
    assert_eq!(triggers.len(), 1);
    let trigger_id = triggers[0]["id"].as_str().unwrap().to_string();

    let uri = format!("/api/alerts/triggers/{}/resolve", trigger_id);
    let (status, resolved) = send(&app, "PUT", &uri, Some("city-a"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["resolved_by"], "manager-1");

    let (status, body) = send(&app, "PUT", &uri, Some("city-a"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_RESOLVED");

    let (_, stats) = send(&app, "GET", "/api/alerts/stats", Some("city-a"), None).await;
    assert_eq!(stats["active_triggers"], 0);
    assert_eq!(stats["resolved_last_24h"], 1);
}

#[tokio::test]
async fn test_role_dashboard_fallback_and_unknown_level() {
    let app = create_test_app().await;

    let (status, rendered) = send(&app, "GET", "/api/analytics/dashboard/manager", Some("city-a"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(rendered["dashboard_id"].is_null());
    assert!(!rendered["widgets"].as_array().unwrap().is_empty());

    let (status, body) = send(&app, "GET", "/api/analytics/dashboard/mayor", Some("city-a"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NO_TEMPLATE");
}

#[tokio::test]
async fn test_kpi_in_use_cannot_be_deleted() {
    let app = create_test_app().await;
    let (_, kpi) = send(&app, "POST", "/api/kpis", Some("city-a"), Some(satisfaction_kpi())).await;
    let kpi_id = kpi["id"].as_str().unwrap().to_string();

    let rule = json!({
        "name": "Low satisfaction",
        "alert_type": "satisfaction",
        "metric": "citizen_satisfaction",
        "condition": "less",
        "threshold": 60.0,
        "frequency": "daily",
        "channels": ["web"]
    });
    let (status, _) = send(&app, "POST", "/api/alerts/rules", Some("city-a"), Some(rule)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "DELETE", &format!("/api/kpis/{}", kpi_id), Some("city-a"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "KPI_IN_USE");
}

#[tokio::test]
async fn test_out_of_range_durations_and_positions_are_rejected() {
    let app = create_test_app().await;

    let mut kpi = satisfaction_kpi();
    kpi["window_secs"] = json!(1_000_000_000_000_000i64);
    let (status, body) = send(&app, "POST", "/api/kpis", Some("city-a"), Some(kpi)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_KPI");

    let rule = json!({
        "name": "Forever",
        "alert_type": "load",
        "metric": "queue_length",
        "condition": "greater",
        "threshold": 1.0,
        "frequency": "realtime",
        "channels": ["web"],
        "cooldown_secs": i64::MAX
    });
    let (status, body) = send(&app, "POST", "/api/alerts/rules", Some("city-a"), Some(rule)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_RULE");

    let dashboard = json!({
        "name": "Wrapped",
        "role": "manager",
        "widgets": [{
            "id": "w",
            "title": "Score",
            "config": { "type": "score_summary", "category": null },
            "position": { "x": u32::MAX, "y": 0, "w": 2, "h": 2 },
            "refresh_secs": 60
        }]
    });
    let (status, body) = send(&app, "POST", "/api/dashboards", Some("city-a"), Some(dashboard)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "INVALID_DASHBOARD");
}

#[tokio::test]
async fn test_unknown_route_returns_json_404() {
    let app = create_test_app().await;
    let (status, body) = send(&app, "GET", "/api/nope", Some("city-a"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "ROUTE_NOT_FOUND");
}
