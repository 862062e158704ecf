use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use chrono::{DateTime, Utc};
use gestor_core::alerts::{AlertRuleUpdate, AlertStats, EvaluationOutcome, NewAlertRule, TestDispatch};
use gestor_core::store::TriggerFilter;
use gestor_core::{AlertRule, AlertTrigger};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error_handling::AppError, tenant::Tenant, AppState};

const MAX_TRIGGER_PAGE: usize = 500;

#[derive(Debug, Deserialize)]
pub struct TriggerQuery {
    pub rule_id: Option<String>,
    #[serde(default)]
    pub unresolved_only: bool,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    pub value: f64,
}

pub async fn list_rules(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
) -> Result<Json<Vec<AlertRule>>, AppError> {
    Ok(Json(state.engine.alerts.list_rules(&ctx.tenant_id).await?))
}

pub async fn create_rule(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(req): Json<NewAlertRule>,
) -> Result<Json<AlertRule>, AppError> {
    let rule = state.engine.alerts.create_rule(&ctx, req).await.map_err(|e| {
        tracing::warn!(tenant_id = %ctx.tenant_id, "Alert rule creation failed: {}", e);
        AppError::from(e)
    })?;
    Ok(Json(rule))
}

pub async fn get_rule(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(rule_id): Path<String>,
) -> Result<Json<AlertRule>, AppError> {
    Ok(Json(state.engine.alerts.get_rule(&ctx, &rule_id).await?))
}

pub async fn update_rule(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(rule_id): Path<String>,
    Json(req): Json<AlertRuleUpdate>,
) -> Result<Json<AlertRule>, AppError> {
    Ok(Json(state.engine.alerts.update_rule(&ctx, &rule_id, req).await?))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(rule_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.engine.alerts.delete_rule(&ctx, &rule_id).await?;
    Ok(Json(json!({ "deleted": rule_id })))
}

/// Evaluate a rule against a supplied value, firing it when the condition holds.
pub async fn evaluate_rule(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(rule_id): Path<String>,
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<EvaluationOutcome>, AppError> {
    if !req.value.is_finite() {
        return Err(AppError::validation("value must be a finite number"));
    }
    let rule = state.engine.alerts.get_rule(&ctx, &rule_id).await?;
    Ok(Json(state.engine.alerts.evaluate_rule(&rule, req.value).await?))
}

pub async fn test_rule(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(rule_id): Path<String>,
) -> Result<Json<TestDispatch>, AppError> {
    Ok(Json(state.engine.alerts.test(&ctx, &rule_id).await?))
}

pub async fn list_triggers(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<TriggerQuery>,
) -> Result<Json<Vec<AlertTrigger>>, AppError> {
    let filter = TriggerFilter {
        rule_id: query.rule_id,
        unresolved_only: query.unresolved_only,
        since: query.since,
        limit: Some(query.limit.unwrap_or(100).min(MAX_TRIGGER_PAGE)),
    };
    Ok(Json(state.engine.alerts.list_triggers(&ctx.tenant_id, &filter).await?))
}

pub async fn get_trigger(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(trigger_id): Path<String>,
) -> Result<Json<AlertTrigger>, AppError> {
    Ok(Json(state.engine.alerts.get_trigger(&ctx, &trigger_id).await?))
}

pub async fn resolve_trigger(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(trigger_id): Path<String>,
) -> Result<Json<AlertTrigger>, AppError> {
    let trigger = state.engine.alerts.resolve(&ctx, &trigger_id).await?;
    tracing::info!(tenant_id = %ctx.tenant_id, trigger_id = %trigger_id, "Resolved alert trigger");
    Ok(Json(trigger))
}

pub async fn alert_stats(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
) -> Result<Json<AlertStats>, AppError> {
    Ok(Json(state.engine.alerts.stats(&ctx.tenant_id).await?))
}
