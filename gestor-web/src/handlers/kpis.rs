use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use gestor_core::kpi::{HistoryPeriod, KpiUpdate, NewKpi, RecalculationReport};
use gestor_core::{KpiDefinition, KpiSnapshot};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error_handling::AppError, tenant::Tenant, AppState};

#[derive(Debug, Deserialize)]
pub struct ListKpisQuery {
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub period: Option<String>,
}

pub async fn list_kpis(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<ListKpisQuery>,
) -> Result<Json<Vec<KpiDefinition>>, AppError> {
    let definitions = state.engine.kpis.list_definitions(&ctx, query.active_only).await?;
    Ok(Json(definitions))
}

pub async fn create_kpi(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(req): Json<NewKpi>,
) -> Result<Json<KpiDefinition>, AppError> {
    let definition = state.engine.kpis.create_definition(&ctx, req).await.map_err(|e| {
        tracing::warn!(tenant_id = %ctx.tenant_id, "KPI creation failed: {}", e);
        AppError::from(e)
    })?;
    Ok(Json(definition))
}

pub async fn get_kpi(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(kpi_id): Path<String>,
) -> Result<Json<KpiDefinition>, AppError> {
    Ok(Json(state.engine.kpis.get_definition(&ctx, &kpi_id).await?))
}

pub async fn update_kpi(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(kpi_id): Path<String>,
    Json(req): Json<KpiUpdate>,
) -> Result<Json<KpiDefinition>, AppError> {
    let definition = state.engine.kpis.update_definition(&ctx, &kpi_id, req).await?;
    tracing::info!(tenant_id = %ctx.tenant_id, kpi_id = %kpi_id, "Updated KPI");
    Ok(Json(definition))
}

pub async fn delete_kpi(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(kpi_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.engine.kpis.delete_definition(&ctx, &kpi_id).await?;
    Ok(Json(json!({ "deleted": kpi_id })))
}

pub async fn calculate_kpi(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(kpi_id): Path<String>,
) -> Result<Json<KpiSnapshot>, AppError> {
    let definition = state.engine.kpis.get_definition(&ctx, &kpi_id).await?;
    let snapshot = state
        .engine
        .kpis
        .compute_value(&definition.id, &definition.tenant_id)
        .await?;
    Ok(Json(snapshot))
}

pub async fn recalculate_all(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
) -> Result<Json<RecalculationReport>, AppError> {
    let report = state.engine.kpis.recalculate_all(&ctx.tenant_id, None).await?;
    Ok(Json(report))
}

pub async fn kpi_history(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(kpi_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<KpiSnapshot>>, AppError> {
    let period = match query.period {
        Some(p) => p.parse::<HistoryPeriod>().map_err(|e| AppError::validation(e.to_string()))?,
        None => HistoryPeriod::default(),
    };
    Ok(Json(state.engine.kpis.history(&ctx, &kpi_id, period).await?))
}

pub async fn current_values(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
) -> Result<Json<Vec<KpiSnapshot>>, AppError> {
    Ok(Json(state.engine.kpis.current_values(&ctx.tenant_id).await?))
}
