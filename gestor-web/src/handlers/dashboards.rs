use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use gestor_core::dashboard::{DashboardTemplate, NewDashboard};
use gestor_core::{Dashboard, RenderedDashboard, RoleLevel};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{error_handling::AppError, tenant::Tenant, AppState};

#[derive(Debug, Deserialize)]
pub struct ListDashboardsQuery {
    pub role: Option<String>,
}

pub async fn list_dashboards(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(query): Query<ListDashboardsQuery>,
) -> Result<Json<Vec<Dashboard>>, AppError> {
    let role = query
        .role
        .as_deref()
        .map(str::parse::<RoleLevel>)
        .transpose()
        .map_err(|e| AppError::validation(e.to_string()))?;
    Ok(Json(state.engine.dashboards.list(&ctx, role).await?))
}

pub async fn create_dashboard(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(req): Json<NewDashboard>,
) -> Result<Json<Dashboard>, AppError> {
    let dashboard = state.engine.dashboards.save(&ctx, req).await.map_err(|e| {
        tracing::warn!(tenant_id = %ctx.tenant_id, "Dashboard save failed: {}", e);
        AppError::from(e)
    })?;
    Ok(Json(dashboard))
}

pub async fn get_dashboard(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(dashboard_id): Path<String>,
) -> Result<Json<Dashboard>, AppError> {
    Ok(Json(state.engine.dashboards.get(&ctx, &dashboard_id).await?))
}

pub async fn update_dashboard(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(dashboard_id): Path<String>,
    Json(req): Json<NewDashboard>,
) -> Result<Json<Dashboard>, AppError> {
    Ok(Json(state.engine.dashboards.update(&ctx, &dashboard_id, req).await?))
}

pub async fn delete_dashboard(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(dashboard_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.engine.dashboards.delete(&ctx, &dashboard_id).await?;
    Ok(Json(json!({ "deleted": dashboard_id })))
}

pub async fn set_default_dashboard(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(dashboard_id): Path<String>,
) -> Result<Json<Dashboard>, AppError> {
    Ok(Json(state.engine.dashboards.set_default(&ctx, &dashboard_id).await?))
}

pub async fn render_dashboard(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(dashboard_id): Path<String>,
) -> Result<Json<RenderedDashboard>, AppError> {
    let rendered = state.engine.dashboards.resolve_by_id(&ctx, &dashboard_id).await?;
    if rendered.error_count() > 0 {
        tracing::debug!(
            dashboard_id = %dashboard_id,
            failed = rendered.error_count(),
            "Dashboard rendered with placeholder widgets"
        );
    }
    Ok(Json(rendered))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(level): Path<String>,
) -> Result<Json<DashboardTemplate>, AppError> {
    Ok(Json(state.engine.dashboards.template_for(&level)?))
}

pub async fn instantiate_template(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(level): Path<String>,
) -> Result<Json<Dashboard>, AppError> {
    Ok(Json(state.engine.dashboards.instantiate_template(&ctx, &level).await?))
}
