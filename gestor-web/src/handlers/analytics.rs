use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use gestor_core::benchmark::{KpiBenchmark, PeriodComparison, Ranking};
use gestor_core::kpi::{HistoryPeriod, ScoreBreakdown};
use gestor_core::{BenchmarkQuery, RenderedDashboard};
use serde::Deserialize;

use crate::{error_handling::AppError, tenant::Tenant, AppState};

const MAX_RANKING_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct BenchmarkParams {
    /// KPI id or name.
    pub kpi: String,
    /// Benchmark metric; defaults to the KPI name.
    pub metric: Option<String>,
    pub category: Option<String>,
    pub region: Option<String>,
    pub population_bucket: Option<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct RankingParams {
    pub kpi_name: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ComparisonParams {
    pub kpi_id: String,
    pub period: Option<String>,
}

/// The caller's default dashboard for `level`, or the role template.
pub async fn role_dashboard(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Path(level): Path<String>,
) -> Result<Json<RenderedDashboard>, AppError> {
    Ok(Json(state.engine.dashboards.resolve_for_role(&ctx, &level).await?))
}

pub async fn benchmark(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(params): Query<BenchmarkParams>,
) -> Result<Json<KpiBenchmark>, AppError> {
    let query = BenchmarkQuery {
        metric: params.metric.unwrap_or_default(),
        category: params.category,
        region: params.region,
        population_bucket: params.population_bucket,
        year: params.year,
    };
    Ok(Json(
        state
            .engine
            .benchmarks
            .benchmark_kpi(&ctx, &params.kpi, query)
            .await?,
    ))
}

pub async fn ranking(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(params): Query<RankingParams>,
) -> Result<Json<Ranking>, AppError> {
    let limit = params.limit.unwrap_or(10).clamp(1, MAX_RANKING_LIMIT);
    Ok(Json(
        state
            .engine
            .benchmarks
            .ranking(&ctx, &params.kpi_name, limit)
            .await?,
    ))
}

pub async fn period_comparison(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Query(params): Query<ComparisonParams>,
) -> Result<Json<PeriodComparison>, AppError> {
    let period = match params.period {
        Some(p) => p.parse::<HistoryPeriod>().map_err(|e| AppError::validation(e.to_string()))?,
        None => HistoryPeriod::default(),
    };
    Ok(Json(
        state
            .engine
            .benchmarks
            .comparison(&ctx, &params.kpi_id, period)
            .await?,
    ))
}

pub async fn tenant_score(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
) -> Result<Json<ScoreBreakdown>, AppError> {
    Ok(Json(state.engine.kpis.tenant_score(&ctx.tenant_id).await?))
}
