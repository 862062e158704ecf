use axum::{
    routing::{get, post, put},
    Router,
};

use crate::{handlers, AppState};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // KPI routes
        .route("/kpis", get(handlers::list_kpis).post(handlers::create_kpi))
        .route("/kpis/current", get(handlers::current_values))
        .route("/kpis/recalculate-all", post(handlers::recalculate_all))
        .route(
            "/kpis/:id",
            get(handlers::get_kpi)
                .put(handlers::update_kpi)
                .delete(handlers::delete_kpi),
        )
        .route("/kpis/:id/calculate", post(handlers::calculate_kpi))
        .route("/kpis/:id/history", get(handlers::kpi_history))
        // Alert routes
        .route(
            "/alerts/rules",
            get(handlers::list_rules).post(handlers::create_rule),
        )
        .route(
            "/alerts/rules/:id",
            get(handlers::get_rule)
                .put(handlers::update_rule)
                .delete(handlers::delete_rule),
        )
        .route("/alerts/rules/:id/evaluate", post(handlers::evaluate_rule))
        .route("/alerts/test/:id", post(handlers::test_rule))
        .route("/alerts/triggers", get(handlers::list_triggers))
        .route("/alerts/triggers/:id", get(handlers::get_trigger))
        .route("/alerts/triggers/:id/resolve", put(handlers::resolve_trigger))
        .route("/alerts/stats", get(handlers::alert_stats))
        // Dashboard routes
        .route(
            "/dashboards",
            get(handlers::list_dashboards).post(handlers::create_dashboard),
        )
        .route(
            "/dashboards/templates/:level",
            get(handlers::get_template).post(handlers::instantiate_template),
        )
        .route(
            "/dashboards/:id",
            get(handlers::get_dashboard)
                .put(handlers::update_dashboard)
                .delete(handlers::delete_dashboard),
        )
        .route("/dashboards/:id/default", post(handlers::set_default_dashboard))
        .route("/dashboards/:id/render", get(handlers::render_dashboard))
        // Analytics routes
        .route("/analytics/dashboard/:level", get(handlers::role_dashboard))
        .route("/analytics/benchmark", get(handlers::benchmark))
        .route("/analytics/ranking", get(handlers::ranking))
        .route("/analytics/comparison", get(handlers::period_comparison))
        .route("/analytics/score", get(handlers::tenant_score))
        // Metric ingestion
        .route("/metrics/events", post(handlers::ingest_events))
}
