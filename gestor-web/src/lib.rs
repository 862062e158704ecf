// Gestor Web - HTTP surface for the municipal analytics engine
// SQLite persistence, tenant headers and the background scheduler

pub mod config;
pub mod database;
pub mod error_handling;
pub mod handlers;
pub mod routes;
pub mod source;
pub mod store;
pub mod tenant;

pub use config::WebConfig;
pub use database::Database;
pub use error_handling::{AppError, AppResult};
pub use source::SqlMetricSource;
pub use store::SqliteStore;

use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    response::Json,
    routing::get,
    Router,
};
use gestor_core::alerts::LoggingSink;
use gestor_core::config::EngineConfig;
use gestor_core::{AnalyticsEngine, Clock, EventLog, Stores, SystemClock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: WebConfig,
    pub engine: AnalyticsEngine,
    pub events: Arc<dyn EventLog>,
}

impl AppState {
    pub async fn new(config: WebConfig) -> anyhow::Result<Self> {
        let engine_config = EngineConfig::load(config.engine_config.as_deref())?;
        Self::build(config, &engine_config, Arc::new(SystemClock)).await
    }

    /// Wire the engine over SQLite with an explicit engine config and clock.
    pub async fn build(
        config: WebConfig,
        engine_config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let db = Database::new(&config.database_url).await?;
        db.migrate().await?;

        let stores = Stores::from_shared(Arc::new(SqliteStore::new(db.pool().clone())));
        let source = Arc::new(SqlMetricSource::new(db.pool().clone()));
        let engine = AnalyticsEngine::new(
            stores,
            source.clone(),
            Arc::new(LoggingSink),
            clock,
            engine_config,
        );

        Ok(Self {
            db,
            config,
            engine,
            events: source,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub database: String,
}

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let (code, database) = match state.db.ping().await {
        Ok(()) => (StatusCode::OK, "healthy".to_string()),
        Err(e) => {
            tracing::error!("Database health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable".to_string())
        }
    };

    let status = if code == StatusCode::OK { "healthy" } else { "degraded" };
    (
        code,
        Json(HealthStatus {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            database,
        }),
    )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn create_app(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs.max(1));
    let cors = cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", routes::api_routes())
        .fallback(error_handling::handle_404)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(TimeoutLayer::new(timeout)),
        )
        .with_state(state)
}
