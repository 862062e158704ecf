use axum::{extract::State, response::Json};
use chrono::{DateTime, Utc};
use gestor_core::alerts::EvaluationOutcome;
use gestor_core::MetricEvent;
use serde::{Deserialize, Serialize};

use crate::{error_handling::AppError, tenant::Tenant, AppState};

const MAX_BATCH: usize = 1_000;

#[derive(Debug, Deserialize)]
pub struct MetricInput {
    pub metric: String,
    pub value: f64,
    /// Defaults to the time of ingestion.
    pub recorded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub events: Vec<MetricInput>,
}

/// Realtime evaluation that could not run for one stored event.
#[derive(Debug, Serialize)]
pub struct EvaluationFailure {
    pub index: usize,
    pub metric: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: usize,
    /// Realtime rules evaluated because of these events.
    pub evaluations: Vec<EvaluationOutcome>,
    /// The events are stored even when their evaluation failed.
    pub failures: Vec<EvaluationFailure>,
}

/// Record operational observations for the caller's tenant and run the
/// realtime alert rules watching those metrics.
pub async fn ingest_events(
    State(state): State<AppState>,
    Tenant(ctx): Tenant,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    if req.events.len() > MAX_BATCH {
        return Err(AppError::validation(format!(
            "at most {} events per request",
            MAX_BATCH
        )));
    }
    for input in &req.events {
        if input.metric.trim().is_empty() {
            return Err(AppError::validation("metric must not be empty"));
        }
        if !input.value.is_finite() {
            return Err(AppError::validation(format!(
                "value for '{}' must be a finite number",
                input.metric
            )));
        }
    }

    let now = Utc::now();
    let events: Vec<MetricEvent> = req
        .events
        .iter()
        .map(|input| MetricEvent {
            tenant_id: ctx.tenant_id.clone(),
            metric: input.metric.trim().to_string(),
            value: input.value,
            recorded_at: input.recorded_at.unwrap_or(now),
        })
        .collect();
    state.events.append_events(&events).await?;

    let mut evaluations = Vec::new();
    let mut failures = Vec::new();
    for (index, event) in events.iter().enumerate() {
        match state.engine.scheduler.on_metric_event(event).await {
            Ok(outcomes) => evaluations.extend(outcomes),
            Err(e) => {
                tracing::warn!(tenant_id = %ctx.tenant_id, metric = %event.metric, "Realtime evaluation failed: {}", e);
                failures.push(EvaluationFailure {
                    index,
                    metric: event.metric.clone(),
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    tracing::debug!(tenant_id = %ctx.tenant_id, count = events.len(), "Ingested metric events");
    Ok(Json(IngestResponse {
        accepted: events.len(),
        evaluations,
        failures,
    }))
}
