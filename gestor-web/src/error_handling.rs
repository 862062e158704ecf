use axum::{
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use gestor_core::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Missing tenant context: {message}")]
    Unauthorized { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: String,
    pub timestamp: String,
    pub trace_id: Option<String>,
    pub details: Option<HashMap<String, serde_json::Value>>,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: String, code: String) -> Self {
        Self {
            error: error_type.to_string(),
            message,
            code,
            timestamp: chrono::Utc::now().to_rfc3339(),
            trace_id: None,
            details: None,
        }
    }

    pub fn with_details(mut self, details: HashMap<String, serde_json::Value>) -> Self {
        self.details = Some(details);
        self
    }
}

fn engine_status(err: &EngineError) -> (StatusCode, &'static str) {
    match err {
        EngineError::UnknownKpi(_)
        | EngineError::UnknownRule(_)
        | EngineError::UnknownTrigger(_)
        | EngineError::UnknownDashboard(_)
        | EngineError::NoTemplate(_) => (StatusCode::NOT_FOUND, "not_found"),
        EngineError::InvalidKpi(_) | EngineError::InvalidRule(_) | EngineError::InvalidDashboard(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "validation_error")
        }
        EngineError::KpiInUse(_) | EngineError::AlreadyResolved(_) => (StatusCode::CONFLICT, "conflict"),
        EngineError::MetricUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable"),
        EngineError::WidgetTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
        EngineError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            AppError::Engine(ref e) => {
                let (status, kind) = engine_status(e);
                // storage details stay in the log
                let message = if let EngineError::Storage(detail) = e {
                    error!("Storage error: {}", detail);
                    "A storage error occurred".to_string()
                } else {
                    warn!("{}: {}", e.code(), e);
                    e.to_string()
                };

                let mut response = ErrorResponse::new(kind, message, e.code().to_string());
                if e.is_retryable() {
                    let mut details = HashMap::new();
                    details.insert("retryable".to_string(), serde_json::Value::Bool(true));
                    response = response.with_details(details);
                }
                (status, response)
            }

            AppError::Validation { ref message } => {
                warn!("Validation error: {}", message);
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::new(
                        "validation_error",
                        message.clone(),
                        "VALIDATION_FAILED".to_string(),
                    ),
                )
            }

            AppError::Unauthorized { ref message } => {
                warn!("Request without tenant context: {}", message);
                (
                    StatusCode::UNAUTHORIZED,
                    ErrorResponse::new(
                        "unauthorized",
                        message.clone(),
                        "TENANT_CONTEXT_REQUIRED".to_string(),
                    ),
                )
            }

            AppError::Internal { ref message } => {
                error!("Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(
                        "internal_error",
                        "An internal error occurred".to_string(),
                        "INTERNAL_ERROR".to_string(),
                    ),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

pub async fn handle_404(uri: Uri) -> impl IntoResponse {
    let error_response = ErrorResponse::new(
        "not_found",
        format!("No route found for {}", uri.path()),
        "ROUTE_NOT_FOUND".to_string(),
    );

    (StatusCode::NOT_FOUND, Json(error_response))
}

pub type AppResult<T> = Result<T, AppError>;
