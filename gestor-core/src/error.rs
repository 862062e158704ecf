use thiserror::Error;

/// Errors produced by the analytics engine.
///
/// `CooldownActive` is deliberately absent: a rule firing inside its cooldown
/// window is a defined outcome of [`crate::alerts::AlertEngine::fire`], not a
/// failure. Channel dispatch failures are likewise recorded on the trigger.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Unknown KPI: {0}")]
    UnknownKpi(String),

    #[error("Metric unavailable for formula '{formula}': {reason}")]
    MetricUnavailable { formula: String, reason: String },

    #[error("Invalid KPI definition: {0}")]
    InvalidKpi(String),

    #[error("KPI {0} is still referenced by an active alert rule")]
    KpiInUse(String),

    #[error("Invalid alert rule: {0}")]
    InvalidRule(String),

    #[error("Unknown alert rule: {0}")]
    UnknownRule(String),

    #[error("Unknown alert trigger: {0}")]
    UnknownTrigger(String),

    #[error("Alert trigger {0} is already resolved")]
    AlreadyResolved(String),

    #[error("No dashboard template for role level '{0}'")]
    NoTemplate(String),

    #[error("Unknown dashboard: {0}")]
    UnknownDashboard(String),

    #[error("Invalid dashboard: {0}")]
    InvalidDashboard(String),

    #[error("Widget data source timed out after {0} ms")]
    WidgetTimeout(u64),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn metric_unavailable(formula: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MetricUnavailable {
            formula: formula.into(),
            reason: reason.into(),
        }
    }

    pub fn storage(message: impl std::fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::MetricUnavailable { .. }
                | EngineError::WidgetTimeout(_)
                | EngineError::Storage(_)
        )
    }

    /// Stable machine-readable code, shared with the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::UnknownKpi(_) => "UNKNOWN_KPI",
            EngineError::MetricUnavailable { .. } => "METRIC_UNAVAILABLE",
            EngineError::InvalidKpi(_) => "INVALID_KPI",
            EngineError::KpiInUse(_) => "KPI_IN_USE",
            EngineError::InvalidRule(_) => "INVALID_RULE",
            EngineError::UnknownRule(_) => "UNKNOWN_RULE",
            EngineError::UnknownTrigger(_) => "UNKNOWN_TRIGGER",
            EngineError::AlreadyResolved(_) => "ALREADY_RESOLVED",
            EngineError::NoTemplate(_) => "NO_TEMPLATE",
            EngineError::UnknownDashboard(_) => "UNKNOWN_DASHBOARD",
            EngineError::InvalidDashboard(_) => "INVALID_DASHBOARD",
            EngineError::WidgetTimeout(_) => "WIDGET_TIMEOUT",
            EngineError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
