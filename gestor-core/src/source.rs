//! Metric Source Adapter seam.
//!
//! The engine never owns operational data. It asks a [`MetricSource`] to
//! evaluate a formula reference for one tenant over a time window.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::RwLock;

use crate::error::{EngineError, EngineResult};

lazy_static! {
    static ref AGGREGATE_RE: Regex =
        Regex::new(r"^\s*(count|sum|avg|min|max|last)\(\s*([A-Za-z0-9_.:-]+)\s*\)\s*$").unwrap();
    static ref RATIO_RE: Regex = Regex::new(
        r"^\s*ratio\(\s*([A-Za-z0-9_.:-]+)\s*,\s*([A-Za-z0-9_.:-]+)\s*\)\s*$"
    )
    .unwrap();
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Saturates at the earliest representable instant.
    pub fn trailing(end: DateTime<Utc>, length: Duration) -> Self {
        Self {
            start: end.checked_sub_signed(length).unwrap_or(DateTime::<Utc>::MIN_UTC),
            end,
        }
    }

    /// `None` when `end - length` leaves the representable range.
    pub fn checked_trailing(end: DateTime<Utc>, length: Duration) -> Option<Self> {
        end.checked_sub_signed(length).map(|start| Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    /// The window of equal length immediately before this one.
    pub fn previous(&self) -> Self {
        Self::trailing(self.start, self.length())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Last,
}

impl Aggregation {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "count" => Some(Aggregation::Count),
            "sum" => Some(Aggregation::Sum),
            "avg" => Some(Aggregation::Avg),
            "min" => Some(Aggregation::Min),
            "max" => Some(Aggregation::Max),
            "last" => Some(Aggregation::Last),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Last => "last",
        }
    }
}

/// Parsed formula reference: `agg(metric)` or `ratio(numerator, denominator)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FormulaRef {
    Aggregate { aggregation: Aggregation, metric: String },
    /// Percentage of `sum(numerator)` over `sum(denominator)`.
    Ratio { numerator: String, denominator: String },
}

impl FormulaRef {
    /// Metric names this formula reads.
    pub fn metrics(&self) -> Vec<&str> {
        match self {
            FormulaRef::Aggregate { metric, .. } => vec![metric.as_str()],
            FormulaRef::Ratio {
                numerator,
                denominator,
            } => vec![numerator.as_str(), denominator.as_str()],
        }
    }
}

impl FromStr for FormulaRef {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(caps) = AGGREGATE_RE.captures(s) {
            let aggregation = Aggregation::parse(&caps[1])
                .ok_or_else(|| EngineError::InvalidKpi(format!("unknown aggregation in '{}'", s)))?;
            return Ok(FormulaRef::Aggregate {
                aggregation,
                metric: caps[2].to_string(),
            });
        }
        if let Some(caps) = RATIO_RE.captures(s) {
            return Ok(FormulaRef::Ratio {
                numerator: caps[1].to_string(),
                denominator: caps[2].to_string(),
            });
        }
        Err(EngineError::InvalidKpi(format!(
            "formula '{}' must look like agg(metric) or ratio(a, b)",
            s
        )))
    }
}

impl fmt::Display for FormulaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaRef::Aggregate {
                aggregation,
                metric,
            } => write!(f, "{}({})", aggregation.as_str(), metric),
            FormulaRef::Ratio {
                numerator,
                denominator,
            } => write!(f, "ratio({}, {})", numerator, denominator),
        }
    }
}

/// Read-only query interface over historical operational data.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn query(&self, tenant_id: &str, formula: &str, window: &TimeWindow) -> EngineResult<f64>;
}

/// One raw operational observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub tenant_id: String,
    pub metric: String,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate `values` (already ordered by time) the way every adapter must.
pub fn aggregate(aggregation: Aggregation, values: &[f64]) -> Option<f64> {
    match aggregation {
        Aggregation::Count => Some(values.len() as f64),
        _ if values.is_empty() => None,
        Aggregation::Sum => Some(values.iter().sum()),
        Aggregation::Avg => Some(values.iter().sum::<f64>() / values.len() as f64),
        Aggregation::Min => values.iter().copied().reduce(f64::min),
        Aggregation::Max => values.iter().copied().reduce(f64::max),
        Aggregation::Last => values.last().copied(),
    }
}

/// Storage of raw observations that formulas aggregate over.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Stores the whole batch or none of it.
    async fn append_events(&self, events: &[MetricEvent]) -> EngineResult<()>;

    async fn append_event(&self, event: &MetricEvent) -> EngineResult<()> {
        self.append_events(std::slice::from_ref(event)).await
    }

    /// Values of one metric inside `window`, oldest first.
    async fn values(&self, tenant_id: &str, metric: &str, window: &TimeWindow) -> EngineResult<Vec<f64>>;
}

/// Resolve a formula reference against an event log. Unparsable formulas and
/// empty windows are `MetricUnavailable`, except `count` which yields 0.
pub async fn evaluate_formula(
    log: &dyn EventLog,
    tenant_id: &str,
    formula: &str,
    window: &TimeWindow,
) -> EngineResult<f64> {
    let parsed: FormulaRef = formula
        .parse()
        .map_err(|e: EngineError| EngineError::metric_unavailable(formula, e.to_string()))?;

    match parsed {
        FormulaRef::Aggregate {
            aggregation,
            metric,
        } => {
            let values = log.values(tenant_id, &metric, window).await?;
            aggregate(aggregation, &values)
                .ok_or_else(|| EngineError::metric_unavailable(formula, "no observations in window"))
        }
        FormulaRef::Ratio {
            numerator,
            denominator,
        } => {
            let num: f64 = log.values(tenant_id, &numerator, window).await?.iter().sum();
            let den: f64 = log.values(tenant_id, &denominator, window).await?.iter().sum();
            if den == 0.0 {
                return Err(EngineError::metric_unavailable(formula, "denominator is zero"));
            }
            Ok(num / den * 100.0)
        }
    }
}

/// Event-list backed adapter, used by tests and local demos.
#[derive(Debug, Default)]
pub struct InMemoryMetricSource {
    events: RwLock<HashMap<String, Vec<MetricEvent>>>,
}

impl InMemoryMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, event: MetricEvent) {
        self.record_all(std::slice::from_ref(&event)).await;
    }

    async fn record_all(&self, batch: &[MetricEvent]) {
        let mut events = self.events.write().await;
        for event in batch {
            events.entry(event.tenant_id.clone()).or_default().push(event.clone());
        }
        for tenant_events in events.values_mut() {
            tenant_events.sort_by_key(|e| e.recorded_at);
        }
    }
}

#[async_trait]
impl EventLog for InMemoryMetricSource {
    async fn append_events(&self, events: &[MetricEvent]) -> EngineResult<()> {
        self.record_all(events).await;
        Ok(())
    }

    async fn values(&self, tenant_id: &str, metric: &str, window: &TimeWindow) -> EngineResult<Vec<f64>> {
        let events = self.events.read().await;
        Ok(events
            .get(tenant_id)
            .map(|list| {
                list.iter()
                    .filter(|e| e.metric == metric && window.contains(e.recorded_at))
                    .map(|e| e.value)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl MetricSource for InMemoryMetricSource {
    async fn query(&self, tenant_id: &str, formula: &str, window: &TimeWindow) -> EngineResult<f64> {
        evaluate_formula(self, tenant_id, formula, window).await
    }
}
