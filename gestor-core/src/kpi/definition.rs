use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{KpiStatus, Trend};
use crate::error::{EngineError, EngineResult};
use crate::source::FormulaRef;

/// Longest query window a KPI may declare: ten years.
pub const MAX_WINDOW_SECS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KpiCategory {
    Operational,
    Quality,
    Strategic,
}

/// Which direction of numeric change is an improvement. Always explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    HigherIsBetter,
    LowerIsBetter,
}

impl Polarity {
    /// True when `a` is a better outcome than `b`.
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        match self {
            Polarity::HigherIsBetter => a > b,
            Polarity::LowerIsBetter => a < b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateFrequency {
    Realtime,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl UpdateFrequency {
    pub const ALL: [UpdateFrequency; 5] = [
        UpdateFrequency::Realtime,
        UpdateFrequency::Hourly,
        UpdateFrequency::Daily,
        UpdateFrequency::Weekly,
        UpdateFrequency::Monthly,
    ];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub target: Option<f64>,
    pub warning: Option<f64>,
    pub critical: Option<f64>,
}

impl Thresholds {
    fn validate(&self) -> EngineResult<()> {
        for (name, value) in [
            ("target", self.target),
            ("warning", self.warning),
            ("critical", self.critical),
        ] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(EngineError::InvalidKpi(format!("{} threshold must be finite", name)));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiDefinition {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub category: KpiCategory,
    /// Formula reference understood by the metric source, e.g. `avg(resolution_hours)`.
    pub formula: String,
    pub unit: String,
    pub thresholds: Thresholds,
    pub polarity: Polarity,
    pub frequency: UpdateFrequency,
    /// Overrides the frequency's default query window.
    pub window_secs: Option<i64>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a KPI definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewKpi {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: KpiCategory,
    pub formula: String,
    pub unit: String,
    #[serde(default)]
    pub thresholds: Thresholds,
    pub polarity: Polarity,
    pub frequency: UpdateFrequency,
    #[serde(default)]
    pub window_secs: Option<i64>,
}

/// Partial update. `None` leaves a field unchanged; thresholds are replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<KpiCategory>,
    pub formula: Option<String>,
    pub unit: Option<String>,
    pub thresholds: Option<Thresholds>,
    pub polarity: Option<Polarity>,
    pub frequency: Option<UpdateFrequency>,
    pub window_secs: Option<i64>,
    pub active: Option<bool>,
}

impl KpiDefinition {
    pub fn from_new(tenant_id: &str, new: NewKpi, now: DateTime<Utc>) -> EngineResult<Self> {
        let definition = Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: new.name.trim().to_string(),
            description: new.description,
            category: new.category,
            formula: new.formula.trim().to_string(),
            unit: new.unit,
            thresholds: new.thresholds,
            polarity: new.polarity,
            frequency: new.frequency,
            window_secs: new.window_secs,
            active: true,
            created_at: now,
            updated_at: now,
        };
        definition.validate()?;
        Ok(definition)
    }

    pub fn apply(&mut self, update: KpiUpdate, now: DateTime<Utc>) -> EngineResult<()> {
        if let Some(name) = update.name {
            self.name = name.trim().to_string();
        }
        if let Some(description) = update.description {
            self.description = Some(description);
        }
        if let Some(category) = update.category {
            self.category = category;
        }
        if let Some(formula) = update.formula {
            self.formula = formula.trim().to_string();
        }
        if let Some(unit) = update.unit {
            self.unit = unit;
        }
        if let Some(thresholds) = update.thresholds {
            self.thresholds = thresholds;
        }
        if let Some(polarity) = update.polarity {
            self.polarity = polarity;
        }
        if let Some(frequency) = update.frequency {
            self.frequency = frequency;
        }
        if let Some(window) = update.window_secs {
            self.window_secs = Some(window);
        }
        if let Some(active) = update.active {
            self.active = active;
        }
        self.updated_at = now;
        self.validate()
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.name.is_empty() {
            return Err(EngineError::InvalidKpi("name must not be empty".into()));
        }
        self.formula.parse::<FormulaRef>()?;
        self.thresholds.validate()?;
        if matches!(self.window_secs, Some(w) if !(1..=MAX_WINDOW_SECS).contains(&w)) {
            return Err(EngineError::InvalidKpi(format!(
                "window_secs must be between 1 and {}",
                MAX_WINDOW_SECS
            )));
        }
        Ok(())
    }

    /// Whether an alert rule metric reference points at this KPI.
    pub fn is_referenced_by(&self, metric: &str) -> bool {
        metric == self.id || metric == self.name
    }
}

/// Immutable record of one KPI computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub id: String,
    pub kpi_id: String,
    pub tenant_id: String,
    pub value: f64,
    pub computed_at: DateTime<Utc>,
    pub status: KpiStatus,
    pub trend: Trend,
    /// Scheduler tick that produced this snapshot; `None` for on-demand runs.
    pub tick_id: Option<String>,
}
