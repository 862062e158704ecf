//! Direction-aware status and numeric trend classification.

use serde::{Deserialize, Serialize};

use super::definition::{KpiDefinition, Polarity, Thresholds};
use super::KpiSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KpiStatus {
    Good,
    Normal,
    Warning,
    Critical,
}

impl KpiStatus {
    pub fn score(&self) -> f64 {
        match self {
            KpiStatus::Good => 100.0,
            KpiStatus::Normal => 75.0,
            KpiStatus::Warning => 50.0,
            KpiStatus::Critical => 25.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KpiStatus::Good => "good",
            KpiStatus::Normal => "normal",
            KpiStatus::Warning => "warning",
            KpiStatus::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Stable => "stable",
        }
    }
}

/// Classify a value against the definition's thresholds.
pub fn classify_status(definition: &KpiDefinition, value: f64) -> KpiStatus {
    classify_with(&definition.thresholds, definition.polarity, value)
}

/// Checks run critical, then warning, then target. A missing threshold
/// skips its branch. No ordering between thresholds is assumed.
pub fn classify_with(thresholds: &Thresholds, polarity: Polarity, value: f64) -> KpiStatus {
    // "worse or equal" and "better or equal" for this polarity
    let at_or_worse = |limit: f64| match polarity {
        Polarity::LowerIsBetter => value >= limit,
        Polarity::HigherIsBetter => value <= limit,
    };
    let at_or_better = |limit: f64| match polarity {
        Polarity::LowerIsBetter => value <= limit,
        Polarity::HigherIsBetter => value >= limit,
    };

    if thresholds.critical.is_some_and(at_or_worse) {
        KpiStatus::Critical
    } else if thresholds.warning.is_some_and(at_or_worse) {
        KpiStatus::Warning
    } else if thresholds.target.is_some_and(at_or_better) {
        KpiStatus::Good
    } else {
        KpiStatus::Normal
    }
}

/// Numeric direction of change; says nothing about better or worse.
///
/// The relative delta is taken against `|previous|`. When the previous value
/// is zero there is no relative scale, so any non-zero current value counts
/// as movement.
pub fn classify_trend(previous: Option<f64>, current: f64, epsilon: f64) -> Trend {
    let Some(previous) = previous else {
        return Trend::Stable;
    };

    let delta = current - previous;
    let relative = if previous == 0.0 {
        if delta == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        delta.abs() / previous.abs()
    };

    if relative <= epsilon {
        Trend::Stable
    } else if delta > 0.0 {
        Trend::Up
    } else {
        Trend::Down
    }
}

/// Mean of per-snapshot scores on a 0..=100 scale. Empty input scores 0.
pub fn overall_score(snapshots: &[KpiSnapshot]) -> f64 {
    if snapshots.is_empty() {
        return 0.0;
    }
    let total: f64 = snapshots.iter().map(|s| s.status.score()).sum();
    total / snapshots.len() as f64
}
