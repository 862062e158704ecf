//! KPI definitions, snapshots and the engine that computes them.

pub mod definition;
pub mod engine;
pub mod status;

pub use definition::{
    KpiCategory, KpiDefinition, KpiSnapshot, KpiUpdate, NewKpi, Polarity, Thresholds, UpdateFrequency,
    MAX_WINDOW_SECS,
};
pub use engine::{CategoryScore, KpiEngine, KpiFailure, RecalculationReport, ScoreBreakdown};
pub use status::{classify_status, classify_trend, classify_with, overall_score, KpiStatus, Trend};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::EngineError;

/// Look-back period for history and period comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryPeriod {
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[serde(rename = "1y")]
    Year,
}

impl HistoryPeriod {
    pub fn duration(&self) -> Duration {
        match self {
            HistoryPeriod::Week => Duration::days(7),
            HistoryPeriod::Month => Duration::days(30),
            HistoryPeriod::Quarter => Duration::days(90),
            HistoryPeriod::Year => Duration::days(365),
        }
    }
}

impl Default for HistoryPeriod {
    fn default() -> Self {
        HistoryPeriod::Month
    }
}

impl FromStr for HistoryPeriod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "7d" | "week" => Ok(HistoryPeriod::Week),
            "30d" | "month" => Ok(HistoryPeriod::Month),
            "90d" | "quarter" => Ok(HistoryPeriod::Quarter),
            "1y" | "365d" | "year" => Ok(HistoryPeriod::Year),
            other => Err(EngineError::InvalidKpi(format!("unknown history period '{}'", other))),
        }
    }
}
