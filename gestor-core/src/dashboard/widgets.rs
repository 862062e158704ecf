use serde::{Deserialize, Serialize};

use crate::alerts::{AlertStats, AlertTrigger, AlertType};
use crate::benchmark::{KpiBenchmark, Ranking};
use crate::kpi::{HistoryPeriod, KpiCategory, KpiSnapshot, KpiStatus, Polarity, Trend};

/// Grid width widgets are laid out on.
pub const GRID_COLUMNS: u32 = 12;
/// Rows a layout may extend to.
pub const GRID_ROWS: u32 = 200;
pub const MIN_REFRESH_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetPosition {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl WidgetPosition {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> Option<u32> {
        self.x.checked_add(self.w)
    }

    pub fn bottom(&self) -> Option<u32> {
        self.y.checked_add(self.h)
    }

    /// Non-empty and fully inside the `GRID_COLUMNS` x `GRID_ROWS` grid.
    pub fn fits_grid(&self) -> bool {
        self.w > 0
            && self.h > 0
            && self.x < GRID_COLUMNS
            && self.y < GRID_ROWS
            && self.right().is_some_and(|r| r <= GRID_COLUMNS)
            && self.bottom().is_some_and(|b| b <= GRID_ROWS)
    }

    pub fn overlaps(&self, other: &WidgetPosition) -> bool {
        let (x, y, w, h) = (self.x as u64, self.y as u64, self.w as u64, self.h as u64);
        let (ox, oy, ow, oh) = (other.x as u64, other.y as u64, other.w as u64, other.h as u64);
        x < ox + ow && ox < x + w && y < oy + oh && oy < y + h
    }
}

/// Per-widget-type configuration. One variant per widget type; references
/// only, never computed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetConfig {
    /// Current value and status of one KPI (id or name).
    KpiCard { kpi: String },
    KpiTrend { kpi: String, period: HistoryPeriod },
    /// Overall score, optionally limited to one KPI category.
    ScoreSummary { category: Option<KpiCategory> },
    AlertList {
        #[serde(default)]
        alert_types: Vec<AlertType>,
        limit: usize,
    },
    AlertCounter { alert_type: Option<AlertType> },
    BenchmarkGauge {
        kpi: String,
        metric: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        population_bucket: Option<String>,
    },
    Ranking { kpi_name: String, limit: usize },
}

/// Which engine component a widget reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    Kpi,
    Alert,
    Benchmark,
}

impl WidgetConfig {
    pub fn source_kind(&self) -> DataSourceKind {
        match self {
            WidgetConfig::KpiCard { .. }
            | WidgetConfig::KpiTrend { .. }
            | WidgetConfig::ScoreSummary { .. } => DataSourceKind::Kpi,
            WidgetConfig::AlertList { .. } | WidgetConfig::AlertCounter { .. } => DataSourceKind::Alert,
            WidgetConfig::BenchmarkGauge { .. } | WidgetConfig::Ranking { .. } => {
                DataSourceKind::Benchmark
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            WidgetConfig::KpiCard { .. } => "kpi_card",
            WidgetConfig::KpiTrend { .. } => "kpi_trend",
            WidgetConfig::ScoreSummary { .. } => "score_summary",
            WidgetConfig::AlertList { .. } => "alert_list",
            WidgetConfig::AlertCounter { .. } => "alert_counter",
            WidgetConfig::BenchmarkGauge { .. } => "benchmark_gauge",
            WidgetConfig::Ranking { .. } => "ranking",
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        match self {
            WidgetConfig::KpiCard { kpi } | WidgetConfig::KpiTrend { kpi, .. } if kpi.trim().is_empty() => {
                Err("KPI reference must not be empty".into())
            }
            WidgetConfig::AlertList { limit, .. } if *limit == 0 => Err("alert list limit must be positive".into()),
            WidgetConfig::BenchmarkGauge { kpi, metric, .. }
                if kpi.trim().is_empty() || metric.trim().is_empty() =>
            {
                Err("benchmark gauge needs a KPI and a benchmark metric".into())
            }
            WidgetConfig::Ranking { kpi_name, limit } if kpi_name.trim().is_empty() || *limit == 0 => {
                Err("ranking needs a KPI name and a positive limit".into())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardWidget {
    pub id: String,
    pub title: String,
    pub config: WidgetConfig,
    pub position: WidgetPosition,
    pub refresh_secs: u64,
}

impl DashboardWidget {
    pub fn new(id: &str, title: &str, config: WidgetConfig, position: WidgetPosition) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            config,
            position,
            refresh_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiCardData {
    pub kpi_id: String,
    pub name: String,
    pub unit: String,
    pub polarity: Polarity,
    pub target: Option<f64>,
    pub value: f64,
    pub status: KpiStatus,
    pub trend: Trend,
    pub computed_at: chrono::DateTime<chrono::Utc>,
}

/// Self-contained data for one rendered widget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WidgetPayload {
    KpiCard(KpiCardData),
    KpiTrend {
        kpi_id: String,
        name: String,
        points: Vec<KpiSnapshot>,
    },
    ScoreSummary {
        score: f64,
        kpi_count: usize,
    },
    AlertList {
        triggers: Vec<AlertTrigger>,
    },
    AlertCounter {
        stats: AlertStats,
        count: usize,
    },
    Benchmark(KpiBenchmark),
    Ranking(Ranking),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WidgetState {
    Ready { data: WidgetPayload },
    /// Placeholder shown instead of failing the whole dashboard.
    Error { code: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedWidget {
    pub id: String,
    pub title: String,
    pub widget_type: String,
    pub position: WidgetPosition,
    pub refresh_secs: u64,
    #[serde(flatten)]
    pub state: WidgetState,
}

impl RenderedWidget {
    pub fn is_error(&self) -> bool {
        matches!(self.state, WidgetState::Error { .. })
    }
}
