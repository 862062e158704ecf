//! Cross-tenant percentile benchmarking.

pub mod comparator;
pub mod suggestions;

pub use comparator::{
    compare, compare_for_polarity, BenchmarkComparator, BenchmarkComparison, BenchmarkStatus, Comparison,
    KpiBenchmark, PeriodComparison, Ranking, RankingEntry,
};
pub use suggestions::suggest;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Percentile distribution of one metric across comparable tenants.
/// Refreshed out-of-band; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    pub id: String,
    pub metric: String,
    pub category: Option<String>,
    pub region: Option<String>,
    pub population_bucket: Option<String>,
    pub p25: Option<f64>,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub average: Option<f64>,
    pub sample_size: u32,
    pub period: String,
    pub year: i32,
    pub source: String,
    pub updated_at: DateTime<Utc>,
}

/// Filter for benchmark lookups; `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkQuery {
    pub metric: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub population_bucket: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
}

impl BenchmarkQuery {
    pub fn for_metric(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            ..Default::default()
        }
    }

    pub fn matches(&self, benchmark: &Benchmark) -> bool {
        fn field_matches(wanted: &Option<String>, actual: &Option<String>) -> bool {
            match wanted {
                None => true,
                Some(w) => actual.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(w)),
            }
        }

        benchmark.metric == self.metric
            && field_matches(&self.category, &benchmark.category)
            && field_matches(&self.region, &benchmark.region)
            && field_matches(&self.population_bucket, &benchmark.population_bucket)
            && self.year.map_or(true, |y| y == benchmark.year)
    }
}
