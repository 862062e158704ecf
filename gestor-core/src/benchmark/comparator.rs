use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use super::suggestions::suggest;
use super::{Benchmark, BenchmarkQuery};
use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::kpi::{classify_trend, HistoryPeriod, KpiDefinition, KpiEngine, Polarity, Trend};
use crate::source::TimeWindow;
use crate::store::{BenchmarkRepository, KpiRepository, SnapshotRepository, Stores};
use crate::tenant::TenantContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkStatus {
    Excellent,
    Good,
    Average,
    BelowAverage,
    Poor,
}

impl BenchmarkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BenchmarkStatus::Excellent => "excellent",
            BenchmarkStatus::Good => "good",
            BenchmarkStatus::Average => "average",
            BenchmarkStatus::BelowAverage => "below_average",
            BenchmarkStatus::Poor => "poor",
        }
    }

    /// Lower bound of the percentile band the status stands for.
    pub fn percentile(&self) -> u8 {
        match self {
            BenchmarkStatus::Excellent => 75,
            BenchmarkStatus::Good => 50,
            BenchmarkStatus::Average => 25,
            BenchmarkStatus::BelowAverage | BenchmarkStatus::Poor => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub status: BenchmarkStatus,
    pub percentile: u8,
    pub message: String,
}

impl Comparison {
    fn new(status: BenchmarkStatus, message: String) -> Self {
        Self {
            status,
            percentile: status.percentile(),
            message,
        }
    }
}

/// Place `value` in the distribution assuming higher values are better.
///
/// Boundaries are inclusive on the upper side: a value equal to `p75` is
/// excellent. Missing percentiles skip their branch.
pub fn compare(value: f64, benchmark: &Benchmark) -> Comparison {
    let at_least = |p: Option<f64>| p.is_some_and(|p| value >= p);

    if at_least(benchmark.p75) {
        Comparison::new(
            BenchmarkStatus::Excellent,
            format!("{} is in the top quartile for {}", value, benchmark.metric),
        )
    } else if at_least(benchmark.p50) {
        Comparison::new(
            BenchmarkStatus::Good,
            format!("{} is above the median for {}", value, benchmark.metric),
        )
    } else if at_least(benchmark.p25) {
        Comparison::new(
            BenchmarkStatus::Average,
            format!("{} is between the 25th percentile and the median for {}", value, benchmark.metric),
        )
    } else if benchmark.p25.is_some() {
        Comparison::new(
            BenchmarkStatus::BelowAverage,
            format!("{} is in the bottom quartile for {}", value, benchmark.metric),
        )
    } else {
        Comparison::new(
            BenchmarkStatus::Poor,
            format!("{} could not be placed above any percentile for {}", value, benchmark.metric),
        )
    }
}

/// Like [`compare`], with the bands mirrored for lower-is-better metrics
/// (a value at or below `p25` is excellent).
pub fn compare_for_polarity(value: f64, benchmark: &Benchmark, polarity: Polarity) -> Comparison {
    if polarity == Polarity::HigherIsBetter {
        return compare(value, benchmark);
    }

    let at_most = |p: Option<f64>| p.is_some_and(|p| value <= p);

    if at_most(benchmark.p25) {
        Comparison::new(
            BenchmarkStatus::Excellent,
            format!("{} is among the lowest quarter for {}", value, benchmark.metric),
        )
    } else if at_most(benchmark.p50) {
        Comparison::new(
            BenchmarkStatus::Good,
            format!("{} is below the median for {}", value, benchmark.metric),
        )
    } else if at_most(benchmark.p75) {
        Comparison::new(
            BenchmarkStatus::Average,
            format!("{} is between the median and the 75th percentile for {}", value, benchmark.metric),
        )
    } else if benchmark.p75.is_some() {
        Comparison::new(
            BenchmarkStatus::BelowAverage,
            format!("{} is among the highest quarter for {}", value, benchmark.metric),
        )
    } else {
        Comparison::new(
            BenchmarkStatus::Poor,
            format!("{} could not be placed below any percentile for {}", value, benchmark.metric),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkComparison {
    pub benchmark: Benchmark,
    pub comparison: Comparison,
}

/// A tenant's current KPI value placed against every matching distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiBenchmark {
    pub kpi_id: String,
    pub kpi_name: String,
    pub value: f64,
    pub polarity: Polarity,
    pub comparisons: Vec<BenchmarkComparison>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rank: usize,
    /// Hidden for tenants other than the caller unless the caller is superadmin.
    pub tenant_id: Option<String>,
    pub value: f64,
    pub is_caller: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub kpi_name: String,
    pub polarity: Polarity,
    pub total: usize,
    pub position: Option<usize>,
    pub entries: Vec<RankingEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodComparison {
    pub kpi_id: String,
    pub period: HistoryPeriod,
    pub current_mean: Option<f64>,
    pub previous_mean: Option<f64>,
    pub delta: Option<f64>,
    pub delta_pct: Option<f64>,
    pub trend: Trend,
    pub current_samples: usize,
    pub previous_samples: usize,
}

/// Read-only projections over benchmark rows and KPI snapshots.
pub struct BenchmarkComparator {
    benchmarks: Arc<dyn BenchmarkRepository>,
    kpi_store: Arc<dyn KpiRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    kpis: Arc<KpiEngine>,
    clock: Arc<dyn Clock>,
}

impl BenchmarkComparator {
    pub fn new(stores: &Stores, kpis: Arc<KpiEngine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            benchmarks: stores.benchmarks.clone(),
            kpi_store: stores.kpis.clone(),
            snapshots: stores.snapshots.clone(),
            kpis,
            clock,
        }
    }

    /// Matching rows, most recent year first. No match is an empty list.
    pub async fn fetch(&self, query: &BenchmarkQuery) -> EngineResult<Vec<Benchmark>> {
        let mut rows = self.benchmarks.find_benchmarks(query).await?;
        rows.sort_by(|a, b| b.year.cmp(&a.year).then_with(|| b.updated_at.cmp(&a.updated_at)));
        Ok(rows)
    }

    pub fn compare(&self, value: f64, benchmark: &Benchmark) -> Comparison {
        compare(value, benchmark)
    }

    pub fn suggest(&self, metric: &str, status: BenchmarkStatus) -> Vec<String> {
        suggest(metric, status)
    }

    /// Compare the KPI's latest snapshot with each matching benchmark row.
    /// An empty `query.metric` falls back to the KPI name.
    pub async fn benchmark_kpi(
        &self,
        ctx: &TenantContext,
        kpi_ref: &str,
        query: BenchmarkQuery,
    ) -> EngineResult<KpiBenchmark> {
        let definition = self.kpis.resolve_reference(&ctx.tenant_id, kpi_ref).await?;
        let snapshot = self.kpis.latest(&definition).await?.ok_or_else(|| {
            EngineError::metric_unavailable(&definition.formula, "KPI has not been computed yet")
        })?;

        let query = if query.metric.is_empty() {
            BenchmarkQuery {
                metric: definition.name.clone(),
                ..query
            }
        } else {
            query
        };

        let comparisons: Vec<BenchmarkComparison> = self
            .fetch(&query)
            .await?
            .into_iter()
            .map(|benchmark| BenchmarkComparison {
                comparison: compare_for_polarity(snapshot.value, &benchmark, definition.polarity),
                benchmark,
            })
            .collect();

        let suggestions = comparisons
            .first()
            .map(|c| suggest(&query.metric, c.comparison.status))
            .unwrap_or_default();

        debug!(
            tenant_id = %ctx.tenant_id,
            kpi_id = %definition.id,
            rows = comparisons.len(),
            "Benchmarked KPI"
        );

        Ok(KpiBenchmark {
            kpi_id: definition.id,
            kpi_name: definition.name,
            value: snapshot.value,
            polarity: definition.polarity,
            comparisons,
            suggestions,
        })
    }

    /// Rank every tenant with an active KPI named `kpi_name` by its latest
    /// value, best first according to the KPI polarity.
    pub async fn ranking(&self, ctx: &TenantContext, kpi_name: &str, limit: usize) -> EngineResult<Ranking> {
        let definitions = self.kpi_store.list_kpis_named(kpi_name).await?;
        if definitions.is_empty() {
            return Err(EngineError::UnknownKpi(kpi_name.to_string()));
        }

        let polarity = definitions
            .iter()
            .find(|d| d.tenant_id == ctx.tenant_id)
            .unwrap_or(&definitions[0])
            .polarity;

        let mut values: Vec<(String, f64)> = Vec::with_capacity(definitions.len());
        for definition in &definitions {
            if let Some(snapshot) = self
                .snapshots
                .latest_snapshot(&definition.id, &definition.tenant_id)
                .await?
            {
                values.push((definition.tenant_id.clone(), snapshot.value));
            }
        }

        values.sort_by(|a, b| {
            let order = a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal);
            let order = match polarity {
                Polarity::HigherIsBetter => order.reverse(),
                Polarity::LowerIsBetter => order,
            };
            order.then_with(|| a.0.cmp(&b.0))
        });

        let entries: Vec<RankingEntry> = values
            .into_iter()
            .enumerate()
            .map(|(i, (tenant_id, value))| {
                let is_caller = tenant_id == ctx.tenant_id;
                RankingEntry {
                    rank: i + 1,
                    tenant_id: (is_caller || ctx.is_superadmin()).then_some(tenant_id),
                    value,
                    is_caller,
                }
            })
            .collect();

        let total = entries.len();
        let position = entries.iter().find(|e| e.is_caller).map(|e| e.rank);
        Ok(Ranking {
            kpi_name: kpi_name.to_string(),
            polarity,
            total,
            position,
            entries: entries.into_iter().take(limit.max(1)).collect(),
        })
    }

    /// Mean of the current period against the previous period of equal length.
    pub async fn comparison(
        &self,
        ctx: &TenantContext,
        kpi_id: &str,
        period: HistoryPeriod,
    ) -> EngineResult<PeriodComparison> {
        let definition = self.kpis.get_definition(ctx, kpi_id).await?;
        let now = self.clock.now();
        let current = TimeWindow::new(now - period.duration(), now + Duration::seconds(1));
        let previous = TimeWindow::new(now - period.duration() * 2, current.start);

        let current_values = self.values_in(&definition, &current).await?;
        let previous_values = self.values_in(&definition, &previous).await?;
        let current_mean = mean(&current_values);
        let previous_mean = mean(&previous_values);

        let delta = current_mean.zip(previous_mean).map(|(c, p)| c - p);
        let delta_pct = delta
            .zip(previous_mean)
            .filter(|(_, p)| *p != 0.0)
            .map(|(d, p)| d / p.abs() * 100.0);
        let trend = match current_mean {
            Some(c) => classify_trend(previous_mean, c, self.kpis.settings().trend_epsilon),
            None => Trend::Stable,
        };

        Ok(PeriodComparison {
            kpi_id: definition.id,
            period,
            current_mean,
            previous_mean,
            delta,
            delta_pct,
            trend,
            current_samples: current_values.len(),
            previous_samples: previous_values.len(),
        })
    }

    async fn values_in(&self, definition: &KpiDefinition, window: &TimeWindow) -> EngineResult<Vec<f64>> {
        Ok(self
            .snapshots
            .snapshots_in(&definition.id, &definition.tenant_id, window)
            .await?
            .into_iter()
            .map(|s| s.value)
            .collect())
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn distribution(p25: Option<f64>, p50: Option<f64>, p75: Option<f64>) -> Benchmark {
        Benchmark {
            id: "b1".into(),
            metric: "citizen_satisfaction".into(),
            category: Some("quality".into()),
            region: Some("south".into()),
            population_bucket: Some("50k-100k".into()),
            p25,
            p50,
            p75,
            average: Some(60.0),
            sample_size: 120,
            period: "annual".into(),
            year: 2025,
            source: "national survey".into(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_value_at_p75_is_excellent() {
        let b = distribution(Some(40.0), Some(60.0), Some(80.0));
        let c = compare(80.0, &b);
        assert_eq!(c.status, BenchmarkStatus::Excellent);
        assert_eq!(c.percentile, 75);
    }

    #[test]
    fn test_bands() {
        let b = distribution(Some(40.0), Some(60.0), Some(80.0));
        assert_eq!(compare(79.9, &b).status, BenchmarkStatus::Good);
        assert_eq!(compare(60.0, &b).status, BenchmarkStatus::Good);
        assert_eq!(compare(40.0, &b).status, BenchmarkStatus::Average);
        assert_eq!(compare(10.0, &b).status, BenchmarkStatus::BelowAverage);
    }

    #[test]
    fn test_missing_percentiles_fall_through_to_poor() {
        let b = distribution(None, Some(60.0), None);
        assert_eq!(compare(90.0, &b).status, BenchmarkStatus::Good);
        assert_eq!(compare(10.0, &b).status, BenchmarkStatus::Poor);
        assert_eq!(compare(10.0, &distribution(None, None, None)).status, BenchmarkStatus::Poor);
    }

    #[test]
    fn test_lower_is_better_mirrors_bands() {
        // resolution time in hours
        let b = distribution(Some(24.0), Some(48.0), Some(72.0));
        let lower = Polarity::LowerIsBetter;
        assert_eq!(compare_for_polarity(24.0, &b, lower).status, BenchmarkStatus::Excellent);
        assert_eq!(compare_for_polarity(30.0, &b, lower).status, BenchmarkStatus::Good);
        assert_eq!(compare_for_polarity(72.0, &b, lower).status, BenchmarkStatus::Average);
        assert_eq!(compare_for_polarity(100.0, &b, lower).status, BenchmarkStatus::BelowAverage);
        // plain compare would call the slowest municipality excellent
        assert_eq!(compare(100.0, &b).status, BenchmarkStatus::Excellent);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 3.0]), Some(2.0));
    }
}
