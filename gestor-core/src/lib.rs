// Gestor Core - municipal analytics engine
//
// KPI computation, alerting with cooldowns, percentile benchmarking and
// role dashboards. Storage, metric data and notification delivery sit
// behind traits so the web crate and tests can plug in their own.

pub mod alerts;
pub mod benchmark;
pub mod clock;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod kpi;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod tenant;

pub use alerts::{AlertEngine, AlertRule, AlertTrigger, Channel, FireOutcome, NotificationSink};
pub use benchmark::{Benchmark, BenchmarkComparator, BenchmarkQuery, BenchmarkStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use dashboard::{Dashboard, DashboardComposer, RenderedDashboard};
pub use error::{EngineError, EngineResult};
pub use kpi::{KpiDefinition, KpiEngine, KpiSnapshot, KpiStatus, Polarity, Trend};
pub use scheduler::{Scheduler, TickReport};
pub use source::{EventLog, InMemoryMetricSource, MetricEvent, MetricSource, TimeWindow};
pub use store::{InMemoryStore, Stores};
pub use tenant::{RoleLevel, TenantContext};

use std::sync::Arc;

/// Every engine component wired over one set of stores.
#[derive(Clone)]
pub struct AnalyticsEngine {
    pub kpis: Arc<KpiEngine>,
    pub alerts: Arc<AlertEngine>,
    pub benchmarks: Arc<BenchmarkComparator>,
    pub dashboards: Arc<DashboardComposer>,
    pub scheduler: Arc<Scheduler>,
    pub stores: Stores,
}

impl AnalyticsEngine {
    pub fn new(
        stores: Stores,
        source: Arc<dyn MetricSource>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let kpis = Arc::new(KpiEngine::new(&stores, source.clone(), clock.clone(), config.kpi.clone()));
        let alerts = Arc::new(AlertEngine::new(&stores, sink, clock.clone(), &config.alerts));
        let benchmarks = Arc::new(BenchmarkComparator::new(&stores, kpis.clone(), clock.clone()));
        let dashboards = Arc::new(DashboardComposer::new(
            &stores,
            kpis.clone(),
            alerts.clone(),
            benchmarks.clone(),
            clock.clone(),
            &config.dashboard,
        ));
        let scheduler = Arc::new(Scheduler::new(
            kpis.clone(),
            alerts.clone(),
            source,
            clock,
            config.scheduler.clone(),
        ));

        Self {
            kpis,
            alerts,
            benchmarks,
            dashboards,
            scheduler,
            stores,
        }
    }

    /// In-memory stores, logging notifications and the system clock.
    pub fn in_memory(source: Arc<dyn MetricSource>, config: &EngineConfig) -> Self {
        Self::new(
            Stores::in_memory(),
            source,
            Arc::new(alerts::LoggingSink),
            Arc::new(SystemClock),
            config,
        )
    }
}
