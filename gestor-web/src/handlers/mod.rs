pub mod alerts;
pub mod analytics;
pub mod dashboards;
pub mod kpis;
pub mod metrics;

pub use alerts::*;
pub use analytics::*;
pub use dashboards::*;
pub use kpis::*;
pub use metrics::*;
