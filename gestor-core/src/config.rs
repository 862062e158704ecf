use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::kpi::{UpdateFrequency, MAX_WINDOW_SECS};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kpi: KpiSettings,
    pub alerts: AlertSettings,
    pub dashboard: DashboardSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KpiSettings {
    /// Relative change below which a trend counts as stable.
    pub trend_epsilon: f64,
    /// Upper bound on KPIs recomputed concurrently for one tenant.
    pub max_parallel: usize,
    pub realtime_window_secs: i64,
    pub hourly_window_secs: i64,
    pub daily_window_secs: i64,
    pub weekly_window_secs: i64,
    pub monthly_window_secs: i64,
}

impl Default for KpiSettings {
    fn default() -> Self {
        Self {
            trend_epsilon: 0.02,
            max_parallel: 8,
            realtime_window_secs: 15 * 60,
            hourly_window_secs: 60 * 60,
            daily_window_secs: 24 * 60 * 60,
            weekly_window_secs: 7 * 24 * 60 * 60,
            monthly_window_secs: 30 * 24 * 60 * 60,
        }
    }
}

impl KpiSettings {
    fn window_secs(&self, frequency: UpdateFrequency) -> i64 {
        match frequency {
            UpdateFrequency::Realtime => self.realtime_window_secs,
            UpdateFrequency::Hourly => self.hourly_window_secs,
            UpdateFrequency::Daily => self.daily_window_secs,
            UpdateFrequency::Weekly => self.weekly_window_secs,
            UpdateFrequency::Monthly => self.monthly_window_secs,
        }
    }

    /// Clamped to `1..=MAX_WINDOW_SECS`; `validate` rejects anything outside.
    pub fn window_for(&self, frequency: UpdateFrequency) -> Duration {
        Duration::seconds(self.window_secs(frequency).clamp(1, MAX_WINDOW_SECS))
    }

    pub fn validate(&self) -> Result<()> {
        for frequency in UpdateFrequency::ALL {
            let secs = self.window_secs(frequency);
            if !(1..=MAX_WINDOW_SECS).contains(&secs) {
                bail!(
                    "kpi window for {:?} must be between 1 and {} seconds, got {}",
                    frequency,
                    MAX_WINDOW_SECS,
                    secs
                );
            }
        }
        if !self.trend_epsilon.is_finite() || self.trend_epsilon < 0.0 {
            bail!("kpi.trend_epsilon must be a non-negative number");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    pub dispatch_timeout_secs: u64,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            dispatch_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub widget_timeout_ms: u64,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            widget_timeout_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tick_interval_secs: u64,
    pub kpi_recalc_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            kpi_recalc_interval_secs: 15 * 60,
        }
    }
}

impl EngineConfig {
    /// Load from `path`, or from the first config file found on the default
    /// search path, then apply `GESTOR_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).or_else(Self::get_config_path);

        let mut config = match config_path {
            Some(ref p) if p.exists() => {
                let content = fs::read_to_string(p)
                    .with_context(|| format!("Failed to read engine config {}", p.display()))?;
                toml::from_str::<EngineConfig>(&content)
                    .with_context(|| format!("Invalid engine config {}", p.display()))?
            }
            _ => EngineConfig::default(),
        };

        config.apply_env_overrides()?;
        config.kpi.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(epsilon) = env::var("GESTOR_TREND_EPSILON") {
            self.kpi.trend_epsilon = epsilon.parse().context("GESTOR_TREND_EPSILON")?;
        }
        if let Ok(parallel) = env::var("GESTOR_KPI_MAX_PARALLEL") {
            self.kpi.max_parallel = parallel.parse().context("GESTOR_KPI_MAX_PARALLEL")?;
        }
        if let Ok(timeout) = env::var("GESTOR_WIDGET_TIMEOUT_MS") {
            self.dashboard.widget_timeout_ms = timeout.parse().context("GESTOR_WIDGET_TIMEOUT_MS")?;
        }
        if let Ok(timeout) = env::var("GESTOR_DISPATCH_TIMEOUT_SECS") {
            self.alerts.dispatch_timeout_secs =
                timeout.parse().context("GESTOR_DISPATCH_TIMEOUT_SECS")?;
        }
        if let Ok(tick) = env::var("GESTOR_TICK_INTERVAL_SECS") {
            self.scheduler.tick_interval_secs = tick.parse().context("GESTOR_TICK_INTERVAL_SECS")?;
        }
        if let Ok(interval) = env::var("GESTOR_KPI_RECALC_INTERVAL_SECS") {
            self.scheduler.kpi_recalc_interval_secs =
                interval.parse().context("GESTOR_KPI_RECALC_INTERVAL_SECS")?;
        }
        Ok(())
    }

    fn get_config_path() -> Option<PathBuf> {
        // Project-level config wins over the user-level one
        if let Ok(current_dir) = env::current_dir() {
            let project_config = current_dir.join(".gestor.toml");
            if project_config.exists() {
                return Some(project_config);
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("gestor").join("engine.toml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        None
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml_content = toml::to_string_pretty(self)?;
        fs::write(path, toml_content)?;
        Ok(())
    }
}
