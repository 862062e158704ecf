//! Role-specific dashboards assembled from reusable widgets.

pub mod composer;
pub mod templates;
pub mod widgets;

pub use composer::DashboardComposer;
pub use templates::{template_for, DashboardTemplate};
pub use widgets::{
    DashboardWidget, DataSourceKind, RenderedWidget, WidgetConfig, WidgetPayload, WidgetPosition,
    WidgetState,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{EngineError, EngineResult};
use crate::tenant::RoleLevel;
use widgets::{GRID_COLUMNS, GRID_ROWS, MIN_REFRESH_SECS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub role: RoleLevel,
    pub department: Option<String>,
    pub widgets: Vec<DashboardWidget>,
    pub is_default: bool,
    pub refresh_secs: u64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for saving a dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDashboard {
    pub name: String,
    pub role: RoleLevel,
    #[serde(default)]
    pub department: Option<String>,
    pub widgets: Vec<DashboardWidget>,
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,
}

fn default_refresh_secs() -> u64 {
    300
}

impl Dashboard {
    pub fn from_new(tenant_id: &str, new: NewDashboard, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: new.name.trim().to_string(),
            role: new.role,
            department: new.department,
            widgets: new.widgets,
            is_default: false,
            refresh_secs: new.refresh_secs,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Save-time validation of layout and widget configuration.
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidDashboard(msg));

        if self.name.is_empty() {
            return invalid("name must not be empty".into());
        }
        if self.refresh_secs < MIN_REFRESH_SECS {
            return invalid(format!("refresh rate must be at least {}s", MIN_REFRESH_SECS));
        }

        let mut ids = HashSet::new();
        for (i, widget) in self.widgets.iter().enumerate() {
            if widget.id.trim().is_empty() || !ids.insert(widget.id.as_str()) {
                return invalid(format!("widget #{} needs a unique id", i));
            }
            if widget.title.trim().is_empty() {
                return invalid(format!("widget '{}' needs a title", widget.id));
            }
            if widget.refresh_secs < MIN_REFRESH_SECS {
                return invalid(format!("widget '{}' refreshes too often", widget.id));
            }
            let pos = widget.position;
            if !pos.fits_grid() {
                return invalid(format!(
                    "widget '{}' does not fit the {}x{} grid",
                    widget.id, GRID_COLUMNS, GRID_ROWS
                ));
            }
            if let Err(msg) = widget.config.validate() {
                return invalid(format!("widget '{}': {}", widget.id, msg));
            }
            if let Some(other) = self.widgets[..i]
                .iter()
                .find(|other| other.position.overlaps(&pos))
            {
                return invalid(format!("widget '{}' overlaps '{}'", widget.id, other.id));
            }
        }
        Ok(())
    }
}

/// A dashboard with every widget resolved at render time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedDashboard {
    pub dashboard_id: Option<String>,
    pub name: String,
    pub role: RoleLevel,
    pub tenant_id: String,
    pub refresh_secs: u64,
    pub rendered_at: DateTime<Utc>,
    pub widgets: Vec<RenderedWidget>,
}

impl RenderedDashboard {
    pub fn error_count(&self) -> usize {
        self.widgets.iter().filter(|w| w.is_error()).count()
    }
}
