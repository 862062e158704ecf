use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::widgets::{DashboardWidget, WidgetConfig, WidgetPosition};
use super::{Dashboard, NewDashboard};
use crate::alerts::AlertType;
use crate::error::EngineResult;
use crate::kpi::{HistoryPeriod, KpiCategory};
use crate::tenant::RoleLevel;

/// Predefined layout for one role level. Widgets reference KPIs by name so
/// the same template works for every tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardTemplate {
    pub role: RoleLevel,
    pub name: String,
    pub refresh_secs: u64,
    pub widgets: Vec<DashboardWidget>,
}

impl DashboardTemplate {
    /// Unsaved dashboard built from the template.
    pub fn into_dashboard(self, tenant_id: &str, now: DateTime<Utc>) -> Dashboard {
        Dashboard::from_new(
            tenant_id,
            NewDashboard {
                name: self.name,
                role: self.role,
                department: None,
                widgets: self.widgets,
                refresh_secs: self.refresh_secs,
            },
            now,
        )
    }
}

/// Template for a role level given as text; unknown levels are `NoTemplate`.
pub fn template_for(level: &str) -> EngineResult<DashboardTemplate> {
    let role: RoleLevel = level.parse()?;
    Ok(template_for_role(role))
}

fn widget(id: &str, title: &str, config: WidgetConfig, (x, y, w, h): (u32, u32, u32, u32)) -> DashboardWidget {
    DashboardWidget::new(id, title, config, WidgetPosition::new(x, y, w, h))
}

fn card(kpi: &str) -> WidgetConfig {
    WidgetConfig::KpiCard { kpi: kpi.into() }
}

pub fn template_for_role(role: RoleLevel) -> DashboardTemplate {
    let (name, refresh_secs, widgets) = match role {
        RoleLevel::Citizen => (
            "Public services overview",
            900,
            vec![
                widget("satisfaction", "Citizen satisfaction", card("citizen_satisfaction"), (0, 0, 4, 2)),
                widget("resolution", "Average resolution time", card("avg_resolution_time"), (4, 0, 4, 2)),
                widget("score", "Municipal score", WidgetConfig::ScoreSummary { category: None }, (8, 0, 4, 2)),
            ],
        ),
        RoleLevel::Employee => (
            "My work queue",
            120,
            vec![
                widget("overdue", "Overdue protocols", card("overdue_protocols"), (0, 0, 4, 2)),
                widget("resolution", "Average resolution time", card("avg_resolution_time"), (4, 0, 4, 2)),
                widget(
                    "deadlines",
                    "Deadline alerts",
                    WidgetConfig::AlertCounter {
                        alert_type: Some(AlertType::Deadline),
                    },
                    (8, 0, 4, 2),
                ),
                widget(
                    "alerts",
                    "Open alerts",
                    WidgetConfig::AlertList {
                        alert_types: vec![AlertType::Deadline, AlertType::Load],
                        limit: 10,
                    },
                    (0, 2, 12, 4),
                ),
            ],
        ),
        RoleLevel::Coordinator => (
            "Team coordination",
            300,
            vec![
                widget("overdue", "Overdue protocols", card("overdue_protocols"), (0, 0, 3, 2)),
                widget("requests", "Service requests", card("service_requests"), (3, 0, 3, 2)),
                widget("satisfaction", "Citizen satisfaction", card("citizen_satisfaction"), (6, 0, 3, 2)),
                widget("alert_count", "Active alerts", WidgetConfig::AlertCounter { alert_type: None }, (9, 0, 3, 2)),
                widget(
                    "resolution_trend",
                    "Resolution time (30 days)",
                    WidgetConfig::KpiTrend {
                        kpi: "avg_resolution_time".into(),
                        period: HistoryPeriod::Month,
                    },
                    (0, 2, 8, 4),
                ),
                widget(
                    "alerts",
                    "Open alerts",
                    WidgetConfig::AlertList {
                        alert_types: Vec::new(),
                        limit: 10,
                    },
                    (8, 2, 4, 4),
                ),
            ],
        ),
        RoleLevel::Manager => (
            "Department performance",
            300,
            vec![
                widget(
                    "operational",
                    "Operational score",
                    WidgetConfig::ScoreSummary {
                        category: Some(KpiCategory::Operational),
                    },
                    (0, 0, 4, 2),
                ),
                widget(
                    "quality",
                    "Quality score",
                    WidgetConfig::ScoreSummary {
                        category: Some(KpiCategory::Quality),
                    },
                    (4, 0, 4, 2),
                ),
                widget("alert_count", "Active alerts", WidgetConfig::AlertCounter { alert_type: None }, (8, 0, 4, 2)),
                widget(
                    "satisfaction_trend",
                    "Citizen satisfaction (90 days)",
                    WidgetConfig::KpiTrend {
                        kpi: "citizen_satisfaction".into(),
                        period: HistoryPeriod::Quarter,
                    },
                    (0, 2, 6, 4),
                ),
                widget(
                    "resolution_benchmark",
                    "Resolution time vs peers",
                    WidgetConfig::BenchmarkGauge {
                        kpi: "avg_resolution_time".into(),
                        metric: "resolution_time".into(),
                        region: None,
                        population_bucket: None,
                    },
                    (6, 2, 6, 4),
                ),
            ],
        ),
        RoleLevel::Executive => (
            "Executive overview",
            600,
            vec![
                widget("score", "Municipal score", WidgetConfig::ScoreSummary { category: None }, (0, 0, 4, 2)),
                widget(
                    "strategic",
                    "Strategic score",
                    WidgetConfig::ScoreSummary {
                        category: Some(KpiCategory::Strategic),
                    },
                    (4, 0, 4, 2),
                ),
                widget("budget", "Budget execution", card("budget_execution"), (8, 0, 4, 2)),
                widget(
                    "satisfaction_benchmark",
                    "Satisfaction vs peers",
                    WidgetConfig::BenchmarkGauge {
                        kpi: "citizen_satisfaction".into(),
                        metric: "citizen_satisfaction".into(),
                        region: None,
                        population_bucket: None,
                    },
                    (0, 2, 6, 4),
                ),
                widget(
                    "satisfaction_ranking",
                    "Satisfaction ranking",
                    WidgetConfig::Ranking {
                        kpi_name: "citizen_satisfaction".into(),
                        limit: 10,
                    },
                    (6, 2, 6, 4),
                ),
            ],
        ),
        RoleLevel::Superadmin => (
            "Platform overview",
            600,
            vec![
                widget("score", "Tenant score", WidgetConfig::ScoreSummary { category: None }, (0, 0, 4, 2)),
                widget("alert_count", "Active alerts", WidgetConfig::AlertCounter { alert_type: None }, (4, 0, 4, 2)),
                widget(
                    "budget_alerts",
                    "Budget alerts",
                    WidgetConfig::AlertCounter {
                        alert_type: Some(AlertType::Budget),
                    },
                    (8, 0, 4, 2),
                ),
                widget(
                    "satisfaction_ranking",
                    "Satisfaction across tenants",
                    WidgetConfig::Ranking {
                        kpi_name: "citizen_satisfaction".into(),
                        limit: 25,
                    },
                    (0, 2, 6, 5),
                ),
                widget(
                    "resolution_ranking",
                    "Resolution time across tenants",
                    WidgetConfig::Ranking {
                        kpi_name: "avg_resolution_time".into(),
                        limit: 25,
                    },
                    (6, 2, 6, 5),
                ),
            ],
        ),
    };

    DashboardTemplate {
        role,
        name: name.to_string(),
        refresh_secs,
        widgets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use assert_matches::assert_matches;

    #[test]
    fn test_every_role_has_a_valid_template() {
        for role in RoleLevel::ALL {
            let template = template_for(role.as_str()).unwrap();
            assert_eq!(template.role, role);
            let dashboard = template.into_dashboard("city", Utc::now());
            assert!(dashboard.validate().is_ok(), "template for {} is invalid", role);
        }
    }

    #[test]
    fn test_unknown_level() {
        assert_matches!(template_for("mayor"), Err(EngineError::NoTemplate(level)) if level == "mayor");
    }
}
