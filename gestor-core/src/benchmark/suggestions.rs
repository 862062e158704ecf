use super::BenchmarkStatus;

const GENERIC: &[&str] = &[
    "Review the processes behind this indicator with the responsible department",
    "Compare practices with municipalities in the top quartile",
    "Set intermediate monthly targets and track them on the dashboard",
];

const KEEP_GOING: &[&str] = &[
    "Document the practices that keep this indicator ahead of peers",
    "Share the approach with other departments",
];

fn metric_suggestions(metric: &str) -> Option<&'static [&'static str]> {
    let suggestions: &'static [&'static str] = match metric {
        "resolution_time" | "avg_resolution_time" => &[
            "Triage incoming requests by urgency on arrival",
            "Automate routing of service requests to the owning department",
            "Publish service-level targets per request type",
        ],
        "citizen_satisfaction" | "satisfaction" => &[
            "Send follow-up surveys after closing each request",
            "Train front-desk staff on citizen communication",
            "Publish progress on the most frequent complaints",
        ],
        "overdue_protocols" => &[
            "Escalate protocols approaching their deadline",
            "Rebalance protocol queues across teams weekly",
            "Remove approval steps that do not change outcomes",
        ],
        "service_requests" | "demand" => &[
            "Expand online self-service for frequent request types",
            "Forecast seasonal demand and plan staffing accordingly",
        ],
        "budget_execution" => &[
            "Review committed but unpaid expenses monthly",
            "Align procurement calendars with budget releases",
        ],
        "school_attendance" => &[
            "Contact families after consecutive absences",
            "Coordinate school transport routes with attendance data",
        ],
        "tourist_visits" => &[
            "Promote off-season events in regional channels",
            "Improve signage and information at tourist points",
        ],
        "safety_incidents" => &[
            "Increase patrols around recurring hotspots",
            "Improve public lighting in high-incidence areas",
        ],
        _ => return None,
    };
    Some(suggestions)
}

/// Improvement suggestions for a metric at a benchmark status. Never fails;
/// unknown metrics get a generic list.
pub fn suggest(metric: &str, status: BenchmarkStatus) -> Vec<String> {
    let list = match status {
        BenchmarkStatus::Excellent | BenchmarkStatus::Good => KEEP_GOING,
        _ => metric_suggestions(&metric.to_lowercase()).unwrap_or(GENERIC),
    };
    list.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_metric_suggestions() {
        let suggestions = suggest("overdue_protocols", BenchmarkStatus::BelowAverage);
        assert_eq!(suggestions.len(), 3);
        assert!(suggestions[0].contains("Escalate"));
    }

    #[test]
    fn test_unknown_metric_falls_back() {
        let suggestions = suggest("parking_tickets", BenchmarkStatus::Poor);
        assert_eq!(suggestions.len(), GENERIC.len());
    }

    #[test]
    fn test_good_status_keeps_course() {
        let suggestions = suggest("citizen_satisfaction", BenchmarkStatus::Excellent);
        assert_eq!(suggestions.len(), KEEP_GOING.len());
    }
}
