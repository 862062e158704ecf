use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::channels::Channel;
use crate::error::{EngineError, EngineResult};

/// Longest cooldown a rule may declare: ten years.
pub const MAX_COOLDOWN_SECS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Deadline,
    Performance,
    Demand,
    Satisfaction,
    Load,
    Budget,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Deadline => "deadline",
            AlertType::Performance => "performance",
            AlertType::Demand => "demand",
            AlertType::Satisfaction => "satisfaction",
            AlertType::Load => "load",
            AlertType::Budget => "budget",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    Greater,
    Less,
    Equal,
    Between,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationFrequency {
    Realtime,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub alert_type: AlertType,
    /// KPI id or name, or a raw formula reference such as `count(overdue_protocols)`.
    pub metric: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub threshold2: Option<f64>,
    pub frequency: EvaluationFrequency,
    pub recipients: Vec<String>,
    pub channels: Vec<Channel>,
    pub cooldown_secs: i64,
    pub active: bool,
    pub trigger_count: u64,
    pub last_triggered: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlertRule {
    pub name: String,
    pub alert_type: AlertType,
    pub metric: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    #[serde(default)]
    pub threshold2: Option<f64>,
    pub frequency: EvaluationFrequency,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,
}

fn default_cooldown_secs() -> i64 {
    3600
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertRuleUpdate {
    pub name: Option<String>,
    pub alert_type: Option<AlertType>,
    pub metric: Option<String>,
    pub condition: Option<AlertCondition>,
    pub threshold: Option<f64>,
    pub threshold2: Option<f64>,
    pub frequency: Option<EvaluationFrequency>,
    pub recipients: Option<Vec<String>>,
    pub channels: Option<Vec<Channel>>,
    pub cooldown_secs: Option<i64>,
    pub active: Option<bool>,
}

impl AlertRule {
    pub fn from_new(tenant_id: &str, new: NewAlertRule, now: DateTime<Utc>) -> EngineResult<Self> {
        let mut channels = new.channels;
        channels.sort();
        channels.dedup();

        let rule = Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: new.name.trim().to_string(),
            alert_type: new.alert_type,
            metric: new.metric.trim().to_string(),
            condition: new.condition,
            threshold: new.threshold,
            threshold2: new.threshold2,
            frequency: new.frequency,
            recipients: new.recipients,
            channels,
            cooldown_secs: new.cooldown_secs,
            active: true,
            trigger_count: 0,
            last_triggered: None,
            created_at: now,
            updated_at: now,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn apply(&mut self, update: AlertRuleUpdate, now: DateTime<Utc>) -> EngineResult<()> {
        if let Some(name) = update.name {
            self.name = name.trim().to_string();
        }
        if let Some(alert_type) = update.alert_type {
            self.alert_type = alert_type;
        }
        if let Some(metric) = update.metric {
            self.metric = metric.trim().to_string();
        }
        if let Some(condition) = update.condition {
            self.condition = condition;
        }
        if let Some(threshold) = update.threshold {
            self.threshold = threshold;
        }
        if let Some(threshold2) = update.threshold2 {
            self.threshold2 = Some(threshold2);
        }
        if let Some(frequency) = update.frequency {
            self.frequency = frequency;
        }
        if let Some(recipients) = update.recipients {
            self.recipients = recipients;
        }
        if let Some(mut channels) = update.channels {
            channels.sort();
            channels.dedup();
            self.channels = channels;
        }
        if let Some(cooldown) = update.cooldown_secs {
            self.cooldown_secs = cooldown;
        }
        if let Some(active) = update.active {
            self.active = active;
        }
        self.updated_at = now;
        self.validate()
    }

    /// Eager validation so scheduled evaluation never meets a malformed rule.
    pub fn validate(&self) -> EngineResult<()> {
        if self.name.is_empty() {
            return Err(EngineError::InvalidRule("name must not be empty".into()));
        }
        if self.metric.is_empty() {
            return Err(EngineError::InvalidRule("metric must not be empty".into()));
        }
        if !self.threshold.is_finite() {
            return Err(EngineError::InvalidRule("threshold must be finite".into()));
        }
        if !(0..=MAX_COOLDOWN_SECS).contains(&self.cooldown_secs) {
            return Err(EngineError::InvalidRule(format!(
                "cooldown must be between 0 and {} seconds",
                MAX_COOLDOWN_SECS
            )));
        }
        if self.condition == AlertCondition::Between {
            match self.threshold2 {
                None => {
                    return Err(EngineError::InvalidRule(
                        "'between' requires a second threshold".into(),
                    ))
                }
                Some(upper) if !upper.is_finite() || upper < self.threshold => {
                    return Err(EngineError::InvalidRule(
                        "second threshold must be finite and >= threshold".into(),
                    ))
                }
                Some(_) => {}
            }
        }
        let needs_recipient = self.channels.iter().any(|c| *c != Channel::Web);
        if needs_recipient && self.recipients.is_empty() {
            return Err(EngineError::InvalidRule(
                "email, sms and push channels need at least one recipient".into(),
            ));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> EngineResult<Duration> {
        Duration::try_seconds(self.cooldown_secs)
            .filter(|_| (0..=MAX_COOLDOWN_SECS).contains(&self.cooldown_secs))
            .ok_or_else(|| {
                EngineError::InvalidRule(format!(
                    "rule {} has an out-of-range cooldown of {}s",
                    self.id, self.cooldown_secs
                ))
            })
    }

    /// Remaining cooldown at `now`, if any.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> EngineResult<Option<Duration>> {
        let Some(last) = self.last_triggered else {
            return Ok(None);
        };
        let cooldown = self.cooldown()?;
        let elapsed = now.signed_duration_since(last);
        if elapsed < cooldown {
            Ok(Some(cooldown - elapsed))
        } else {
            Ok(None)
        }
    }
}

/// Whether `value` satisfies the rule's condition.
pub fn evaluate(rule: &AlertRule, value: f64) -> EngineResult<bool> {
    match rule.condition {
        AlertCondition::Greater => Ok(value > rule.threshold),
        AlertCondition::Less => Ok(value < rule.threshold),
        // exact comparison: callers pre-round noisy metrics
        AlertCondition::Equal => Ok(value == rule.threshold),
        AlertCondition::Between => {
            let upper = rule.threshold2.ok_or_else(|| {
                EngineError::InvalidRule(format!("rule {} uses 'between' without threshold2", rule.id))
            })?;
            Ok(rule.threshold <= value && value <= upper)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub channel: Channel,
    pub recipient: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertTrigger {
    pub id: String,
    pub rule_id: String,
    pub tenant_id: String,
    pub alert_type: AlertType,
    pub value: f64,
    pub message: String,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub triggered_at: DateTime<Utc>,
    pub dispatch_failures: Vec<DispatchFailure>,
}

impl AlertTrigger {
    pub fn new(rule: &AlertRule, value: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            tenant_id: rule.tenant_id.clone(),
            alert_type: rule.alert_type,
            value,
            message: compose_message(rule, value),
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            triggered_at: now,
            dispatch_failures: Vec::new(),
        }
    }
}

fn condition_text(rule: &AlertRule) -> String {
    match rule.condition {
        AlertCondition::Greater => format!("above {}", format_number(rule.threshold)),
        AlertCondition::Less => format!("below {}", format_number(rule.threshold)),
        AlertCondition::Equal => format!("equal to {}", format_number(rule.threshold)),
        AlertCondition::Between => format!(
            "between {} and {}",
            format_number(rule.threshold),
            format_number(rule.threshold2.unwrap_or(rule.threshold))
        ),
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// Human-readable trigger message, phrased per alert type.
pub fn compose_message(rule: &AlertRule, value: f64) -> String {
    let observed = format_number(value);
    let condition = condition_text(rule);
    match rule.alert_type {
        AlertType::Deadline => format!(
            "{}: {} is {} ({}); deadlines are at risk",
            rule.name, rule.metric, observed, condition
        ),
        AlertType::Performance => format!(
            "{}: performance indicator {} reached {} ({})",
            rule.name, rule.metric, observed, condition
        ),
        AlertType::Demand => format!(
            "{}: demand for {} is {} ({})",
            rule.name, rule.metric, observed, condition
        ),
        AlertType::Satisfaction => format!(
            "{}: citizen satisfaction metric {} is {} ({})",
            rule.name, rule.metric, observed, condition
        ),
        AlertType::Load => format!(
            "{}: workload {} is {} ({})",
            rule.name, rule.metric, observed, condition
        ),
        AlertType::Budget => format!(
            "{}: budget metric {} is {} ({})",
            rule.name, rule.metric, observed, condition
        ),
    }
}
