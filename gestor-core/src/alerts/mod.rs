//! Alert rules, triggers and notification dispatch.

pub mod channels;
pub mod engine;
pub mod notifications;
pub mod rules;

pub use channels::{Channel, ChannelError, LoggingSink, NotificationSink};
pub use engine::{AlertEngine, AlertStats, EvaluationOutcome, FireOutcome, TestDispatch};
pub use notifications::{DispatchReport, NotificationDispatcher};
pub use rules::{
    compose_message, evaluate, AlertCondition, AlertRule, AlertRuleUpdate, AlertTrigger, AlertType,
    DispatchFailure, EvaluationFrequency, NewAlertRule,
};
