use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

use super::channels::{Channel, ChannelError, NotificationSink};
use super::rules::{AlertRule, DispatchFailure};

/// Outcome of fanning one message out over a rule's channels and recipients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failures: Vec<DispatchFailure>,
}

impl DispatchReport {
    pub fn all_delivered(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Best-effort fan-out to the notification sink.
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    send_timeout: Duration,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, send_timeout: Duration) -> Self {
        Self { sink, send_timeout }
    }

    /// One send per (channel, recipient). The web channel goes to the
    /// tenant inbox when a rule has no recipients.
    pub async fn dispatch(&self, rule: &AlertRule, message: &str) -> DispatchReport {
        let mut deliveries: Vec<(Channel, String)> = Vec::new();
        for channel in &rule.channels {
            if rule.recipients.is_empty() && *channel == Channel::Web {
                deliveries.push((*channel, format!("tenant:{}", rule.tenant_id)));
                continue;
            }
            for recipient in &rule.recipients {
                deliveries.push((*channel, recipient.clone()));
            }
        }

        let sends = deliveries.iter().map(|(channel, recipient)| async move {
            let result = match timeout(self.send_timeout, self.sink.send(*channel, recipient, message)).await
            {
                Ok(result) => result,
                Err(_) => Err(ChannelError::Timeout(*channel)),
            };
            (*channel, recipient.clone(), result)
        });

        let mut report = DispatchReport {
            attempted: deliveries.len(),
            ..Default::default()
        };
        for (channel, recipient, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(rule_id = %rule.id, %channel, recipient = %recipient, "Notification dispatch failed: {}", e);
                    report.failures.push(DispatchFailure {
                        channel,
                        recipient,
                        reason: e.to_string(),
                    });
                }
            }
        }
        report
    }
}
