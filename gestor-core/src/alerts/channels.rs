use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Web,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Web => "web",
            Channel::Push => "push",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Channel {channel} dispatch failed: {reason}")]
    DispatchFailed { channel: Channel, reason: String },

    #[error("Channel {0} timed out")]
    Timeout(Channel),

    #[error("Channel {0} is not configured")]
    Unsupported(Channel),
}

/// External email/SMS/web/push dispatcher.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, channel: Channel, recipient: &str, message: &str) -> Result<(), ChannelError>;
}

/// Sink that only writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn send(&self, channel: Channel, recipient: &str, message: &str) -> Result<(), ChannelError> {
        tracing::info!(%channel, recipient, "alert notification: {}", message);
        Ok(())
    }
}
