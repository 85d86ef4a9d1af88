//! Outbound notification capability.
//!
//! Delivery is best-effort: a failed send is reported back to the caller as a
//! [`NotificationError`] and never retried here. Callers decide whether a
//! failure matters (for the lending platform it never does).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Delivery channel for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Email (station managers)
    Email,
    /// WhatsApp (requesters, addressed by phone number)
    WhatsApp,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::WhatsApp => write!(f, "whatsapp"),
        }
    }
}

/// A message addressed to one recipient on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Channel to deliver on
    pub channel: Channel,
    /// Email address or phone number, depending on the channel
    pub recipient: String,
    /// Subject line (ignored by channels without one)
    pub subject: String,
    /// Message body
    pub body: String,
}

impl OutboundMessage {
    /// Create a new outbound message.
    #[must_use]
    pub fn new(
        channel: Channel,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// Errors reported by a [`Notifier`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// The recipient address is unusable for the channel.
    #[error("Invalid recipient '{recipient}' for {channel}")]
    InvalidRecipient {
        /// Channel the message was addressed to
        channel: Channel,
        /// Offending recipient
        recipient: String,
    },

    /// No transport is configured for the channel.
    #[error("No transport configured for {0}")]
    ChannelUnavailable(Channel),

    /// The transport accepted the request but reported a failure.
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Sends outbound messages.
///
/// # Dyn Compatibility
///
/// Returns `Pin<Box<dyn Future>>` instead of using `async fn` so the trait can
/// be held as `Arc<dyn Notifier>` inside effects.
pub trait Notifier: Send + Sync {
    /// Deliver a single message.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError`] if the message could not be delivered.
    fn send(
        &self,
        message: OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>>;
}
