//! Notifier that writes messages to the log.

use lending_core::notification::{NotificationError, Notifier, OutboundMessage};
use std::future::Future;
use std::pin::Pin;

/// Logs every message at `info` instead of delivering it.
#[derive(Clone, Debug, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    /// Creates a new `ConsoleNotifier`.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Notifier for ConsoleNotifier {
    fn send(
        &self,
        message: OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                channel = %message.channel,
                recipient = %message.recipient,
                subject = %message.subject,
                body = %message.body,
                "outbound message (console)"
            );
            Ok(())
        })
    }
}
