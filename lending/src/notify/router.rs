//! Routes each message to the notifier configured for its channel.

use lending_core::notification::{Channel, NotificationError, Notifier, OutboundMessage};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// One notifier per [`Channel`].
#[derive(Clone, Default)]
pub struct ChannelRouter {
    email: Option<Arc<dyn Notifier>>,
    whatsapp: Option<Arc<dyn Notifier>>,
}

impl ChannelRouter {
    /// Router with no channels: every send fails with
    /// [`NotificationError::ChannelUnavailable`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver email through `notifier`.
    #[must_use]
    pub fn with_email(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.email = Some(notifier);
        self
    }

    /// Deliver WhatsApp messages through `notifier`.
    #[must_use]
    pub fn with_whatsapp(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.whatsapp = Some(notifier);
        self
    }

    fn route(&self, channel: Channel) -> Option<&Arc<dyn Notifier>> {
        match channel {
            Channel::Email => self.email.as_ref(),
            Channel::WhatsApp => self.whatsapp.as_ref(),
        }
    }
}

impl Notifier for ChannelRouter {
    fn send(
        &self,
        message: OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
        Box::pin(async move {
            match self.route(message.channel) {
                Some(notifier) => notifier.send(message).await,
                None => Err(NotificationError::ChannelUnavailable(message.channel)),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lending_testing::RecordingNotifier;

    #[tokio::test]
    async fn messages_go_to_their_channel() {
        let email = Arc::new(RecordingNotifier::new());
        let whatsapp = Arc::new(RecordingNotifier::new());
        let router = ChannelRouter::new()
            .with_email(email.clone())
            .with_whatsapp(whatsapp.clone());

        router
            .send(OutboundMessage::new(Channel::Email, "m@north.org", "s", "b"))
            .await
            .unwrap();
        router
            .send(OutboundMessage::new(Channel::WhatsApp, "+97250", "", "b"))
            .await
            .unwrap();

        assert_eq!(email.sent().len(), 1);
        assert_eq!(whatsapp.sent().len(), 1);
        assert_eq!(whatsapp.sent()[0].channel, Channel::WhatsApp);
    }

    #[tokio::test]
    async fn unconfigured_channel_is_unavailable() {
        let router = ChannelRouter::new();
        let err = router
            .send(OutboundMessage::new(Channel::Email, "m@north.org", "s", "b"))
            .await
            .unwrap_err();
        assert_eq!(err, NotificationError::ChannelUnavailable(Channel::Email));
    }
}
