//! Email delivery through an SMTP relay, using Lettre.

use lending_core::notification::{Channel, NotificationError, Notifier, OutboundMessage};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// SMTP relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay host, e.g. `smtp.example.org`
    pub host: String,
    /// Relay port (587 for STARTTLS, 465 for TLS)
    pub port: u16,
    /// Login
    pub username: String,
    /// Password
    #[serde(skip_serializing)]
    pub password: String,
    /// `From` header, e.g. `Lending <noreply@example.org>`
    pub from: String,
}

/// Sends [`Channel::Email`] messages as plain-text mail.
///
/// # Examples
///
/// ```ignore
/// let notifier = SmtpNotifier::new(&config.smtp)?;
/// notifier.send(OutboundMessage::new(Channel::Email, "m@station.org", "Low stock", body)).await?;
/// ```
#[derive(Clone)]
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    /// Build a notifier from relay settings.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError::DeliveryFailed`] if the relay host or the
    /// `from` address is invalid.
    pub fn new(config: &SmtpConfig) -> Result<Self, NotificationError> {
        let from = config.from.parse::<Mailbox>().map_err(|e| {
            NotificationError::DeliveryFailed(format!("Invalid from address: {e}"))
        })?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| NotificationError::DeliveryFailed(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { transport, from })
    }

    fn build_message(&self, message: &OutboundMessage) -> Result<Message, NotificationError> {
        let to = message
            .recipient
            .parse::<Mailbox>()
            .map_err(|_| NotificationError::InvalidRecipient {
                channel: Channel::Email,
                recipient: message.recipient.clone(),
            })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| NotificationError::DeliveryFailed(format!("Failed to build email: {e}")))
    }
}

impl Notifier for SmtpNotifier {
    fn send(
        &self,
        message: OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
        Box::pin(async move {
            if message.channel != Channel::Email {
                return Err(NotificationError::ChannelUnavailable(message.channel));
            }
            let email = self.build_message(&message)?;

            self.transport
                .send(email)
                .await
                .map_err(|e| NotificationError::DeliveryFailed(format!("Failed to send email: {e}")))?;

            tracing::debug!(recipient = %message.recipient, "email sent");
            Ok(())
        })
    }
}
