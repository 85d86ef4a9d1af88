//! WhatsApp delivery through an HTTP gateway.

use lending_core::notification::{Channel, NotificationError, Notifier, OutboundMessage};
use reqwest::Client;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

#[derive(Serialize)]
struct WebhookPayload<'a> {
    to: &'a str,
    body: &'a str,
}

/// Posts [`Channel::WhatsApp`] messages as `{"to", "body"}` JSON to a gateway.
#[derive(Clone)]
pub struct WhatsAppWebhookNotifier {
    client: Client,
    url: String,
    token: Option<String>,
}

impl WhatsAppWebhookNotifier {
    /// Creates a new `WhatsAppWebhookNotifier` posting to `url`, optionally
    /// with a bearer token.
    #[must_use]
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            token,
        }
    }
}

impl Notifier for WhatsAppWebhookNotifier {
    fn send(
        &self,
        message: OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
        Box::pin(async move {
            if message.channel != Channel::WhatsApp {
                return Err(NotificationError::ChannelUnavailable(message.channel));
            }
            if message.recipient.trim().is_empty() {
                return Err(NotificationError::InvalidRecipient {
                    channel: Channel::WhatsApp,
                    recipient: message.recipient,
                });
            }

            let mut request = self.client.post(&self.url).json(&WebhookPayload {
                to: &message.recipient,
                body: &message.body,
            });
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| NotificationError::DeliveryFailed(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(NotificationError::DeliveryFailed(format!(
                    "gateway returned {}: {body}",
                    status.as_u16()
                )));
            }

            tracing::debug!(recipient = %message.recipient, "whatsapp message sent");
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    type Received = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

    async fn gateway(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route(
                "/send",
                post(
                    move |State(received): State<Received>,
                          headers: HeaderMap,
                          Json(body): Json<serde_json::Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .map(|v| v.to_str().unwrap().to_string());
                        received.lock().unwrap().push((auth, body));
                        status
                    },
                ),
            )
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}/send"), received)
    }

    #[tokio::test]
    async fn posts_recipient_and_body_with_bearer_token() {
        let (url, received) = gateway(StatusCode::OK).await;
        let notifier = WhatsAppWebhookNotifier::new(url, Some("t0k".to_string()));

        notifier
            .send(OutboundMessage::new(Channel::WhatsApp, "+972500000001", "", "hello"))
            .await
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.as_deref(), Some("Bearer t0k"));
        assert_eq!(received[0].1["to"], "+972500000001");
        assert_eq!(received[0].1["body"], "hello");
    }

    #[tokio::test]
    async fn gateway_error_is_a_delivery_failure() {
        let (url, _) = gateway(StatusCode::BAD_GATEWAY).await;
        let notifier = WhatsAppWebhookNotifier::new(url, None);

        let err = notifier
            .send(OutboundMessage::new(Channel::WhatsApp, "+972500000001", "", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::DeliveryFailed(m) if m.contains("502")));
    }

    #[tokio::test]
    async fn blank_recipient_is_rejected_without_a_call() {
        let notifier = WhatsAppWebhookNotifier::new("http://127.0.0.1:9/unused", None);
        let err = notifier
            .send(OutboundMessage::new(Channel::WhatsApp, " ", "", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::InvalidRecipient { .. }));
    }
}
