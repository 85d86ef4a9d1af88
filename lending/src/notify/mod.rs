//! [`Notifier`](lending_core::notification::Notifier) implementations.
//!
//! - [`ConsoleNotifier`]: logs messages (development, and the fallback for an
//!   unconfigured channel)
//! - [`SmtpNotifier`]: email through an SMTP relay
//! - [`WhatsAppWebhookNotifier`]: WhatsApp through an HTTP gateway
//! - [`ChannelRouter`]: picks one of the above by [`Channel`](lending_core::notification::Channel)

pub mod console;
pub mod router;
pub mod smtp;
pub mod webhook;

pub use console::ConsoleNotifier;
pub use router::ChannelRouter;
pub use smtp::{SmtpConfig, SmtpNotifier};
pub use webhook::WhatsAppWebhookNotifier;
