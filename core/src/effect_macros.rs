//! Declarative macros for ergonomic effect construction
//!
//! These macros reduce boilerplate when creating `Effect` variants, particularly
//! the notification and audit operations whose callbacks must be boxed.

/// Create an `Effect::Notify` operation
///
/// # Example
///
/// ```rust,ignore
/// use lending_core::send_notification;
///
/// send_notification! {
///     notifier: env.notifier,
///     message: message,
///     on_success: || Some(DispatchAction::Delivered { channel, recipient }),
///     on_error: |error| Some(DispatchAction::DeliveryFailed { error: error.to_string() })
/// }
/// ```
#[macro_export]
macro_rules! send_notification {
    (
        notifier: $notifier:expr,
        message: $message:expr,
        on_success: || $success_body:expr,
        on_error: |$error_param:ident| $error_body:expr
    ) => {
        $crate::effect::Effect::Notify($crate::effect::NotifyOperation {
            notifier: ::std::sync::Arc::clone(&$notifier),
            message: $message,
            on_success: ::std::boxed::Box::new(move |()| $success_body),
            on_error: ::std::boxed::Box::new(move |$error_param| $error_body),
        })
    };
}

/// Create an `Effect::Audit` operation
///
/// # Example
///
/// ```rust,ignore
/// use lending_core::record_audit;
///
/// record_audit! {
///     log: env.audit_log,
///     entry: AuditEntry::new("alice", "request.approved", request_id, now),
///     on_error: |error| Some(DispatchAction::AuditFailed { error: error.to_string() })
/// }
/// ```
#[macro_export]
macro_rules! record_audit {
    (
        log: $log:expr,
        entry: $entry:expr,
        on_error: |$error_param:ident| $error_body:expr
    ) => {
        $crate::effect::Effect::Audit($crate::effect::AuditOperation {
            log: ::std::sync::Arc::clone(&$log),
            entry: $entry,
            on_error: ::std::boxed::Box::new(move |$error_param| $error_body),
        })
    };
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditEntry, AuditError, AuditLog};
    use crate::effect::Effect;
    use crate::notification::{Channel, NotificationError, Notifier, OutboundMessage};
    use chrono::Utc;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;

    #[derive(Clone, Debug)]
    enum TestAction {
        Sent,
        Failed { error: String },
    }

    struct NullNotifier;

    impl Notifier for NullNotifier {
        fn send(
            &self,
            _message: OutboundMessage,
        ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct NullAuditLog;

    impl AuditLog for NullAuditLog {
        fn record(
            &self,
            _entry: AuditEntry,
        ) -> Pin<Box<dyn Future<Output = Result<(), AuditError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn test_send_notification_macro_wires_callbacks() {
        let notifier: Arc<dyn Notifier> = Arc::new(NullNotifier);
        let effect = send_notification! {
            notifier: notifier,
            message: OutboundMessage::new(Channel::Email, "a@b.org", "hi", "body"),
            on_success: || Some(TestAction::Sent),
            on_error: |error| Some(TestAction::Failed { error: error.to_string() })
        };

        let Effect::Notify(op) = effect else {
            unreachable!("macro always builds Effect::Notify");
        };
        assert_eq!(op.message.recipient, "a@b.org");
        assert!(matches!((op.on_success)(()), Some(TestAction::Sent)));
        assert!(matches!(
            (op.on_error)(NotificationError::DeliveryFailed("x".to_string())),
            Some(TestAction::Failed { .. })
        ));
    }

    #[test]
    fn test_record_audit_macro() {
        let log: Arc<dyn AuditLog> = Arc::new(NullAuditLog);
        let effect: Effect<TestAction> = record_audit! {
            log: log,
            entry: AuditEntry::new("alice", "request.rejected", "r-1", Utc::now()),
            on_error: |error| Some(TestAction::Failed { error: error.to_string() })
        };

        assert!(matches!(effect, Effect::Audit(_)));
    }
}
