//! # Lending Testing
//!
//! Testing utilities and helpers for the station lending platform.
//!
//! This crate provides:
//! - Deterministic clocks (`FixedClock`, `ManualClock`)
//! - In-memory doubles for the consumed capabilities (`RecordingNotifier`,
//!   `InMemoryAuditLog`)
//! - A Given-When-Then harness for reducers
//!
//! ## Example
//!
//! ```ignore
//! use lending_testing::{ManualClock, RecordingNotifier};
//!
//! #[tokio::test]
//! async fn follow_up_after_a_week() {
//!     let clock = Arc::new(ManualClock::new(test_clock().now()));
//!     let notifier = Arc::new(RecordingNotifier::new());
//!     // ... run the escalation engine, advance the clock, run again
//!     clock.advance(chrono::Duration::days(7));
//! }
//! ```

use chrono::{DateTime, Utc};
use lending_core::environment::Clock;


/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use lending_core::audit::{AuditEntry, AuditError, AuditLog};
    use lending_core::notification::{Channel, NotificationError, Notifier, OutboundMessage};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use lending_testing::mocks::FixedClock;
    /// use lending_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Used for multi-day scenarios (token expiry, faulty-equipment age,
    /// weekly follow-ups) without sleeping.
    #[derive(Debug)]
    pub struct ManualClock {
        millis: AtomicI64,
    }

    impl ManualClock {
        /// Start the clock at `start`.
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                millis: AtomicI64::new(start.timestamp_millis()),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
        }

        /// Jump to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst))
                .unwrap_or_default()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Notifier that records every message it is asked to send.
    ///
    /// In failing mode every send is recorded as attempted and then rejected.
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<OutboundMessage>>,
        attempts: Mutex<Vec<OutboundMessage>>,
        failing: AtomicBool,
    }

    impl RecordingNotifier {
        /// A notifier that accepts every message.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// A notifier that rejects every message.
        #[must_use]
        pub fn failing() -> Self {
            let notifier = Self::default();
            notifier.set_failing(true);
            notifier
        }

        /// Toggle failure mode.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Messages that were delivered.
        #[must_use]
        pub fn sent(&self) -> Vec<OutboundMessage> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Every message passed to `send`, delivered or not.
        #[must_use]
        pub fn attempts(&self) -> Vec<OutboundMessage> {
            self.attempts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Delivered messages on one channel.
        #[must_use]
        pub fn sent_on(&self, channel: Channel) -> Vec<OutboundMessage> {
            self.sent()
                .into_iter()
                .filter(|m| m.channel == channel)
                .collect()
        }

        /// Forget everything recorded so far.
        pub fn clear(&self) {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
            self.attempts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    impl Notifier for RecordingNotifier {
        fn send(
            &self,
            message: OutboundMessage,
        ) -> Pin<Box<dyn Future<Output = Result<(), NotificationError>> + Send + '_>> {
            Box::pin(async move {
                self.attempts
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(message.clone());

                if self.failing.load(Ordering::SeqCst) {
                    return Err(NotificationError::DeliveryFailed(
                        "recording notifier is in failing mode".to_string(),
                    ));
                }

                self.sent
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(message);
                Ok(())
            })
        }
    }

    /// Audit log kept in memory.
    #[derive(Debug, Default)]
    pub struct InMemoryAuditLog {
        entries: Mutex<Vec<AuditEntry>>,
        failing: AtomicBool,
    }

    impl InMemoryAuditLog {
        /// An empty log that accepts writes.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// A log that rejects every write.
        #[must_use]
        pub fn failing() -> Self {
            let log = Self::default();
            log.failing.store(true, Ordering::SeqCst);
            log
        }

        /// Snapshot of all entries, in write order.
        #[must_use]
        pub fn entries(&self) -> Vec<AuditEntry> {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Entries whose subject is `subject_id`.
        #[must_use]
        pub fn entries_for(&self, subject_id: &str) -> Vec<AuditEntry> {
            self.entries()
                .into_iter()
                .filter(|e| e.subject_id == subject_id)
                .collect()
        }
    }

    impl AuditLog for InMemoryAuditLog {
        fn record(
            &self,
            entry: AuditEntry,
        ) -> Pin<Box<dyn Future<Output = Result<(), AuditError>> + Send + '_>> {
            Box::pin(async move {
                if self.failing.load(Ordering::SeqCst) {
                    return Err(AuditError::Storage("audit log is in failing mode".to_string()));
                }
                self.entries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(entry);
                Ok(())
            })
        }
    }
}

pub use mocks::{FixedClock, InMemoryAuditLog, ManualClock, RecordingNotifier, test_clock};
pub use reducer_test::{ReducerTest, assertions};
