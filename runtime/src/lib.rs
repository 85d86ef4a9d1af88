//! # Lending Runtime
//!
//! Runtime implementation for the station lending platform.
//!
//! This crate provides the Store runtime that coordinates reducer execution
//! and effect handling.
//!
//! ## Core Components
//!
//! - **Store**: The runtime that manages state and executes effects
//! - **Effect Executor**: Executes effect descriptions and feeds actions back to reducers
//! - **Event Loop**: Manages the action → reducer → effects → action feedback loop
//!
//! Notification and audit effects are best-effort: a failure is logged,
//! counted, and handed to the effect's `on_error` callback. It never reaches
//! the caller that sent the original action.
//!
//! ## Example
//!
//! ```ignore
//! use lending_runtime::Store;
//!
//! let store = Store::new(DispatchState::default(), DispatchReducer, environment);
//!
//! store.send(DispatchAction::Publish { event }).await?;
//!
//! let delivered = store.state(|s| s.delivered).await;
//! ```

use lending_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, watch};

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        ///
        /// This error is returned when `send()` is called after shutdown initiated.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        ///
        /// Some effects were still running when the timeout elapsed.
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for in-flight effects to settle
        #[error("Timed out with {0} effects still running")]
        Timeout(usize),
    }
}

pub use error::StoreError;

/// Handle for tracking effect completion
///
/// Returned by [`Store::send()`] to allow waiting for the effects of a single
/// action to complete. Effects produced by feedback actions are not tracked;
/// use [`Store::wait_idle`] to wait for the whole store to settle.
///
/// # Example
///
/// ```ignore
/// let mut handle = store.send(Action::Start).await?;
/// handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    effects: Arc<AtomicUsize>,
    completion: watch::Receiver<()>,
}

impl EffectHandle {
    fn new() -> (Self, EffectTracking) {
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(());

        let handle = Self {
            effects: Arc::clone(&counter),
            completion: rx,
        };

        let tracking = EffectTracking {
            counter,
            notifier: tx,
        };

        (handle, tracking)
    }

    /// Create a handle that's already complete
    #[must_use]
    pub fn completed() -> Self {
        let (tx, rx) = watch::channel(());
        let _ = tx.send(());

        Self {
            effects: Arc::new(AtomicUsize::new(0)),
            completion: rx,
        }
    }

    /// Wait for all effects to complete
    pub async fn wait(&mut self) {
        while self.effects.load(Ordering::SeqCst) > 0 {
            if self.completion.changed().await.is_err() {
                break;
            }
        }
    }

    /// Wait for all effects to complete with a timeout
    ///
    /// # Errors
    ///
    /// Returns `Err(())` if the timeout expires before all effects complete.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), ()> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| ())
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.effects.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Internal: Effect tracking context passed through effect execution
#[derive(Clone)]
struct EffectTracking {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl EffectTracking {
    fn increment(&self) {
        self.counter.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        if self.counter.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Internal: RAII guard that decrements effect counter on drop
///
/// Ensures the effect counter is always decremented, even if the effect panics.
struct DecrementGuard(EffectTracking);

impl Drop for DecrementGuard {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Guard that decrements an atomic counter on drop (for shutdown tracking)
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store runtime for coordinating reducer execution and effect handling.
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicCounterGuard, AtomicUsize, DecrementGuard, Duration, Effect,
        EffectHandle, EffectTracking, Ordering, Reducer, RwLock, StoreError,
    };
    use tokio::sync::{broadcast, watch};

    const POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock` for concurrent access)
    /// 2. Reducer (business logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        /// Every action produced by an effect is broadcast here before it is
        /// fed back into the reducer.
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_broadcast_capacity(initial_state, reducer, environment, 64)
        }

        /// Create a new Store with custom action broadcast capacity
        #[must_use]
        pub fn with_broadcast_capacity(
            initial_state: S,
            reducer: R,
            environment: E,
            capacity: usize,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(capacity.max(1));

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
            }
        }

        /// Number of effects currently in flight across the whole store.
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.pending_effects.load(Ordering::Acquire)
        }

        /// Wait until no effects are in flight.
        ///
        /// Unlike [`EffectHandle::wait`], this also covers effects spawned by
        /// feedback actions.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::Timeout`] if effects are still running when
        /// the timeout elapses.
        pub async fn wait_idle(&self, timeout: Duration) -> Result<(), StoreError> {
            let start = std::time::Instant::now();
            loop {
                let pending = self.pending_effects();
                if pending == 0 {
                    return Ok(());
                }
                if start.elapsed() >= timeout {
                    return Err(StoreError::Timeout(pending));
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        /// Initiate graceful shutdown of the store
        ///
        /// Rejects new actions, then waits for pending effects to complete.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if the timeout expires before all
        /// pending effects complete.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Initiating graceful shutdown");
            metrics::counter!("store.shutdown.initiated").increment(1);

            self.shutdown.store(true, Ordering::Release);

            match self.wait_idle(timeout).await {
                Ok(()) => {
                    tracing::info!("All effects completed, shutdown successful");
                    Ok(())
                },
                Err(StoreError::Timeout(pending)) => {
                    tracing::error!(pending_effects = pending, "Shutdown timed out");
                    metrics::counter!("store.shutdown.timeout").increment(1);
                    Err(StoreError::ShutdownTimeout(pending))
                },
                Err(other) => Err(other),
            }
        }

        /// Send an action to the store
        ///
        /// 1. Acquires write lock on state
        /// 2. Calls reducer with (state, action, environment)
        /// 3. Executes returned effects asynchronously
        /// 4. Effects may produce more actions (feedback loop)
        ///
        /// `send()` returns after starting effect execution, not completion.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError>
        where
            R: Clone,
            E: Clone,
        {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                metrics::counter!("store.shutdown.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            metrics::counter!("store.commands.total").increment(1);

            let (handle, tracking) = EffectHandle::new();

            let effects = {
                let mut state = self.state.write().await;

                let start = std::time::Instant::now();
                let effects = self.reducer.reduce(&mut *state, action, &self.environment);
                metrics::histogram!("store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                tracing::trace!("Reducer completed, returned {} effects", effects.len());
                effects
            };

            for effect in effects {
                self.execute_effect(effect, tracking.clone());
            }

            Ok(handle)
        }

        /// Subscribe to all actions produced by effects
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let delivered = store.state(|s| s.delivered).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        /// Start tracking one spawned effect, both per-handle and store-wide.
        fn begin(&self, tracking: &EffectTracking) -> (DecrementGuard, AtomicCounterGuard) {
            tracking.increment();
            self.pending_effects.fetch_add(1, Ordering::SeqCst);
            (
                DecrementGuard(tracking.clone()),
                AtomicCounterGuard(Arc::clone(&self.pending_effects)),
            )
        }

        /// Broadcast a feedback action and send it back through the reducer.
        async fn feed_back(&self, action: Option<A>)
        where
            R: Clone,
            E: Clone,
        {
            if let Some(action) = action {
                let _ = self.action_broadcast.send(action.clone());
                if let Err(error) = self.send(action).await {
                    tracing::debug!(error = %error, "Dropped feedback action");
                }
            }
        }

        /// Execute an effect with tracking
        ///
        /// Effects are fire-and-forget. A panicking effect task is isolated by
        /// `tokio::spawn`; the guards keep the counters balanced.
        #[allow(clippy::needless_pass_by_value)] // tracking is cloned into tasks
        #[allow(clippy::too_many_lines)]
        fn execute_effect(&self, effect: Effect<A>, tracking: EffectTracking)
        where
            R: Clone,
            E: Clone,
        {
            match effect {
                Effect::None => {
                    metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                },
                Effect::Future(fut) => {
                    metrics::counter!("store.effects.executed", "type" => "future").increment(1);
                    let guards = self.begin(&tracking);
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guards = guards;
                        let action = fut.await;
                        store.feed_back(action).await;
                    });
                },
                Effect::Delay { duration, action } => {
                    metrics::counter!("store.effects.executed", "type" => "delay").increment(1);
                    let guards = self.begin(&tracking);
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guards = guards;
                        tokio::time::sleep(duration).await;
                        store.feed_back(Some(*action)).await;
                    });
                },
                Effect::Parallel(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "parallel").increment(1);
                    for effect in effects {
                        self.execute_effect(effect, tracking.clone());
                    }
                },
                Effect::Sequential(effects) => {
                    metrics::counter!("store.effects.executed", "type" => "sequential")
                        .increment(1);
                    let guards = self.begin(&tracking);
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guards = guards;

                        for effect in effects {
                            let (sub_tx, mut sub_rx) = watch::channel(());
                            let sub_tracking = EffectTracking {
                                counter: Arc::new(AtomicUsize::new(0)),
                                notifier: sub_tx,
                            };

                            store.execute_effect(effect, sub_tracking.clone());

                            while sub_tracking.counter.load(Ordering::SeqCst) > 0 {
                                if sub_rx.changed().await.is_err() {
                                    break;
                                }
                            }
                        }
                    });
                },
                Effect::Notify(op) => {
                    metrics::counter!("store.effects.executed", "type" => "notify").increment(1);
                    let guards = self.begin(&tracking);
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guards = guards;
                        let channel = op.message.channel;
                        let recipient = op.message.recipient.clone();

                        let action = match op.notifier.send(op.message).await {
                            Ok(()) => {
                                tracing::debug!(%channel, %recipient, "notification delivered");
                                (op.on_success)(())
                            },
                            Err(error) => {
                                tracing::warn!(
                                    %channel,
                                    %recipient,
                                    error = %error,
                                    "notification failed"
                                );
                                (op.on_error)(error)
                            },
                        };

                        store.feed_back(action).await;
                    });
                },
                Effect::Audit(op) => {
                    metrics::counter!("store.effects.executed", "type" => "audit").increment(1);
                    let guards = self.begin(&tracking);
                    let store = self.clone();

                    tokio::spawn(async move {
                        let _guards = guards;
                        let action_name = op.entry.action.clone();

                        let action = match op.log.record(op.entry).await {
                            Ok(()) => None,
                            Err(error) => {
                                tracing::warn!(
                                    action = %action_name,
                                    error = %error,
                                    "audit write failed"
                                );
                                (op.on_error)(error)
                            },
                        };

                        store.feed_back(action).await;
                    });
                },
            }
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }
}

pub use store::Store;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use lending_core::audit::{AuditEntry, AuditLog};
    use lending_core::notification::{Channel, Notifier, OutboundMessage};
    use lending_core::{SmallVec, smallvec};
    use lending_testing::{InMemoryAuditLog, RecordingNotifier};

    #[derive(Debug, Clone, Default)]
    struct TestState {
        value: i32,
        delivered: usize,
        failed: usize,
    }

    #[derive(Debug, Clone)]
    enum TestAction {
        Increment,
        Decrement,
        ProduceEffect,
        ProduceDelayedAction,
        ProduceParallelEffects,
        ProduceSequentialEffects,
        Notify,
        Delivered,
        DeliveryFailed,
        Audit,
    }

    #[derive(Clone)]
    struct TestEnv {
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
    }

    #[derive(Debug, Clone)]
    struct TestReducer;

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;
        type Environment = TestEnv;

        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]> {
            match action {
                TestAction::Increment => {
                    state.value += 1;
                    smallvec![Effect::None]
                },
                TestAction::Decrement => {
                    state.value -= 1;
                    smallvec![Effect::None]
                },
                TestAction::ProduceEffect => {
                    smallvec![Effect::Future(Box::pin(async { Some(TestAction::Increment) }))]
                },
                TestAction::ProduceDelayedAction => smallvec![Effect::Delay {
                    duration: Duration::from_millis(10),
                    action: Box::new(TestAction::Increment),
                }],
                TestAction::ProduceParallelEffects => smallvec![Effect::Parallel(vec![
                    Effect::Future(Box::pin(async { Some(TestAction::Increment) })),
                    Effect::Future(Box::pin(async { Some(TestAction::Increment) })),
                    Effect::Future(Box::pin(async { Some(TestAction::Increment) })),
                ])],
                TestAction::ProduceSequentialEffects => smallvec![Effect::Sequential(vec![
                    Effect::Future(Box::pin(async { Some(TestAction::Increment) })),
                    Effect::Future(Box::pin(async { Some(TestAction::Increment) })),
                    Effect::Future(Box::pin(async { Some(TestAction::Decrement) })),
                ])],
                TestAction::Notify => smallvec![lending_core::send_notification! {
                    notifier: env.notifier,
                    message: OutboundMessage::new(Channel::Email, "m@station.org", "s", "b"),
                    on_success: || Some(TestAction::Delivered),
                    on_error: |_error| Some(TestAction::DeliveryFailed)
                }],
                TestAction::Delivered => {
                    state.delivered += 1;
                    smallvec![Effect::None]
                },
                TestAction::DeliveryFailed => {
                    state.failed += 1;
                    smallvec![Effect::None]
                },
                TestAction::Audit => smallvec![lending_core::record_audit! {
                    log: env.audit,
                    entry: AuditEntry::new("tester", "test.audited", "subject-1", chrono::Utc::now()),
                    on_error: |_error| None
                }],
            }
        }
    }

    fn store_with(
        notifier: Arc<RecordingNotifier>,
        audit: Arc<InMemoryAuditLog>,
    ) -> Store<TestState, TestAction, TestEnv, TestReducer> {
        Store::new(
            TestState::default(),
            TestReducer,
            TestEnv { notifier, audit },
        )
    }

    fn store() -> Store<TestState, TestAction, TestEnv, TestReducer> {
        store_with(
            Arc::new(RecordingNotifier::new()),
            Arc::new(InMemoryAuditLog::new()),
        )
    }

    #[tokio::test]
    async fn test_send_action() {
        let store = store();
        store.send(TestAction::Increment).await.unwrap();
        assert_eq!(store.state(|s| s.value).await, 1);
    }

    #[tokio::test]
    async fn test_effect_future_feeds_back() {
        let store = store();
        store.send(TestAction::ProduceEffect).await.unwrap();
        store.wait_idle(Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.state(|s| s.value).await, 1);
    }

    #[tokio::test]
    async fn test_effect_delay() {
        let store = store();
        let mut handle = store.send(TestAction::ProduceDelayedAction).await.unwrap();
        handle
            .wait_with_timeout(Duration::from_secs(1))
            .await
            .unwrap();
        store.wait_idle(Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.state(|s| s.value).await, 1);
    }

    #[tokio::test]
    async fn test_parallel_and_sequential() {
        let store = store();
        store.send(TestAction::ProduceParallelEffects).await.unwrap();
        store.send(TestAction::ProduceSequentialEffects).await.unwrap();
        store.wait_idle(Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.state(|s| s.value).await, 4);
    }

    #[tokio::test]
    async fn test_notify_success_feeds_back() {
        let notifier = Arc::new(RecordingNotifier::new());
        let store = store_with(Arc::clone(&notifier), Arc::new(InMemoryAuditLog::new()));

        store.send(TestAction::Notify).await.unwrap();
        store.wait_idle(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.state(|s| s.delivered).await, 1);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_notify_failure_is_swallowed() {
        let notifier = Arc::new(RecordingNotifier::failing());
        let store = store_with(Arc::clone(&notifier), Arc::new(InMemoryAuditLog::new()));

        store.send(TestAction::Notify).await.unwrap();
        store.wait_idle(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.state(|s| (s.delivered, s.failed)).await, (0, 1));
    }

    #[tokio::test]
    async fn test_audit_effect_records_entry() {
        let audit = Arc::new(InMemoryAuditLog::new());
        let store = store_with(Arc::new(RecordingNotifier::new()), Arc::clone(&audit));

        store.send(TestAction::Audit).await.unwrap();
        store.wait_idle(Duration::from_secs(1)).await.unwrap();

        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].subject_id, "subject-1");
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_actions() {
        let store = store();
        store.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            store.send(TestAction::Increment).await,
            Err(StoreError::ShutdownInProgress)
        ));
    }

    #[tokio::test]
    async fn test_subscribe_sees_feedback_actions() {
        let store = store();
        let mut rx = store.subscribe_actions();
        store.send(TestAction::ProduceEffect).await.unwrap();
        let action = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(action, TestAction::Increment));
    }
}
