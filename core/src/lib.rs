//! # Lending Core
//!
//! Core traits and types for the station lending platform.
//!
//! The platform follows a reducer architecture: business rules are pure
//! functions over owned state, and every side effect (sending a message,
//! writing the activity log, scheduling a follow-up) is returned as an
//! [`Effect`](effect::Effect) value that a runtime executes later.
//!
//! ## Core Concepts
//!
//! - **State**: Owned domain state for a feature
//! - **Action**: All inputs to a reducer (commands, events, effect feedback)
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Description of a side effect, never its execution
//! - **Environment**: Injected capabilities (clock, notifier, audit log)
//!
//! ## Consumed Capabilities
//!
//! Two collaborators live outside the platform and are modelled here as traits
//! so every crate speaks the same vocabulary:
//!
//! - [`Notifier`](notification::Notifier): `send(message) -> success | failure`
//! - [`AuditLog`](audit::AuditLog): append-only activity log
//!
//! ## Example
//!
//! ```ignore
//! use lending_core::*;
//!
//! impl Reducer for DispatchReducer {
//!     type State = DispatchState;
//!     type Action = DispatchAction;
//!     type Environment = DispatchEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut DispatchState,
//!         action: DispatchAction,
//!         env: &DispatchEnvironment,
//!     ) -> SmallVec<[Effect<DispatchAction>; 4]> {
//!         smallvec![Effect::None]
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

/// Audit log capability
pub mod audit;

/// Declarative macros for building effects
#[macro_use]
pub mod effect_macros;

/// Notification capability
pub mod notification;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`
///
/// They contain all business logic and are deterministic and testable.
pub mod reducer {
    use super::SmallVec;
    use super::effect::Effect;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// Most actions produce at most a handful of effects, so the inline
        /// capacity of four avoids a heap allocation in the common case.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution) and are composable.
pub mod effect {
    use crate::audit::{AuditEntry, AuditError, AuditLog};
    use crate::notification::{NotificationError, Notifier, OutboundMessage};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::time::Duration;

    /// Callback invoked with the outcome of an effect, optionally producing
    /// an action that is fed back into the reducer.
    pub type Callback<T, Action> = Box<dyn FnOnce(T) -> Option<Action> + Send>;

    /// Send one outbound message through a [`Notifier`].
    pub struct NotifyOperation<Action> {
        /// Notifier that delivers the message
        pub notifier: Arc<dyn Notifier>,
        /// Message to deliver
        pub message: OutboundMessage,
        /// Called when the notifier reports success
        pub on_success: Callback<(), Action>,
        /// Called when the notifier reports failure
        pub on_error: Callback<NotificationError, Action>,
    }

    /// Append one entry to an [`AuditLog`].
    pub struct AuditOperation<Action> {
        /// Destination log
        pub log: Arc<dyn AuditLog>,
        /// Entry to append
        pub entry: AuditEntry,
        /// Called when the write fails
        pub on_error: Callback<AuditError, Action>,
    }

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should happen,
    /// returned from reducers and executed by the Store runtime.
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially
        Sequential(Vec<Effect<Action>>),

        /// Delayed action
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),

        /// Deliver an outbound notification (best-effort)
        Notify(NotifyOperation<Action>),

        /// Append an activity log entry (fire-and-forget)
        Audit(AuditOperation<Action>),
    }

    // Manual Debug implementation since Future and callbacks don't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
                Effect::Notify(op) => f
                    .debug_struct("Effect::Notify")
                    .field("channel", &op.message.channel)
                    .field("recipient", &op.message.recipient)
                    .finish_non_exhaustive(),
                Effect::Audit(op) => f
                    .debug_struct("Effect::Audit")
                    .field("action", &op.entry.action)
                    .field("subject_id", &op.entry.subject_id)
                    .finish_non_exhaustive(),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Count the leaf effects of a given kind, descending into
        /// `Parallel` and `Sequential` groups.
        #[must_use]
        pub fn count_where(&self, predicate: &dyn Fn(&Effect<Action>) -> bool) -> usize {
            match self {
                Effect::Parallel(effects) | Effect::Sequential(effects) => {
                    effects.iter().map(|e| e.count_where(predicate)).sum()
                },
                leaf => usize::from(predicate(leaf)),
            }
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use lending_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let first = clock.now();
    /// assert!(clock.now() >= first);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
