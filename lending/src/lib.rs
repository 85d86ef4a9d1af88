//! # Station Lending
//!
//! Equipment lending for volunteer emergency-response stations.
//!
//! Two subsystems share one store:
//!
//! - **Request lifecycle** ([`lifecycle`]): members of the public request
//!   equipment from a station; a manager approves, which commits stock and
//!   hands the equipment over in one atomic step. Rejection, cancellation,
//!   expiry, token regeneration and pickup compensation complete the state
//!   machine. Requesters follow progress through a bearer-token status link.
//! - **Condition alert escalation** ([`escalation`]): a scheduled job finds
//!   items with low stock or long-faulty equipment per station, and emails
//!   the station managers with a debounced, aggregated notice.
//!
//! Side effects (activity log entries, WhatsApp and email messages) are
//! published after each commit to a [`Dispatcher`](dispatch::Dispatcher),
//! a reducer run by the effect runtime. Delivery failures never change the
//! outcome of an operation.
//!
//! ```text
//!   HTTP api ──► LifecycleController ──► LendingStore (Postgres | memory)
//!                     │      ▲                  ▲
//!                     │      └─ low-stock scan ─┤
//!                     ▼                         │
//!                Dispatcher ◄── EscalationEngine ◄── Scheduler
//!                 │     │
//!            AuditLog  Notifier (SMTP | WhatsApp webhook | console)
//! ```

pub mod api;
pub mod app;
pub mod audit;
pub mod authz;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod escalation;
pub mod lifecycle;
pub mod metrics;
pub mod notify;
pub mod scheduler;
pub mod server;
pub mod store;
pub mod token;
pub mod types;

pub use app::{LendingApp, Services};
pub use config::Config;
pub use error::{LendingError, RepositoryError, Result};
pub use escalation::{AlertPolicy, EscalationEngine, EscalationReport};
pub use lifecycle::{ActionOutcome, ActionRequest, LifecycleAction, LifecycleController};
pub use scheduler::Scheduler;
