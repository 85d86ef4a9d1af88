//! Request fulfillment lifecycle.
//!
//! ```text
//! pending ──approve──► picked_up ──undo_pickup──► cancelled
//!    │  └──reject───► rejected
//!    │  └──cancel───► cancelled
//!    └──(token lapses)──► expired ──regenerate──► pending
//! ```
//!
//! `approved` is never produced: approval commits inventory and hands the
//! equipment over in one step. Rows already in `approved` may still be
//! cancelled, expired or re-issued a token.

pub mod actions;
pub mod controller;
pub mod plan;

pub use actions::{
    ActionOutcome, ActionRequest, LifecycleAction, NewRequest, NewRequestItem, RequestStatusView,
};
pub use controller::{LifecycleController, REQUESTER_ACTOR, SYSTEM_ACTOR};
pub use plan::{allowed_from, ensure_allowed};
