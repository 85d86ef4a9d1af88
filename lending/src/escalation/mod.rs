//! Condition alert escalation.
//!
//! One generic debounce algorithm, instantiated for low stock and for
//! long-faulty equipment. [`evaluate`] decides; [`EscalationEngine`] reads
//! the store, writes tracking rows and queues the aggregated notices.

pub mod engine;
pub mod evaluate;
pub mod policy;

pub use engine::{EscalationEngine, EscalationReport, KindReport};
pub use evaluate::{EscalationPlan, FollowUp, evaluate};
pub use policy::AlertPolicy;

#[cfg(test)]
mod tests;
