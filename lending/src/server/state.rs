//! Application state for the lending HTTP server.

use crate::authz::Authorizer;
use crate::escalation::EscalationEngine;
use crate::lifecycle::LifecycleController;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// It's cloned (cheaply via Arc) for each request.
#[derive(Clone)]
pub struct AppState {
    /// Request lifecycle operations
    pub lifecycle: Arc<LifecycleController>,
    /// Alert escalation, for on-demand runs
    pub engine: Arc<EscalationEngine>,
    /// Approve-capability checks outside the lifecycle
    pub authorizer: Arc<dyn Authorizer>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        lifecycle: Arc<LifecycleController>,
        engine: Arc<EscalationEngine>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            lifecycle,
            engine,
            authorizer,
        }
    }
}
