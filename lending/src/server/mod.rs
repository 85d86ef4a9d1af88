//! HTTP server for the lending platform.
//!
//! - Application state management
//! - Health check endpoint
//! - Router configuration

pub mod health;
pub mod routes;
pub mod state;

pub use health::health_check;
pub use routes::build_router;
pub use state::AppState;
