//! HTTP API endpoints.
//!
//! - Requests: submission and manager actions
//! - Status: the requester's token-protected status page
//! - Stations: on-demand escalation runs

pub mod error;
pub mod requests;
pub mod stations;
pub mod status;

pub use error::AppError;
pub use requests::{perform_action, submit_request};
pub use stations::run_escalations;
pub use status::get_status;
