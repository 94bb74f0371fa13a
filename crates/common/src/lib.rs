//! snapgrid Common Library
//!
//! Shared types, error taxonomy, argument guards and configuration for the
//! snapgrid visual-grid check pipeline.

pub mod config;
pub mod error;
pub mod guard;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use config::{Configuration, RunnerOptions};
pub use error::{Error, RemoteFailure, Result};
pub use types::*;

/// snapgrid version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default agent id reported to the render service
pub fn default_agent_id() -> String {
    format!("snapgrid/{}", VERSION)
}
