//! Error types for snapgrid

use thiserror::Error;

use crate::types::TestResults;

/// Result type alias using snapgrid Error
pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a remote render/check command.
///
/// A failed close may still carry the results the service computed before
/// failing; `results` is the recoverable accessor for that case.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct RemoteFailure {
    pub message: String,
    pub results: Option<Vec<TestResults>>,
}

impl RemoteFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            results: None,
        }
    }

    pub fn with_results(message: impl Into<String>, results: Vec<TestResults>) -> Self {
        Self {
            message: message.into(),
            results: Some(results),
        }
    }

    /// Whether the failure embeds results a lenient caller can fall back to
    pub fn is_recoverable(&self) -> bool {
        self.results.is_some()
    }
}

/// snapgrid error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IllegalArgument: {0}")]
    IllegalArgument(String),

    #[error("IllegalState: {0}")]
    IllegalState(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Selector resolution error: {0}")]
    SelectorResolution(String),

    #[error("Remote command failed: {0}")]
    Remote(#[from] RemoteFailure),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),
}
