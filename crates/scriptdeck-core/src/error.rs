//! Error types for ScriptDeck

use crate::session::SessionStatus;
use thiserror::Error;

/// Path policy violations reported by the validator.
///
/// Messages name the rule that failed and the candidate only; the configured
/// roots are never echoed back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("path traversal rejected: {0}")]
    Traversal(String),

    #[error("path is outside the allowed roots: {0}")]
    OutsideRoots(String),

    #[error("extension '{extension}' is not allowed: {path}")]
    DisallowedExtension { path: String, extension: String },

    #[error("malformed path: {0}")]
    Malformed(String),
}

/// Main error type for ScriptDeck
#[derive(Error, Debug)]
pub enum ScriptDeckError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session {id} is {status}, operation not allowed")]
    InvalidState { id: String, status: SessionStatus },

    #[error("Failed to start script: {0}")]
    Spawn(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration file not found in {0}")]
    ConfigNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScriptDeckError {
    /// True for errors caused by cancellation rather than a real failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScriptDeckError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ScriptDeckError>;
