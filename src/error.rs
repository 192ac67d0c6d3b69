//! Error handling module for ms-util
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Every fallible operation in the crate returns [`KioskError`]; the menu
//! configuration loader has its own [`ConfigError`] which converts into it.

use thiserror::Error;

/// Errors produced while loading the menu configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist
    #[error("menu configuration not found: {0}")]
    Missing(String),

    /// The configuration file holds no entries
    #[error("menu configuration is empty: {0}")]
    Empty(String),

    /// A line failed the five-field pattern
    #[error("line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },

    /// The file exists but could not be read
    #[error("failed to read menu configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Main error type for ms-util
#[derive(Error, Debug)]
pub enum KioskError {
    /// Bad input shape (assignment string, URL, username, settings value)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflicting state (duplicate terminal assignment)
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Remote resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network failure that may succeed on retry
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// An invoked collaborator returned a non-zero status
    #[error("Action {action} failed (exit code {code}){}", if *fatal { " [fatal]" } else { "" })]
    CollaboratorFailure {
        action: String,
        code: i32,
        fatal: bool,
    },

    /// Menu configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// System errors (commands, services, accounts)
    #[error("System error: {0}")]
    System(String),

    /// The operator interrupted the run
    #[error("Interrupted by user")]
    Interrupted,

    /// IO errors (file operations, terminal, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for ms-util operations
pub type Result<T> = std::result::Result<T, KioskError>;

// Convenient error constructors
impl KioskError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a state conflict error
    pub fn state_conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a transient network error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientNetwork(msg.into())
    }

    /// Create a system error
    pub fn system(msg: impl Into<String>) -> Self {
        Self::System(msg.into())
    }

    /// True for bad-input errors, including malformed menu configuration
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Config(_))
    }

    /// Process exit status for this error: 130 for interrupts, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Interrupted => 130,
            _ => 1,
        }
    }
}

impl From<anyhow::Error> for KioskError {
    fn from(err: anyhow::Error) -> Self {
        Self::System(format!("{:#}", err))
    }
}
