//! Cloud provider error types

use thiserror::Error;

/// Cloud provider errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Resource already exists: {0}")]
    ResourceAlreadyExists(String),

    /// The stack is in an `*_IN_PROGRESS` state and cannot accept another operation
    #[error("Stack {stack} is busy ({status}), try again once the current operation finishes")]
    StackBusy { stack: String, status: String },

    /// The provider accepted the request but there is nothing to change
    #[error("No changes to apply: {0}")]
    NoChanges(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("{tool} not found. Please install: {install_hint}")]
    ToolNotFound {
        tool: String,
        install_hint: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Check if this is a "not found" error (safe to treat as done in cleanup)
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::ResourceNotFound(_))
    }

    /// Check if another operation is already running against the stack
    pub fn is_stack_busy(&self) -> bool {
        matches!(self, CloudError::StackBusy { .. })
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
