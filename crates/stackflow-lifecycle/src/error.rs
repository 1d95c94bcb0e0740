//! Lifecycle engine error types

use stackflow_cloud::{CloudError, CloudResource};
use thiserror::Error;

/// Where a restore stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStage {
    Preflight,
    PrepareBuckets,
    Restore,
    RewriteParameters,
    Launch,
}

impl std::fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestoreStage::Preflight => write!(f, "pre-flight checks"),
            RestoreStage::PrepareBuckets => write!(f, "target bucket preparation"),
            RestoreStage::Restore => write!(f, "point-in-time restore"),
            RestoreStage::RewriteParameters => write!(f, "parameter rewrite"),
            RestoreStage::Launch => write!(f, "stack launch"),
        }
    }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Bad or missing arguments; never retried
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Operator declined a confirmation gate
    #[error("Aborted by user")]
    UserAborted,

    /// Another operation is running against the stack; the user may retry later
    #[error("Stack {stack} is busy ({status}). Wait for the current operation to finish and retry")]
    StackBusy { stack: String, status: String },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Stack and template disagree (e.g. an output with no matching parameter)
    #[error("Inconsistent stack: {0}")]
    Inconsistent(String),

    #[error("Update failed: {message}")]
    UpdateFailed {
        message: String,
        console_url: Option<String>,
    },

    #[error(
        "Restore aborted during {stage}; new resources already created: {}",
        if completed.is_empty() { "none".to_string() } else { completed.join(", ") }
    )]
    RestoreAborted {
        stage: RestoreStage,
        completed: Vec<String>,
        #[source]
        source: Box<LifecycleError>,
    },

    #[error(
        "Failed to clean up {} resource(s): {}",
        failures.len(),
        failures.iter().map(|f| format!("{} ({})", f.resource.physical_id, f.error)).collect::<Vec<_>>().join("; ")
    )]
    CleanupFailed { failures: Vec<CleanupFailure> },

    #[error(transparent)]
    Cloud(CloudError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single resource that could not be deleted
#[derive(Debug)]
pub struct CleanupFailure {
    pub resource: CloudResource,
    pub error: String,
}

impl LifecycleError {
    pub fn is_not_found(&self) -> bool {
        match self {
            LifecycleError::NotFound(_) => true,
            LifecycleError::Cloud(e) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn is_user_aborted(&self) -> bool {
        matches!(self, LifecycleError::UserAborted)
    }

    /// Console link the operator can follow to inspect the failure
    pub fn console_url(&self) -> Option<&str> {
        match self {
            LifecycleError::UpdateFailed { console_url, .. } => console_url.as_deref(),
            LifecycleError::RestoreAborted { source, .. } => source.console_url(),
            _ => None,
        }
    }
}

impl From<CloudError> for LifecycleError {
    fn from(error: CloudError) -> Self {
        match error {
            CloudError::StackBusy { stack, status } => LifecycleError::StackBusy { stack, status },
            other => LifecycleError::Cloud(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
