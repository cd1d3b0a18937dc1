//! Cloud provider error types

use thiserror::Error;

/// Errors raised by the coordination subsystem and the lifecycle callbacks
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A create collided with an existing record; the host must import it
    #[error("Resource already exists and needs to be imported: {0}")]
    AlreadyExists(String),

    #[error("Transient connectivity failure: {0}")]
    TransientConnectivity(String),

    /// The remote API rejected the payload. Never retried.
    #[error("Remote validation failed: {0}")]
    RemoteValidation(String),

    /// One half of a linked-resource operation succeeded, the other did not
    #[error("Partial failure: {completed} succeeded but {failed} failed: {source}")]
    PartialFailure {
        completed: String,
        failed: String,
        #[source]
        source: Box<CloudError>,
    },

    #[error("Timed out waiting for lock {0}")]
    LockTimeout(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Polling failed after {attempts} attempts: {reason}")]
    PollingFailed { attempts: u32, reason: String },

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid resource id: {0}")]
    InvalidId(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }

    /// Errors the availability poller absorbs up to its dropped-connection tolerance
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::TransientConnectivity(_))
    }

    pub fn requires_import(&self) -> bool {
        matches!(self, CloudError::AlreadyExists(_))
    }

    pub fn is_partial_failure(&self) -> bool {
        matches!(self, CloudError::PartialFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
