//! Storage provider error types

use storeflow_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage account not found: {0}")]
    AccountNotFound(String),

    #[error("{resource} is not supported for account kind {kind} in sku tier {tier}")]
    Unsupported {
        resource: String,
        kind: String,
        tier: String,
    },

    #[error("Unexpected response from {url}: {message}")]
    UnexpectedResponse { url: String, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Config error: {0}")]
    Config(#[from] storeflow_config::ConfigError),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),
}

impl From<StorageError> for CloudError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Cloud(inner) => inner,
            StorageError::AccountNotFound(id) => CloudError::NotFound(id),
            StorageError::Http(e) if e.is_connect() || e.is_timeout() => {
                CloudError::TransientConnectivity(e.to_string())
            }
            StorageError::Http(e) => CloudError::ApiError(e.to_string()),
            StorageError::Json(e) => CloudError::Json(e),
            StorageError::Config(e) => CloudError::InvalidConfig(e.to_string()),
            other @ (StorageError::Unsupported { .. } | StorageError::InvalidConfig(_)) => {
                CloudError::InvalidConfig(other.to_string())
            }
            other @ StorageError::UnexpectedResponse { .. } => CloudError::ApiError(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
