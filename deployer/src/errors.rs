//! Error types for the deployment engine

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classification exposed on deployments and progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CredentialInvalid,
    RemoteConflict,
    RemoteValidationError,
    RemoteRateLimited,
    RemoteUnavailable,
    RemoteNotFound,
    ConfigurationInvalid,
    StorageError,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CredentialInvalid => "credential_invalid",
            ErrorKind::RemoteConflict => "remote_conflict",
            ErrorKind::RemoteValidationError => "remote_validation_error",
            ErrorKind::RemoteRateLimited => "remote_rate_limited",
            ErrorKind::RemoteUnavailable => "remote_unavailable",
            ErrorKind::RemoteNotFound => "remote_not_found",
            ErrorKind::ConfigurationInvalid => "configuration_invalid",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single failed call against the remote CRM
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("credential rejected by the CRM: {0}")]
    CredentialInvalid(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rejected by the CRM: {0}")]
    Validation(String),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("CRM request timed out: {0}")]
    Timeout(String),

    #[error("CRM unavailable: {0}")]
    Unavailable(String),
}

impl RemoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::CredentialInvalid(_) => ErrorKind::CredentialInvalid,
            RemoteError::Conflict(_) => ErrorKind::RemoteConflict,
            RemoteError::NotFound(_) => ErrorKind::RemoteNotFound,
            RemoteError::Validation(_) => ErrorKind::RemoteValidationError,
            RemoteError::RateLimited { .. } => ErrorKind::RemoteRateLimited,
            RemoteError::Timeout(_) | RemoteError::Unavailable(_) => ErrorKind::RemoteUnavailable,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return RemoteError::Validation(format!("unexpected response body: {err}"));
        }
        if err.is_timeout() {
            return RemoteError::Timeout(err.to_string());
        }
        RemoteError::Unavailable(err.to_string())
    }
}

/// Main error type for the deployment engine
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Remote error: {0}")]
    RemoteError(#[from] RemoteError),

    #[error("Invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("Invalid credential: {0}")]
    CredentialInvalid(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Template error: {0}")]
    TemplateError(String),

    #[error("Invalid transition: cannot go from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployerError {
    /// Classification used when the error ends up on a deployment record
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployerError::RemoteError(e) => e.kind(),
            DeployerError::HttpError(_) => ErrorKind::RemoteUnavailable,
            DeployerError::ConfigurationInvalid(_) | DeployerError::TemplateError(_) => {
                ErrorKind::ConfigurationInvalid
            }
            DeployerError::CredentialInvalid(_) => ErrorKind::CredentialInvalid,
            DeployerError::StorageError(_)
            | DeployerError::IoError(_)
            | DeployerError::JsonError(_) => ErrorKind::StorageError,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<anyhow::Error> for DeployerError {
    fn from(err: anyhow::Error) -> Self {
        DeployerError::Internal(err.to_string())
    }
}
