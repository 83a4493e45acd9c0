use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {var}")]
    Invalid { var: &'static str, value: String },
}

/// Failures reported by a lead/message store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Network failure or driver error before a response was obtained.
    #[error("store transport error: {0}")]
    Transport(String),

    /// The store answered with a non-success status.
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The store acknowledged an insert without returning the generated identifier.
    #[error("store did not return a generated id for {0}")]
    MissingId(&'static str),

    /// Uniqueness violation, e.g. a second active lead for one contact.
    #[error("uniqueness conflict: {0}")]
    Conflict(String),

    /// Foreign-key violation, e.g. a message for a lead that does not exist.
    #[error("referential integrity failure: {0}")]
    Referential(String),

    #[error("malformed store data: {0}")]
    Decode(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else {
            StoreError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("lead resolution failed: {0}")]
    Resolve(#[source] StoreError),

    #[error("message append failed: {0}")]
    Append(#[source] StoreError),
}

impl WorkflowError {
    pub fn store_error(&self) -> &StoreError {
        match self {
            WorkflowError::Resolve(err) | WorkflowError::Append(err) => err,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.store_error(), StoreError::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("outbound notifier is not configured")]
    Disabled,

    #[error("outbound request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("messaging api returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("webhook body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
