//! Error classification for ingestion
//!
//! Every failure a step can hit is one of a small set of kinds, and the
//! kind decides what happens next:
//!
//! - [`IngestError::Structural`] - a key or id has an unexpected shape. Not
//!   retryable; fails the enclosing step.
//! - [`IngestError::Upstream`] - the provider answered with a non-success
//!   status. Callers decide per call whether a 404 means "empty" or a 403
//!   means "missing permission, continue with partial results".
//! - [`IngestError::Config`] - the invocation config cannot drive a run.
//! - [`IngestError::Other`] - transport and parse failures, carried as
//!   `anyhow` errors the way the HTTP layer produces them.
//!
//! A legitimately absent related object (scope not yet materialized, dangling
//! definition reference) is not an error at all: it is logged as a warning and
//! handled by falling back to a mapped relationship or skipping one edge.

use reqwest::StatusCode;

/// Top-level error type for ingestion operations.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// A key or identifier does not match any expected shape.
    #[error("structural error: {message}")]
    Structural { message: String },

    /// The provider call returned a non-success status.
    #[error("upstream API error: {status} for {endpoint}")]
    Upstream { status: StatusCode, endpoint: String },

    /// The invocation config is missing or malformed.
    #[error("config error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn upstream(status: StatusCode, endpoint: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            endpoint: endpoint.into(),
        }
    }

    /// True for a provider 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Upstream { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    /// True for a provider 401/403.
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::Upstream { status, .. }
                if *status == StatusCode::FORBIDDEN || *status == StatusCode::UNAUTHORIZED
        )
    }

    /// Structural and config errors will fail again with the same input.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Structural { .. } | Self::Config { .. } => false,
            Self::Upstream { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::Other(_) => true,
        }
    }
}

/// Treat a 404 on an optional collection as an empty result.
pub fn ok_if_not_found<T: Default>(result: Result<T>) -> Result<T> {
    match result {
        Err(err) if err.is_not_found() => {
            tracing::debug!("treating not-found as empty: {}", err);
            Ok(T::default())
        }
        other => other,
    }
}
