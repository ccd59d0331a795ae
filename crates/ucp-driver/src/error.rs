use thiserror::Error;
use ucp_domain::{ErrorCategory, ErrorCategoryExt};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("plane not configured: {0}")]
    PlaneNotConfigured(String),

    #[error("upstream request failed: {0}")]
    UpstreamRequest(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    UpstreamError { status: u16, body: String },

    #[error("no credentials configured for plane {0}")]
    MissingCredentials(String),

    #[error("credential store error: {0}")]
    CredentialStore(#[from] ucp_store::StoreError),

    #[error("recipe execution failed: {0}")]
    RecipeFailed(String),

    #[error("recipe template error: {0}")]
    BadTemplate(String),

    #[error("internal driver error: {0}")]
    Internal(String),
}

impl DriverError {
    /// Classifies an upstream HTTP status the way a reverse proxy should:
    /// 429/5xx are retryable, everything else is a caller mistake.
    pub fn from_upstream_status(status: reqwest::StatusCode, body: String) -> Self {
        DriverError::UpstreamError { status: status.as_u16(), body }
    }
}

impl ErrorCategoryExt for DriverError {
    fn category(&self) -> ErrorCategory {
        match self {
            DriverError::PlaneNotConfigured(_) => ErrorCategory::Client,
            DriverError::MissingCredentials(_) => ErrorCategory::Permanent,
            DriverError::BadTemplate(_) => ErrorCategory::Client,
            DriverError::UpstreamRequest(_) => ErrorCategory::Transient,
            DriverError::CredentialStore(e) => e.category(),
            DriverError::UpstreamError { status, .. } => match *status {
                429 => ErrorCategory::Throttled,
                500..=599 => ErrorCategory::Transient,
                _ => ErrorCategory::Client,
            },
            DriverError::RecipeFailed(_) => ErrorCategory::Transient,
            DriverError::Internal(_) => ErrorCategory::Permanent,
        }
    }
}
