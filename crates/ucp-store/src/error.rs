use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("concurrency conflict: expected etag did not match for {0}")]
    ConcurrencyConflict(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),

    /// A queue lease or recipe single-flight lease is already held.
    #[error("lease conflict: already held by {holder}")]
    LeaseConflict { holder: String },

    #[error("invalid continuation token")]
    InvalidContinuationToken,
}

impl ucp_domain::error::ErrorCategoryExt for StoreError {
    fn category(&self) -> ucp_domain::ErrorCategory {
        use ucp_domain::ErrorCategory;
        match self {
            StoreError::NotFound(_) => ErrorCategory::NotFound,
            StoreError::ConcurrencyConflict(_) => ErrorCategory::PreconditionFailed,
            StoreError::LeaseConflict { .. } => ErrorCategory::Conflict,
            StoreError::InvalidContinuationToken => ErrorCategory::Client,
            StoreError::Serialization(_) => ErrorCategory::Permanent,
            StoreError::Internal(_) => ErrorCategory::Transient,
        }
    }
}
