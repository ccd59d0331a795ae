use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use ucp_domain::{codes, DomainError, ErrorCategory, ErrorCategoryExt, ErrorDetail};
use ucp_driver::DriverError;
use ucp_routing::RoutingError;
use ucp_store::StoreError;

/// Translates every error this crate produces or forwards into the ARM-RPC
/// error body shape from §6/§7, keyed off the shared [`ErrorCategory`]
/// taxonomy rather than each crate's own error type — the generalized form
/// of the teacher's `ApiError { status, message }`.
#[derive(Debug, Error)]
#[error("{detail}")]
pub struct ApiError {
    pub category: ErrorCategory,
    pub detail: ErrorDetail,
}

impl ApiError {
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError { category, detail: ErrorDetail::new(code, message) }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCategory::Client, codes::VALIDATION_FAILED, message)
    }

    pub fn unsupported_api_version(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCategory::Client, codes::UNSUPPORTED_API_VERSION, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCategory::NotFound, codes::RESOURCE_NOT_FOUND, message)
    }

    pub fn operation_not_found(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCategory::NotFound, codes::OPERATION_NOT_FOUND, message)
    }

    pub fn action_not_supported(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCategory::NotFound, codes::VALIDATION_FAILED, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::new(ErrorCategory::Permanent, codes::INTERNAL_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.category.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.detail }))).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        ApiError::new(e.category(), codes::INVALID_RESOURCE_ID, e.to_string())
    }
}

impl From<RoutingError> for ApiError {
    fn from(e: RoutingError) -> Self {
        match e {
            RoutingError::Domain(inner) => inner.into(),
            RoutingError::UnknownType(_) => {
                ApiError::new(ErrorCategory::NotFound, codes::VALIDATION_FAILED, e.to_string())
            }
            RoutingError::NoMatch { .. } | RoutingError::Conflict { .. } => {
                ApiError::new(ErrorCategory::Permanent, codes::INTERNAL_ERROR, e.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let code = match &e {
            StoreError::NotFound(_) => codes::RESOURCE_NOT_FOUND,
            StoreError::ConcurrencyConflict(_) => codes::PRECONDITION_FAILED,
            StoreError::LeaseConflict { .. } => codes::OPERATION_IN_PROGRESS,
            StoreError::InvalidContinuationToken => codes::VALIDATION_FAILED,
            StoreError::Serialization(_) | StoreError::Internal(_) => codes::INTERNAL_ERROR,
        };
        ApiError::new(e.category(), code, e.to_string())
    }
}

impl From<DriverError> for ApiError {
    fn from(e: DriverError) -> Self {
        let code = match &e {
            DriverError::PlaneNotConfigured(_) => codes::VALIDATION_FAILED,
            DriverError::UpstreamError { .. } | DriverError::UpstreamRequest(_) => codes::INTERNAL_ERROR,
            DriverError::MissingCredentials(_) => codes::INTERNAL_ERROR,
            DriverError::RecipeFailed(_) => codes::RECIPE_EXECUTION_FAILED,
            DriverError::BadTemplate(_) => codes::VALIDATION_FAILED,
            DriverError::CredentialStore(_) | DriverError::Internal(_) => codes::INTERNAL_ERROR,
        };
        ApiError::new(e.category(), code, e.to_string())
    }
}
