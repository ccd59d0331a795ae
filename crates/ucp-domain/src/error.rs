use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid resource id: {0}")]
    InvalidResourceId(String),

    #[error("invalid type registration: {0}")]
    InvalidTypeRegistration(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// The error taxonomy from spec §7, shared by every crate's `IntoResponse`-style
/// translation. Each crate-local error enum maps its variants onto one of
/// these categories rather than inventing its own HTTP-status story.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 400 family: malformed ID, schema violation, bad api-version, stale precondition.
    Client,
    /// 404: missing resource or operation.
    NotFound,
    /// 409: lock contention or operation-in-progress.
    Conflict,
    /// 412: ETag precondition failed.
    PreconditionFailed,
    /// 429: load-shedding from downstream.
    Throttled,
    /// Retryable internally; surfaces as 503 once the frontend's retry budget is exhausted.
    Transient,
    /// 5xx: bug or invariant violation.
    Permanent,
    /// Type-declared maximum duration exceeded.
    OperationTimeout,
}

impl ErrorCategory {
    /// HTTP status this category maps to when the frontend gives up retrying
    /// (Transient) or translates directly (everything else).
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCategory::Client => 400,
            ErrorCategory::NotFound => 404,
            ErrorCategory::Conflict => 409,
            ErrorCategory::PreconditionFailed => 412,
            ErrorCategory::Throttled => 429,
            ErrorCategory::Transient => 503,
            ErrorCategory::Permanent => 500,
            ErrorCategory::OperationTimeout => 500,
        }
    }

    /// Whether the async worker should retry an operation that failed with
    /// this category rather than marking it `Failed` immediately.
    pub fn is_worker_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient | ErrorCategory::Throttled)
    }
}

/// Implemented by every crate-local error enum so the frontend and worker can
/// translate errors uniformly without matching on foreign types.
pub trait ErrorCategoryExt {
    fn category(&self) -> ErrorCategory;
}

impl ErrorCategoryExt for DomainError {
    fn category(&self) -> ErrorCategory {
        match self {
            DomainError::InvalidResourceId(_) => ErrorCategory::Client,
            DomainError::InvalidTypeRegistration(_) => ErrorCategory::Permanent,
            DomainError::InvalidConfig(_) => ErrorCategory::Permanent,
        }
    }
}

/// Stable error codes referenced by §7 ("a stable `code`... e.g.
/// `ResourceNotFound`, `PreconditionFailed`, `OperationInProgress`,
/// `RecipeExecutionFailed`").
pub mod codes {
    pub const RESOURCE_NOT_FOUND: &str = "ResourceNotFound";
    pub const OPERATION_NOT_FOUND: &str = "OperationNotFound";
    pub const PRECONDITION_FAILED: &str = "PreconditionFailed";
    pub const OPERATION_IN_PROGRESS: &str = "OperationInProgress";
    pub const INVALID_RESOURCE_ID: &str = "InvalidResourceId";
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    pub const UNSUPPORTED_API_VERSION: &str = "UnsupportedApiVersion";
    pub const RECIPE_EXECUTION_FAILED: &str = "RecipeExecutionFailed";
    pub const OPERATION_TIMEOUT: &str = "OperationTimeout";
    pub const THROTTLED: &str = "Throttled";
    pub const INTERNAL_ERROR: &str = "InternalError";
}
