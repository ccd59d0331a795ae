use thiserror::Error;
use ucp_domain::{ErrorCategory, ErrorCategoryExt};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] ucp_store::StoreError),

    #[error("routing error: {0}")]
    Routing(#[from] ucp_routing::RoutingError),

    #[error("driver error: {0}")]
    Driver(#[from] ucp_driver::DriverError),

    #[error("controller for {0} exceeded its declared max_duration")]
    OperationTimedOut(String),

    #[error("internal worker error: {0}")]
    Internal(String),
}

impl ErrorCategoryExt for WorkerError {
    fn category(&self) -> ErrorCategory {
        match self {
            WorkerError::Store(e) => e.category(),
            WorkerError::Routing(_) => ErrorCategory::Permanent,
            WorkerError::Driver(e) => e.category(),
            WorkerError::OperationTimedOut(_) => ErrorCategory::OperationTimeout,
            WorkerError::Internal(_) => ErrorCategory::Permanent,
        }
    }
}
