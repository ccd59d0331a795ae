use crate::error::*;

#[test]
fn error_category_http_status_matrix() {
    assert_eq!(ErrorCategory::Client.http_status(), 400);
    assert_eq!(ErrorCategory::NotFound.http_status(), 404);
    assert_eq!(ErrorCategory::Conflict.http_status(), 409);
    assert_eq!(ErrorCategory::PreconditionFailed.http_status(), 412);
    assert_eq!(ErrorCategory::Throttled.http_status(), 429);
    assert_eq!(ErrorCategory::Transient.http_status(), 503);
    assert_eq!(ErrorCategory::Permanent.http_status(), 500);
}

#[test]
fn only_transient_and_throttled_are_worker_retryable() {
    assert!(ErrorCategory::Transient.is_worker_retryable());
    assert!(ErrorCategory::Throttled.is_worker_retryable());
    assert!(!ErrorCategory::Client.is_worker_retryable());
    assert!(!ErrorCategory::Permanent.is_worker_retryable());
    assert!(!ErrorCategory::NotFound.is_worker_retryable());
}
