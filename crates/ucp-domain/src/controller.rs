use std::time::Duration;

use async_trait::async_trait;

use crate::types::{ErrorDetail, OperationKind, ResourceRecord};

/// Cooperative cancellation + correlation handle threaded through every
/// controller invocation and, transitively, every I/O boundary it crosses
/// (§5: "every I/O boundary is cancellable via a request/operation context").
/// Also carries the operation's `kind`, since a controller's `run` is given
/// the desired resource record either way and otherwise has no way to tell
/// a Delete apart from a Create/Update of the same type.
#[derive(Clone)]
pub struct ControllerContext {
    pub operation_id: uuid::Uuid,
    pub kind: OperationKind,
    cancel: tokio_util_cancel::CancelHandle,
}

impl ControllerContext {
    pub fn new(operation_id: uuid::Uuid, kind: OperationKind) -> Self {
        ControllerContext {
            operation_id,
            kind,
            cancel: tokio_util_cancel::CancelHandle::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Result of one controller invocation, per §4.5 step 4.
pub enum ControllerOutcome {
    /// Terminal success; carries the new `properties` to persist.
    Done(serde_json::Value),
    /// Not yet complete; retry after at least `after`, subject to the
    /// type's exponential backoff and `max_attempts`.
    Retry { after: Duration, reason: String },
    /// Terminal failure.
    Fatal(ErrorDetail),
    /// The controller reached a safe checkpoint while handling a
    /// cancellation request (§5 cancellation-on-delete-during-update).
    Canceled,
}

/// A type-specific controller, registered once at startup per
/// `namespace/type` (§9: "a sum type with a per-variant controller").
/// Implementations must be idempotent per input state: on restart after a
/// crash, the worker re-invokes `run` with the same record and the
/// controller resumes rather than re-creating already-provisioned state.
#[async_trait]
pub trait Controller: Send + Sync {
    /// `namespace/type` this controller handles, e.g. `Applications.Core/environments`.
    fn resource_type(&self) -> &str;

    /// Whether PUT/PATCH on this type completes synchronously (200) or is
    /// dispatched to the async worker (202). Actions may override per-call.
    fn is_async(&self) -> bool {
        true
    }

    /// Retry budget before a `Retry` outcome is treated as `Fatal`.
    fn max_attempts(&self) -> u32 {
        5
    }

    /// Type-declared maximum operation duration (§5 cancellation/timeout).
    fn max_duration(&self) -> Duration {
        Duration::from_secs(600)
    }

    async fn run(&self, ctx: &ControllerContext, record: &ResourceRecord) -> ControllerOutcome;
}

/// Minimal cooperative cancellation flag, avoiding a dependency on
/// `tokio_util::sync::CancellationToken` for a single boolean flag shared
/// behind an `Arc`.
mod tokio_util_cancel {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    pub struct CancelHandle(Arc<AtomicBool>);

    impl CancelHandle {
        pub fn new() -> Self {
            CancelHandle(Arc::new(AtomicBool::new(false)))
        }

        pub fn is_cancelled(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }

        pub fn cancel(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_starts_uncancelled_and_can_be_cancelled() {
        let ctx = ControllerContext::new(uuid::Uuid::new_v4(), OperationKind::Create);
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn context_clone_shares_cancellation_state() {
        let ctx = ControllerContext::new(uuid::Uuid::new_v4(), OperationKind::Create);
        let clone = ctx.clone();
        clone.cancel();
        assert!(ctx.is_cancelled());
    }
}
