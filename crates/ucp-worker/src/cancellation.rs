use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ucp_domain::ControllerContext;
use uuid::Uuid;

/// Tracks the [`ControllerContext`] of every operation currently running on
/// this worker, so a DELETE arriving on the frontend's request path can
/// cooperatively cancel it (§5: "DELETE during Running transitions to
/// Canceled only at the controller's next safe checkpoint"). Shared between
/// the worker loop, which registers/unregisters entries around each
/// `Controller::run` call, and the API layer, which only ever calls
/// [`CancellationRegistry::cancel`].
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    inner: Arc<Mutex<HashMap<Uuid, ControllerContext>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        CancellationRegistry::default()
    }

    pub(crate) fn register(&self, ctx: ControllerContext) {
        self.inner.lock().expect("cancellation registry poisoned").insert(ctx.operation_id, ctx);
    }

    pub(crate) fn unregister(&self, operation_id: Uuid) {
        self.inner.lock().expect("cancellation registry poisoned").remove(&operation_id);
    }

    /// Flips the running controller's cancellation flag. Returns `false` if
    /// no controller is currently running that operation on this worker
    /// (already finished, or running on a different worker instance).
    pub fn cancel(&self, operation_id: Uuid) -> bool {
        match self.inner.lock().expect("cancellation registry poisoned").get(&operation_id) {
            Some(ctx) => {
                ctx.cancel();
                true
            }
            None => false,
        }
    }
}
