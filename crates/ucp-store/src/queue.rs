use async_trait::async_trait;
use chrono::Duration;
use ucp_domain::QueueMessage;

use crate::error::StoreError;

/// A message leased out of the queue: the opaque `handle` is required to
/// `extend`/`ack`/`nack` it, per §4.2's lease-based delivery model.
pub struct LeasedMessage {
    pub handle: String,
    pub message: QueueMessage,
    pub delivery_count: u32,
}

/// The durable work queue backing the async worker (§4.2). At-least-once
/// delivery: a leased message becomes visible again once its lease expires
/// without an `ack`.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, message: QueueMessage) -> Result<(), StoreError>;

    /// Leases up to `max_count` visible messages for `lease_duration`.
    async fn lease(
        &self,
        max_count: u32,
        lease_duration: Duration,
    ) -> Result<Vec<LeasedMessage>, StoreError>;

    /// Extends an in-flight lease, used while a controller is still running
    /// as an operation approaches its current lease expiry (§4.5).
    async fn extend(&self, handle: &str, lease_duration: Duration) -> Result<(), StoreError>;

    /// Acknowledges successful processing; removes the message.
    async fn ack(&self, handle: &str) -> Result<(), StoreError>;

    /// Returns the message to the queue, visible again after `requeue_after`
    /// (`None` means immediately). Once a message's delivery count exceeds
    /// the type's `max_attempts`, implementations route it to the dead
    /// letter queue instead of requeuing (§4.5's retry/backoff policy).
    async fn nack(&self, handle: &str, requeue_after: Option<Duration>) -> Result<(), StoreError>;

    /// Explicitly dead-letters a message (e.g. after the type's declared
    /// `max_attempts` is exceeded).
    async fn dead_letter(&self, handle: &str) -> Result<(), StoreError>;

    /// Lists up to `limit` dead-lettered messages, for operator inspection.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<QueueMessage>, StoreError>;
}
