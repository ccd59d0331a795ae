use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use ucp_domain::{
    Controller, ControllerContext, ControllerOutcome, ErrorDetail, OperationKind, OperationRecord,
    OperationStatus, ProvisioningState, ResourceRecord,
};
use ucp_routing::TypeRegistry;
use ucp_store::{EtagPrecondition, LeasedMessage, Queue, ResourceLockTable, Storage};

use crate::backoff::exponential_backoff;
use crate::cancellation::CancellationRegistry;
use crate::error::WorkerError;

/// Tunables for [`AsyncWorker::run`], mirroring `ucp_config::QueueConfig`
/// and `ucp_config::WorkerConfig` without tying this crate to the config
/// crate's shape — callers (`ucp-cli`) translate one into the other.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub lease_duration: chrono::Duration,
    pub base_backoff: StdDuration,
    pub poll_interval: StdDuration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            concurrency: 10,
            lease_duration: chrono::Duration::seconds(30),
            base_backoff: StdDuration::from_secs(2),
            poll_interval: StdDuration::from_millis(500),
        }
    }
}

/// The async resource lifecycle engine's worker loop (§4.5): leases
/// messages off the durable queue, processes each one under a per-resource
/// lock, and drives its `Controller` to a terminal or retryable outcome.
pub struct AsyncWorker {
    storage: Arc<dyn Storage>,
    queue: Arc<dyn Queue>,
    registry: Arc<TypeRegistry>,
    locks: ResourceLockTable,
    cancellations: CancellationRegistry,
    holder_id: String,
    settings: WorkerSettings,
}

impl AsyncWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: Arc<dyn Queue>,
        registry: Arc<TypeRegistry>,
        locks: ResourceLockTable,
        cancellations: CancellationRegistry,
        holder_id: impl Into<String>,
        settings: WorkerSettings,
    ) -> Self {
        AsyncWorker {
            storage,
            queue,
            registry,
            locks,
            cancellations,
            holder_id: holder_id.into(),
            settings,
        }
    }

    /// Exposes the cancellation registry so the frontend's DELETE handler
    /// can signal a running operation on this worker instance.
    pub fn cancellations(&self) -> CancellationRegistry {
        self.cancellations.clone()
    }

    /// Runs until the queue itself returns an unrecoverable error. Each
    /// leased message is processed on its own task, bounded to
    /// `settings.concurrency` concurrent operations.
    pub async fn run(self: Arc<Self>) -> Result<(), WorkerError> {
        let permits = Arc::new(Semaphore::new(self.settings.concurrency));
        loop {
            let available = permits.available_permits() as u32;
            if available == 0 {
                tokio::time::sleep(self.settings.poll_interval).await;
                continue;
            }

            let leased = self.queue.lease(available, self.settings.lease_duration).await?;
            if leased.is_empty() {
                tokio::time::sleep(self.settings.poll_interval).await;
                continue;
            }

            for msg in leased {
                let permit = permits
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                let worker = self.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    let operation_id = msg.message.operation_id;
                    if let Err(err) = worker.process(msg).await {
                        error!(%operation_id, error = %err, "unhandled error processing queue message");
                    }
                });
            }
        }
    }

    /// One iteration of §4.5's numbered procedure.
    async fn process(&self, msg: LeasedMessage) -> Result<(), WorkerError> {
        let operation_id = msg.message.operation_id;

        // 1. Load the operation record; a terminal or missing record means
        // this delivery is a duplicate of one already settled.
        let mut operation = match self.storage.get_operation(operation_id).await? {
            Some(op) if !op.status.is_terminal() => op,
            Some(_) => {
                debug!(%operation_id, "operation already terminal, acking duplicate delivery");
                self.queue.ack(&msg.handle).await?;
                return Ok(());
            }
            None => {
                warn!(%operation_id, "no operation record for leased message, acking");
                self.queue.ack(&msg.handle).await?;
                return Ok(());
            }
        };

        // 2. Serialize processing of this resource against both the
        // frontend's request path and any other in-flight message for it.
        let lock_key = msg.message.resource_id.to_string().to_ascii_lowercase();
        let _resource_guard = self.locks.lock(&lock_key).await;

        // 3. Mark Running and take ownership of the lease.
        let now = Utc::now();
        operation.status = OperationStatus::Running;
        operation.lease_owner = Some(self.holder_id.clone());
        operation.lease_expires_at = Some(now + self.settings.lease_duration);
        self.storage.save_operation(&operation).await?;

        // 4. Keep renewing the queue lease and the operation's
        // lease_expires_at while the controller is still running.
        let renewal = self.spawn_lease_renewal(msg.handle.clone(), operation.clone());

        let outcome = self.run_controller(&msg, &mut operation).await;

        renewal.abort();

        match outcome {
            Ok(()) => Ok(()),
            Err(err) => {
                // Don't ack: let the lease expire so another worker can
                // resume. Controllers are required to be idempotent on
                // resume (§4.10: "treat Running on entry as resume").
                warn!(%operation_id, error = %err, "processing failed before reaching a terminal or retry outcome");
                Err(err)
            }
        }
    }

    async fn run_controller(
        &self,
        msg: &LeasedMessage,
        operation: &mut OperationRecord,
    ) -> Result<(), WorkerError> {
        let operation_id = operation.id;

        // 5. Load the resource and make sure it still refers to this
        // operation; a mismatch means a newer operation superseded it.
        let record = match self.storage.get(&msg.message.resource_id).await? {
            Some(r) if r.pending_operation_id == Some(operation_id) => r,
            _ => {
                info!(%operation_id, "resource missing or no longer pending this operation, acking stale message");
                self.queue.ack(&msg.handle).await?;
                return Ok(());
            }
        };

        // 6. Resolve the type's controller.
        let declaration = self.registry.get(&record.resource_type)?;
        let controller = declaration.controller.clone();

        // 6b. Advance Accepted to the in-progress state the worker owns
        // (§4.10: Accepted --worker--> Provisioning/Updating) before handing
        // the record to the controller. Deleting is set by the frontend and
        // has no further intermediate state to advance to.
        let record = if record.provisioning_state == ProvisioningState::Accepted {
            let mut record = record;
            let precondition = EtagPrecondition::Match(record.etag.clone());
            record.provisioning_state = match operation.kind {
                OperationKind::Create => ProvisioningState::Provisioning,
                OperationKind::Update => ProvisioningState::Updating,
                OperationKind::Delete => ProvisioningState::Deleting,
            };
            record.etag = self.storage.save(&record, precondition).await?;
            record
        } else {
            record
        };

        // 7. Invoke the controller, bounded by its declared max duration.
        let ctx = ControllerContext::new(operation_id, operation.kind);
        self.cancellations.register(ctx.clone());
        let run_result = tokio::time::timeout(controller.max_duration(), controller.run(&ctx, &record)).await;
        self.cancellations.unregister(operation_id);

        let outcome = match run_result {
            Ok(outcome) => outcome,
            Err(_) => {
                let type_name = record.resource_type.clone();
                self.settle_fatal(
                    record,
                    operation,
                    ErrorDetail::new(
                        ucp_domain::error::codes::OPERATION_TIMEOUT,
                        format!("{type_name} controller exceeded its declared max_duration"),
                    ),
                )
                .await?;
                self.queue.ack(&msg.handle).await?;
                return Ok(());
            }
        };

        match outcome {
            ControllerOutcome::Done(properties) => {
                self.settle_done(record, operation, properties).await?;
                self.queue.ack(&msg.handle).await?;
            }
            ControllerOutcome::Retry { after, reason } => {
                operation.retry_count += 1;
                if operation.retry_count >= controller.max_attempts() {
                    self.settle_fatal(
                        record,
                        operation,
                        ErrorDetail::new("OperationRetryLimitExceeded", reason),
                    )
                    .await?;
                    self.queue.ack(&msg.handle).await?;
                } else {
                    operation.status = OperationStatus::Running;
                    self.storage.save_operation(operation).await?;
                    let visibility = exponential_backoff(operation.retry_count, self.settings.base_backoff)
                        .max(after);
                    debug!(%operation_id, attempt = operation.retry_count, ?visibility, reason, "retrying operation");
                    self.queue
                        .nack(&msg.handle, Some(chrono::Duration::from_std(visibility).unwrap_or(self.settings.lease_duration)))
                        .await?;
                }
            }
            ControllerOutcome::Fatal(detail) => {
                self.settle_fatal(record, operation, detail).await?;
                self.queue.ack(&msg.handle).await?;
            }
            ControllerOutcome::Canceled => {
                self.settle_canceled(record, operation).await?;
                self.queue.ack(&msg.handle).await?;
            }
        }

        Ok(())
    }

    async fn settle_done(
        &self,
        record: ResourceRecord,
        operation: &mut OperationRecord,
        properties: serde_json::Value,
    ) -> Result<(), WorkerError> {
        if operation.kind == OperationKind::Delete {
            self.delete_resource(record).await?;
        } else {
            self.finalize_resource(record, ProvisioningState::Succeeded, Some(properties)).await?;
        }
        operation.mark_terminal(OperationStatus::Succeeded, Utc::now(), None);
        self.storage.save_operation(operation).await?;
        info!(operation_id = %operation.id, "operation succeeded");
        Ok(())
    }

    async fn settle_fatal(
        &self,
        record: ResourceRecord,
        operation: &mut OperationRecord,
        detail: ErrorDetail,
    ) -> Result<(), WorkerError> {
        self.finalize_resource(record, ProvisioningState::Failed, None).await?;
        operation.mark_terminal(OperationStatus::Failed, Utc::now(), Some(detail.clone()));
        self.storage.save_operation(operation).await?;
        warn!(operation_id = %operation.id, error = %detail, "operation failed");
        Ok(())
    }

    async fn settle_canceled(
        &self,
        record: ResourceRecord,
        operation: &mut OperationRecord,
    ) -> Result<(), WorkerError> {
        self.finalize_resource(record, ProvisioningState::Canceled, None).await?;
        operation.mark_terminal(OperationStatus::Canceled, Utc::now(), None);
        self.storage.save_operation(operation).await?;
        info!(operation_id = %operation.id, "operation canceled");
        Ok(())
    }

    /// Persists the resource's terminal state, guarded by the etag the
    /// worker observed before invoking the controller.
    async fn finalize_resource(
        &self,
        mut record: ResourceRecord,
        new_state: ProvisioningState,
        new_properties: Option<serde_json::Value>,
    ) -> Result<(), WorkerError> {
        let precondition = EtagPrecondition::Match(record.etag.clone());
        record.provisioning_state = new_state;
        if let Some(properties) = new_properties {
            record.properties = properties;
        }
        record.pending_operation_id = None;
        record.system_data.modified_at = Utc::now();
        record.etag = record.compute_etag();
        self.storage.save(&record, precondition).await?;
        Ok(())
    }

    /// A Delete operation reaching `Done` removes the record entirely
    /// (§4.10: `Deleting --ok--> ∅`), rather than settling into a terminal
    /// `provisioningState` the way Create/Update do.
    async fn delete_resource(&self, record: ResourceRecord) -> Result<(), WorkerError> {
        let precondition = EtagPrecondition::Match(record.etag.clone());
        self.storage.delete(&record.id, precondition).await?;
        Ok(())
    }

    fn spawn_lease_renewal(
        &self,
        handle: String,
        mut operation: OperationRecord,
    ) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let storage = self.storage.clone();
        let lease_duration = self.settings.lease_duration;
        let renew_every = (lease_duration / 2)
            .to_std()
            .unwrap_or(StdDuration::from_secs(10))
            .max(StdDuration::from_secs(1));

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(renew_every).await;
                if let Err(err) = queue.extend(&handle, lease_duration).await {
                    warn!(error = %err, "failed to extend queue lease");
                }
                operation.lease_expires_at = Some(Utc::now() + lease_duration);
                if let Err(err) = storage.save_operation(&operation).await {
                    warn!(error = %err, "failed to persist renewed operation lease");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use ucp_domain::{OperationKind, ProvisioningState, SystemData};
    use ucp_store::InMemoryStore;
    use uuid::Uuid;

    struct StubController {
        resource_type: &'static str,
        max_attempts: u32,
        next: StdMutex<Option<ControllerOutcome>>,
    }

    impl StubController {
        fn always(resource_type: &'static str, outcome: ControllerOutcome) -> Arc<Self> {
            Arc::new(StubController { resource_type, max_attempts: 5, next: StdMutex::new(Some(outcome)) })
        }
    }

    #[async_trait]
    impl Controller for StubController {
        fn resource_type(&self) -> &str {
            self.resource_type
        }
        fn max_attempts(&self) -> u32 {
            self.max_attempts
        }
        async fn run(&self, _ctx: &ControllerContext, _record: &ResourceRecord) -> ControllerOutcome {
            self.next
                .lock()
                .unwrap()
                .take()
                .unwrap_or(ControllerOutcome::Fatal(ErrorDetail::new("StubExhausted", "stub called more than once")))
        }
    }

    const RESOURCE_TYPE: &str = "Applications.Test/things";
    const RESOURCE_PATH: &str =
        "/planes/radius/local/resourceGroups/rg1/providers/Applications.Test/things/thing1";

    struct Fixture {
        worker: AsyncWorker,
        storage: Arc<InMemoryStore>,
        operation_id: Uuid,
        handle: String,
    }

    async fn setup(controller: Arc<dyn Controller>) -> Fixture {
        let storage = Arc::new(InMemoryStore::default());

        let mut operation = OperationRecord::new(
            ucp_domain::ResourceId::parse(RESOURCE_PATH).unwrap(),
            OperationKind::Create,
            Utc::now(),
        );
        let operation_id = operation.id;

        let record = ResourceRecord {
            id: ucp_domain::ResourceId::parse(RESOURCE_PATH).unwrap(),
            resource_type: RESOURCE_TYPE.to_string(),
            location: "global".to_string(),
            tags: Default::default(),
            system_data: SystemData::new_now(),
            properties: serde_json::json!({"size": "small"}),
            provisioning_state: ProvisioningState::Accepted,
            etag: String::new(),
            pending_operation_id: Some(operation_id),
        };
        Storage::save(storage.as_ref(), &record, EtagPrecondition::NotExists).await.unwrap();
        Storage::save_operation(storage.as_ref(), &operation).await.unwrap();

        let message = ucp_domain::QueueMessage {
            operation_id,
            resource_id: record.id.clone(),
            kind: OperationKind::Create,
            attempt: 0,
            enqueued_at: Utc::now(),
            visible_at: Utc::now(),
        };
        Queue::enqueue(storage.as_ref(), message).await.unwrap();
        let leased = Queue::lease(storage.as_ref(), 1, chrono::Duration::seconds(30)).await.unwrap();
        let handle = leased[0].handle.clone();

        let mut registry = TypeRegistry::new();
        registry.register(controller, vec![]);

        let queue: Arc<dyn Queue> = storage.clone();
        let storage_dyn: Arc<dyn Storage> = storage.clone();
        let worker = AsyncWorker::new(
            storage_dyn,
            queue,
            Arc::new(registry),
            ResourceLockTable::new(),
            CancellationRegistry::new(),
            "test-worker",
            WorkerSettings {
                concurrency: 1,
                lease_duration: chrono::Duration::seconds(30),
                base_backoff: StdDuration::from_millis(10),
                poll_interval: StdDuration::from_millis(10),
            },
        );

        Fixture { worker, storage, operation_id, handle }
    }

    async fn leased(fixture: &Fixture) -> LeasedMessage {
        let record = Storage::get(
            fixture.storage.as_ref(),
            &ucp_domain::ResourceId::parse(RESOURCE_PATH).unwrap(),
        )
        .await
        .unwrap()
        .unwrap();
        LeasedMessage {
            handle: fixture.handle.clone(),
            message: ucp_domain::QueueMessage {
                operation_id: fixture.operation_id,
                resource_id: record.id,
                kind: OperationKind::Create,
                attempt: 1,
                enqueued_at: Utc::now(),
                visible_at: Utc::now(),
            },
            delivery_count: 1,
        }
    }

    #[tokio::test]
    async fn done_outcome_marks_resource_succeeded_and_acks() {
        let controller = StubController::always(
            RESOURCE_TYPE,
            ControllerOutcome::Done(serde_json::json!({"size": "small", "ready": true})),
        );
        let fixture = setup(controller).await;
        let msg = leased(&fixture).await;

        fixture.worker.process(msg).await.unwrap();

        let operation = Storage::get_operation(fixture.storage.as_ref(), fixture.operation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(operation.status, OperationStatus::Succeeded);

        let record = Storage::get(
            fixture.storage.as_ref(),
            &ucp_domain::ResourceId::parse(RESOURCE_PATH).unwrap(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(record.provisioning_state, ProvisioningState::Succeeded);
        assert!(record.pending_operation_id.is_none());
        assert_eq!(record.properties["ready"], serde_json::json!(true));

        assert!(Queue::lease(fixture.storage.as_ref(), 1, chrono::Duration::seconds(30))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn retry_past_max_attempts_escalates_to_fatal() {
        let controller = Arc::new(StubController {
            resource_type: RESOURCE_TYPE,
            max_attempts: 1,
            next: StdMutex::new(Some(ControllerOutcome::Retry {
                after: StdDuration::from_millis(5),
                reason: "still waiting".to_string(),
            })),
        });
        let fixture = setup(controller).await;
        let msg = leased(&fixture).await;

        fixture.worker.process(msg).await.unwrap();

        let operation = Storage::get_operation(fixture.storage.as_ref(), fixture.operation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(operation.status, OperationStatus::Failed);
        assert_eq!(operation.error.unwrap().code, "OperationRetryLimitExceeded");

        let record = Storage::get(
            fixture.storage.as_ref(),
            &ucp_domain::ResourceId::parse(RESOURCE_PATH).unwrap(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(record.provisioning_state, ProvisioningState::Failed);
    }

    #[tokio::test]
    async fn duplicate_delivery_of_a_terminal_operation_is_a_no_op() {
        let controller =
            StubController::always(RESOURCE_TYPE, ControllerOutcome::Done(serde_json::json!({})));
        let fixture = setup(controller).await;
        let msg = leased(&fixture).await;
        fixture.worker.process(msg).await.unwrap();

        let redelivered = LeasedMessage {
            handle: "redelivered-handle".to_string(),
            message: ucp_domain::QueueMessage {
                operation_id: fixture.operation_id,
                resource_id: ucp_domain::ResourceId::parse(RESOURCE_PATH).unwrap(),
                kind: OperationKind::Create,
                attempt: 2,
                enqueued_at: Utc::now(),
                visible_at: Utc::now(),
            },
            delivery_count: 2,
        };

        // A second delivery of an already-terminal operation must not touch
        // the controller again; StubController::run would return its
        // "called more than once" Fatal outcome if it were invoked.
        fixture.worker.process(redelivered).await.unwrap();

        let operation = Storage::get_operation(fixture.storage.as_ref(), fixture.operation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(operation.status, OperationStatus::Succeeded);
    }
}
