use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use ucp_domain::{
    CredentialRecord, OperationRecord, QueueMessage, ResourceId, ResourceRecord, SecretRecord,
};
use uuid::Uuid;

use crate::credential::CredentialStore;
use crate::error::StoreError;
use crate::queue::{LeasedMessage, Queue};
use crate::secret::SecretStore;
use crate::storage::{check_precondition, EtagPrecondition, Page, Storage};

struct QueuedEntry {
    message: QueueMessage,
    leased_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    resources: HashMap<ResourceId, ResourceRecord>,
    operations: HashMap<Uuid, OperationRecord>,
    queue: HashMap<String, QueuedEntry>,
    dead_letters: Vec<QueueMessage>,
    secrets: HashMap<(ResourceId, String), SecretRecord>,
    credentials: HashMap<String, CredentialRecord>,
    fingerprint_leases: HashMap<String, (String, DateTime<Utc>)>,
}

/// In-memory implementation of [`Storage`], [`Queue`], [`SecretStore`] and
/// [`CredentialStore`]. All data is lost on process exit; used for tests and
/// the single-process local driver.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStore {
    async fn get(&self, id: &ResourceId) -> Result<Option<ResourceRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.resources.get(id).cloned())
    }

    async fn query(
        &self,
        scope: &str,
        resource_type: &str,
        continuation: Option<&str>,
        page_size: usize,
    ) -> Result<Page, StoreError> {
        let guard = self.inner.read().await;
        let mut matching: Vec<&ResourceRecord> = guard
            .resources
            .values()
            .filter(|r| {
                r.id.containing_scope() == scope && r.id.resource_type().eq_ignore_ascii_case(resource_type)
            })
            .collect();
        matching.sort_by(|a, b| a.id.to_string().cmp(&b.id.to_string()));

        let start = match continuation {
            Some(token) => matching
                .iter()
                .position(|r| r.id.to_string() == token)
                .map(|i| i + 1)
                .ok_or(StoreError::InvalidContinuationToken)?,
            None => 0,
        };

        let page: Vec<ResourceRecord> = matching
            .iter()
            .skip(start)
            .take(page_size)
            .map(|r| (*r).clone())
            .collect();
        let continuation = if start + page.len() < matching.len() {
            page.last().map(|r| r.id.to_string())
        } else {
            None
        };
        Ok(Page {
            items: page,
            continuation,
        })
    }

    async fn save(
        &self,
        record: &ResourceRecord,
        precondition: EtagPrecondition,
    ) -> Result<String, StoreError> {
        let mut guard = self.inner.write().await;
        let current = guard.resources.get(&record.id).map(|r| r.etag.as_str());
        check_precondition(&precondition, current)?;
        let mut record = record.clone();
        record.etag = record.compute_etag();
        let etag = record.etag.clone();
        guard.resources.insert(record.id.clone(), record);
        Ok(etag)
    }

    async fn delete(&self, id: &ResourceId, precondition: EtagPrecondition) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let current = guard.resources.get(id).map(|r| r.etag.as_str());
        if current.is_none() {
            return Err(StoreError::NotFound(id.to_string()));
        }
        check_precondition(&precondition, current)?;
        guard.resources.remove(id);
        Ok(())
    }

    async fn get_operation(&self, id: Uuid) -> Result<Option<OperationRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.operations.get(&id).cloned())
    }

    async fn save_operation(&self, operation: &OperationRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.operations.insert(operation.id, operation.clone());
        Ok(())
    }

    async fn purge_expired_operations(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<u64, StoreError> {
        let mut guard = self.inner.write().await;
        let before = guard.operations.len();
        guard.operations.retain(|_, op| {
            let Some(end) = op.end_time else { return true };
            !op.status.is_terminal() || now - end < retention
        });
        Ok((before - guard.operations.len()) as u64)
    }

    async fn acquire_fingerprint_lease(
        &self,
        fingerprint: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let now = Utc::now();
        if let Some((current_holder, expires_at)) = guard.fingerprint_leases.get(fingerprint) {
            if current_holder != holder && *expires_at > now {
                return Err(StoreError::LeaseConflict {
                    holder: current_holder.clone(),
                });
            }
        }
        guard
            .fingerprint_leases
            .insert(fingerprint.to_string(), (holder.to_string(), now + ttl));
        Ok(())
    }

    async fn release_fingerprint_lease(&self, fingerprint: &str, holder: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if let Some((current_holder, _)) = guard.fingerprint_leases.get(fingerprint) {
            if current_holder == holder {
                guard.fingerprint_leases.remove(fingerprint);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Queue for InMemoryStore {
    async fn enqueue(&self, message: QueueMessage) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let handle = Uuid::new_v4().to_string();
        guard.queue.insert(
            handle,
            QueuedEntry {
                message,
                leased_until: None,
            },
        );
        Ok(())
    }

    async fn lease(
        &self,
        max_count: u32,
        lease_duration: Duration,
    ) -> Result<Vec<LeasedMessage>, StoreError> {
        let mut guard = self.inner.write().await;
        let now = Utc::now();
        let mut candidates: Vec<String> = guard
            .queue
            .iter()
            .filter(|(_, e)| {
                e.message.visible_at <= now && e.leased_until.map_or(true, |l| l <= now)
            })
            .map(|(h, _)| h.clone())
            .collect();
        candidates.sort();
        candidates.truncate(max_count as usize);

        let mut out = Vec::new();
        for handle in candidates {
            if let Some(entry) = guard.queue.get_mut(&handle) {
                entry.message.attempt += 1;
                entry.leased_until = Some(now + lease_duration);
                out.push(LeasedMessage {
                    handle: handle.clone(),
                    message: entry.message.clone(),
                    delivery_count: entry.message.attempt,
                });
            }
        }
        Ok(out)
    }

    async fn extend(&self, handle: &str, lease_duration: Duration) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let entry = guard
            .queue
            .get_mut(handle)
            .ok_or_else(|| StoreError::NotFound(handle.to_string()))?;
        entry.leased_until = Some(Utc::now() + lease_duration);
        Ok(())
    }

    async fn ack(&self, handle: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.queue.remove(handle);
        Ok(())
    }

    async fn nack(&self, handle: &str, requeue_after: Option<Duration>) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let entry = guard
            .queue
            .get_mut(handle)
            .ok_or_else(|| StoreError::NotFound(handle.to_string()))?;
        entry.leased_until = None;
        entry.message.visible_at = Utc::now() + requeue_after.unwrap_or_else(Duration::zero);
        Ok(())
    }

    async fn dead_letter(&self, handle: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if let Some(entry) = guard.queue.remove(handle) {
            guard.dead_letters.push(entry.message);
        }
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<QueueMessage>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.dead_letters.iter().take(limit).cloned().collect())
    }
}

#[async_trait]
impl SecretStore for InMemoryStore {
    async fn get(&self, scope: &ResourceId, name: &str) -> Result<Option<SecretRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.secrets.get(&(scope.clone(), name.to_string())).cloned())
    }

    async fn put(&self, record: &SecretRecord) -> Result<String, StoreError> {
        let mut guard = self.inner.write().await;
        let mut record = record.clone();
        record.etag = record.compute_etag();
        let etag = record.etag.clone();
        guard
            .secrets
            .insert((record.scope_id.clone(), record.name.clone()), record);
        Ok(etag)
    }

    async fn delete(&self, scope: &ResourceId, name: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.secrets.remove(&(scope.clone(), name.to_string()));
        Ok(())
    }

    async fn list_names(&self, scope: &ResourceId) -> Result<Vec<String>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .secrets
            .keys()
            .filter(|(s, _)| s == scope)
            .map(|(_, name)| name.clone())
            .collect())
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn get_for_plane(&self, plane_name: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.credentials.get(plane_name).cloned())
    }

    async fn put(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .credentials
            .insert(record.plane_name.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, plane_name: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.credentials.remove(plane_name);
        Ok(())
    }

    async fn list_redacted(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.credentials.values().map(|r| r.redacted()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ucp_domain::ProvisioningState;

    fn dummy_record(id: &str) -> ResourceRecord {
        ResourceRecord {
            id: ResourceId::parse(id).unwrap(),
            resource_type: "Applications.Core/environments".to_string(),
            location: "global".to_string(),
            tags: HashMap::new(),
            system_data: ucp_domain::SystemData::new_now(),
            properties: serde_json::json!({"name": "env1"}),
            provisioning_state: ProvisioningState::Succeeded,
            etag: String::new(),
            pending_operation_id: None,
        }
    }

    fn env_id() -> &'static str {
        "/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/environments/env1"
    }

    fn dummy_message() -> QueueMessage {
        QueueMessage {
            operation_id: Uuid::new_v4(),
            resource_id: ResourceId::parse(env_id()).unwrap(),
            kind: ucp_domain::OperationKind::Create,
            attempt: 0,
            enqueued_at: Utc::now(),
            visible_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_and_get_round_trips() {
        let store = InMemoryStore::new();
        let record = dummy_record(env_id());
        store.save(&record, EtagPrecondition::Any).await.unwrap();
        let got = Storage::get(&store, &record.id).await.unwrap().unwrap();
        assert_eq!(got.id, record.id);
        assert!(!got.etag.is_empty());
    }

    #[tokio::test]
    async fn not_exists_precondition_rejects_existing() {
        let store = InMemoryStore::new();
        let record = dummy_record(env_id());
        store.save(&record, EtagPrecondition::NotExists).await.unwrap();
        let err = store.save(&record, EtagPrecondition::NotExists).await;
        assert!(matches!(err, Err(StoreError::ConcurrencyConflict(_))));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = InMemoryStore::new();
        let id = ResourceId::parse(
            "/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/environments/gone",
        )
        .unwrap();
        let err = store.delete(&id, EtagPrecondition::Any).await;
        assert!(matches!(err, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn lease_then_ack_removes_message() {
        let store = InMemoryStore::new();
        store.enqueue(dummy_message()).await.unwrap();

        let leased = store.lease(10, Duration::seconds(30)).await.unwrap();
        assert_eq!(leased.len(), 1);
        store.ack(&leased[0].handle).await.unwrap();

        let leased_again = store.lease(10, Duration::seconds(30)).await.unwrap();
        assert!(leased_again.is_empty());
    }

    #[tokio::test]
    async fn nack_makes_message_visible_again_immediately() {
        let store = InMemoryStore::new();
        store.enqueue(dummy_message()).await.unwrap();

        let leased = store.lease(1, Duration::seconds(30)).await.unwrap();
        store.nack(&leased[0].handle, None).await.unwrap();
        let leased_again = store.lease(1, Duration::seconds(30)).await.unwrap();
        assert_eq!(leased_again.len(), 1);
        assert_eq!(leased_again[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn dead_letter_is_listed_and_removed_from_queue() {
        let store = InMemoryStore::new();
        store.enqueue(dummy_message()).await.unwrap();
        let leased = store.lease(1, Duration::seconds(30)).await.unwrap();
        store.dead_letter(&leased[0].handle).await.unwrap();

        assert_eq!(store.dead_letters(10).await.unwrap().len(), 1);
        assert!(store.lease(1, Duration::seconds(30)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn secret_put_and_get_round_trips() {
        let store = InMemoryStore::new();
        let record = SecretRecord {
            scope_id: ResourceId::parse(env_id()).unwrap(),
            name: "connectionString".to_string(),
            data: b"secret-bytes".to_vec(),
            etag: String::new(),
        };
        SecretStore::put(&store, &record).await.unwrap();
        let got = SecretStore::get(&store, &record.scope_id, "connectionString")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.data, b"secret-bytes");
    }

    #[tokio::test]
    async fn credential_round_trips_and_redacts() {
        let store = InMemoryStore::new();
        let record = CredentialRecord {
            plane_name: "aws-1".to_string(),
            cloud: "aws".to_string(),
            kind: ucp_domain::CredentialKind::AccessKeyPair,
            data: vec![1, 2, 3],
        };
        CredentialStore::put(&store, &record).await.unwrap();
        let got = store.get_for_plane("aws-1").await.unwrap().unwrap();
        assert_eq!(got.data, vec![1, 2, 3]);

        let list = store.list_redacted().await.unwrap();
        assert!(list[0].data.is_empty());
    }
}
