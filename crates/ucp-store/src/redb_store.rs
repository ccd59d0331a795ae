use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use ucp_domain::{
    CredentialRecord, OperationRecord, QueueMessage, ResourceId, ResourceRecord, SecretRecord,
};
use uuid::Uuid;

use crate::credential::CredentialStore;
use crate::error::StoreError;
use crate::queue::{LeasedMessage, Queue};
use crate::secret::SecretStore;
use crate::storage::{check_precondition, EtagPrecondition, Page, Storage};

const RESOURCES: TableDefinition<&str, &[u8]> = TableDefinition::new("resources");
const OPERATIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("operations");
const QUEUE: TableDefinition<&str, &[u8]> = TableDefinition::new("queue");
const DEAD_LETTERS: TableDefinition<u64, &[u8]> = TableDefinition::new("dead_letters");
const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");
const CREDENTIALS: TableDefinition<&str, &[u8]> = TableDefinition::new("credentials");
const FINGERPRINT_LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("fingerprint_leases");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

fn ie(e: impl std::fmt::Display) -> StoreError {
    StoreError::Internal(e.to_string())
}

/// `storage.kind = "document"` backend: a single-file embedded database.
/// Suitable for single-process production deployments that don't need a
/// shared Postgres instance.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ie)?;
        }
        let db = Database::create(path).map_err(ie)?;
        {
            let wtxn = db.begin_write().map_err(ie)?;
            wtxn.open_table(RESOURCES).map_err(ie)?;
            wtxn.open_table(OPERATIONS).map_err(ie)?;
            wtxn.open_table(QUEUE).map_err(ie)?;
            wtxn.open_table(DEAD_LETTERS).map_err(ie)?;
            wtxn.open_table(SECRETS).map_err(ie)?;
            wtxn.open_table(CREDENTIALS).map_err(ie)?;
            wtxn.open_table(FINGERPRINT_LEASES).map_err(ie)?;
            wtxn.open_table(META).map_err(ie)?;
            wtxn.commit().map_err(ie)?;
        }
        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl Storage for RedbStore {
    async fn get(&self, id: &ResourceId) -> Result<Option<ResourceRecord>, StoreError> {
        let rtxn = self.db.begin_read().map_err(ie)?;
        let table = rtxn.open_table(RESOURCES).map_err(ie)?;
        match table.get(id.to_string().to_ascii_lowercase().as_str()).map_err(ie)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    async fn query(
        &self,
        scope: &str,
        resource_type: &str,
        continuation: Option<&str>,
        page_size: usize,
    ) -> Result<Page, StoreError> {
        let rtxn = self.db.begin_read().map_err(ie)?;
        let table = rtxn.open_table(RESOURCES).map_err(ie)?;
        let mut matching = Vec::new();
        for entry in table.iter().map_err(ie)? {
            let (_k, v) = entry.map_err(ie)?;
            let record: ResourceRecord = serde_json::from_slice(v.value())?;
            if record.id.containing_scope() == scope && record.id.resource_type().eq_ignore_ascii_case(resource_type)
            {
                matching.push(record);
            }
        }
        matching.sort_by(|a, b| a.id.to_string().cmp(&b.id.to_string()));

        let start = match continuation {
            Some(token) => matching
                .iter()
                .position(|r| r.id.to_string() == token)
                .map(|i| i + 1)
                .ok_or(StoreError::InvalidContinuationToken)?,
            None => 0,
        };
        let page: Vec<ResourceRecord> = matching.iter().skip(start).take(page_size).cloned().collect();
        let continuation = if start + page.len() < matching.len() {
            page.last().map(|r| r.id.to_string())
        } else {
            None
        };
        Ok(Page { items: page, continuation })
    }

    async fn save(
        &self,
        record: &ResourceRecord,
        precondition: EtagPrecondition,
    ) -> Result<String, StoreError> {
        let key = record.id.to_string().to_ascii_lowercase();
        let wtxn = self.db.begin_write().map_err(ie)?;
        let etag = {
            let mut table = wtxn.open_table(RESOURCES).map_err(ie)?;
            let current_etag = match table.get(key.as_str()).map_err(ie)? {
                Some(v) => {
                    let existing: ResourceRecord = serde_json::from_slice(v.value())?;
                    Some(existing.etag)
                }
                None => None,
            };
            check_precondition(&precondition, current_etag.as_deref())?;
            let mut record = record.clone();
            record.etag = record.compute_etag();
            let etag = record.etag.clone();
            let bytes = serde_json::to_vec(&record)?;
            table.insert(key.as_str(), bytes.as_slice()).map_err(ie)?;
            etag
        };
        wtxn.commit().map_err(ie)?;
        Ok(etag)
    }

    async fn delete(&self, id: &ResourceId, precondition: EtagPrecondition) -> Result<(), StoreError> {
        let key = id.to_string().to_ascii_lowercase();
        let wtxn = self.db.begin_write().map_err(ie)?;
        {
            let mut table = wtxn.open_table(RESOURCES).map_err(ie)?;
            let current = match table.get(key.as_str()).map_err(ie)? {
                Some(v) => {
                    let existing: ResourceRecord = serde_json::from_slice(v.value())?;
                    Some(existing.etag)
                }
                None => None,
            };
            if current.is_none() {
                return Err(StoreError::NotFound(id.to_string()));
            }
            check_precondition(&precondition, current.as_deref())?;
            table.remove(key.as_str()).map_err(ie)?;
        }
        wtxn.commit().map_err(ie)?;
        Ok(())
    }

    async fn get_operation(&self, id: Uuid) -> Result<Option<OperationRecord>, StoreError> {
        let rtxn = self.db.begin_read().map_err(ie)?;
        let table = rtxn.open_table(OPERATIONS).map_err(ie)?;
        match table.get(id.as_bytes().as_slice()).map_err(ie)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    async fn save_operation(&self, operation: &OperationRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(operation)?;
        let wtxn = self.db.begin_write().map_err(ie)?;
        {
            let mut table = wtxn.open_table(OPERATIONS).map_err(ie)?;
            table.insert(operation.id.as_bytes().as_slice(), bytes.as_slice()).map_err(ie)?;
        }
        wtxn.commit().map_err(ie)?;
        Ok(())
    }

    async fn purge_expired_operations(
        &self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<u64, StoreError> {
        let wtxn = self.db.begin_write().map_err(ie)?;
        let mut removed = 0u64;
        {
            let mut table = wtxn.open_table(OPERATIONS).map_err(ie)?;
            let mut stale = Vec::new();
            for entry in table.iter().map_err(ie)? {
                let (k, v) = entry.map_err(ie)?;
                let op: OperationRecord = serde_json::from_slice(v.value())?;
                if let Some(end) = op.end_time {
                    if op.status.is_terminal() && now - end >= retention {
                        stale.push(k.value().to_vec());
                    }
                }
            }
            for key in stale {
                table.remove(key.as_slice()).map_err(ie)?;
                removed += 1;
            }
        }
        wtxn.commit().map_err(ie)?;
        Ok(removed)
    }

    async fn acquire_fingerprint_lease(
        &self,
        fingerprint: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let wtxn = self.db.begin_write().map_err(ie)?;
        {
            let mut table = wtxn.open_table(FINGERPRINT_LEASES).map_err(ie)?;
            if let Some(v) = table.get(fingerprint).map_err(ie)? {
                let (current_holder, expires_at): (String, DateTime<Utc>) =
                    serde_json::from_slice(v.value())?;
                if current_holder != holder && expires_at > now {
                    return Err(StoreError::LeaseConflict { holder: current_holder });
                }
            }
            let bytes = serde_json::to_vec(&(holder.to_string(), now + ttl))?;
            table.insert(fingerprint, bytes.as_slice()).map_err(ie)?;
        }
        wtxn.commit().map_err(ie)?;
        Ok(())
    }

    async fn release_fingerprint_lease(&self, fingerprint: &str, holder: &str) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(ie)?;
        {
            let mut table = wtxn.open_table(FINGERPRINT_LEASES).map_err(ie)?;
            let should_remove = match table.get(fingerprint).map_err(ie)? {
                Some(v) => {
                    let (current_holder, _): (String, DateTime<Utc>) = serde_json::from_slice(v.value())?;
                    current_holder == holder
                }
                None => false,
            };
            if should_remove {
                table.remove(fingerprint).map_err(ie)?;
            }
        }
        wtxn.commit().map_err(ie)?;
        Ok(())
    }
}

#[async_trait]
impl Queue for RedbStore {
    async fn enqueue(&self, message: QueueMessage) -> Result<(), StoreError> {
        let handle = Uuid::new_v4().to_string();
        let bytes = serde_json::to_vec(&(message, Option::<DateTime<Utc>>::None))?;
        let wtxn = self.db.begin_write().map_err(ie)?;
        {
            let mut table = wtxn.open_table(QUEUE).map_err(ie)?;
            table.insert(handle.as_str(), bytes.as_slice()).map_err(ie)?;
        }
        wtxn.commit().map_err(ie)?;
        Ok(())
    }

    async fn lease(
        &self,
        max_count: u32,
        lease_duration: Duration,
    ) -> Result<Vec<LeasedMessage>, StoreError> {
        let now = Utc::now();
        let wtxn = self.db.begin_write().map_err(ie)?;
        let mut out = Vec::new();
        {
            let mut table = wtxn.open_table(QUEUE).map_err(ie)?;
            let mut candidates: Vec<(String, QueueMessage)> = Vec::new();
            for entry in table.iter().map_err(ie)? {
                let (k, v) = entry.map_err(ie)?;
                let (message, leased_until): (QueueMessage, Option<DateTime<Utc>>) =
                    serde_json::from_slice(v.value())?;
                if message.visible_at <= now && leased_until.map_or(true, |l| l <= now) {
                    candidates.push((k.value().to_string(), message));
                }
            }
            candidates.sort_by(|a, b| a.0.cmp(&b.0));
            candidates.truncate(max_count as usize);

            for (handle, mut message) in candidates {
                message.attempt += 1;
                let bytes = serde_json::to_vec(&(message.clone(), Some(now + lease_duration)))?;
                table.insert(handle.as_str(), bytes.as_slice()).map_err(ie)?;
                out.push(LeasedMessage {
                    handle,
                    delivery_count: message.attempt,
                    message,
                });
            }
        }
        wtxn.commit().map_err(ie)?;
        Ok(out)
    }

    async fn extend(&self, handle: &str, lease_duration: Duration) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(ie)?;
        {
            let mut table = wtxn.open_table(QUEUE).map_err(ie)?;
            let (message, _): (QueueMessage, Option<DateTime<Utc>>) = match table.get(handle).map_err(ie)? {
                Some(v) => serde_json::from_slice(v.value())?,
                None => return Err(StoreError::NotFound(handle.to_string())),
            };
            let bytes = serde_json::to_vec(&(message, Some(Utc::now() + lease_duration)))?;
            table.insert(handle, bytes.as_slice()).map_err(ie)?;
        }
        wtxn.commit().map_err(ie)?;
        Ok(())
    }

    async fn ack(&self, handle: &str) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(ie)?;
        {
            let mut table = wtxn.open_table(QUEUE).map_err(ie)?;
            table.remove(handle).map_err(ie)?;
        }
        wtxn.commit().map_err(ie)?;
        Ok(())
    }

    async fn nack(&self, handle: &str, requeue_after: Option<Duration>) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(ie)?;
        {
            let mut table = wtxn.open_table(QUEUE).map_err(ie)?;
            let (mut message, _): (QueueMessage, Option<DateTime<Utc>>) = match table.get(handle).map_err(ie)? {
                Some(v) => serde_json::from_slice(v.value())?,
                None => return Err(StoreError::NotFound(handle.to_string())),
            };
            message.visible_at = Utc::now() + requeue_after.unwrap_or_else(Duration::zero);
            let bytes = serde_json::to_vec(&(message, Option::<DateTime<Utc>>::None))?;
            table.insert(handle, bytes.as_slice()).map_err(ie)?;
        }
        wtxn.commit().map_err(ie)?;
        Ok(())
    }

    async fn dead_letter(&self, handle: &str) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(ie)?;
        {
            let existing = {
                let queue = wtxn.open_table(QUEUE).map_err(ie)?;
                queue.get(handle).map_err(ie)?.map(|g| g.value().to_vec())
            };
            if let Some(v) = existing {
                let (message, _): (QueueMessage, Option<DateTime<Utc>>) = serde_json::from_slice(&v)?;

                let seq = {
                    let mut meta = wtxn.open_table(META).map_err(ie)?;
                    let current = meta
                        .get("dead_letter_seq")
                        .map_err(ie)?
                        .map(|g| g.value())
                        .unwrap_or(0);
                    let next = current + 1;
                    meta.insert("dead_letter_seq", next).map_err(ie)?;
                    next
                };
                let mut dl = wtxn.open_table(DEAD_LETTERS).map_err(ie)?;
                dl.insert(seq, serde_json::to_vec(&message)?.as_slice()).map_err(ie)?;
                let mut queue = wtxn.open_table(QUEUE).map_err(ie)?;
                queue.remove(handle).map_err(ie)?;
            }
        }
        wtxn.commit().map_err(ie)?;
        Ok(())
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<QueueMessage>, StoreError> {
        let rtxn = self.db.begin_read().map_err(ie)?;
        let table = rtxn.open_table(DEAD_LETTERS).map_err(ie)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(ie)?.take(limit) {
            let (_k, v) = entry.map_err(ie)?;
            out.push(serde_json::from_slice(v.value())?);
        }
        Ok(out)
    }
}

#[async_trait]
impl SecretStore for RedbStore {
    async fn get(&self, scope: &ResourceId, name: &str) -> Result<Option<SecretRecord>, StoreError> {
        let key = format!("{}\u{0}{}", scope.to_string().to_ascii_lowercase(), name);
        let rtxn = self.db.begin_read().map_err(ie)?;
        let table = rtxn.open_table(SECRETS).map_err(ie)?;
        match table.get(key.as_str()).map_err(ie)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &SecretRecord) -> Result<String, StoreError> {
        let key = format!(
            "{}\u{0}{}",
            record.scope_id.to_string().to_ascii_lowercase(),
            record.name
        );
        let mut record = record.clone();
        record.etag = record.compute_etag();
        let etag = record.etag.clone();
        let bytes = serde_json::to_vec(&record)?;
        let wtxn = self.db.begin_write().map_err(ie)?;
        {
            let mut table = wtxn.open_table(SECRETS).map_err(ie)?;
            table.insert(key.as_str(), bytes.as_slice()).map_err(ie)?;
        }
        wtxn.commit().map_err(ie)?;
        Ok(etag)
    }

    async fn delete(&self, scope: &ResourceId, name: &str) -> Result<(), StoreError> {
        let key = format!("{}\u{0}{}", scope.to_string().to_ascii_lowercase(), name);
        let wtxn = self.db.begin_write().map_err(ie)?;
        {
            let mut table = wtxn.open_table(SECRETS).map_err(ie)?;
            table.remove(key.as_str()).map_err(ie)?;
        }
        wtxn.commit().map_err(ie)?;
        Ok(())
    }

    async fn list_names(&self, scope: &ResourceId) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{}\u{0}", scope.to_string().to_ascii_lowercase());
        let rtxn = self.db.begin_read().map_err(ie)?;
        let table = rtxn.open_table(SECRETS).map_err(ie)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(ie)? {
            let (k, _v) = entry.map_err(ie)?;
            if let Some(name) = k.value().strip_prefix(prefix.as_str()) {
                out.push(name.to_string());
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl CredentialStore for RedbStore {
    async fn get_for_plane(&self, plane_name: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let rtxn = self.db.begin_read().map_err(ie)?;
        let table = rtxn.open_table(CREDENTIALS).map_err(ie)?;
        match table.get(plane_name).map_err(ie)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        let wtxn = self.db.begin_write().map_err(ie)?;
        {
            let mut table = wtxn.open_table(CREDENTIALS).map_err(ie)?;
            table.insert(record.plane_name.as_str(), bytes.as_slice()).map_err(ie)?;
        }
        wtxn.commit().map_err(ie)?;
        Ok(())
    }

    async fn delete(&self, plane_name: &str) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(ie)?;
        {
            let mut table = wtxn.open_table(CREDENTIALS).map_err(ie)?;
            table.remove(plane_name).map_err(ie)?;
        }
        wtxn.commit().map_err(ie)?;
        Ok(())
    }

    async fn list_redacted(&self) -> Result<Vec<CredentialRecord>, StoreError> {
        let rtxn = self.db.begin_read().map_err(ie)?;
        let table = rtxn.open_table(CREDENTIALS).map_err(ie)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(ie)? {
            let (_k, v) = entry.map_err(ie)?;
            let record: CredentialRecord = serde_json::from_slice(v.value())?;
            out.push(record.redacted());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use ucp_domain::ProvisioningState;

    fn dummy_record(id: &str) -> ResourceRecord {
        ResourceRecord {
            id: ResourceId::parse(id).unwrap(),
            resource_type: "Applications.Core/environments".to_string(),
            location: "global".to_string(),
            tags: Default::default(),
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

    fn open_store(dir: &TempDir) -> RedbStore {
        RedbStore::open(&dir.path().join("ucp.redb")).unwrap()
    }

    #[tokio::test]
    async fn save_and_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let record = dummy_record(env_id());
        store.save(&record, EtagPrecondition::Any).await.unwrap();
        let got = Storage::get(&store, &record.id).await.unwrap().unwrap();
        assert_eq!(got.id, record.id);
    }

    #[tokio::test]
    async fn persistence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ucp.redb");
        let record = dummy_record(env_id());
        {
            let store = RedbStore::open(&path).unwrap();
            store.save(&record, EtagPrecondition::Any).await.unwrap();
        }
        {
            let store = RedbStore::open(&path).unwrap();
            let got = Storage::get(&store, &record.id).await.unwrap();
            assert!(got.is_some(), "resource should survive store reopen");
        }
    }

    #[tokio::test]
    async fn concurrency_conflict_on_stale_etag() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let record = dummy_record(env_id());
        store.save(&record, EtagPrecondition::Any).await.unwrap();
        let err = store
            .save(&record, EtagPrecondition::Match("stale".to_string()))
            .await;
        assert!(matches!(err, Err(StoreError::ConcurrencyConflict(_))));
    }

    #[tokio::test]
    async fn lease_ack_and_dead_letter_cycle() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .enqueue(QueueMessage {
                operation_id: Uuid::new_v4(),
                resource_id: ResourceId::parse(env_id()).unwrap(),
                kind: ucp_domain::OperationKind::Create,
                attempt: 0,
                enqueued_at: Utc::now(),
                visible_at: Utc::now(),
            })
            .await
            .unwrap();
        let leased = store.lease(10, Duration::seconds(30)).await.unwrap();
        assert_eq!(leased.len(), 1);
        store.dead_letter(&leased[0].handle).await.unwrap();
        assert_eq!(store.dead_letters(10).await.unwrap().len(), 1);
        assert!(store.lease(10, Duration::seconds(30)).await.unwrap().is_empty());
    }
}
