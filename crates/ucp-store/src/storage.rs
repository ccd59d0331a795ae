use async_trait::async_trait;
use ucp_domain::{OperationRecord, ResourceId, ResourceRecord};

use crate::error::StoreError;

/// ETag precondition for a `save`/`delete`, per §4.1:
/// "`None` overwrites unconditionally; `Some(\"\")` asserts the resource does
/// not yet exist; `Some(etag)` asserts the current resource matches exactly."
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EtagPrecondition {
    Any,
    NotExists,
    Match(String),
}

impl EtagPrecondition {
    /// Parses the `If-Match`/`If-None-Match` header pair into a precondition,
    /// per §4.4's ARM-RPC semantics (`If-None-Match: *` -> `NotExists`).
    pub fn from_headers(if_match: Option<&str>, if_none_match: Option<&str>) -> Self {
        if let Some(inm) = if_none_match {
            if inm.trim() == "*" {
                return EtagPrecondition::NotExists;
            }
        }
        if let Some(im) = if_match {
            let trimmed = im.trim().trim_matches('"');
            if !trimmed.is_empty() {
                return EtagPrecondition::Match(trimmed.to_string());
            }
        }
        EtagPrecondition::Any
    }

    fn check(&self, current: Option<&str>) -> Result<(), StoreError> {
        match self {
            EtagPrecondition::Any => Ok(()),
            EtagPrecondition::NotExists => match current {
                None => Ok(()),
                Some(_) => Err(StoreError::ConcurrencyConflict(
                    "resource already exists".to_string(),
                )),
            },
            EtagPrecondition::Match(expected) => match current {
                Some(actual) if actual == expected => Ok(()),
                _ => Err(StoreError::ConcurrencyConflict(format!(
                    "expected etag {expected}"
                ))),
            },
        }
    }
}

/// One page of a [`Storage::query`] result.
pub struct Page {
    pub items: Vec<ResourceRecord>,
    pub continuation: Option<String>,
}

/// The persistence seam for resource state and operation records (§4.1).
///
/// Implementations must make `save`/`delete` atomic with respect to the
/// ETag precondition check: a caller racing another writer must see exactly
/// one of them win and the other get [`StoreError::ConcurrencyConflict`].
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, id: &ResourceId) -> Result<Option<ResourceRecord>, StoreError>;

    /// Lists resources directly under `scope` of `resource_type`, paginated.
    async fn query(
        &self,
        scope: &str,
        resource_type: &str,
        continuation: Option<&str>,
        page_size: usize,
    ) -> Result<Page, StoreError>;

    /// Persists `record`, enforcing `precondition` against the currently
    /// stored ETag (if any). Returns the newly computed ETag on success.
    async fn save(
        &self,
        record: &ResourceRecord,
        precondition: EtagPrecondition,
    ) -> Result<String, StoreError>;

    async fn delete(&self, id: &ResourceId, precondition: EtagPrecondition) -> Result<(), StoreError>;

    async fn get_operation(&self, id: uuid::Uuid) -> Result<Option<OperationRecord>, StoreError>;

    async fn save_operation(&self, operation: &OperationRecord) -> Result<(), StoreError>;

    /// Deletes terminal operation records older than `retention`, returning
    /// the count removed. Invoked from a background sweep (§4.6).
    async fn purge_expired_operations(
        &self,
        now: chrono::DateTime<chrono::Utc>,
        retention: chrono::Duration,
    ) -> Result<u64, StoreError>;

    /// Cross-process single-flight lease for the Recipe Engine (§4.8): at
    /// most one holder per `fingerprint` at a time. `holder` is an opaque
    /// caller-chosen token (e.g. worker instance id); re-acquiring with the
    /// same `holder` while still held renews the lease rather than
    /// conflicting. Returns [`StoreError::LeaseConflict`] if another holder
    /// has a live lease.
    async fn acquire_fingerprint_lease(
        &self,
        fingerprint: &str,
        holder: &str,
        ttl: chrono::Duration,
    ) -> Result<(), StoreError>;

    /// Releases a fingerprint lease held by `holder`. A no-op if the lease
    /// is absent or already held by someone else (lost the race to expiry).
    async fn release_fingerprint_lease(&self, fingerprint: &str, holder: &str) -> Result<(), StoreError>;
}

/// Shared precondition-check helper for `Storage` implementors: given the
/// current stored etag (if any), validate `precondition` before writing.
pub fn check_precondition(
    precondition: &EtagPrecondition,
    current_etag: Option<&str>,
) -> Result<(), StoreError> {
    precondition.check(current_etag)
}
