use async_trait::async_trait;
use ucp_domain::{ResourceId, SecretRecord};

use crate::error::StoreError;

/// Stores operation-output secrets classified by the Recipe Engine / type
/// registry (§4.9), scoped under the owning resource.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, scope: &ResourceId, name: &str) -> Result<Option<SecretRecord>, StoreError>;

    /// Upserts the secret, returning its new ETag.
    async fn put(&self, record: &SecretRecord) -> Result<String, StoreError>;

    async fn delete(&self, scope: &ResourceId, name: &str) -> Result<(), StoreError>;

    /// Lists the names of secrets stored under `scope`, without values —
    /// used by the frontend's `listSecrets` action to report what is
    /// available without leaking contents (§4.9).
    async fn list_names(&self, scope: &ResourceId) -> Result<Vec<String>, StoreError>;
}
