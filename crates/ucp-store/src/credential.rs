use async_trait::async_trait;
use ucp_domain::CredentialRecord;

use crate::error::StoreError;

/// Stores the plane-dispatch credentials used by the AWS/Azure proxy drivers
/// (§4.7) and recipe backends. One credential per plane name.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_for_plane(&self, plane_name: &str) -> Result<Option<CredentialRecord>, StoreError>;

    async fn put(&self, record: &CredentialRecord) -> Result<(), StoreError>;

    async fn delete(&self, plane_name: &str) -> Result<(), StoreError>;

    /// Lists redacted credential summaries, for the `ucp status` CLI surface.
    async fn list_redacted(&self) -> Result<Vec<CredentialRecord>, StoreError>;
}
