use std::sync::Arc;

use ucp_driver::PlaneRegistry;
use ucp_routing::TypeRegistry;
use ucp_store::{CredentialStore, Queue, ResourceLockTable, SecretStore, Storage};
use ucp_worker::CancellationRegistry;

/// Everything a request handler needs, built once at startup in `ucp-cli`
/// and shared with the worker via the same `Arc`/`ResourceLockTable` clone
/// (see DESIGN.md's lock/cancellation sharing resolution).
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub queue: Arc<dyn Queue>,
    pub secrets: Arc<dyn SecretStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub types: Arc<TypeRegistry>,
    pub planes: Arc<PlaneRegistry>,
    pub locks: ResourceLockTable,
    pub cancellations: CancellationRegistry,
    pub auth_token: Arc<String>,
    /// Default `Retry-After` hint for non-terminal operation polling (§4.6);
    /// per-type polling intervals are an open extension point, not modeled.
    pub default_poll_interval_secs: u64,
}
