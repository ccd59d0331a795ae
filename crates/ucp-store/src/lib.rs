mod credential;
mod error;
mod lock;
mod memory;
mod postgres_store;
mod queue;
mod redb_store;
mod secret;
mod storage;

pub use credential::CredentialStore;
pub use error::StoreError;
pub use lock::{ResourceGuard, ResourceLockTable};
pub use memory::InMemoryStore;
pub use postgres_store::PostgresStore;
pub use queue::{LeasedMessage, Queue};
pub use redb_store::RedbStore;
pub use secret::SecretStore;
pub use storage::{check_precondition, EtagPrecondition, Page, Storage};
