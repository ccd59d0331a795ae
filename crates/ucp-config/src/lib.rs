mod raw;
mod loader;
pub mod error;

pub use error::ConfigError;
pub use loader::{
    load, load_defaults, Config, OperationsConfig, PlaneConfig, QueueConfig, QueueKind, StorageKind,
    TerraformConfig, WorkerConfig,
};
