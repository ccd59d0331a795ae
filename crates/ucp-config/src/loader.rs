use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigError;
use crate::raw::RawConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageKind {
    Memory,
    Postgres { url: String },
    Document { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueKind {
    Memory,
    Postgres,
    Cloud,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub kind: QueueKind,
    pub lease_duration: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct OperationsConfig {
    pub retention: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneConfig {
    pub kind: String,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TerraformConfig {
    pub mirror: Option<String>,
    pub binary_path: Option<String>,
}

/// Fully resolved UCP configuration, after defaults and the environment
/// overlay have been applied — §6's "Configuration" options.
#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageKind,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub operations: OperationsConfig,
    pub planes: HashMap<String, PlaneConfig>,
    pub recipes_terraform: TerraformConfig,
}

/// Loads `path` as YAML, fills defaults for anything absent, then lets
/// environment variables (`UCP_*`) override individual scalar settings —
/// the same file-then-env layering most of this corpus's deployables use,
/// generalized here from the teacher's directory-of-YAML-files loader
/// since UCP has one process-wide config rather than per-enclave trees.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io { path: path.display().to_string(), source: e })?;
    let raw: RawConfig = serde_yaml::from_str(&content)
        .map_err(|e| ConfigError::YamlParse { path: path.display().to_string(), source: e })?;
    debug!(path = %path.display(), "loaded raw UCP config");
    build(raw)
}

/// Same as [`load`] but starts from an already-empty config, for callers
/// (tests, `ucp serve --no-config`) that only want the env overlay and
/// built-in defaults.
pub fn load_defaults() -> Result<Config, ConfigError> {
    build(RawConfig::default())
}

fn build(mut raw: RawConfig) -> Result<Config, ConfigError> {
    apply_env_overlay(&mut raw);

    let storage = match raw.storage.kind.as_deref().unwrap_or("memory") {
        "memory" => StorageKind::Memory,
        "postgres" => {
            let url = raw
                .storage
                .postgres
                .map(|p| p.url)
                .ok_or_else(|| ConfigError::Conversion {
                    path: "storage.postgres.url".to_string(),
                    message: "storage.kind = postgres requires storage.postgres.url".to_string(),
                })?;
            StorageKind::Postgres { url }
        }
        "document" => {
            let path = raw
                .storage
                .document
                .map(|d| d.path)
                .ok_or_else(|| ConfigError::Conversion {
                    path: "storage.document.path".to_string(),
                    message: "storage.kind = document requires storage.document.path".to_string(),
                })?;
            StorageKind::Document { path }
        }
        other => {
            return Err(ConfigError::Conversion {
                path: "storage.kind".to_string(),
                message: format!("unknown storage kind '{other}'"),
            })
        }
    };

    let queue_kind = match raw.queue.kind.as_deref().unwrap_or("memory") {
        "memory" => QueueKind::Memory,
        "postgres" => QueueKind::Postgres,
        "cloud" => QueueKind::Cloud,
        other => {
            return Err(ConfigError::Conversion {
                path: "queue.kind".to_string(),
                message: format!("unknown queue kind '{other}'"),
            })
        }
    };

    let queue = QueueConfig {
        kind: queue_kind,
        lease_duration: parse_duration(raw.queue.lease_duration.as_deref(), "30s", "queue.leaseDuration")?,
        max_attempts: raw.queue.max_attempts.unwrap_or(5),
        base_backoff: parse_duration(raw.queue.base_backoff.as_deref(), "2s", "queue.baseBackoff")?,
    };

    let worker = WorkerConfig { concurrency: raw.worker.concurrency.unwrap_or(10) };

    let operations = OperationsConfig {
        retention: parse_duration(raw.operations.retention.as_deref(), "24h", "operations.retention")?,
    };

    let planes = raw
        .planes
        .into_iter()
        .map(|(name, p)| (name, PlaneConfig { kind: p.kind, endpoint: p.endpoint }))
        .collect();

    let recipes_terraform = raw
        .recipes
        .terraform
        .map(|t| TerraformConfig { mirror: t.mirror, binary_path: t.binary_path })
        .unwrap_or_default();

    Ok(Config { storage, queue, worker, operations, planes, recipes_terraform })
}

fn parse_duration(value: Option<&str>, default: &str, field: &str) -> Result<Duration, ConfigError> {
    let text = value.unwrap_or(default);
    text.parse::<humantime::Duration>()
        .map(Duration::from)
        .map_err(|e| ConfigError::Conversion { path: field.to_string(), message: format!("invalid duration '{text}': {e}") })
}

/// Overlays `UCP_*` environment variables onto the parsed YAML, scalar
/// setting by scalar setting — mirroring how the teacher's CLI layers
/// `--flag`/env/config-file without a third-party layered-config crate.
fn apply_env_overlay(raw: &mut RawConfig) {
    use std::env;

    if let Ok(v) = env::var("UCP_STORAGE_KIND") {
        raw.storage.kind = Some(v);
    }
    if let Ok(v) = env::var("UCP_STORAGE_POSTGRES_URL") {
        raw.storage.postgres = Some(crate::raw::RawPostgres { url: v });
    }
    if let Ok(v) = env::var("UCP_STORAGE_DOCUMENT_PATH") {
        raw.storage.document = Some(crate::raw::RawDocument { path: v });
    }
    if let Ok(v) = env::var("UCP_QUEUE_KIND") {
        raw.queue.kind = Some(v);
    }
    if let Ok(v) = env::var("UCP_QUEUE_LEASE_DURATION") {
        raw.queue.lease_duration = Some(v);
    }
    if let Ok(v) = env::var("UCP_QUEUE_MAX_ATTEMPTS") {
        if let Ok(n) = v.parse() {
            raw.queue.max_attempts = Some(n);
        }
    }
    if let Ok(v) = env::var("UCP_QUEUE_BASE_BACKOFF") {
        raw.queue.base_backoff = Some(v);
    }
    if let Ok(v) = env::var("UCP_WORKER_CONCURRENCY") {
        if let Ok(n) = v.parse() {
            raw.worker.concurrency = Some(n);
        }
    }
    if let Ok(v) = env::var("UCP_OPERATIONS_RETENTION") {
        raw.operations.retention = Some(v);
    }
    if let Ok(v) = env::var("UCP_RECIPES_TERRAFORM_MIRROR") {
        let entry = raw.recipes.terraform.get_or_insert(crate::raw::RawTerraformRecipes { mirror: None, binary_path: None });
        entry.mirror = Some(v);
    }
    if let Ok(v) = env::var("UCP_RECIPES_TERRAFORM_BINARY_PATH") {
        let entry = raw.recipes.terraform.get_or_insert(crate::raw::RawTerraformRecipes { mirror: None, binary_path: None });
        entry.binary_path = Some(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_file_is_empty() {
        let config = build(RawConfig::default()).unwrap();
        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(config.queue.kind, QueueKind::Memory);
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.worker.concurrency, 10);
        assert_eq!(config.operations.retention, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn postgres_storage_requires_url() {
        let mut raw = RawConfig::default();
        raw.storage.kind = Some("postgres".to_string());
        let err = build(raw).unwrap_err();
        assert!(matches!(err, ConfigError::Conversion { .. }));
    }

    #[test]
    fn unknown_queue_kind_is_rejected() {
        let mut raw = RawConfig::default();
        raw.queue.kind = Some("sqs".to_string());
        assert!(build(raw).is_err());
    }

    #[test]
    fn planes_are_converted_by_name() {
        let mut raw = RawConfig::default();
        raw.planes.insert(
            "aws-prod".to_string(),
            crate::raw::RawPlane { endpoint: Some("https://example".to_string()), kind: "aws".to_string() },
        );
        let config = build(raw).unwrap();
        let plane = config.planes.get("aws-prod").unwrap();
        assert_eq!(plane.kind, "aws");
        assert_eq!(plane.endpoint.as_deref(), Some("https://example"));
    }
}
