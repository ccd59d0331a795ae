use std::path::Path;
use std::time::Duration;

use ucp_config::{PlaneConfig, QueueKind, StorageKind};

fn fixture_path() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/ucp.yml")
}

#[test]
fn load_valid_fixture() {
    let config = ucp_config::load(&fixture_path()).expect("should load without error");

    assert_eq!(config.storage, StorageKind::Document { path: "./data/ucp.redb".to_string() });
    assert_eq!(config.queue.kind, QueueKind::Memory);
    assert_eq!(config.queue.lease_duration, Duration::from_secs(45));
    assert_eq!(config.queue.max_attempts, 8);
    assert_eq!(config.worker.concurrency, 16);
    assert_eq!(config.operations.retention, Duration::from_secs(48 * 3600));

    let aws = config.planes.get("aws-prod").expect("aws-prod plane present");
    assert_eq!(
        aws,
        &PlaneConfig {
            kind: "aws".to_string(),
            endpoint: Some("https://resource-explorer-2.us-east-1.amazonaws.com".to_string()),
        }
    );
    assert!(config.planes.get("azure-prod").unwrap().endpoint.is_none());

    let tf = config.recipes_terraform;
    assert_eq!(tf.binary_path.as_deref(), Some("/usr/local/bin/terraform"));
}

#[test]
fn missing_file_returns_io_error() {
    let err = ucp_config::load(Path::new("/nonexistent/ucp.yml")).unwrap_err();
    assert!(matches!(err, ucp_config::ConfigError::Io { .. }));
}

#[test]
fn defaults_fill_in_when_file_has_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.yml");
    std::fs::write(&path, "").unwrap();

    let config = ucp_config::load(&path).expect("an empty file is a valid, all-default config");
    assert_eq!(config.storage, StorageKind::Memory);
    assert_eq!(config.queue.max_attempts, 5);
}

#[test]
fn env_overlay_wins_over_file_value() {
    std::env::set_var("UCP_WORKER_CONCURRENCY", "99");
    let config = ucp_config::load(&fixture_path()).unwrap();
    std::env::remove_var("UCP_WORKER_CONCURRENCY");

    assert_eq!(config.worker.concurrency, 99);
}
