use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw YAML representation of the UCP config file (§6 Configuration).
/// Every field is optional — defaults are filled in by [`crate::loader`]
/// before an environment-variable overlay is applied.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawConfig {
    #[serde(default)]
    pub storage: RawStorage,
    #[serde(default)]
    pub queue: RawQueue,
    #[serde(default)]
    pub worker: RawWorker,
    #[serde(default)]
    pub operations: RawOperations,
    #[serde(default)]
    pub planes: HashMap<String, RawPlane>,
    #[serde(default)]
    pub recipes: RawRecipes,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawStorage {
    /// `memory`, `postgres`, or `document` (the embedded redb backend).
    pub kind: Option<String>,
    pub postgres: Option<RawPostgres>,
    pub document: Option<RawDocument>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawPostgres {
    pub url: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawDocument {
    pub path: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawQueue {
    /// `memory`, `postgres`, or `cloud`.
    pub kind: Option<String>,
    #[serde(rename = "leaseDuration")]
    pub lease_duration: Option<String>,
    #[serde(rename = "maxAttempts")]
    pub max_attempts: Option<u32>,
    #[serde(rename = "baseBackoff")]
    pub base_backoff: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawWorker {
    pub concurrency: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawOperations {
    pub retention: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawPlane {
    pub endpoint: Option<String>,
    pub kind: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RawRecipes {
    pub terraform: Option<RawTerraformRecipes>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawTerraformRecipes {
    pub mirror: Option<String>,
    #[serde(rename = "binaryPath")]
    pub binary_path: Option<String>,
}
