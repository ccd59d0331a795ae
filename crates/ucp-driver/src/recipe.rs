use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use ucp_domain::{RecipeFingerprint, ResourceId, SecretRecord};
use ucp_store::{SecretStore, Storage};

use crate::error::DriverError;

/// Which IaC backend a recipe template targets (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Terraform,
    Bicep,
}

/// One Recipe Engine invocation: `Execute(fingerprint, driver, spec)` from
/// §4.8. `output_schema` names which declared outputs are secret — the rest
/// are returned as plain "values".
#[derive(Debug, Clone)]
pub struct RecipeSpec {
    pub template_kind: TemplateKind,
    pub template_path: String,
    pub parameters: serde_json::Value,
    pub environment_id: ResourceId,
    pub declared_outputs: Vec<String>,
    pub secret_outputs: Vec<String>,
}

impl RecipeSpec {
    pub fn fingerprint(&self) -> RecipeFingerprint {
        let kind = match self.template_kind {
            TemplateKind::Terraform => "terraform",
            TemplateKind::Bicep => "bicep",
        };
        RecipeFingerprint::compute(kind, &self.template_path, &self.parameters, &self.environment_id)
    }
}

/// Outputs of a completed recipe execution: plain values, references to
/// secrets written to the Secret Store (never inlined, per §4.8), and the
/// resources the driver reports it created.
#[derive(Debug, Clone)]
pub struct RecipeOutputs {
    pub values: HashMap<String, String>,
    pub secret_refs: HashMap<String, String>,
    pub resources: Vec<String>,
}

/// Classification of a driver failure, feeding the worker's Retry/Fatal
/// decision via §4.5 step 4/6: `Transient` surfaces as `Retry`, the other
/// two as `Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeFailureKind {
    Transient,
    Permanent,
    BadInput,
}

/// One IaC backend, producing raw string-keyed outputs from a materialized
/// template. Does not know about secret classification or single-flight —
/// that's the [`RecipeEngine`]'s job.
#[async_trait]
pub trait RecipeDriver: Send + Sync {
    async fn execute(&self, spec: &RecipeSpec, workdir: &Path) -> Result<HashMap<String, String>, DriverError>;

    /// Classifies a failure from `execute` so the engine can decide
    /// Retry-vs-Fatal without re-parsing driver-specific error text.
    fn classify_failure(&self, error: &DriverError) -> RecipeFailureKind;
}

/// Executes Terraform-backed recipes: materializes a working directory,
/// writes `main.tf.json`/`terraform.tfvars.json`, runs `init` -> `plan` ->
/// `apply`, and runs `destroy` on non-zero exit for rollback. Grounded on
/// the teacher's `TerraformBackend` (`run_tf`'s streamed-log subprocess
/// pattern, 1800s timeout, workspace-directory management), generalized
/// from partition provisioning to recipe template execution.
pub struct TerraformRecipeDriver {
    pub binary: String,
    pub workspace_root: PathBuf,
    pub provider_mirror: Option<String>,
}

impl TerraformRecipeDriver {
    pub fn new(binary: impl Into<String>, workspace_root: PathBuf) -> Self {
        Self { binary: binary.into(), workspace_root, provider_mirror: None }
    }

    fn workspace_dir(&self, fingerprint: &RecipeFingerprint) -> PathBuf {
        self.workspace_root.join(fingerprint.as_str())
    }

    fn write_main_tf_json(&self, workspace: &Path, spec: &RecipeSpec) -> Result<(), DriverError> {
        let main = serde_json::json!({
            "module": {
                "recipe": {
                    "source": spec.template_path,
                }
            }
        });
        std::fs::write(workspace.join("main.tf.json"), serde_json::to_vec_pretty(&main).unwrap())
            .map_err(|e| DriverError::Internal(format!("write main.tf.json: {e}")))?;
        Ok(())
    }

    fn write_tfvars_json(&self, workspace: &Path, spec: &RecipeSpec) -> Result<(), DriverError> {
        std::fs::write(
            workspace.join("terraform.tfvars.json"),
            serde_json::to_vec_pretty(&spec.parameters).unwrap(),
        )
        .map_err(|e| DriverError::Internal(format!("write terraform.tfvars.json: {e}")))?;
        Ok(())
    }

    fn write_cli_config(&self, workspace: &Path) -> Result<(), DriverError> {
        let Some(mirror) = &self.provider_mirror else { return Ok(()) };
        let content = format!(
            "provider_installation {{\n  network_mirror {{\n    url = \"{mirror}\"\n  }}\n}}\n"
        );
        std::fs::write(workspace.join(".terraformrc"), content)
            .map_err(|e| DriverError::Internal(format!("write .terraformrc: {e}")))?;
        Ok(())
    }

    async fn run_tf(&self, workspace: &Path, args: &[&str]) -> Result<(i32, String), DriverError> {
        info!(binary = %self.binary, ?args, workspace = %workspace.display(), "running recipe IaC command");

        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .current_dir(workspace)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0");
        if self.provider_mirror.is_some() {
            cmd.env("TF_CLI_CONFIG_FILE", workspace.join(".terraformrc"));
        }

        let mut child = cmd.spawn().map_err(|e| DriverError::Internal(format!("spawn {}: {e}", self.binary)))?;
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let mut log = String::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

        let tx1 = tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx1.send(line);
            }
        });
        let tx2 = tx.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx2.send(line);
            }
        });
        drop(tx);

        const TIMEOUT_SECS: u64 = 1800;
        let collect = async {
            while let Some(line) = rx.recv().await {
                debug!(target: "ucp::recipe", "{}", line);
                log.push_str(&line);
                log.push('\n');
            }
        };
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_secs(TIMEOUT_SECS), collect).await.is_err();

        stdout_task.await.ok();
        stderr_task.await.ok();

        if timed_out {
            let _ = child.kill().await;
            return Err(DriverError::RecipeFailed(format!(
                "{} {} timed out after {} minutes",
                self.binary,
                args.first().copied().unwrap_or(""),
                TIMEOUT_SECS / 60,
            )));
        }

        let status = child.wait().await.map_err(|e| DriverError::Internal(format!("wait: {e}")))?;
        let code = status.code().unwrap_or(-1);
        if code != 0 {
            warn!(binary = %self.binary, code, "recipe IaC command exited non-zero");
        }
        Ok((code, log))
    }

    async fn destroy(&self, workspace: &Path) {
        if let Err(e) = self.run_tf(workspace, &["destroy", "-auto-approve", "-no-color"]).await {
            warn!(error = %e, "rollback destroy also failed");
        }
    }
}

#[async_trait]
impl RecipeDriver for TerraformRecipeDriver {
    async fn execute(&self, spec: &RecipeSpec, _workdir: &Path) -> Result<HashMap<String, String>, DriverError> {
        let fingerprint = spec.fingerprint();
        let workspace = self.workspace_dir(&fingerprint);
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| DriverError::Internal(format!("create workspace dir: {e}")))?;

        self.write_main_tf_json(&workspace, spec)?;
        self.write_tfvars_json(&workspace, spec)?;
        self.write_cli_config(&workspace)?;

        let (init_exit, init_log) = self.run_tf(&workspace, &["init", "-no-color"]).await?;
        if init_exit != 0 {
            return Err(DriverError::RecipeFailed(format!("terraform init exited {init_exit}: {init_log}")));
        }

        let (plan_exit, plan_log) =
            self.run_tf(&workspace, &["plan", "-out=tfplan", "-no-color"]).await?;
        if plan_exit != 0 {
            return Err(DriverError::RecipeFailed(format!("terraform plan exited {plan_exit}: {plan_log}")));
        }

        let (apply_exit, apply_log) =
            self.run_tf(&workspace, &["apply", "-auto-approve", "-no-color", "tfplan"]).await?;
        if apply_exit != 0 {
            self.destroy(&workspace).await;
            return Err(DriverError::RecipeFailed(format!(
                "terraform apply exited {apply_exit}, rolled back: {apply_log}"
            )));
        }

        let (output_exit, output_json) =
            self.run_tf(&workspace, &["output", "-json", "-no-color"]).await?;
        if output_exit != 0 {
            self.destroy(&workspace).await;
            return Err(DriverError::RecipeFailed(format!("terraform output exited {output_exit}")));
        }

        let parsed: serde_json::Value = serde_json::from_str(output_json.trim())
            .map_err(|e| DriverError::RecipeFailed(format!("parse terraform output: {e}")))?;

        let mut outputs = HashMap::new();
        for key in spec.declared_outputs.iter().chain(spec.secret_outputs.iter()) {
            if let Some(val) = parsed.get(key).and_then(|v| v.get("value")) {
                let text = match val {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                outputs.insert(key.clone(), text);
            }
        }
        Ok(outputs)
    }

    fn classify_failure(&self, error: &DriverError) -> RecipeFailureKind {
        match error {
            DriverError::RecipeFailed(msg) if msg.contains("timed out") => RecipeFailureKind::Transient,
            DriverError::RecipeFailed(_) => RecipeFailureKind::Permanent,
            DriverError::BadTemplate(_) => RecipeFailureKind::BadInput,
            _ => RecipeFailureKind::Transient,
        }
    }
}

/// Executes Bicep-backed recipes by submitting the template to the
/// deployment engine's HTTP API and polling until it reaches a terminal
/// state, in the same request/poll shape the Azure plane driver's
/// `wait_for_operation` uses for ARM long-running operations.
pub struct BicepRecipeDriver {
    pub deployment_engine_url: String,
    pub http: reqwest::Client,
}

#[async_trait]
impl RecipeDriver for BicepRecipeDriver {
    async fn execute(&self, spec: &RecipeSpec, _workdir: &Path) -> Result<HashMap<String, String>, DriverError> {
        let submit = self
            .http
            .put(format!("{}/deployments/{}", self.deployment_engine_url, spec.fingerprint()))
            .json(&serde_json::json!({
                "template": spec.template_path,
                "parameters": spec.parameters,
            }))
            .send()
            .await?;
        if !submit.status().is_success() {
            return Err(DriverError::from_upstream_status(submit.status(), submit.text().await.unwrap_or_default()));
        }

        for _ in 0..60 {
            let poll = self
                .http
                .get(format!("{}/deployments/{}", self.deployment_engine_url, spec.fingerprint()))
                .send()
                .await?;
            let body: serde_json::Value = poll.json().await?;
            match body.get("status").and_then(|s| s.as_str()) {
                Some("Succeeded") => {
                    let mut outputs = HashMap::new();
                    if let Some(obj) = body.get("outputs").and_then(|o| o.as_object()) {
                        for key in spec.declared_outputs.iter().chain(spec.secret_outputs.iter()) {
                            if let Some(v) = obj.get(key).and_then(|v| v.get("value")) {
                                let text = match v {
                                    serde_json::Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                };
                                outputs.insert(key.clone(), text);
                            }
                        }
                    }
                    return Ok(outputs);
                }
                Some("Failed") => {
                    let message = body.get("error").and_then(|e| e.as_str()).unwrap_or("deployment failed");
                    return Err(DriverError::RecipeFailed(message.to_string()));
                }
                _ => tokio::time::sleep(std::time::Duration::from_secs(2)).await,
            }
        }
        Err(DriverError::RecipeFailed("bicep deployment did not complete within poll budget".to_string()))
    }

    fn classify_failure(&self, error: &DriverError) -> RecipeFailureKind {
        match error {
            DriverError::UpstreamError { status: 400..=499, .. } => RecipeFailureKind::BadInput,
            DriverError::RecipeFailed(_) => RecipeFailureKind::Permanent,
            _ => RecipeFailureKind::Transient,
        }
    }
}

/// Orchestrates §4.8's `Execute(fingerprint, driver, spec)`, collapsing
/// concurrent requests for the same fingerprint into one driver run: a
/// fingerprint-keyed in-process `tokio::sync::Mutex` serializes callers
/// within this process, and `Storage::acquire_fingerprint_lease` makes the
/// same guarantee across processes. Output values get classified per
/// `spec.secret_outputs` and secrets land in the Secret Store, never inlined.
pub struct RecipeEngine {
    drivers: HashMap<TemplateKind, Arc<dyn RecipeDriver>>,
    storage: Arc<dyn Storage>,
    secrets: Arc<dyn SecretStore>,
    locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<Option<RecipeOutputs>>>>>,
    holder_id: String,
    lease_ttl: Duration,
}

impl RecipeEngine {
    pub fn new(storage: Arc<dyn Storage>, secrets: Arc<dyn SecretStore>, holder_id: String) -> Self {
        Self {
            drivers: HashMap::new(),
            storage,
            secrets,
            locks: AsyncMutex::new(HashMap::new()),
            holder_id,
            lease_ttl: Duration::minutes(30),
        }
    }

    pub fn register(&mut self, kind: TemplateKind, driver: Arc<dyn RecipeDriver>) -> &mut Self {
        self.drivers.insert(kind, driver);
        self
    }

    /// Lets a recipe-backed controller turn a failed [`RecipeEngine::execute`]
    /// into a Retry-vs-Fatal decision without parsing driver-specific error
    /// text itself, per §4.5 step 4/6.
    pub fn classify_failure(&self, kind: TemplateKind, error: &DriverError) -> RecipeFailureKind {
        match self.drivers.get(&kind) {
            Some(driver) => driver.classify_failure(error),
            None => RecipeFailureKind::Transient,
        }
    }

    async fn fingerprint_slot(&self, fingerprint: &str) -> Arc<AsyncMutex<Option<RecipeOutputs>>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    pub async fn execute(&self, spec: &RecipeSpec, scope: &ResourceId) -> Result<RecipeOutputs, DriverError> {
        let fingerprint = spec.fingerprint();
        let slot = self.fingerprint_slot(fingerprint.as_str()).await;
        let mut cached = slot.lock().await;
        if let Some(outputs) = cached.as_ref() {
            return Ok(outputs.clone());
        }

        self.storage
            .acquire_fingerprint_lease(fingerprint.as_str(), &self.holder_id, self.lease_ttl)
            .await?;

        let result = self.run_and_classify(spec, scope, &fingerprint).await;

        self.storage.release_fingerprint_lease(fingerprint.as_str(), &self.holder_id).await?;

        let outputs = result?;
        *cached = Some(outputs.clone());
        Ok(outputs)
    }

    async fn run_and_classify(
        &self,
        spec: &RecipeSpec,
        scope: &ResourceId,
        fingerprint: &RecipeFingerprint,
    ) -> Result<RecipeOutputs, DriverError> {
        let driver = self
            .drivers
            .get(&spec.template_kind)
            .ok_or_else(|| DriverError::Internal(format!("no recipe driver registered for {:?}", spec.template_kind)))?;

        let raw = driver.execute(spec, Path::new(".")).await?;

        let mut values = HashMap::new();
        let mut secret_refs = HashMap::new();
        for (key, value) in raw {
            if spec.secret_outputs.contains(&key) {
                let record = SecretRecord {
                    scope_id: scope.clone(),
                    name: format!("recipe/{fingerprint}/{key}"),
                    data: value.into_bytes(),
                    etag: String::new(),
                };
                let etag = self.secrets.put(&record).await?;
                secret_refs.insert(key, format!("{}#{}", record.name, etag));
            } else {
                values.insert(key, value);
            }
        }

        Ok(RecipeOutputs { values, secret_refs, resources: Vec::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyOnceDriver {
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl RecipeDriver for FlakyOnceDriver {
        async fn execute(&self, _spec: &RecipeSpec, _workdir: &Path) -> Result<HashMap<String, String>, DriverError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut out = HashMap::new();
            out.insert("url".to_string(), "https://example".to_string());
            out.insert("password".to_string(), "s3cr3t".to_string());
            Ok(out)
        }
        fn classify_failure(&self, _error: &DriverError) -> RecipeFailureKind {
            RecipeFailureKind::Transient
        }
    }

    fn env_id() -> ResourceId {
        ResourceId::parse(
            "/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/environments/env1",
        )
        .unwrap()
    }

    fn spec() -> RecipeSpec {
        RecipeSpec {
            template_kind: TemplateKind::Terraform,
            template_path: "registry.example/recipes/redis:1.0.0".to_string(),
            parameters: serde_json::json!({"size": "small"}),
            environment_id: env_id(),
            declared_outputs: vec!["url".to_string()],
            secret_outputs: vec!["password".to_string()],
        }
    }

    #[tokio::test]
    async fn classifies_outputs_into_values_and_secrets() {
        let storage = Arc::new(ucp_store::InMemoryStore::default());
        let secrets: Arc<dyn SecretStore> = storage.clone();
        let mut engine = RecipeEngine::new(storage, secrets, "worker-1".to_string());
        engine.register(
            TemplateKind::Terraform,
            Arc::new(FlakyOnceDriver { calls: std::sync::atomic::AtomicU32::new(0) }),
        );

        let outputs = engine.execute(&spec(), &env_id()).await.unwrap();
        assert_eq!(outputs.values.get("url").unwrap(), "https://example");
        assert!(!outputs.secret_refs.is_empty());
        assert!(!outputs.values.contains_key("password"));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_driver_run() {
        let storage = Arc::new(ucp_store::InMemoryStore::default());
        let secrets: Arc<dyn SecretStore> = storage.clone();
        let driver = Arc::new(FlakyOnceDriver { calls: std::sync::atomic::AtomicU32::new(0) });
        let mut engine = RecipeEngine::new(storage, secrets, "worker-1".to_string());
        engine.register(TemplateKind::Terraform, driver.clone());
        let engine = Arc::new(engine);

        let (a, b) = tokio::join!(engine.execute(&spec(), &env_id()), engine.execute(&spec(), &env_id()));
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(driver.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
