use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use uuid::Uuid;

use ucp_config::{Config, StorageKind};
use ucp_driver::{
    AwsPlaneDriver, AzurePlaneDriver, EnvironmentsController, ExtendersController, PlaneRegistry,
    RecipeEngine, TemplateKind, TerraformRecipeDriver,
};
use ucp_routing::TypeRegistry;
use ucp_store::{CredentialStore, InMemoryStore, PostgresStore, Queue, RedbStore, ResourceLockTable, SecretStore, Storage};
use ucp_worker::{AsyncWorker, CancellationRegistry, WorkerSettings};

use crate::output;

type Backend = (Arc<dyn Storage>, Arc<dyn Queue>, Arc<dyn SecretStore>, Arc<dyn CredentialStore>);

// ── Serve ─────────────────────────────────────────────────────────────────────

pub async fn serve(config_path: Option<PathBuf>, bind: String, port: u16, rotate_token: bool) -> Result<()> {
    let config = match &config_path {
        Some(path) => {
            ucp_config::load(path).with_context(|| format!("failed to load config from {}", path.display()))?
        }
        None => ucp_config::load_defaults().context("failed to build default config")?,
    };

    let token_path = default_token_path();
    let token = resolve_or_create_token(&token_path, rotate_token)?;

    let (storage, queue, secrets, credentials) = build_backend(&config).await?;

    let mut planes = PlaneRegistry::new();
    register_planes(&mut planes, &config, credentials.clone());
    let planes = Arc::new(planes);

    let holder_id = format!("ucp-worker-{}", Uuid::new_v4());
    let types = Arc::new(build_type_registry(&config, storage.clone(), secrets.clone(), holder_id.clone()));

    let locks = ResourceLockTable::new();
    let cancellations = CancellationRegistry::new();

    let state = ucp_api::AppState {
        storage: storage.clone(),
        queue: queue.clone(),
        secrets: secrets.clone(),
        credentials: credentials.clone(),
        types: types.clone(),
        planes,
        locks: locks.clone(),
        cancellations: cancellations.clone(),
        auth_token: Arc::new(token),
        default_poll_interval_secs: 5,
    };

    let worker_settings = WorkerSettings {
        concurrency: config.worker.concurrency,
        lease_duration: chrono::Duration::from_std(config.queue.lease_duration)
            .unwrap_or_else(|_| chrono::Duration::seconds(30)),
        base_backoff: config.queue.base_backoff,
        poll_interval: std::time::Duration::from_millis(500),
    };

    let worker = Arc::new(AsyncWorker::new(
        storage.clone(),
        queue,
        types,
        locks,
        cancellations,
        holder_id,
        worker_settings,
    ));
    let worker_task = tokio::spawn(async move {
        if let Err(err) = worker.run().await {
            tracing::error!(error = %err, "async worker stopped");
        }
    });

    let retention = chrono::Duration::from_std(config.operations.retention)
        .unwrap_or_else(|_| chrono::Duration::hours(24));
    let sweep_storage = storage;
    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match sweep_storage.purge_expired_operations(chrono::Utc::now(), retention).await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "swept expired operation records"),
                Err(err) => tracing::warn!(error = %err, "retention sweep failed"),
            }
        }
    });

    let addr = format!("{bind}:{port}");
    tracing::info!(%addr, token_path = %token_path.display(), "starting UCP server");
    let app = ucp_api::build_app(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    tokio::select! {
        res = axum::serve(listener, app) => res.context("server error")?,
        _ = worker_task => {}
        _ = sweep_task => {}
    }
    Ok(())
}

async fn build_backend(config: &Config) -> Result<Backend> {
    match &config.storage {
        StorageKind::Memory => {
            let store = Arc::new(InMemoryStore::new());
            Ok((store.clone(), store.clone(), store.clone(), store))
        }
        StorageKind::Document { path } => {
            let store = Arc::new(
                RedbStore::open(Path::new(path))
                    .with_context(|| format!("failed to open document store at {path}"))?,
            );
            Ok((store.clone(), store.clone(), store.clone(), store))
        }
        StorageKind::Postgres { url } => {
            let store = Arc::new(
                PostgresStore::connect(url).await.context("failed to connect to postgres store")?,
            );
            Ok((store.clone(), store.clone(), store.clone(), store))
        }
    }
}

/// One driver instance per plane kind, holding the endpoint overrides of
/// every plane declared with that kind — mirroring how the teacher's
/// `DriverRegistry` keys by cloud target rather than by individual
/// deployment name.
fn register_planes(registry: &mut PlaneRegistry, config: &Config, credentials: Arc<dyn CredentialStore>) {
    let http = reqwest::Client::new();
    let mut aws_endpoints = HashMap::new();
    let mut azure_endpoints = HashMap::new();

    for (name, plane) in &config.planes {
        match plane.kind.as_str() {
            "aws" => {
                if let Some(endpoint) = &plane.endpoint {
                    aws_endpoints.insert(name.clone(), endpoint.clone());
                }
            }
            "azure" => {
                if let Some(endpoint) = &plane.endpoint {
                    azure_endpoints.insert(name.clone(), endpoint.clone());
                }
            }
            other => tracing::warn!(plane = %name, kind = other, "ignoring plane with unknown kind"),
        }
    }

    if config.planes.values().any(|p| p.kind == "aws") {
        registry.register(
            "aws",
            Arc::new(AwsPlaneDriver::new(http.clone(), credentials.clone(), aws_endpoints, "us-east-1".to_string())),
        );
    }
    if config.planes.values().any(|p| p.kind == "azure") {
        registry.register("azure", Arc::new(AzurePlaneDriver::new(http, credentials, azure_endpoints)));
    }
}

/// Registers the reference controllers from `ucp-driver::controllers`
/// (§9's "at least one synchronous and one recipe-backed controller
/// registered at startup"), wiring the recipe-backed one to a Terraform
/// driver rooted under `~/.ucp/recipes`.
fn build_type_registry(
    config: &Config,
    storage: Arc<dyn Storage>,
    secrets: Arc<dyn SecretStore>,
    holder_id: String,
) -> TypeRegistry {
    let mut types = TypeRegistry::new();
    types.register(Arc::new(EnvironmentsController), vec![]);

    let mut recipe_engine = RecipeEngine::new(storage, secrets, holder_id);
    let binary = config.recipes_terraform.binary_path.clone().unwrap_or_else(|| "terraform".to_string());
    let mut terraform_driver = TerraformRecipeDriver::new(binary, recipes_workspace_root());
    terraform_driver.provider_mirror = config.recipes_terraform.mirror.clone();
    recipe_engine.register(TemplateKind::Terraform, Arc::new(terraform_driver));

    types.register(
        Arc::new(ExtendersController::new(Arc::new(recipe_engine), "extenders", vec!["result".to_string()], vec![])),
        vec![],
    );
    types
}

fn recipes_workspace_root() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".ucp").join("recipes")
}

// ── Client commands ───────────────────────────────────────────────────────────

pub async fn status(url: String, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let client = authed_client(&token)?;
    let body: Value = client
        .get(format!("{}/status", url.trim_end_matches('/')))
        .send()
        .await
        .with_context(|| format!("failed to reach server at {url}"))?
        .error_for_status()
        .context("server returned an error")?
        .json()
        .await?;
    output::print_status_summary(&body);
    output::print_json(&body)
}

pub async fn get(url: String, token: Option<String>, resource_id: String) -> Result<()> {
    let token = resolve_token(token)?;
    let client = authed_client(&token)?;
    let resp = client
        .get(format!("{}/{}", url.trim_end_matches('/'), resource_id.trim_start_matches('/')))
        .send()
        .await
        .with_context(|| format!("failed to reach server at {url}"))?;
    print_response_body(resp).await
}

pub async fn put(url: String, token: Option<String>, resource_id: String, json_file: PathBuf, api_version: String) -> Result<()> {
    let token = resolve_token(token)?;
    let client = authed_client(&token)?;
    let body = std::fs::read_to_string(&json_file)
        .with_context(|| format!("failed to read {}", json_file.display()))?;
    let resp = client
        .put(format!("{}/{}", url.trim_end_matches('/'), resource_id.trim_start_matches('/')))
        .query(&[("api-version", api_version.as_str())])
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .with_context(|| format!("failed to reach server at {url}"))?;
    print_response_body(resp).await
}

pub async fn operation(url: String, token: Option<String>, id: Uuid) -> Result<()> {
    let token = resolve_token(token)?;
    let client = authed_client(&token)?;
    let resp = client
        .get(format!("{}/operationStatuses/{}", url.trim_end_matches('/'), id))
        .send()
        .await
        .with_context(|| format!("failed to reach server at {url}"))?;
    print_response_body(resp).await
}

async fn print_response_body(resp: reqwest::Response) -> Result<()> {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    output::print_json(&body)?;
    if !status.is_success() {
        anyhow::bail!("server responded with {status}");
    }
    Ok(())
}

// ── Token helpers ─────────────────────────────────────────────────────────────

fn generate_token() -> String {
    let a = Uuid::new_v4().to_string().replace('-', "");
    let b = Uuid::new_v4().to_string().replace('-', "");
    format!("{a}{b}")
}

fn default_token_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".ucp").join("token")
}

fn write_token(path: &PathBuf, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, token).with_context(|| format!("failed to write token to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

/// Priority: reuse the existing on-disk token unless `rotate` was requested
/// or no token exists yet.
fn resolve_or_create_token(path: &PathBuf, rotate: bool) -> Result<String> {
    if !rotate {
        if let Ok(existing) = std::fs::read_to_string(path).map(|s| s.trim().to_string()) {
            if !existing.is_empty() {
                tracing::info!(path = %path.display(), "reusing existing token");
                return Ok(existing);
            }
        }
    }
    let token = generate_token();
    write_token(path, &token)?;
    tracing::info!(path = %path.display(), "wrote new bearer token");
    Ok(token)
}

/// Priority: explicit value (`--token` / `UCP_TOKEN`) → `~/.ucp/token`.
fn resolve_token(explicit: Option<String>) -> Result<String> {
    if let Some(t) = explicit {
        return Ok(t);
    }
    let path = default_token_path();
    std::fs::read_to_string(&path).map(|s| s.trim().to_string()).with_context(|| {
        format!(
            "no token provided and could not read token file at {}. Use --token, UCP_TOKEN, or run `ucp serve` first.",
            path.display()
        )
    })
}

fn authed_client(token: &str) -> Result<reqwest::Client> {
    let mut headers = reqwest::header::HeaderMap::new();
    let bearer = format!("Bearer {token}");
    headers.insert(
        reqwest::header::AUTHORIZATION,
        reqwest::header::HeaderValue::from_str(&bearer).context("token contains invalid header characters")?,
    );
    reqwest::Client::builder().default_headers(headers).build().context("failed to build HTTP client")
}
