use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use ucp_domain::{
    CredentialKind, CredentialRecord, ErrorDetail, OperationKind, OperationRecord,
    OperationStatus, ProvisioningState, QueueMessage, ResourceId, ResourceRecord, SystemData,
    UpstreamOperation,
};
use ucp_driver::{PlaneRequest, PlaneResponse};
use ucp_store::{check_precondition, EtagPrecondition, Queue, Storage};
use uuid::Uuid;

use crate::error::ApiError;
use crate::path::{classify_path, lock_key, RequestTarget};
use crate::state::AppState;

// ── Health / status ───────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.storage.query("/", "", None, 1).await?;
    Ok(StatusCode::OK)
}

pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let dead_letters = state.queue.dead_letters(100).await?;
    Ok(Json(json!({
        "registeredTypes": state.types.registered_types(),
        "registeredPlanes": state.planes.registered_plane_types(),
        "deadLetterCount": dead_letters.len(),
    })))
}

// ── Resource CRUD ─────────────────────────────────────────────────────────────

/// Wire shape of a PUT/PATCH body. Every field is `Option` so PATCH can tell
/// "client omitted this" apart from "client set this to empty" (§4.4's
/// shallow-on-top-level-fields, deep-on-`properties` merge rule).
#[derive(Debug, Deserialize, Default)]
pub struct ResourceBody {
    pub location: Option<String>,
    pub tags: Option<HashMap<String, String>>,
    pub properties: Option<Value>,
}

pub async fn get_or_list(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    match classify_path(&Method::GET, &format!("/{path}"))? {
        RequestTarget::Resource(id) => get_resource(state, id).await,
        RequestTarget::List { scope, resource_type } => {
            list_resources(state, &scope, &resource_type, &query).await
        }
        RequestTarget::Action { .. } => unreachable!("GET never classifies as an action"),
    }
}

async fn get_resource(state: AppState, id: ResourceId) -> Result<Response, ApiError> {
    if id.plane_type() != "radius" {
        return proxy_resource(&state, id, Method::GET, HeaderMap::new(), None).await;
    }
    state.types.get(&id.resource_type())?;
    let record = state
        .storage
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("resource '{id}' not found")))?;
    Ok(with_etag(Json(json!(record)).into_response(), &record.etag))
}

async fn list_resources(
    state: AppState,
    scope: &str,
    resource_type: &str,
    query: &HashMap<String, String>,
) -> Result<Response, ApiError> {
    state.types.get(resource_type)?;
    let continuation = query.get("continuationToken").map(|s| s.as_str());
    let page_size = query.get("top").and_then(|s| s.parse().ok()).unwrap_or(100);
    let page = state.storage.query(scope, resource_type, continuation, page_size).await?;
    Ok(Json(json!({ "value": page.items, "nextLink": page.continuation })).into_response())
}

pub async fn put_resource(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    require_api_version(&query)?;
    let id = ResourceId::parse(&format!("/{path}"))?;
    if id.plane_type() != "radius" {
        let body_json = parse_json_body(&body)?;
        return proxy_resource(&state, id, Method::PUT, headers, Some(body_json)).await;
    }
    let body: ResourceBody = parse_json_body_as(&body)?;
    upsert(&state, id, body, &headers, false).await
}

pub async fn patch_resource(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    require_api_version(&query)?;
    let id = ResourceId::parse(&format!("/{path}"))?;
    if id.plane_type() != "radius" {
        let body_json = parse_json_body(&body)?;
        return proxy_resource(&state, id, Method::PATCH, headers, Some(body_json)).await;
    }
    let body: ResourceBody = parse_json_body_as(&body)?;
    upsert(&state, id, body, &headers, true).await
}

async fn upsert(
    state: &AppState,
    id: ResourceId,
    body: ResourceBody,
    headers: &HeaderMap,
    is_patch: bool,
) -> Result<Response, ApiError> {
    let decl = state.types.get(&id.resource_type())?;
    // §4.4/§5: a short-lived advisory lock serializes writers to the same
    // resource for the duration of this handler; the worker takes the same
    // lock (keyed identically) while a controller is running.
    let _guard = state.locks.lock(&lock_key(&id)).await;

    let precondition = EtagPrecondition::from_headers(
        header_str(headers, header::IF_MATCH.as_str()),
        header_str(headers, "If-None-Match"),
    );
    let existing = state.storage.get(&id).await?;
    let is_create = existing.is_none();
    if is_patch && existing.is_none() {
        return Err(ApiError::not_found(format!("resource '{id}' not found")));
    }
    check_precondition(&precondition, existing.as_ref().map(|r| r.etag.as_str()))?;

    let now = chrono::Utc::now();
    let mut record = match &existing {
        Some(current) if is_patch => {
            let mut merged = current.clone();
            if let Some(location) = body.location {
                merged.location = location;
            }
            if let Some(tags) = body.tags {
                merged.tags = tags;
            }
            if let Some(properties) = body.properties {
                deep_merge(&mut merged.properties, &properties);
            }
            merged
        }
        Some(current) => ResourceRecord { system_data: current.system_data.clone(), ..new_resource_record(&id, &body, now) },
        None => new_resource_record(&id, &body, now),
    };

    let op_kind = if is_create { OperationKind::Create } else { OperationKind::Update };
    record.provisioning_state = ProvisioningState::Accepted;
    record.system_data.modified_at = now;

    let operation = OperationRecord::new(id.clone(), op_kind, now);
    record.pending_operation_id = Some(operation.id);
    record.etag = record.compute_etag();

    let save_precondition = match &existing {
        None => EtagPrecondition::NotExists,
        Some(current) => EtagPrecondition::Match(current.etag.clone()),
    };
    let new_etag = state.storage.save(&record, save_precondition).await?;
    state.storage.save_operation(&operation).await?;
    state
        .queue
        .enqueue(QueueMessage {
            operation_id: operation.id,
            resource_id: id,
            kind: op_kind,
            attempt: 0,
            enqueued_at: now,
            visible_at: now,
        })
        .await?;

    let status = if is_create {
        StatusCode::CREATED
    } else if decl.controller.is_async() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    let mut resp = Json(json!(record)).into_response();
    *resp.status_mut() = status;
    resp = with_etag(resp, &new_etag);
    if decl.controller.is_async() {
        insert_async_headers(&mut resp, operation.id);
    }
    Ok(resp)
}

pub async fn delete_resource(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let id = ResourceId::parse(&format!("/{path}"))?;
    if id.plane_type() != "radius" {
        return proxy_resource(&state, id, Method::DELETE, HeaderMap::new(), None).await;
    }
    state.types.get(&id.resource_type())?;
    let _guard = state.locks.lock(&lock_key(&id)).await;

    let existing = match state.storage.get(&id).await? {
        Some(r) => r,
        None => return Ok(StatusCode::NO_CONTENT.into_response()),
    };

    if !existing.provisioning_state.is_terminal() {
        // A mutation is already in flight. Per §4.5, a DELETE against a
        // resource with a running operation cancels that operation
        // cooperatively rather than racing a second one onto it.
        if let Some(op_id) = existing.pending_operation_id {
            state.cancellations.cancel(op_id);
            let mut resp = StatusCode::ACCEPTED.into_response();
            insert_async_headers(&mut resp, op_id);
            return Ok(resp);
        }
    }

    let now = chrono::Utc::now();
    let mut record = existing.clone();
    record.provisioning_state = ProvisioningState::Deleting;
    let operation = OperationRecord::new(id.clone(), OperationKind::Delete, now);
    record.pending_operation_id = Some(operation.id);
    record.system_data.modified_at = now;
    record.etag = record.compute_etag();

    state.storage.save(&record, EtagPrecondition::Match(existing.etag.clone())).await?;
    state.storage.save_operation(&operation).await?;
    state
        .queue
        .enqueue(QueueMessage {
            operation_id: operation.id,
            resource_id: id,
            kind: OperationKind::Delete,
            attempt: 0,
            enqueued_at: now,
            visible_at: now,
        })
        .await?;

    let mut resp = StatusCode::ACCEPTED.into_response();
    insert_async_headers(&mut resp, operation.id);
    Ok(resp)
}

pub async fn post_action(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    require_api_version(&query)?;
    let target = classify_path(&Method::POST, &format!("/{path}"))?;
    let RequestTarget::Action { resource, verb } = target else {
        unreachable!("POST always classifies as an action")
    };
    state.types.get(&resource.resource_type())?;
    state
        .storage
        .get(&resource)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("resource '{resource}' not found")))?;

    // Neither built-in reference controller declares an action verb; the
    // dispatch seam exists so a future controller can opt in without a
    // frontend change, but every verb is presently unsupported.
    Err(ApiError::action_not_supported(format!(
        "action '{verb}' is not supported on '{}'",
        resource.resource_type()
    )))
}

// ── Operation status / result (§4.6) ──────────────────────────────────────────

pub async fn get_operation_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let operation = reconcile_upstream_if_needed(&state, id).await?;
    let body = json!({
        "status": operation.status,
        "startTime": operation.start_time,
        "endTime": operation.end_time,
        "percentComplete": operation.percent_complete,
        "error": operation.error,
    });
    let mut resp = Json(body).into_response();
    if !operation.status.is_terminal() {
        insert_retry_after(&mut resp, state.default_poll_interval_secs);
    }
    Ok(resp)
}

pub async fn get_operation_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let operation = reconcile_upstream_if_needed(&state, id).await?;
    if !operation.status.is_terminal() {
        let mut resp = Json(Value::Null).into_response();
        insert_retry_after(&mut resp, state.default_poll_interval_secs);
        return Ok(resp);
    }
    let body = match operation.kind {
        OperationKind::Delete => json!({}),
        OperationKind::Create | OperationKind::Update => {
            match state.storage.get(&operation.target_resource_id).await? {
                Some(record) => json!(record),
                None => Value::Null,
            }
        }
    };
    Ok(Json(body).into_response())
}

/// For a cloud-plane-proxied operation still running, polls the upstream and
/// persists the result before answering — clients only ever poll UCP's own
/// operation surface, never the plane's native one (§4.7).
async fn reconcile_upstream_if_needed(state: &AppState, id: Uuid) -> Result<OperationRecord, ApiError> {
    let mut operation = state
        .storage
        .get_operation(id)
        .await?
        .ok_or_else(|| ApiError::operation_not_found(format!("operation '{id}' not found")))?;

    let Some(upstream) = operation.upstream.clone() else {
        return Ok(operation);
    };
    if operation.status.is_terminal() {
        return Ok(operation);
    }

    let driver = state.planes.for_plane_type(operation.target_resource_id.plane_type())?;
    let polled = driver
        .poll_operation(&upstream.plane_name, &upstream.async_operation_url)
        .await?;
    apply_upstream_poll(&mut operation, &polled);
    state.storage.save_operation(&operation).await?;
    Ok(operation)
}

fn apply_upstream_poll(operation: &mut OperationRecord, polled: &PlaneResponse) {
    let now = chrono::Utc::now();
    match polled.status {
        200..=299 if polled.async_operation_url.is_none() => {
            operation.mark_terminal(OperationStatus::Succeeded, now, None);
        }
        400..=599 => {
            let detail = ErrorDetail::new(
                "UpstreamError",
                polled.body.as_ref().map(|b| b.to_string()).unwrap_or_else(|| format!("upstream returned {}", polled.status)),
            );
            operation.mark_terminal(OperationStatus::Failed, now, Some(detail));
        }
        _ => operation.status = OperationStatus::Running,
    }
}

// ── Credentials (§4.9) ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PutCredentialBody {
    pub cloud: String,
    pub kind: CredentialKind,
    /// Base64-encoded opaque credential bytes; never logged.
    pub data: String,
}

pub async fn put_credential(
    State(state): State<AppState>,
    Path(plane_name): Path<String>,
    Json(body): Json<PutCredentialBody>,
) -> Result<StatusCode, ApiError> {
    let data = base64::engine::general_purpose::STANDARD
        .decode(body.data)
        .map_err(|e| ApiError::bad_request(format!("credential data is not valid base64: {e}")))?;
    let record = CredentialRecord { plane_name, cloud: body.cloud, kind: body.kind, data };
    state.credentials.put(&record).await?;
    Ok(StatusCode::OK)
}

pub async fn get_credential(
    State(state): State<AppState>,
    Path(plane_name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .credentials
        .get_for_plane(&plane_name)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no credentials configured for plane '{plane_name}'")))?;
    Ok(Json(json!(record.redacted())))
}

// ── Cloud plane proxy (§4.7) ───────────────────────────────────────────────────

async fn proxy_resource(
    state: &AppState,
    id: ResourceId,
    method: Method,
    headers: HeaderMap,
    body: Option<Value>,
) -> Result<Response, ApiError> {
    let driver = state.planes.for_plane_type(id.plane_type())?;
    let upstream_path = upstream_path(&id);
    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|_| ApiError::bad_request(format!("unsupported method '{method}'")))?;
    let forwarded_headers = headers
        .iter()
        .filter(|(name, _)| *name != header::AUTHORIZATION && *name != header::HOST)
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
        .collect();

    let plane_response = driver
        .dispatch(id.plane_name(), PlaneRequest { method: reqwest_method, upstream_path, headers: forwarded_headers, body })
        .await?;

    if let Some(async_operation_url) = plane_response.async_operation_url.clone() {
        let now = chrono::Utc::now();
        let kind = match method {
            Method::DELETE => OperationKind::Delete,
            Method::PATCH => OperationKind::Update,
            _ => OperationKind::Create,
        };
        let mut operation = OperationRecord::new(id, kind, now);
        operation.status = OperationStatus::Running;
        operation.upstream = Some(UpstreamOperation {
            plane_name: plane_response.location_url.clone().unwrap_or_default(),
            async_operation_url,
        });
        state.storage.save_operation(&operation).await?;
        let mut resp = StatusCode::ACCEPTED.into_response();
        insert_async_headers(&mut resp, operation.id);
        return Ok(resp);
    }

    let status = StatusCode::from_u16(plane_response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut resp = Json(plane_response.body.unwrap_or(Value::Null)).into_response();
    *resp.status_mut() = status;
    Ok(resp)
}

/// The path beneath a cloud plane's own API root: everything after the
/// `/planes/{type}/{name}` prefix UCP uses to namespace the plane locally.
/// A deliberate simplification of real ARM path rewriting (no subscription
/// remapping, no API-version translation) — see DESIGN.md.
fn upstream_path(id: &ResourceId) -> String {
    let mut path = String::new();
    for scope in id.scopes() {
        path.push_str(&format!("/{}/{}", scope.scope_type, scope.name));
    }
    path.push_str(&format!("/providers/{}", id.namespace()));
    for t in id.types() {
        path.push_str(&format!("/{}/{}", t.type_name, t.name));
    }
    path
}

// ── Shared helpers ─────────────────────────────────────────────────────────────

fn require_api_version(query: &HashMap<String, String>) -> Result<(), ApiError> {
    match query.get("api-version") {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(ApiError::unsupported_api_version("'api-version' query parameter is required")),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn with_etag(mut resp: Response, etag: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(etag) {
        resp.headers_mut().insert(header::ETAG, value);
    }
    resp
}

fn insert_async_headers(resp: &mut Response, operation_id: Uuid) {
    if let Ok(value) = HeaderValue::from_str(&format!("/operationStatuses/{operation_id}")) {
        resp.headers_mut().insert("Azure-AsyncOperation", value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("/operationResults/{operation_id}")) {
        resp.headers_mut().insert(header::LOCATION, value);
    }
}

fn insert_retry_after(resp: &mut Response, seconds: u64) {
    if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
        resp.headers_mut().insert(header::RETRY_AFTER, value);
    }
}

fn parse_json_body(bytes: &Bytes) -> Result<Value, ApiError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))
}

fn parse_json_body_as<T: for<'de> Deserialize<'de> + Default>(bytes: &Bytes) -> Result<T, ApiError> {
    if bytes.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(bytes).map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))
}

fn new_resource_record(id: &ResourceId, body: &ResourceBody, now: chrono::DateTime<chrono::Utc>) -> ResourceRecord {
    let mut system_data = SystemData::new_now();
    system_data.created_at = now;
    system_data.modified_at = now;
    ResourceRecord {
        id: id.clone(),
        resource_type: id.resource_type(),
        location: body.location.clone().unwrap_or_default(),
        tags: body.tags.clone().unwrap_or_default(),
        system_data,
        properties: body.properties.clone().unwrap_or_else(|| json!({})),
        provisioning_state: ProvisioningState::Accepted,
        etag: String::new(),
        pending_operation_id: None,
    }
}

/// Recursively merges `patch` into `base`: objects merge key-by-key, every
/// other value (including arrays) is replaced wholesale. Backs PATCH's deep
/// merge on `properties` (§4.4).
fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                deep_merge(base_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (base_slot, patch_value) => *base_slot = patch_value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_overlays_nested_objects() {
        let mut base = json!({"a": {"b": 1, "c": 2}, "d": 3});
        let patch = json!({"a": {"b": 10}});
        deep_merge(&mut base, &patch);
        assert_eq!(base, json!({"a": {"b": 10, "c": 2}, "d": 3}));
    }

    #[test]
    fn deep_merge_replaces_non_object_values() {
        let mut base = json!({"a": [1, 2, 3]});
        let patch = json!({"a": [4]});
        deep_merge(&mut base, &patch);
        assert_eq!(base, json!({"a": [4]}));
    }

    #[test]
    fn require_api_version_rejects_missing() {
        assert!(require_api_version(&HashMap::new()).is_err());
    }

    #[test]
    fn require_api_version_accepts_present() {
        let mut query = HashMap::new();
        query.insert("api-version".to_string(), "2024-01-01".to_string());
        assert!(require_api_version(&query).is_ok());
    }
}
