use axum::http::Method;
use ucp_domain::ResourceId;

use crate::error::ApiError;

/// What an inbound request path resolves to, per §4.3/§4.4's routing rules.
pub enum RequestTarget {
    Resource(ResourceId),
    List { scope: String, resource_type: String },
    Action { resource: ResourceId, verb: String },
}

/// Classifies a request path (e.g. `/planes/radius/local/resourceGroups/g/
/// providers/Applications.Core/environments/env1`) against the inbound
/// method. `POST` paths carry a trailing action verb; `GET` paths fall back
/// to a scope+type listing when they don't parse as a full resource ID.
pub fn classify_path(method: &Method, path: &str) -> Result<RequestTarget, ApiError> {
    let trimmed = path.trim_start_matches('/');
    let segs: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();

    if *method == Method::POST {
        if segs.len() < 2 {
            return Err(ApiError::bad_request(format!("missing action verb in '{path}'")));
        }
        let verb = segs[segs.len() - 1].to_string();
        let resource_path = format!("/{}", segs[..segs.len() - 1].join("/"));
        let resource = ResourceId::parse(&resource_path)?;
        return Ok(RequestTarget::Action { resource, verb });
    }

    if *method == Method::GET {
        if let Ok(id) = ResourceId::parse(path) {
            return Ok(RequestTarget::Resource(id));
        }
        return classify_list(&segs, path);
    }

    Ok(RequestTarget::Resource(ResourceId::parse(path)?))
}

fn classify_list(segs: &[&str], path: &str) -> Result<RequestTarget, ApiError> {
    let providers_idx = segs
        .iter()
        .position(|s| s.eq_ignore_ascii_case("providers"))
        .ok_or_else(|| ApiError::bad_request(format!("missing 'providers' segment in '{path}'")))?;
    let namespace = segs
        .get(providers_idx + 1)
        .ok_or_else(|| ApiError::bad_request(format!("missing resource namespace in '{path}'")))?;
    let remainder = &segs[providers_idx + 2..];
    if remainder.len() != 1 {
        return Err(ApiError::bad_request(format!(
            "'{path}' is neither a resource id nor a type listing"
        )));
    }
    let resource_type = format!("{namespace}/{}", remainder[0]);
    let scope = format!("/{}", segs[..providers_idx].join("/"));
    Ok(RequestTarget::List { scope, resource_type })
}

/// Canonical key for the per-resource advisory lock (§4.4/§5): the
/// case-insensitive resource id string, matching the key the worker locks
/// under in `ucp-worker::AsyncWorker::process`.
pub fn lock_key(id: &ResourceId) -> String {
    id.to_string().to_ascii_lowercase()
}
