use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::DriverError;

/// A single upstream call for a cloud plane, rewritten from the inbound
/// ARM-RPC request per §4.7: same method and body, path rewritten onto the
/// target cloud's endpoint.
#[derive(Debug, Clone)]
pub struct PlaneRequest {
    pub method: reqwest::Method,
    /// Path + query beneath the plane's base URL, e.g.
    /// `/subscriptions/.../resourceGroups/g/providers/.../resource1?api-version=2023-01-01`.
    pub upstream_path: String,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
}

/// Upstream's response, normalized so `ucp-api` can translate it into the
/// ARM-RPC shape without knowing which cloud answered.
#[derive(Debug, Clone)]
pub struct PlaneResponse {
    pub status: u16,
    pub body: Option<serde_json::Value>,
    /// Upstream's `Azure-AsyncOperation` or equivalent long-running-operation
    /// URL, if this call started one. `ucp-api` wraps it in a UCP-owned
    /// operation record so clients poll a uniform surface (§4.7).
    pub async_operation_url: Option<String>,
    pub location_url: Option<String>,
}

/// A cloud plane driver: a reverse proxy that rewrites, signs, and forwards
/// one request to an external ARM-style endpoint (§4.7). Radius-native
/// planes never go through this trait — they resolve directly to a
/// `ucp_domain::Controller` via `ucp-routing`'s `TypeRegistry`.
#[async_trait]
pub trait PlaneDriver: Send + Sync {
    /// The `plane-type` segment this driver answers for, e.g. `aws`, `azure`.
    fn plane_type(&self) -> &'static str;

    async fn dispatch(&self, plane_name: &str, request: PlaneRequest) -> Result<PlaneResponse, DriverError>;

    /// Polls an upstream long-running operation started by a prior
    /// `dispatch`, used while proxying the upstream's own async pattern
    /// through to a UCP operation record.
    async fn poll_operation(&self, plane_name: &str, async_operation_url: &str) -> Result<PlaneResponse, DriverError>;
}
