use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::DomainError;

// ── Resource ID ───────────────────────────────────────────────────────────────

/// One `{type}/{name}` path segment below the plane/scope prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSegment {
    pub type_name: String,
    pub name: String,
}

/// One `{scopeType}/{scopeName}` path segment (e.g. `resourceGroups/g1`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSegment {
    pub scope_type: String,
    pub name: String,
}

/// Hierarchical, case-insensitive identifier of the form
/// `/planes/{planeType}/{planeName}[/resourceGroups/{rg}]/providers/{ns}/{type}/{name}[/{childType}/{childName}]*`.
///
/// Equality and hashing are case-insensitive on segment kinds and names, per
/// ARM-RPC convention; the original-case path is retained for display and
/// for constructing child/sibling IDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceId {
    plane_type: String,
    plane_name: String,
    scopes: Vec<ScopeSegment>,
    namespace: String,
    types: Vec<TypeSegment>,
}

impl ResourceId {
    /// Parse a resource ID of the ARM-RPC path shape described in §4.3.
    ///
    /// Tokenizes on `/`, requires an even number of segments after the
    /// `planes/{type}/{name}` prefix and after `providers/{ns}`, and rejects
    /// empty segment names.
    pub fn parse(path: &str) -> Result<Self, DomainError> {
        let trimmed = path.trim().trim_start_matches('/');
        let segs: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();

        let mut i = 0;
        let expect = |segs: &[&str], i: usize, want: &str| -> Result<(), DomainError> {
            match segs.get(i) {
                Some(s) if s.eq_ignore_ascii_case(want) => Ok(()),
                _ => Err(DomainError::InvalidResourceId(format!(
                    "expected '{want}' at position {i} in '{path}'"
                ))),
            }
        };
        let next = |segs: &[&str], i: &mut usize| -> Result<String, DomainError> {
            let s = segs.get(*i).ok_or_else(|| {
                DomainError::InvalidResourceId(format!("unexpected end of path '{path}'"))
            })?;
            if s.is_empty() {
                return Err(DomainError::InvalidResourceId(format!(
                    "empty segment in '{path}'"
                )));
            }
            *i += 1;
            Ok(s.to_string())
        };

        expect(&segs, i, "planes")?;
        i += 1;
        let plane_type = next(&segs, &mut i)?;
        let plane_name = next(&segs, &mut i)?;

        let mut scopes = Vec::new();
        while segs.get(i).map(|s| !s.eq_ignore_ascii_case("providers")).unwrap_or(false) {
            let scope_type = next(&segs, &mut i)?;
            if scope_type.eq_ignore_ascii_case("providers") {
                break;
            }
            let name = next(&segs, &mut i)?;
            scopes.push(ScopeSegment { scope_type, name });
        }

        expect(&segs, i, "providers")?;
        i += 1;
        let namespace = next(&segs, &mut i)?;

        let mut types = Vec::new();
        let remainder = &segs[i..];
        if remainder.is_empty() || remainder.len() % 2 != 0 {
            return Err(DomainError::InvalidResourceId(format!(
                "resource type path must have an even number of segments in '{path}'"
            )));
        }
        let mut j = 0;
        while j < remainder.len() {
            types.push(TypeSegment {
                type_name: remainder[j].to_string(),
                name: remainder[j + 1].to_string(),
            });
            j += 2;
        }

        Ok(ResourceId {
            plane_type,
            plane_name,
            scopes,
            namespace,
            types,
        })
    }

    pub fn plane_type(&self) -> &str {
        &self.plane_type
    }

    pub fn plane_name(&self) -> &str {
        &self.plane_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn scopes(&self) -> &[ScopeSegment] {
        &self.scopes
    }

    pub fn types(&self) -> &[TypeSegment] {
        &self.types
    }

    /// `namespace/type` of the leaf (innermost) segment — the registry key.
    pub fn resource_type(&self) -> String {
        let leaf = &self.types.last().expect("types is non-empty post-parse");
        format!("{}/{}", self.namespace, leaf.type_name)
    }

    /// The leaf resource name.
    pub fn name(&self) -> &str {
        &self.types.last().expect("types is non-empty post-parse").name
    }

    /// The root scope: `planes/{planeType}/{planeName}`, with no resource groups.
    pub fn root_scope(&self) -> String {
        format!("/planes/{}/{}", self.plane_type, self.plane_name)
    }

    /// The scope this resource is listed under: the root scope plus any
    /// scope segments (e.g. `resourceGroups/g`), stopping short of
    /// `providers/...` and the resource's own type path. This is the scope
    /// a LIST request's path resolves to, and what `Storage::query` filters
    /// against — distinct from [`ResourceId::parent`], which is `None` for
    /// every top-level resource regardless of its containing scope.
    pub fn containing_scope(&self) -> String {
        let mut s = self.root_scope();
        for scope in &self.scopes {
            s.push('/');
            s.push_str(&scope.scope_type);
            s.push('/');
            s.push_str(&scope.name);
        }
        s
    }

    /// The parent resource ID, if this is a child resource (more than one type segment).
    pub fn parent(&self) -> Option<ResourceId> {
        if self.types.len() <= 1 {
            return None;
        }
        let mut parent = self.clone();
        parent.types.pop();
        Some(parent)
    }

    /// Canonical lowercase key used for equality, hashing, and storage row keys.
    fn canonical_key(&self) -> String {
        let mut s = format!(
            "/planes/{}/{}",
            self.plane_type.to_ascii_lowercase(),
            self.plane_name.to_ascii_lowercase()
        );
        for scope in &self.scopes {
            s.push_str(&format!(
                "/{}/{}",
                scope.scope_type.to_ascii_lowercase(),
                scope.name.to_ascii_lowercase()
            ));
        }
        s.push_str(&format!("/providers/{}", self.namespace.to_ascii_lowercase()));
        for t in &self.types {
            s.push_str(&format!(
                "/{}/{}",
                t.type_name.to_ascii_lowercase(),
                t.name.to_ascii_lowercase()
            ));
        }
        s
    }
}

impl PartialEq for ResourceId {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_key() == other.canonical_key()
    }
}
impl Eq for ResourceId {}

impl std::hash::Hash for ResourceId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical_key().hash(state);
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/planes/{}/{}", self.plane_type, self.plane_name)?;
        for scope in &self.scopes {
            write!(f, "/{}/{}", scope.scope_type, scope.name)?;
        }
        write!(f, "/providers/{}", self.namespace)?;
        for t in &self.types {
            write!(f, "/{}/{}", t.type_name, t.name)?;
        }
        Ok(())
    }
}

// ── Provisioning / operation state ────────────────────────────────────────────

/// `Resource Record.provisioningState`, per §3 and the transition table in §4.10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ProvisioningState {
    Accepted,
    Provisioning,
    Updating,
    Deleting,
    Succeeded,
    Failed,
    Canceled,
}

impl ProvisioningState {
    /// A terminal state has no in-flight operation referencing the resource.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisioningState::Succeeded | ProvisioningState::Failed | ProvisioningState::Canceled
        )
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProvisioningState::Accepted => "Accepted",
            ProvisioningState::Provisioning => "Provisioning",
            ProvisioningState::Updating => "Updating",
            ProvisioningState::Deleting => "Deleting",
            ProvisioningState::Succeeded => "Succeeded",
            ProvisioningState::Failed => "Failed",
            ProvisioningState::Canceled => "Canceled",
        };
        write!(f, "{s}")
    }
}

/// `Operation Record.status`, per §3/§4.10. Terminal once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum OperationStatus {
    Accepted,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Succeeded | OperationStatus::Failed | OperationStatus::Canceled
        )
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationStatus::Accepted => "Accepted",
            OperationStatus::Running => "Running",
            OperationStatus::Succeeded => "Succeeded",
            OperationStatus::Failed => "Failed",
            OperationStatus::Canceled => "Canceled",
        };
        write!(f, "{s}")
    }
}

/// `Operation Record.kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationKind::Create => "Create",
            OperationKind::Update => "Update",
            OperationKind::Delete => "Delete",
        };
        write!(f, "{s}")
    }
}

/// ARM-RPC error body shape from §6/§7: `{code, message, target?, details?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorDetail {
            code: code.into(),
            message: message.into(),
            target: None,
            details: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// ── System data / resource record ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemData {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub created_by: String,
    pub modified_at: chrono::DateTime<chrono::Utc>,
    pub modified_by: String,
}

/// A resource as persisted by Storage. `properties` is opaque, type-specific JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: ResourceId,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub location: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub system_data: SystemData,
    pub properties: serde_json::Value,
    pub provisioning_state: ProvisioningState,
    /// Opaque version token; changes strictly on every Save.
    pub etag: String,
    /// The operation currently owning a non-terminal mutation of this
    /// resource, if any — the outbox field from SPEC_FULL's "Supplemental
    /// detail" section, consulted by the worker to detect stale re-enqueue.
    #[serde(default)]
    pub pending_operation_id: Option<uuid::Uuid>,
}

/// Tracks a long-running operation on a cloud plane's own upstream so it can
/// be polled through UCP's uniform operation surface instead of the
/// client holding the upstream's native `Azure-AsyncOperation` URL (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamOperation {
    pub plane_name: String,
    pub async_operation_url: String,
}

/// A durable record of one mutation, independently polled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: uuid::Uuid,
    pub target_resource_id: ResourceId,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: Option<chrono::DateTime<chrono::Utc>>,
    pub error: Option<ErrorDetail>,
    pub retry_count: u32,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Percent-complete hint surfaced by the status endpoint (§4.6). Optional,
    /// type-controller supplied.
    pub percent_complete: Option<u8>,
    /// Set when this operation is a proxy for a cloud plane's own
    /// long-running upstream call (§4.7), rather than a local controller run.
    #[serde(default)]
    pub upstream: Option<UpstreamOperation>,
}

impl OperationRecord {
    pub fn new(target_resource_id: ResourceId, kind: OperationKind, now: chrono::DateTime<chrono::Utc>) -> Self {
        OperationRecord {
            id: uuid::Uuid::new_v4(),
            target_resource_id,
            kind,
            status: OperationStatus::Accepted,
            start_time: now,
            end_time: None,
            error: None,
            retry_count: 0,
            lease_owner: None,
            lease_expires_at: None,
            percent_complete: None,
            upstream: None,
        }
    }

    pub fn mark_terminal(&mut self, status: OperationStatus, now: chrono::DateTime<chrono::Utc>, error: Option<ErrorDetail>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.end_time = Some(now);
        self.error = error;
        self.lease_owner = None;
        self.lease_expires_at = None;
    }
}

impl ResourceRecord {
    /// Computes the ETag over `(resource_type, properties, provisioning_state)`
    /// using the same canonical-JSON + SHA-256 scheme as [`RecipeFingerprint`].
    /// Storage backends call this on every `save` rather than trusting a
    /// client-supplied value.
    pub fn compute_etag(&self) -> String {
        use sha2::{Digest, Sha256};
        let body = serde_json::json!({
            "resourceType": self.resource_type,
            "properties": self.properties,
            "provisioningState": self.provisioning_state,
        });
        let input = format!("{}\u{0}{}", self.id.canonical_key(), canonicalize_json(&body));
        let digest = Sha256::digest(input.as_bytes());
        hex_encode(&digest)
    }
}

impl SystemData {
    pub fn new_now() -> Self {
        let now = chrono::Utc::now();
        SystemData {
            created_at: now,
            created_by: "system".to_string(),
            modified_at: now,
            modified_by: "system".to_string(),
        }
    }
}

// ── Queue message ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub operation_id: uuid::Uuid,
    pub resource_id: ResourceId,
    pub kind: OperationKind,
    pub attempt: u32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub visible_at: chrono::DateTime<chrono::Utc>,
}

// ── Secret / credential records ───────────────────────────────────────────────

/// Opaque, scoped bytes keyed by resource ID. Never included in resource responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    pub scope_id: ResourceId,
    pub name: String,
    pub data: Vec<u8>,
    pub etag: String,
}

impl SecretRecord {
    pub fn compute_etag(&self) -> String {
        use sha2::{Digest, Sha256};
        let input = format!(
            "{}\u{0}{}\u{0}{}",
            self.scope_id.canonical_key(),
            self.name,
            hex_encode(&self.data)
        );
        let digest = Sha256::digest(input.as_bytes());
        hex_encode(&digest)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    ApiKey,
    ServicePrincipal,
    AccessKeyPair,
}

/// Scoped credential used by Plane Dispatch and Recipe Execution. Read-only to
/// clients after write; `data` is blanked on every GET path (see
/// `CredentialRecord::redacted`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub plane_name: String,
    pub cloud: String,
    pub kind: CredentialKind,
    pub data: Vec<u8>,
}

impl CredentialRecord {
    /// A copy with `data` cleared, suitable for returning from a GET endpoint.
    pub fn redacted(&self) -> CredentialRecord {
        CredentialRecord {
            plane_name: self.plane_name.clone(),
            cloud: self.cloud.clone(),
            kind: self.kind,
            data: Vec::new(),
        }
    }
}

// ── Recipe fingerprint ────────────────────────────────────────────────────────

/// Deterministic hash over `(templateKind, templatePath@version, normalized-parameters,
/// environmentID)`, identifying a single-flight Recipe Engine execution (§4.8).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipeFingerprint(pub String);

impl RecipeFingerprint {
    pub fn compute(
        template_kind: &str,
        template_path: &str,
        parameters: &serde_json::Value,
        environment_id: &ResourceId,
    ) -> Self {
        use sha2::{Digest, Sha256};
        let normalized = canonicalize_json(parameters);
        let input = format!(
            "{}\u{0}{}\u{0}{}\u{0}{}",
            template_kind,
            template_path,
            normalized,
            environment_id.canonical_key()
        );
        let digest = Sha256::digest(input.as_bytes());
        RecipeFingerprint(hex_encode(&digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecipeFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Recursively sort object keys so structurally-equal JSON hashes identically
/// regardless of field order. Shared by ETag computation in `ucp-store`.
pub fn canonicalize_json(v: &serde_json::Value) -> String {
    fn sorted(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Object(map) => {
                let mut entries: Vec<(&String, &serde_json::Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                let mut out = serde_json::Map::new();
                for (k, val) in entries {
                    out.insert(k.clone(), sorted(val));
                }
                serde_json::Value::Object(out)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sorted).collect())
            }
            other => other.clone(),
        }
    }
    sorted(v).to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_radius_resource_id() {
        let id = ResourceId::parse(
            "/planes/radius/local/resourceGroups/g/providers/Applications.Core/environments/env1",
        )
        .unwrap();
        assert_eq!(id.plane_type(), "radius");
        assert_eq!(id.plane_name(), "local");
        assert_eq!(id.scopes().len(), 1);
        assert_eq!(id.namespace(), "Applications.Core");
        assert_eq!(id.resource_type(), "Applications.Core/environments");
        assert_eq!(id.name(), "env1");
    }

    #[test]
    fn parses_child_resource_and_parent() {
        let id = ResourceId::parse(
            "/planes/radius/local/resourceGroups/g/providers/Applications.Core/environments/env1/extenders/ext1",
        )
        .unwrap();
        assert_eq!(id.name(), "ext1");
        let parent = id.parent().unwrap();
        assert_eq!(parent.name(), "env1");
        assert!(parent.parent().is_none());
    }

    #[test]
    fn equality_is_case_insensitive() {
        let a = ResourceId::parse(
            "/planes/radius/local/resourceGroups/g/providers/Applications.Core/environments/ENV1",
        )
        .unwrap();
        let b = ResourceId::parse(
            "/PLANES/Radius/Local/resourceGroups/G/providers/applications.core/Environments/env1",
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_odd_arity_type_path() {
        let err = ResourceId::parse(
            "/planes/radius/local/providers/Applications.Core/environments",
        );
        assert!(err.is_err());
    }

    #[test]
    fn rejects_missing_providers_segment() {
        let err = ResourceId::parse("/planes/radius/local/resourceGroups/g");
        assert!(err.is_err());
    }

    #[test]
    fn root_scope_omits_resource_groups() {
        let id = ResourceId::parse(
            "/planes/aws/aws-1/resourceGroups/g/providers/AWS.S3/buckets/b1",
        )
        .unwrap();
        assert_eq!(id.root_scope(), "/planes/aws/aws-1");
    }

    #[test]
    fn fingerprint_is_stable_under_key_reordering() {
        let env = ResourceId::parse(
            "/planes/radius/local/resourceGroups/g/providers/Applications.Core/environments/env1",
        )
        .unwrap();
        let a = serde_json::json!({"a": 1, "b": 2});
        let b = serde_json::json!({"b": 2, "a": 1});
        let fp_a = RecipeFingerprint::compute("terraform", "path@v1", &a, &env);
        let fp_b = RecipeFingerprint::compute("terraform", "path@v1", &b, &env);
        assert_eq!(fp_a, fp_b);
    }

    #[test]
    fn fingerprint_changes_with_parameters() {
        let env = ResourceId::parse(
            "/planes/radius/local/resourceGroups/g/providers/Applications.Core/environments/env1",
        )
        .unwrap();
        let a = serde_json::json!({"a": 1});
        let b = serde_json::json!({"a": 2});
        let fp_a = RecipeFingerprint::compute("terraform", "path@v1", &a, &env);
        let fp_b = RecipeFingerprint::compute("terraform", "path@v1", &b, &env);
        assert_ne!(fp_a, fp_b);
    }

    #[test]
    fn provisioning_state_terminal_matrix() {
        assert!(!ProvisioningState::Accepted.is_terminal());
        assert!(!ProvisioningState::Provisioning.is_terminal());
        assert!(!ProvisioningState::Updating.is_terminal());
        assert!(!ProvisioningState::Deleting.is_terminal());
        assert!(ProvisioningState::Succeeded.is_terminal());
        assert!(ProvisioningState::Failed.is_terminal());
        assert!(ProvisioningState::Canceled.is_terminal());
    }

    #[test]
    fn credential_redacted_clears_data() {
        let cred = CredentialRecord {
            plane_name: "aws-1".into(),
            cloud: "aws".into(),
            kind: CredentialKind::AccessKeyPair,
            data: vec![1, 2, 3],
        };
        let r = cred.redacted();
        assert!(r.data.is_empty());
        assert_eq!(r.plane_name, "aws-1");
    }
}
