use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no route registered for {method} {plane_kind}:{type_path}")]
    NoMatch {
        method: String,
        plane_kind: String,
        type_path: String,
    },

    #[error("route conflict: {method} {plane_kind}:{type_path} is already registered")]
    Conflict {
        method: String,
        plane_kind: String,
        type_path: String,
    },

    #[error("unknown resource type: {0}")]
    UnknownType(String),

    #[error("domain error: {0}")]
    Domain(#[from] ucp_domain::DomainError),
}
