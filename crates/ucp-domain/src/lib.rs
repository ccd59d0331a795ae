mod types;
pub mod error;
pub mod controller;

#[cfg(test)]
mod tests;

pub use types::{
    canonicalize_json, CredentialKind, CredentialRecord, ErrorDetail, OperationKind,
    OperationRecord, OperationStatus, ProvisioningState, QueueMessage, RecipeFingerprint,
    ResourceId, ResourceRecord, ScopeSegment, SecretRecord, SystemData, TypeSegment,
    UpstreamOperation,
};
pub use error::{codes, DomainError, ErrorCategory, ErrorCategoryExt};
pub use controller::{Controller, ControllerContext, ControllerOutcome};
