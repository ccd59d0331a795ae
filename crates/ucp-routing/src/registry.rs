use std::collections::HashMap;
use std::sync::Arc;

use ucp_domain::Controller;

use crate::error::RoutingError;

/// Everything the frontend and worker need to know about a resource type,
/// beyond its controller implementation: whether it completes synchronously,
/// its retry/timeout budget, and (for recipe-backed types) the declared
/// output/secret schema used by the Recipe Engine's classification (§4.8).
pub struct TypeDeclaration {
    pub controller: Arc<dyn Controller>,
    /// Output keys classified as secrets rather than plain values.
    pub secret_outputs: Vec<String>,
}

/// Maps `namespace/type` (case-insensitive) to its registered controller and
/// declaration. Built once at startup and never mutated afterward (§9:
/// "confine [global state] to the type-registry, routing trie, and config").
#[derive(Default)]
pub struct TypeRegistry {
    types: HashMap<String, TypeDeclaration>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry::default()
    }

    /// Register a controller for `namespace/type`. Returns `&mut self` for chaining.
    pub fn register(
        &mut self,
        controller: Arc<dyn Controller>,
        secret_outputs: Vec<String>,
    ) -> &mut Self {
        let key = controller.resource_type().to_ascii_lowercase();
        self.types.insert(
            key,
            TypeDeclaration {
                controller,
                secret_outputs,
            },
        );
        self
    }

    pub fn get(&self, resource_type: &str) -> Result<&TypeDeclaration, RoutingError> {
        self.types
            .get(&resource_type.to_ascii_lowercase())
            .ok_or_else(|| RoutingError::UnknownType(resource_type.to_string()))
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }
}
