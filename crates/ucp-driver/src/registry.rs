use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DriverError;
use crate::plane::PlaneDriver;

/// Dispatches a request to the correct [`PlaneDriver`] for a given
/// `plane-type` (§4.7). Radius planes never appear here — they resolve
/// through `ucp-routing`'s `TypeRegistry` instead. Built once at startup
/// from `planes.<name>.kind` config and never mutated after, the same
/// build-once-register-many shape as the teacher's `DriverRegistry`.
pub struct PlaneRegistry {
    drivers: HashMap<String, Arc<dyn PlaneDriver>>,
}

impl PlaneRegistry {
    pub fn new() -> Self {
        Self { drivers: HashMap::new() }
    }

    /// Registers a driver for a `plane-type` (e.g. `aws`, `azure`). Returns
    /// `&mut self` for chaining.
    pub fn register(&mut self, plane_type: impl Into<String>, driver: Arc<dyn PlaneDriver>) -> &mut Self {
        self.drivers.insert(plane_type.into(), driver);
        self
    }

    /// Resolves the driver for a `plane-type` segment parsed out of a
    /// `ResourceId` (e.g. `id.plane_type()`).
    pub fn for_plane_type(&self, plane_type: &str) -> Result<Arc<dyn PlaneDriver>, DriverError> {
        self.drivers
            .get(plane_type)
            .cloned()
            .ok_or_else(|| DriverError::PlaneNotConfigured(plane_type.to_string()))
    }

    pub fn registered_plane_types(&self) -> Vec<String> {
        self.drivers.keys().cloned().collect()
    }
}

impl Default for PlaneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plane::{PlaneRequest, PlaneResponse};

    struct StubDriver(&'static str);

    #[async_trait::async_trait]
    impl PlaneDriver for StubDriver {
        fn plane_type(&self) -> &'static str {
            self.0
        }
        async fn dispatch(&self, _plane_name: &str, _request: PlaneRequest) -> Result<PlaneResponse, DriverError> {
            unimplemented!()
        }
        async fn poll_operation(&self, _plane_name: &str, _url: &str) -> Result<PlaneResponse, DriverError> {
            unimplemented!()
        }
    }

    #[test]
    fn resolves_registered_plane_type() {
        let mut registry = PlaneRegistry::new();
        registry.register("aws", Arc::new(StubDriver("aws")));
        assert!(registry.for_plane_type("aws").is_ok());
    }

    #[test]
    fn unregistered_plane_type_errors() {
        let registry = PlaneRegistry::new();
        assert!(matches!(registry.for_plane_type("azure"), Err(DriverError::PlaneNotConfigured(_))));
    }
}
