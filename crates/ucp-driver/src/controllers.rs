use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ucp_domain::{Controller, ControllerContext, ControllerOutcome, ErrorDetail, ResourceId, ResourceRecord};

use crate::error::DriverError;
use crate::recipe::{RecipeEngine, RecipeFailureKind, RecipeSpec, TemplateKind};

/// Reference `Applications.Core/environments` controller: a Radius-native
/// plane resource with no recipe and no upstream call, so its only job is to
/// accept the desired properties as the resulting state. Exists to exercise
/// the worker loop end-to-end without a real resource provider (§1 names the
/// provider ecosystem out of scope); not a stand-in for one.
pub struct EnvironmentsController;

#[async_trait]
impl Controller for EnvironmentsController {
    fn resource_type(&self) -> &str {
        "Applications.Core/environments"
    }

    fn max_attempts(&self) -> u32 {
        3
    }

    async fn run(&self, _ctx: &ControllerContext, record: &ResourceRecord) -> ControllerOutcome {
        ControllerOutcome::Done(record.properties.clone())
    }
}

/// Reference `Applications.Core/extenders` controller: recipe-backed,
/// exercising the Terraform driver and fingerprint single-flight from
/// §4.8/Scenario 6. Expects `properties.environment` (a resource ID string)
/// and `properties.parameters` (the recipe's input parameters); returns the
/// recipe's classified outputs as the resulting `properties`.
pub struct ExtendersController {
    recipe_engine: Arc<RecipeEngine>,
    template_path: String,
    declared_outputs: Vec<String>,
    secret_outputs: Vec<String>,
}

impl ExtendersController {
    pub fn new(
        recipe_engine: Arc<RecipeEngine>,
        template_path: impl Into<String>,
        declared_outputs: Vec<String>,
        secret_outputs: Vec<String>,
    ) -> Self {
        ExtendersController {
            recipe_engine,
            template_path: template_path.into(),
            declared_outputs,
            secret_outputs,
        }
    }

    fn build_spec(&self, record: &ResourceRecord) -> Result<(RecipeSpec, ResourceId), ErrorDetail> {
        let environment_id = record
            .properties
            .get("environment")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ErrorDetail::new("ValidationFailed", "properties.environment is required"))?;
        let environment_id = ResourceId::parse(environment_id)
            .map_err(|e| ErrorDetail::new("ValidationFailed", format!("properties.environment: {e}")))?;

        let parameters = record.properties.get("parameters").cloned().unwrap_or(serde_json::json!({}));

        Ok((
            RecipeSpec {
                template_kind: TemplateKind::Terraform,
                template_path: self.template_path.clone(),
                parameters,
                environment_id: environment_id.clone(),
                declared_outputs: self.declared_outputs.clone(),
                secret_outputs: self.secret_outputs.clone(),
            },
            environment_id,
        ))
    }
}

#[async_trait]
impl Controller for ExtendersController {
    fn resource_type(&self) -> &str {
        "Applications.Core/extenders"
    }

    fn max_duration(&self) -> Duration {
        // Comfortably longer than TerraformRecipeDriver's internal 1800s
        // subprocess timeout, so that timeout fires (and is classified)
        // before the worker's own timeout would.
        Duration::from_secs(1900)
    }

    async fn run(&self, _ctx: &ControllerContext, record: &ResourceRecord) -> ControllerOutcome {
        let (spec, environment_id) = match self.build_spec(record) {
            Ok(pair) => pair,
            Err(detail) => return ControllerOutcome::Fatal(detail),
        };

        match self.recipe_engine.execute(&spec, &environment_id).await {
            Ok(outputs) => ControllerOutcome::Done(serde_json::json!({
                "values": outputs.values,
                "secretRefs": outputs.secret_refs,
                "resources": outputs.resources,
            })),
            Err(err) => self.classify(err),
        }
    }
}

impl ExtendersController {
    fn classify(&self, err: DriverError) -> ControllerOutcome {
        match self.recipe_engine.classify_failure(TemplateKind::Terraform, &err) {
            RecipeFailureKind::Transient => {
                ControllerOutcome::Retry { after: Duration::from_secs(30), reason: err.to_string() }
            }
            RecipeFailureKind::Permanent => {
                ControllerOutcome::Fatal(ErrorDetail::new("RecipeExecutionFailed", err.to_string()))
            }
            RecipeFailureKind::BadInput => {
                ControllerOutcome::Fatal(ErrorDetail::new("ValidationFailed", err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ucp_domain::{ProvisioningState, SystemData};
    use ucp_store::{InMemoryStore, SecretStore, Storage};

    fn record(properties: serde_json::Value) -> ResourceRecord {
        ResourceRecord {
            id: ResourceId::parse(
                "/planes/radius/local/resourceGroups/rg1/providers/Applications.Core/environments/env1",
            )
            .unwrap(),
            resource_type: "Applications.Core/environments".to_string(),
            location: "global".to_string(),
            tags: Default::default(),
            system_data: SystemData::new_now(),
            properties,
            provisioning_state: ProvisioningState::Accepted,
            etag: String::new(),
            pending_operation_id: None,
        }
    }

    #[tokio::test]
    async fn environments_controller_echoes_properties() {
        let controller = EnvironmentsController;
        let ctx = ControllerContext::new(uuid::Uuid::new_v4(), ucp_domain::OperationKind::Create);
        let rec = record(serde_json::json!({"recipeConfig": "radius"}));
        match controller.run(&ctx, &rec).await {
            ControllerOutcome::Done(properties) => assert_eq!(properties, rec.properties),
            _ => panic!("expected Done"),
        }
    }

    #[tokio::test]
    async fn extenders_controller_requires_environment_property() {
        let storage = Arc::new(InMemoryStore::default());
        let secrets: Arc<dyn SecretStore> = storage.clone();
        let storage: Arc<dyn Storage> = storage;
        let engine = Arc::new(RecipeEngine::new(storage, secrets, "worker-1".to_string()));
        let controller =
            ExtendersController::new(engine, "registry.example/recipes/redis:1.0.0", vec!["url".into()], vec![]);

        let ctx = ControllerContext::new(uuid::Uuid::new_v4(), ucp_domain::OperationKind::Create);
        let rec = record(serde_json::json!({"parameters": {}}));
        match controller.run(&ctx, &rec).await {
            ControllerOutcome::Fatal(detail) => assert_eq!(detail.code, "ValidationFailed"),
            _ => panic!("expected Fatal for missing environment property"),
        }
    }
}
