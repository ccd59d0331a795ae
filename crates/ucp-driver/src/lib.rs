pub mod aws;
pub mod azure;
pub mod controllers;
pub mod error;
pub mod plane;
pub mod recipe;
pub mod registry;

pub use aws::AwsPlaneDriver;
pub use azure::AzurePlaneDriver;
pub use controllers::{EnvironmentsController, ExtendersController};
pub use error::DriverError;
pub use plane::{PlaneDriver, PlaneRequest, PlaneResponse};
pub use recipe::{
    BicepRecipeDriver, RecipeDriver, RecipeEngine, RecipeFailureKind, RecipeOutputs, RecipeSpec,
    TemplateKind, TerraformRecipeDriver,
};
pub use registry::PlaneRegistry;
