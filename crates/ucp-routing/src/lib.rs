mod error;
mod trie;
mod registry;

pub use error::RoutingError;
pub use trie::{RouteTrie, Segment};
pub use registry::{TypeDeclaration, TypeRegistry};
