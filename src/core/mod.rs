// Graph artifact model and its on-disk format
pub mod artifact;
pub mod types;

// Binary container for constant payloads
pub mod container;
pub mod io;

// Packed string tensors
pub mod strings;

pub use artifact::{GraphBuilder, ModelArtifact, attrs};
pub use types::{AttributeValue, Attributes, ElementType, NamedPort, Node, Output};
