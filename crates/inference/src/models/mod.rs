//! Model descriptors, artifact resolution and class maps

pub mod class_map;
pub mod descriptor;
pub mod locator;

pub use class_map::ClassMap;
pub use descriptor::{default_descriptors, Architecture, ModelDescriptor, ModelKind};
pub use locator::{ArtifactLocator, ResolvedArtifacts};
