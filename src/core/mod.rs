//! Core abstractions for fnstack
//!
//! Errors, collaborator traits, shared artifact caches, the compute handle
//! registry and the run context.

pub mod cache;
pub mod context;
pub mod error;
pub mod registry;
pub mod traits;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use cache::{SharedArtifacts, SharedArtifactsBuilder};
pub use context::{FrozenContext, SynthesisContext};
pub use error::{SynthError, SynthResult};
pub use registry::{HandleRegistryBuilder, ResourceHandleRegistry};
pub use traits::*;
