//! Synthesis run state
//!
//! `SynthesisContext` is the mutable state threaded through the partition
//! phase. `finish()` consumes it and yields a `FrozenContext` whose handle
//! registry can no longer be written.

use super::cache::SharedArtifacts;
use super::error::SynthResult;
use super::registry::{HandleRegistryBuilder, ResourceHandleRegistry};
use super::traits::ComputeHandle;
use crate::binding::routes::RouteBinder;

pub struct SynthesisContext {
    artifacts: SharedArtifacts,
    handles: HandleRegistryBuilder,
    /// Shared across partitions so that path segments are created once
    pub routes: RouteBinder,
}

impl SynthesisContext {
    pub fn new(artifacts: SharedArtifacts, routes: RouteBinder) -> Self {
        Self {
            artifacts,
            handles: HandleRegistryBuilder::new(),
            routes,
        }
    }

    pub fn artifacts(&self) -> &SharedArtifacts {
        &self.artifacts
    }

    pub fn register_handle(&mut self, key: &str, handle: ComputeHandle) -> SynthResult<()> {
        self.handles.register(key, handle)
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn finish(self) -> FrozenContext {
        FrozenContext {
            artifacts: self.artifacts,
            handles: self.handles.freeze(),
            routes: self.routes,
        }
    }
}

/// State available to the passes that run after every partition
pub struct FrozenContext {
    pub artifacts: SharedArtifacts,
    pub handles: ResourceHandleRegistry,
    pub routes: RouteBinder,
}

impl FrozenContext {
    pub fn into_registry(self) -> ResourceHandleRegistry {
        self.handles
    }
}
