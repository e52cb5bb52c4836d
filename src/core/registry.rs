//! Compute handle registry
//!
//! Handles are registered while partitions are processed, then frozen into a
//! read-only registry for the passes that run after every unit exists.

use std::collections::HashMap;

use log::{debug, info};

use super::error::{CacheKind, SynthError, SynthResult};
use super::traits::ComputeHandle;

/// Write side of the registry, owned by the synthesis context
#[derive(Debug, Default)]
pub struct HandleRegistryBuilder {
    handles: Vec<ComputeHandle>,
    by_key: HashMap<String, usize>,
    by_function: HashMap<String, usize>,
}

impl HandleRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under `key`. Both the key and the handle's final
    /// function name must be unused.
    pub fn register(&mut self, key: &str, handle: ComputeHandle) -> SynthResult<()> {
        if self.by_key.contains_key(key) {
            return Err(SynthError::DuplicateCacheEntry {
                cache: CacheKind::Handle,
                key: key.to_string(),
            });
        }
        if self.by_function.contains_key(&handle.function_name) {
            return Err(SynthError::DuplicateCacheEntry {
                cache: CacheKind::Handle,
                key: handle.function_name.clone(),
            });
        }

        debug!("Registering compute handle {} as '{}'", handle.function_name, key);
        let index = self.handles.len();
        self.by_key.insert(key.to_string(), index);
        self.by_function.insert(handle.function_name.clone(), index);
        self.handles.push(handle);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn freeze(self) -> ResourceHandleRegistry {
        info!("Freezing handle registry with {} handles", self.handles.len());
        ResourceHandleRegistry {
            handles: self.handles,
            by_key: self.by_key,
            by_function: self.by_function,
        }
    }
}

/// Read-only registry of every compute handle created in the run
#[derive(Debug, Default)]
pub struct ResourceHandleRegistry {
    handles: Vec<ComputeHandle>,
    by_key: HashMap<String, usize>,
    by_function: HashMap<String, usize>,
}

impl ResourceHandleRegistry {
    /// Handles in creation order
    pub fn list(&self) -> &[ComputeHandle] {
        &self.handles
    }

    /// Lookup by registry key
    pub fn by_name(&self, key: &str) -> Option<&ComputeHandle> {
        self.by_key.get(key).map(|&i| &self.handles[i])
    }

    /// Lookup by final unique function name
    pub fn by_function_name(&self, function_name: &str) -> Option<&ComputeHandle> {
        self.by_function.get(function_name).map(|&i| &self.handles[i])
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
