//! Shared artifact caches
//!
//! Layers, layer assets and execution roles are registered once per run in a
//! setup phase, then frozen. Only the frozen caches offer lookups, and a miss
//! is fatal.

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, info};

use super::error::{CacheKind, SynthError, SynthResult};
use crate::config::{Architecture, Config, LayerAssetEntry, LayerEntry, RoleEntry};

/// Append-only table populated during setup
#[derive(Debug)]
pub struct CacheBuilder<K, V> {
    kind: CacheKind,
    entries: BTreeMap<K, V>,
}

impl<K, V> CacheBuilder<K, V>
where
    K: Ord + fmt::Display,
{
    pub fn new(kind: CacheKind) -> Self {
        Self {
            kind,
            entries: BTreeMap::new(),
        }
    }

    /// Registers a value. An existing key is only replaced with `overwrite`.
    pub fn insert(&mut self, key: K, value: V, overwrite: bool) -> SynthResult<()> {
        if self.entries.contains_key(&key) && !overwrite {
            return Err(SynthError::DuplicateCacheEntry {
                cache: self.kind,
                key: key.to_string(),
            });
        }
        debug!("Registering {} entry: {}", self.kind, key);
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn freeze(self) -> FrozenCache<K, V> {
        FrozenCache {
            kind: self.kind,
            entries: self.entries,
        }
    }
}

/// Read-only table produced by `CacheBuilder::freeze`
#[derive(Debug)]
pub struct FrozenCache<K, V> {
    kind: CacheKind,
    entries: BTreeMap<K, V>,
}

impl<K: Ord, V> FrozenCache<K, V> {
    pub fn kind(&self) -> CacheKind {
        self.kind
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }
}

/// Layers and layer assets are keyed per architecture
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct LayerKey {
    pub name: String,
    pub architecture: Architecture,
}

impl LayerKey {
    pub fn new(name: &str, architecture: Architecture) -> Self {
        Self {
            name: name.to_string(),
            architecture,
        }
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.architecture)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerHandle {
    pub name: String,
    pub architecture: Architecture,
    /// Published version reference, or `asset:<path>` for layers built locally
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerAsset {
    pub name: String,
    pub architecture: Architecture,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleHandle {
    pub name: String,
    pub arn: String,
}

#[derive(Debug)]
pub struct LayerCache(FrozenCache<LayerKey, LayerHandle>);

impl LayerCache {
    pub fn resolve(
        &self,
        name: &str,
        architecture: Architecture,
        function: &str,
    ) -> SynthResult<&LayerHandle> {
        self.0
            .get(&LayerKey::new(name, architecture))
            .ok_or_else(|| SynthError::UndefinedLayer {
                name: name.to_string(),
                architecture: architecture.to_string(),
                function: function.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug)]
pub struct LayerAssetCache(FrozenCache<LayerKey, LayerAsset>);

impl LayerAssetCache {
    pub fn resolve(&self, name: &str, architecture: Architecture) -> SynthResult<&LayerAsset> {
        self.0
            .get(&LayerKey::new(name, architecture))
            .ok_or_else(|| SynthError::UndefinedLayerAsset {
                name: name.to_string(),
                architecture: architecture.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug)]
pub struct RoleCache(FrozenCache<String, RoleHandle>);

impl RoleCache {
    pub fn resolve(&self, role: &str, function: &str) -> SynthResult<&RoleHandle> {
        self.0
            .get(&role.to_string())
            .ok_or_else(|| SynthError::UndefinedRole {
                role: role.to_string(),
                function: function.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Setup-phase registration of every shared artifact
pub struct SharedArtifactsBuilder {
    layers: CacheBuilder<LayerKey, LayerHandle>,
    layer_assets: CacheBuilder<LayerKey, LayerAsset>,
    roles: CacheBuilder<String, RoleHandle>,
}

impl Default for SharedArtifactsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedArtifactsBuilder {
    pub fn new() -> Self {
        Self {
            layers: CacheBuilder::new(CacheKind::Layer),
            layer_assets: CacheBuilder::new(CacheKind::LayerAsset),
            roles: CacheBuilder::new(CacheKind::Role),
        }
    }

    /// Registers everything declared in the configuration
    pub fn from_config(config: &Config) -> SynthResult<Self> {
        info!("Registering shared artifacts from configuration...");
        let mut builder = Self::new();

        // Load in dependency order: layer assets -> layers -> roles
        info!("Registering {} layer assets", config.layer_assets.len());
        for entry in &config.layer_assets {
            builder.register_layer_asset(entry)?;
        }

        info!("Registering {} layers", config.layers.len());
        for entry in &config.layers {
            builder.register_layer(entry)?;
        }

        info!("Registering {} roles", config.roles.len());
        for entry in &config.roles {
            builder.register_role(entry)?;
        }

        Ok(builder)
    }

    pub fn register_layer_asset(&mut self, entry: &LayerAssetEntry) -> SynthResult<()> {
        let asset = LayerAsset {
            name: entry.name.clone(),
            architecture: entry.architecture,
            path: entry.path.clone(),
        };
        self.layer_assets.insert(
            LayerKey::new(&entry.name, entry.architecture),
            asset,
            entry.overwrite,
        )
    }

    /// A layer without a published version is built from the asset of the same
    /// name and architecture, which must already be registered.
    pub fn register_layer(&mut self, entry: &LayerEntry) -> SynthResult<()> {
        let key = LayerKey::new(&entry.name, entry.architecture);
        let version = match &entry.arn {
            Some(arn) => arn.clone(),
            None => {
                let asset = self.layer_assets.get(&key).ok_or_else(|| {
                    SynthError::UndefinedLayerAsset {
                        name: entry.name.clone(),
                        architecture: entry.architecture.to_string(),
                    }
                })?;
                format!("asset:{}", asset.path)
            }
        };

        let layer = LayerHandle {
            name: entry.name.clone(),
            architecture: entry.architecture,
            version,
        };
        self.layers.insert(key, layer, entry.overwrite)
    }

    pub fn register_role(&mut self, entry: &RoleEntry) -> SynthResult<()> {
        let role = RoleHandle {
            name: entry.name.clone(),
            arn: entry.arn.clone(),
        };
        self.roles.insert(entry.name.clone(), role, entry.overwrite)
    }

    pub fn freeze(self) -> SharedArtifacts {
        let artifacts = SharedArtifacts {
            layers: LayerCache(self.layers.freeze()),
            layer_assets: LayerAssetCache(self.layer_assets.freeze()),
            roles: RoleCache(self.roles.freeze()),
        };
        info!(
            "Shared artifacts frozen: {} layers, {} layer assets, {} roles",
            artifacts.layers.len(),
            artifacts.layer_assets.len(),
            artifacts.roles.len()
        );
        artifacts
    }
}

/// Frozen caches consumed by the partition phase
#[derive(Debug)]
pub struct SharedArtifacts {
    pub layers: LayerCache,
    pub layer_assets: LayerAssetCache,
    pub roles: RoleCache,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(name: &str, architecture: Architecture, arn: Option<&str>, overwrite: bool) -> LayerEntry {
        LayerEntry {
            name: name.to_string(),
            architecture,
            arn: arn.map(str::to_string),
            from_asset: arn.is_none(),
            overwrite,
        }
    }

    fn role(name: &str, arn: &str, overwrite: bool) -> RoleEntry {
        RoleEntry {
            name: name.to_string(),
            arn: arn.to_string(),
            overwrite,
        }
    }

    #[test]
    fn test_duplicate_without_overwrite_fails() {
        let mut builder = SharedArtifactsBuilder::new();
        builder
            .register_layer(&layer("psycopg3", Architecture::Arm64, Some("arn:1"), false))
            .unwrap();

        let err = builder
            .register_layer(&layer("psycopg3", Architecture::Arm64, Some("arn:2"), false))
            .unwrap_err();
        match err {
            SynthError::DuplicateCacheEntry { cache, key } => {
                assert_eq!(cache, CacheKind::Layer);
                assert_eq!(key, "psycopg3-arm64");
            }
            other => panic!("Expected duplicate error, got {other:?}"),
        }
    }

    #[test]
    fn test_overwrite_replaces_value() {
        let mut builder = SharedArtifactsBuilder::new();
        builder.register_role(&role("etl", "arn:old", false)).unwrap();
        builder.register_role(&role("etl", "arn:new", true)).unwrap();

        let artifacts = builder.freeze();
        let handle = artifacts.roles.resolve("etl", "fn").unwrap();
        assert_eq!(handle.arn, "arn:new");
        assert_eq!(artifacts.roles.len(), 1);
    }

    #[test]
    fn test_layer_lookup_is_per_architecture() {
        let mut builder = SharedArtifactsBuilder::new();
        builder
            .register_layer(&layer("psycopg3", Architecture::Arm64, Some("arn:arm"), false))
            .unwrap();
        builder
            .register_layer(&layer("psycopg3", Architecture::X86_64, Some("arn:x86"), false))
            .unwrap();
        let artifacts = builder.freeze();

        assert_eq!(
            artifacts
                .layers
                .resolve("psycopg3", Architecture::X86_64, "fn")
                .unwrap()
                .version,
            "arn:x86"
        );
        assert_eq!(artifacts.layers.len(), 2);
    }

    #[test]
    fn test_missing_layer_names_function() {
        let mut builder = SharedArtifactsBuilder::new();
        builder
            .register_layer(&layer("psycopg3", Architecture::Arm64, Some("arn:arm"), false))
            .unwrap();
        let artifacts = builder.freeze();

        let err = artifacts
            .layers
            .resolve("psycopg3", Architecture::X86_64, "AWSTkt-backend-dev-thing")
            .unwrap_err();
        assert!(matches!(err, SynthError::UndefinedLayer { .. }));
        assert!(err.to_string().contains("psycopg3-x86_64"));
        assert!(err.to_string().contains("AWSTkt-backend-dev-thing"));
    }

    #[test]
    fn test_layer_from_asset() {
        let mut builder = SharedArtifactsBuilder::new();
        let missing = builder.register_layer(&layer("pandas", Architecture::Arm64, None, false));
        assert!(matches!(missing, Err(SynthError::UndefinedLayerAsset { .. })));

        builder
            .register_layer_asset(&LayerAssetEntry {
                name: "pandas".to_string(),
                architecture: Architecture::Arm64,
                path: "layers/pandas".to_string(),
                overwrite: false,
            })
            .unwrap();
        builder
            .register_layer(&layer("pandas", Architecture::Arm64, None, false))
            .unwrap();

        let artifacts = builder.freeze();
        let handle = artifacts
            .layers
            .resolve("pandas", Architecture::Arm64, "fn")
            .unwrap();
        assert_eq!(handle.version, "asset:layers/pandas");
        assert_eq!(
            artifacts
                .layer_assets
                .resolve("pandas", Architecture::Arm64)
                .unwrap()
                .path,
            "layers/pandas"
        );
    }

    #[test]
    fn test_missing_role() {
        let artifacts = SharedArtifactsBuilder::new().freeze();
        let err = artifacts.roles.resolve("etl", "fn").unwrap_err();
        assert!(matches!(err, SynthError::UndefinedRole { .. }));
    }
}
