use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use validator::{Validate, ValidationError};

use crate::core::error::{ErrorContext, SynthResult};
use crate::core::traits::{Action, ResourceKind};

pub mod descriptor;
pub mod schema;

pub use descriptor::{Architecture, FunctionDescriptor, FunctionRegistry, HttpMethod, Timeout};

#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "Config::validate_references"))]
pub struct Config {
    #[serde(default)]
    #[validate(nested)]
    pub settings: Settings,
    #[serde(default)]
    #[validate(nested)]
    pub defaults: Defaults,
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub common_env: BTreeMap<String, String>,

    #[serde(default)]
    #[validate(nested)]
    pub layers: Vec<LayerEntry>,
    #[serde(default)]
    #[validate(nested)]
    pub layer_assets: Vec<LayerAssetEntry>,
    #[serde(default)]
    #[validate(nested)]
    pub roles: Vec<RoleEntry>,

    #[serde(default)]
    pub shared_resources: SharedResources,
    #[serde(default)]
    pub permissions: PermissionRules,
    #[serde(default)]
    pub events: EventRules,
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub log_forwarding: Option<LogForwarding>,

    // Checked by `FunctionRegistry::validate` so that failures carry a dotted path
    #[serde(default)]
    pub functions: Vec<FunctionDescriptor>,
}

// Config file load and validation
impl Config {
    pub fn load_from_yaml<P>(path: P) -> SynthResult<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let conf_str = fs::read_to_string(path).with_context(&format!(
            "Unable to read conf file from {}",
            path.display()
        ))?;
        debug!("Conf file read from {}", path.display());
        Self::from_yaml(&conf_str)
    }

    pub fn from_yaml(conf_str: &str) -> SynthResult<Self> {
        trace!("Read conf file: {conf_str}");
        let doc: YamlValue =
            serde_yaml::from_str(conf_str).with_context("Unable to parse yaml conf")?;

        // closed schema first: unknown or mistyped descriptor fields get a dotted path
        schema::validate_document(&doc)?;

        let conf: Config =
            serde_yaml::from_value(doc).with_context("Unable to decode yaml conf")?;
        trace!("Loaded conf: {conf:?}");

        conf.validate()
            .with_context("Conf file validation failed")?;
        conf.registry().validate(conf.settings.strict_routes)?;

        Ok(conf)
    }

    pub fn to_yaml(&self) -> SynthResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Command-line overrides for the deployment tier and partition count.
    pub fn merge_with_overrides(&mut self, tier: Option<&str>, num_partitions: Option<usize>) {
        if let Some(tier) = tier {
            self.settings.tier = tier.to_string();
        }
        if let Some(n) = num_partitions {
            self.settings.num_partitions = n;
        }
    }

    pub fn registry(&self) -> FunctionRegistry {
        FunctionRegistry::from_parts(self.common_env.clone(), self.functions.clone())
    }

    fn validate_references(&self) -> Result<(), ValidationError> {
        let grants = self
            .permissions
            .env
            .iter()
            .flat_map(|rule| rule.grants.iter())
            .chain(
                self.permissions
                    .handlers
                    .iter()
                    .flat_map(|rule| rule.grants.iter()),
            );

        for grant in grants {
            if !self.shared_resources.contains(grant.kind, &grant.name) {
                let mut err = ValidationError::new("unknown_shared_resource");
                err.add_param("kind".into(), &grant.kind);
                err.add_param("name".into(), &grant.name);
                return Err(err);
            }
            if let Some(action) = grant.actions.iter().find(|a| !a.applies_to(grant.kind)) {
                let mut err = ValidationError::new("action_not_supported");
                err.add_param("kind".into(), &grant.kind);
                err.add_param("action".into(), action);
                return Err(err);
            }
        }

        for rule in &self.events.queue_consumers {
            if !self
                .shared_resources
                .contains(ResourceKind::Queue, &rule.queue)
            {
                let mut err = ValidationError::new("unknown_event_queue");
                err.add_param("name".into(), &rule.queue);
                return Err(err);
            }
        }

        for rule in &self.events.storage_triggers {
            if !self
                .shared_resources
                .contains(ResourceKind::Bucket, &rule.bucket)
            {
                let mut err = ValidationError::new("unknown_event_bucket");
                err.add_param("name".into(), &rule.bucket);
                return Err(err);
            }
        }

        for layer in &self.layers {
            if layer.arn.is_none() && !layer.from_asset {
                let mut err = ValidationError::new("layer_source_required");
                err.add_param("name".into(), &layer.name);
                return Err(err);
            }
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    /// Routes are bound by a separate pass after every partition is built.
    #[default]
    Deferred,
    /// Routes are bound while each partition is processed.
    Inline,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "Settings::default_app_name")]
    #[validate(length(min = 1))]
    pub app_name: String,
    #[serde(default = "Settings::default_component")]
    #[validate(length(min = 1))]
    pub component: String,
    #[serde(default = "Settings::default_tier")]
    #[validate(length(min = 1))]
    pub tier: String,
    #[serde(default = "Settings::default_num_partitions")]
    #[validate(range(min = 1))]
    pub num_partitions: usize,
    /// Capacity hint used for chunk sizing, so existing functions keep their
    /// deployment unit as new ones are appended.
    pub estimated_function_count: Option<usize>,
    #[serde(default)]
    pub route_mode: RouteMode,
    #[serde(default)]
    pub strict_routes: bool,
    #[serde(default = "Settings::default_max_resources_per_unit")]
    pub max_resources_per_unit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: Self::default_app_name(),
            component: Self::default_component(),
            tier: Self::default_tier(),
            num_partitions: Self::default_num_partitions(),
            estimated_function_count: None,
            route_mode: RouteMode::default(),
            strict_routes: false,
            max_resources_per_unit: Self::default_max_resources_per_unit(),
        }
    }
}

impl Settings {
    fn default_app_name() -> String {
        "fnstack".to_string()
    }

    fn default_component() -> String {
        "backend".to_string()
    }

    fn default_tier() -> String {
        "dev".to_string()
    }

    fn default_num_partitions() -> usize {
        4
    }

    fn default_max_resources_per_unit() -> usize {
        500
    }
}

/// Values applied to descriptors that leave a field unset.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
    #[serde(default = "Defaults::default_handler")]
    #[validate(length(min = 1))]
    pub handler: String,
    #[serde(default = "Defaults::default_handler_extension")]
    pub handler_extension: String,
    #[serde(default = "Defaults::default_code_entry_root")]
    pub code_entry_root: String,
    #[serde(default = "Defaults::default_layer")]
    #[validate(length(min = 1))]
    pub layer: String,
    #[serde(default)]
    pub architecture: Architecture,
    #[serde(default = "Defaults::default_min_memory_mb")]
    #[validate(range(min = 128))]
    pub min_memory_mb: u32,
    #[serde(default = "Defaults::default_api_timeout_seconds")]
    #[validate(range(min = 1, max = 900))]
    pub api_timeout_seconds: u64,
    #[serde(default = "Defaults::default_background_timeout_seconds")]
    #[validate(range(min = 1, max = 900))]
    pub background_timeout_seconds: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            handler: Self::default_handler(),
            handler_extension: Self::default_handler_extension(),
            code_entry_root: Self::default_code_entry_root(),
            layer: Self::default_layer(),
            architecture: Architecture::default(),
            min_memory_mb: Self::default_min_memory_mb(),
            api_timeout_seconds: Self::default_api_timeout_seconds(),
            background_timeout_seconds: Self::default_background_timeout_seconds(),
        }
    }
}

impl Defaults {
    fn default_handler() -> String {
        "lambda_handler".to_string()
    }

    fn default_handler_extension() -> String {
        "py".to_string()
    }

    fn default_code_entry_root() -> String {
        "api/runtime".to_string()
    }

    fn default_layer() -> String {
        "psycopg3".to_string()
    }

    fn default_min_memory_mb() -> u32 {
        512
    }

    fn default_api_timeout_seconds() -> u64 {
        60
    }

    fn default_background_timeout_seconds() -> u64 {
        15 * 60
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default = "LogConfig::default_level")]
    pub level: String,
    pub path: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            path: None,
        }
    }
}

impl LogConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LayerEntry {
    #[validate(length(min = 1))]
    pub name: String,
    pub architecture: Architecture,
    /// Prebuilt layer version. When absent the layer is built from a
    /// registered layer asset.
    pub arn: Option<String>,
    #[serde(default)]
    pub from_asset: bool,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LayerAssetEntry {
    #[validate(length(min = 1))]
    pub name: String,
    pub architecture: Architecture,
    #[validate(length(min = 1))]
    pub path: String,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RoleEntry {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(length(min = 1))]
    pub arn: String,
    #[serde(default)]
    pub overwrite: bool,
}

/// Shared infrastructure that functions may be granted access to.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedResources {
    #[serde(default)]
    pub secrets: BTreeSet<String>,
    #[serde(default)]
    pub queues: BTreeSet<String>,
    #[serde(default)]
    pub buckets: BTreeSet<String>,
    #[serde(default)]
    pub tables: BTreeSet<String>,
}

impl SharedResources {
    pub fn contains(&self, kind: ResourceKind, name: &str) -> bool {
        let set = match kind {
            ResourceKind::Secret => &self.secrets,
            ResourceKind::Queue => &self.queues,
            ResourceKind::Bucket => &self.buckets,
            ResourceKind::Table => &self.tables,
        };
        set.contains(name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantConfig {
    pub kind: ResourceKind,
    pub name: String,
    pub actions: Vec<Action>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvRuleConfig {
    pub key: String,
    pub grants: Vec<GrantConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerRuleConfig {
    pub handlers: BTreeSet<String>,
    pub grants: Vec<GrantConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PermissionRules {
    #[serde(default)]
    pub env: Vec<EnvRuleConfig>,
    #[serde(default)]
    pub handlers: Vec<HandlerRuleConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConsumerRule {
    pub handlers: BTreeSet<String>,
    pub queue: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageTriggerRule {
    pub handlers: BTreeSet<String>,
    pub bucket: String,
    pub prefix: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventRules {
    #[serde(default)]
    pub queue_consumers: Vec<QueueConsumerRule>,
    #[serde(default)]
    pub storage_triggers: Vec<StorageTriggerRule>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "GatewayConfig::default_root")]
    pub root: Vec<String>,
    pub authorizer: Option<String>,
    #[serde(default)]
    pub no_auth_handlers: BTreeSet<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            root: Self::default_root(),
            authorizer: None,
            no_auth_handlers: BTreeSet::new(),
        }
    }
}

impl GatewayConfig {
    fn default_root() -> Vec<String> {
        vec!["api".to_string(), "v1".to_string()]
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogForwarding {
    pub destination: String,
}
