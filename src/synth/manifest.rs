//! Recorded synthesis output
//!
//! `Manifest` implements every collaborator trait by recording the request.
//! The result is the artifact written by `fnstack synth`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde::Serialize;
use serde_with::skip_serializing_none;
use uuid::Uuid;

use crate::config::{HttpMethod, Settings};
use crate::config_error;
use crate::core::error::SynthResult;
use crate::core::traits::{
    Action, ComputeFactory, ComputeHandle, ComputeSpec, EventRegistrar, HandleOrigin, Identity,
    PathHandle, PolicySink, ResourceRef, RouteRegistrar,
};

// Resources a unit is charged per created function: the function and its log
// group, plus an execution role when no shared role is assigned.
const RESOURCES_PER_FUNCTION: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize)]
pub struct FunctionRecord {
    pub name: String,
    pub unit: String,
    pub description: String,
    pub handler: String,
    pub code_entry_root: String,
    pub code_entry_index: String,
    pub environment: BTreeMap<String, String>,
    pub memory_mb: u32,
    pub ephemeral_storage_mb: u32,
    pub timeout_seconds: u64,
    pub architecture: String,
    pub layers: Vec<String>,
    pub role_arn: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct UnitRecord {
    pub functions: Vec<String>,
    pub resource_count: usize,
    #[serde(skip)]
    over_budget: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct GrantRecord {
    pub principal: String,
    pub resource: String,
    pub action: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct PathRecord {
    pub id: usize,
    pub path: String,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize)]
pub struct MethodRecord {
    pub path: String,
    pub method: HttpMethod,
    pub function: String,
    pub authorizer: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct GatewayRecord {
    pub paths: Vec<PathRecord>,
    pub methods: Vec<MethodRecord>,
}

#[derive(Clone, Debug, Serialize)]
pub struct QueueSourceRecord {
    pub function: String,
    pub queue: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct NotificationRecord {
    pub bucket: String,
    pub event: String,
    pub function: String,
    pub prefix: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct LogSubscriptionRecord {
    pub function: String,
    pub destination: String,
}

#[derive(Debug, Serialize)]
pub struct Manifest {
    pub run_id: Uuid,
    pub prefix: String,
    pub max_resources_per_unit: usize,
    pub units: BTreeMap<String, UnitRecord>,
    pub functions: Vec<FunctionRecord>,
    pub imported_functions: BTreeSet<String>,
    pub grants: BTreeSet<GrantRecord>,
    pub gateway: GatewayRecord,
    pub queue_sources: Vec<QueueSourceRecord>,
    pub notifications: Vec<NotificationRecord>,
    pub log_subscriptions: Vec<LogSubscriptionRecord>,

    #[serde(skip)]
    function_units: HashMap<String, String>,
    /// Unit of the latest function created under each identity; grants
    /// follow creation, so a shared role is charged to the unit being built
    #[serde(skip)]
    identity_units: HashMap<String, String>,
    #[serde(skip)]
    policies: BTreeSet<(String, String)>,
}

impl Manifest {
    pub fn new(settings: &Settings) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            prefix: crate::naming::resource_prefix(settings),
            max_resources_per_unit: settings.max_resources_per_unit,
            units: BTreeMap::new(),
            functions: Vec::new(),
            imported_functions: BTreeSet::new(),
            grants: BTreeSet::new(),
            gateway: GatewayRecord::default(),
            queue_sources: Vec::new(),
            notifications: Vec::new(),
            log_subscriptions: Vec::new(),
            function_units: HashMap::new(),
            identity_units: HashMap::new(),
            policies: BTreeSet::new(),
        }
    }

    pub fn function(&self, name: &str) -> Option<&FunctionRecord> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn to_json(&self) -> SynthResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn to_yaml(&self) -> SynthResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn render(&self, format: OutputFormat) -> SynthResult<String> {
        match format {
            OutputFormat::Json => self.to_json(),
            OutputFormat::Yaml => self.to_yaml(),
        }
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P, format: OutputFormat) -> SynthResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.render(format)?)?;
        debug!("Manifest written to {}", path.display());
        Ok(())
    }

    /// Charge `count` resources to the unit that owns `function`. Imported
    /// functions belong to no unit and are not charged.
    fn charge(&mut self, function: &str, count: usize) {
        if let Some(unit_name) = self.function_units.get(function).cloned() {
            self.charge_unit(&unit_name, count);
        }
    }

    fn charge_unit(&mut self, unit_name: &str, count: usize) {
        let Some(unit) = self.units.get_mut(unit_name) else {
            return;
        };
        unit.resource_count += count;
        if unit.resource_count > self.max_resources_per_unit && !unit.over_budget {
            unit.over_budget = true;
            warn!(
                "Unit {} exceeds {} resources; lower the functions per unit",
                unit_name, self.max_resources_per_unit
            );
        }
    }
}

impl ComputeFactory for Manifest {
    fn create(&mut self, spec: &ComputeSpec) -> SynthResult<ComputeHandle> {
        if self.function_units.contains_key(&spec.function_name) {
            return Err(config_error!(
                "Function '{}' is already defined",
                spec.function_name
            ));
        }

        self.functions.push(FunctionRecord {
            name: spec.function_name.clone(),
            unit: spec.unit.clone(),
            description: spec.description.clone(),
            handler: spec.handler.clone(),
            code_entry_root: spec.code_entry_root.clone(),
            code_entry_index: spec.code_entry_index.clone(),
            environment: spec.environment.clone(),
            memory_mb: spec.memory_mb,
            ephemeral_storage_mb: spec.ephemeral_storage_mb,
            timeout_seconds: spec.timeout.as_secs(),
            architecture: spec.architecture.to_string(),
            layers: spec.layers.clone(),
            role_arn: spec.identity.role_arn.clone(),
        });
        self.function_units
            .insert(spec.function_name.clone(), spec.unit.clone());
        self.identity_units
            .insert(spec.identity.name.clone(), spec.unit.clone());
        self.units
            .entry(spec.unit.clone())
            .or_default()
            .functions
            .push(spec.function_name.clone());

        let own_role = usize::from(spec.identity.role_arn.is_none());
        self.charge(&spec.function_name, RESOURCES_PER_FUNCTION + own_role);

        Ok(ComputeHandle {
            function_name: spec.function_name.clone(),
            unit: Some(spec.unit.clone()),
            identity: spec.identity.clone(),
            origin: HandleOrigin::Created,
        })
    }

    fn import(&mut self, function_name: &str) -> SynthResult<ComputeHandle> {
        self.imported_functions.insert(function_name.to_string());
        Ok(ComputeHandle {
            function_name: function_name.to_string(),
            unit: None,
            identity: Identity::for_function(function_name),
            origin: HandleOrigin::Imported,
        })
    }
}

impl PolicySink for Manifest {
    fn grant(
        &mut self,
        identity: &Identity,
        resource: &ResourceRef,
        action: Action,
    ) -> SynthResult<()> {
        let principal = identity
            .role_arn
            .clone()
            .unwrap_or_else(|| identity.name.clone());
        let record = GrantRecord {
            principal: principal.clone(),
            resource: resource.to_string(),
            action: action.to_string(),
        };
        if self.grants.insert(record) {
            // one inline policy per principal and unit
            if let Some(unit) = self.identity_units.get(&identity.name).cloned() {
                if self.policies.insert((unit.clone(), principal)) {
                    self.charge_unit(&unit, 1);
                }
            }
        }
        Ok(())
    }
}

impl RouteRegistrar for Manifest {
    fn gateway_root(&mut self, segments: &[String]) -> SynthResult<PathHandle> {
        let path = format!("/{}", segments.join("/"));
        if let Some(existing) = self.gateway.paths.iter().find(|p| p.path == path) {
            return Ok(PathHandle {
                id: existing.id,
                path: existing.path.clone(),
            });
        }
        Ok(self.push_path(path))
    }

    fn add_path_segment(&mut self, parent: &PathHandle, name: &str) -> SynthResult<PathHandle> {
        let path = format!("{}/{}", parent.path.trim_end_matches('/'), name);
        Ok(self.push_path(path))
    }

    fn add_method(
        &mut self,
        path: &PathHandle,
        method: HttpMethod,
        compute: &ComputeHandle,
        authorizer: Option<&str>,
    ) -> SynthResult<()> {
        self.gateway.methods.push(MethodRecord {
            path: path.path.clone(),
            method,
            function: compute.function_name.clone(),
            authorizer: authorizer.map(str::to_string),
        });
        Ok(())
    }
}

impl Manifest {
    fn push_path(&mut self, path: String) -> PathHandle {
        let id = self.gateway.paths.len();
        self.gateway.paths.push(PathRecord {
            id,
            path: path.clone(),
        });
        PathHandle { id, path }
    }
}

impl EventRegistrar for Manifest {
    fn add_queue_source(&mut self, compute: &ComputeHandle, queue: &str) -> SynthResult<()> {
        self.queue_sources.push(QueueSourceRecord {
            function: compute.function_name.clone(),
            queue: queue.to_string(),
        });
        self.charge(&compute.function_name, 1);
        Ok(())
    }

    fn add_object_created_notification(
        &mut self,
        bucket: &str,
        compute: &ComputeHandle,
        prefix: &str,
    ) -> SynthResult<()> {
        self.notifications.push(NotificationRecord {
            bucket: bucket.to_string(),
            event: "OBJECT_CREATED".to_string(),
            function: compute.function_name.clone(),
            prefix: prefix.to_string(),
        });
        Ok(())
    }

    fn add_log_subscription(
        &mut self,
        compute: &ComputeHandle,
        destination: &str,
    ) -> SynthResult<()> {
        self.log_subscriptions.push(LogSubscriptionRecord {
            function: compute.function_name.clone(),
            destination: destination.to_string(),
        });
        self.charge(&compute.function_name, 1);
        Ok(())
    }
}
