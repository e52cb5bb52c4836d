//! Per-partition function creation
//!
//! Drives every descriptor of one partition through naming, artifact
//! resolution, creation and binding, in registry order.

use std::fmt;

use log::{debug, info};
use serde::Serialize;

use crate::binding::{EventBinder, PermissionBinder, RouteOutcome};
use crate::config::{Config, FunctionDescriptor, RouteMode};
use crate::core::cache::SharedArtifacts;
use crate::core::context::SynthesisContext;
use crate::core::error::SynthResult;
use crate::core::traits::{ComputeSpec, Identity, Substrate};
use crate::naming::{handle_key, NamingResolver};
use crate::partition::Partition;

const MAX_DESCRIPTION_LEN: usize = 250;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionState {
    Defined,
    Validated,
    Named,
    LayersResolved,
    RoleResolved,
    Created,
    PermissionsGranted,
    Routed,
    EventBound,
    Unbound,
    Done,
}

impl fmt::Display for FunctionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            FunctionState::Defined => "DEFINED",
            FunctionState::Validated => "VALIDATED",
            FunctionState::Named => "NAMED",
            FunctionState::LayersResolved => "LAYERS_RESOLVED",
            FunctionState::RoleResolved => "ROLE_RESOLVED",
            FunctionState::Created => "CREATED",
            FunctionState::PermissionsGranted => "PERMISSIONS_GRANTED",
            FunctionState::Routed => "ROUTED",
            FunctionState::EventBound => "EVENT_BOUND",
            FunctionState::Unbound => "UNBOUND",
            FunctionState::Done => "DONE",
        };
        write!(f, "{state}")
    }
}

/// Outcome for one descriptor
#[derive(Clone, Debug, Serialize)]
pub struct FunctionReport {
    pub index: usize,
    pub function_name: String,
    pub simple_name: String,
    pub handler: String,
    /// Binding reached before `DONE`
    pub binding: FunctionState,
    pub grants: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PartitionReport {
    pub index: usize,
    pub unit_name: String,
    pub functions: Vec<FunctionReport>,
}

impl PartitionReport {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

pub struct Orchestrator<'c> {
    config: &'c Config,
    naming: NamingResolver,
    permissions: PermissionBinder,
    events: EventBinder,
}

impl<'c> Orchestrator<'c> {
    pub fn new(config: &'c Config) -> Self {
        Self {
            config,
            naming: NamingResolver::new(&config.settings),
            permissions: PermissionBinder::from_config(config),
            events: EventBinder::from_config(config),
        }
    }

    pub fn naming(&self) -> &NamingResolver {
        &self.naming
    }

    /// Resolves names, layers and identity for one descriptor, without
    /// creating anything.
    pub fn compute_spec(
        &self,
        descriptor: &FunctionDescriptor,
        unit: &str,
        artifacts: &SharedArtifacts,
    ) -> SynthResult<ComputeSpec> {
        let defaults = &self.config.defaults;

        let simple_name = self.naming.simple_name(descriptor, defaults);
        let function_name = self.naming.function_name(descriptor, defaults);
        trace_state(&function_name, FunctionState::Named);

        let architecture = descriptor.architecture(defaults);
        let layers = descriptor
            .layer_names(defaults)
            .iter()
            .map(|name| {
                artifacts
                    .layers
                    .resolve(name, architecture, &function_name)
                    .map(|layer| layer.version.clone())
            })
            .collect::<SynthResult<Vec<_>>>()?;
        trace_state(&function_name, FunctionState::LayersResolved);

        let identity = match &descriptor.iam_role_name {
            Some(role) => {
                let role = artifacts.roles.resolve(role, &function_name)?;
                Identity::for_role(&role.name, &role.arn)
            }
            None => Identity::for_function(&function_name),
        };
        trace_state(&function_name, FunctionState::RoleResolved);

        let handler = descriptor.handler_symbol(defaults).to_string();
        let code_entry_root = descriptor.code_entry_root(defaults).to_string();
        let description = describe(unit, &function_name, &handler, &code_entry_root);

        Ok(ComputeSpec {
            unit: unit.to_string(),
            function_name,
            simple_name,
            description,
            handler,
            code_entry_root,
            code_entry_index: descriptor.code_entry_index(defaults),
            environment: descriptor
                .merged_environment(&self.config.common_env),
            memory_mb: descriptor.memory_mb(defaults),
            ephemeral_storage_mb: descriptor.ephemeral_storage_mb(),
            timeout: descriptor.timeout(defaults),
            architecture,
            layers,
            identity,
        })
    }

    /// Creates and binds every function of one partition. Empty partitions
    /// are a no-op.
    pub fn run_partition<S>(
        &self,
        ctx: &mut SynthesisContext,
        substrate: &mut S,
        partition: &Partition<'_>,
    ) -> SynthResult<PartitionReport>
    where
        S: Substrate + ?Sized,
    {
        let mut report = PartitionReport {
            index: partition.index,
            unit_name: partition.unit_name.clone(),
            functions: Vec::with_capacity(partition.view.len()),
        };
        if partition.is_empty() {
            debug!("Unit {} is empty; skipping", partition.unit_name);
            return Ok(report);
        }

        info!(
            "Building unit {} with {} functions",
            partition.unit_name,
            partition.view.len()
        );

        let defaults = &self.config.defaults;
        for (offset, descriptor) in partition.view.descriptors().iter().enumerate() {
            let index = partition.view.offset() + offset;

            let spec = self.compute_spec(descriptor, &partition.unit_name, ctx.artifacts())?;
            let compute = substrate.create(&spec)?;
            trace_state(&spec.function_name, FunctionState::Created);

            let key = handle_key(descriptor, defaults, &spec.function_name);
            ctx.register_handle(&key, compute.clone())?;

            let grants = self
                .permissions
                .bind(substrate, &compute, &spec.handler, &spec.environment)?;
            trace_state(&spec.function_name, FunctionState::PermissionsGranted);

            let mut route = None;
            if self.config.settings.route_mode == RouteMode::Inline {
                if let RouteOutcome::Bound { path, method } =
                    ctx.routes.bind(substrate, descriptor, defaults, &compute)?
                {
                    route = Some(format!("{method} {path}"));
                }
            }

            let events = self.events.bind(substrate, &compute, &spec.handler)?;

            let binding = if route.is_some() {
                FunctionState::Routed
            } else if !events.is_empty() {
                FunctionState::EventBound
            } else {
                FunctionState::Unbound
            };
            trace_state(&spec.function_name, binding);
            trace_state(&spec.function_name, FunctionState::Done);

            report.functions.push(FunctionReport {
                index,
                function_name: spec.function_name,
                simple_name: spec.simple_name,
                handler: spec.handler,
                binding,
                grants,
                route,
            });
        }

        Ok(report)
    }
}

fn trace_state(function_name: &str, state: FunctionState) {
    debug!("{function_name}: {state}");
}

/// `"<unit> <name>.<handler> code_src=<root>"`, cut to the substrate's limit
pub fn describe(unit: &str, function_name: &str, handler: &str, code_root: &str) -> String {
    let description = format!("{unit} {function_name}.{handler} code_src={code_root}");
    match description.char_indices().nth(MAX_DESCRIPTION_LEN) {
        Some((cut, _)) => description[..cut].to_string(),
        None => description,
    }
}
