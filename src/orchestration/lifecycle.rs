//! Synthesis lifecycle
//!
//! Setup, partitions, freeze, then the route-only pass. Every error aborts the
//! run; nothing is retried.

use std::collections::{BTreeSet, HashMap};

use log::{debug, info};
use serde::Serialize;

use super::executor::{FunctionReport, FunctionState, Orchestrator, PartitionReport};
use crate::binding::{RouteBinder, RouteOutcome};
use crate::config::{Config, RouteMode};
use crate::core::cache::SharedArtifactsBuilder;
use crate::core::context::{FrozenContext, SynthesisContext};
use crate::core::error::SynthResult;
use crate::core::registry::ResourceHandleRegistry;
use crate::core::traits::{HandleOrigin, Substrate};
use crate::naming::resource_prefix;
use crate::partition::Partitioner;

/// Which deployment units to build. Functions in other units are treated as
/// existing and are imported by the route pass.
#[derive(Clone, Debug, Default)]
pub struct SynthesisOptions {
    pub units: Option<BTreeSet<usize>>,
}

impl SynthesisOptions {
    fn includes(&self, index: usize) -> bool {
        self.units.as_ref().map_or(true, |units| units.contains(&index))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RouteReport {
    pub function_name: String,
    pub method: String,
    pub path: String,
    pub imported: bool,
}

pub struct SynthesisOutput {
    pub registry: ResourceHandleRegistry,
    pub partitions: Vec<PartitionReport>,
    pub routes: Vec<RouteReport>,
}

pub fn synthesize<S>(config: &Config, substrate: &mut S) -> SynthResult<SynthesisOutput>
where
    S: Substrate + ?Sized,
{
    synthesize_with(config, substrate, &SynthesisOptions::default())
}

pub fn synthesize_with<S>(
    config: &Config,
    substrate: &mut S,
    options: &SynthesisOptions,
) -> SynthResult<SynthesisOutput>
where
    S: Substrate + ?Sized,
{
    let registry = config.registry();
    info!("Validating {} function descriptors", registry.len());
    registry.validate(config.settings.strict_routes)?;

    info!("Setup phase: registering shared artifacts");
    let artifacts = SharedArtifactsBuilder::from_config(config)?.freeze();
    let mut ctx = SynthesisContext::new(artifacts, RouteBinder::from_config(config));

    let orchestrator = Orchestrator::new(config);
    let partitioner = Partitioner::new(config.settings.num_partitions)?
        .with_capacity_hint(config.settings.estimated_function_count);
    let partitions = partitioner.partition(&registry, orchestrator.naming().prefix())?;

    info!("Partition phase: {} units", partitions.len());
    let mut reports = Vec::with_capacity(partitions.len());
    for partition in &partitions {
        if !options.includes(partition.index) {
            debug!("Unit {} not selected; skipping", partition.unit_name);
            continue;
        }
        reports.push(orchestrator.run_partition(&mut ctx, substrate, partition)?);
    }
    info!("Created {} functions", ctx.handle_count());

    let mut frozen = ctx.finish();

    let routes = match config.settings.route_mode {
        RouteMode::Deferred => {
            let routes = route_pass(config, &orchestrator, &mut frozen, substrate, false)?;
            mark_routed(&mut reports, &routes);
            routes
        }
        RouteMode::Inline => {
            let mut routes = inline_routes(&reports);
            if options.units.is_some() {
                // functions of unselected units were never bound inline
                routes.extend(route_pass(config, &orchestrator, &mut frozen, substrate, true)?);
            }
            routes
        }
    };

    Ok(SynthesisOutput {
        registry: frozen.into_registry(),
        partitions: reports,
        routes,
    })
}

/// Re-walks the unpartitioned registry and binds routes to handles from the
/// frozen registry, importing functions this run did not create. With
/// `imported_only`, functions created in this run are left alone.
fn route_pass<S>(
    config: &Config,
    orchestrator: &Orchestrator<'_>,
    frozen: &mut FrozenContext,
    substrate: &mut S,
    imported_only: bool,
) -> SynthResult<Vec<RouteReport>>
where
    S: Substrate + ?Sized,
{
    info!("Route pass over {} functions", config.functions.len());
    let defaults = &config.defaults;
    let mut routes = Vec::new();

    for descriptor in &config.functions {
        if descriptor.http_method.is_none() {
            continue;
        }
        let function_name = orchestrator.naming().function_name(descriptor, defaults);
        let compute = match frozen.handles.by_function_name(&function_name) {
            Some(_) if imported_only => continue,
            Some(handle) => handle.clone(),
            None => {
                debug!("{function_name} not created in this run; importing");
                substrate.import(&function_name)?
            }
        };

        if let RouteOutcome::Bound { path, method } =
            frozen.routes.bind(substrate, descriptor, defaults, &compute)?
        {
            routes.push(RouteReport {
                function_name,
                method: method.to_string(),
                path,
                imported: compute.origin == HandleOrigin::Imported,
            });
        }
    }

    info!("Bound {} routes", routes.len());
    Ok(routes)
}

/// Records routes bound after the partition phase in the per-function
/// reports, so that they show the final binding.
fn mark_routed(reports: &mut [PartitionReport], routes: &[RouteReport]) {
    let bound: HashMap<&str, &RouteReport> = routes
        .iter()
        .filter(|r| !r.imported)
        .map(|r| (r.function_name.as_str(), r))
        .collect();

    for function in reports.iter_mut().flat_map(|r| r.functions.iter_mut()) {
        if let Some(route) = bound.get(function.function_name.as_str()) {
            function.binding = FunctionState::Routed;
            function.route = Some(format!("{} {}", route.method, route.path));
        }
    }
}

fn inline_routes(reports: &[PartitionReport]) -> Vec<RouteReport> {
    reports
        .iter()
        .flat_map(|r| r.functions.iter())
        .filter_map(|f| {
            let (method, path) = f.route.as_deref()?.split_once(' ')?;
            Some(RouteReport {
                function_name: f.function_name.clone(),
                method: method.to_string(),
                path: path.to_string(),
                imported: false,
            })
        })
        .collect()
}

/// Partition layout with final names and resolved artifacts; creates
/// nothing.
pub fn plan(config: &Config) -> SynthResult<Vec<PartitionReport>> {
    let registry = config.registry();
    registry.validate(config.settings.strict_routes)?;

    let artifacts = SharedArtifactsBuilder::from_config(config)?.freeze();
    let orchestrator = Orchestrator::new(config);
    let partitions = Partitioner::new(config.settings.num_partitions)?
        .with_capacity_hint(config.settings.estimated_function_count)
        .partition(&registry, &resource_prefix(&config.settings))?;

    let mut seen = BTreeSet::new();
    let mut reports = Vec::with_capacity(partitions.len());
    for partition in &partitions {
        let mut functions = Vec::with_capacity(partition.view.len());
        for (offset, descriptor) in partition.view.descriptors().iter().enumerate() {
            let spec = orchestrator.compute_spec(descriptor, &partition.unit_name, &artifacts)?;
            if !seen.insert(spec.function_name.clone()) {
                return Err(crate::config_error!(
                    "Function name '{}' is derived by more than one descriptor",
                    spec.function_name
                ));
            }
            let route = match (descriptor.http_method, &descriptor.route_path) {
                (Some(method), Some(path)) => Some(format!("{method} {path}")),
                _ => None,
            };
            functions.push(FunctionReport {
                index: partition.view.offset() + offset,
                function_name: spec.function_name,
                simple_name: spec.simple_name,
                handler: spec.handler,
                binding: FunctionState::Validated,
                grants: 0,
                route,
            });
        }
        reports.push(PartitionReport {
            index: partition.index,
            unit_name: partition.unit_name.clone(),
            functions,
        });
    }
    Ok(reports)
}
