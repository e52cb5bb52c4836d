//! Gateway route binding
//!
//! Route paths hang off a shared versioned root. Each path segment is created
//! once per `(parent, segment)` and reused by every later route, and a
//! `matchit` table over the full paths rejects a method bound twice.

use std::collections::{BTreeSet, HashMap};

use log::{debug, warn};
use matchit::{InsertError, Router as MatchRouter};

use crate::config::{Config, Defaults, FunctionDescriptor, HttpMethod};
use crate::core::error::{SynthError, SynthResult};
use crate::core::traits::{ComputeHandle, PathHandle, RouteRegistrar};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    Bound { path: String, method: HttpMethod },
    /// No method: the function is not reachable through the gateway
    NotExposed,
    /// A method without a route path
    MissingPath,
}

#[derive(Debug)]
struct RouteEntry {
    template: String,
    methods: BTreeSet<HttpMethod>,
}

pub struct RouteBinder {
    root_segments: Vec<String>,
    authorizer: Option<String>,
    no_auth_handlers: BTreeSet<String>,
    root: Option<PathHandle>,
    segments: HashMap<(usize, String), PathHandle>,
    table: MatchRouter<RouteEntry>,
}

impl RouteBinder {
    pub fn new(
        root_segments: Vec<String>,
        authorizer: Option<String>,
        no_auth_handlers: BTreeSet<String>,
    ) -> Self {
        Self {
            root_segments,
            authorizer,
            no_auth_handlers,
            root: None,
            segments: HashMap::new(),
            table: MatchRouter::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.gateway.root.clone(),
            config.gateway.authorizer.clone(),
            config.gateway.no_auth_handlers.clone(),
        )
    }

    /// Number of distinct path segments created so far, root excluded
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn bind<R>(
        &mut self,
        registrar: &mut R,
        descriptor: &FunctionDescriptor,
        defaults: &Defaults,
        compute: &ComputeHandle,
    ) -> SynthResult<RouteOutcome>
    where
        R: RouteRegistrar + ?Sized,
    {
        let Some(method) = descriptor.http_method else {
            return Ok(RouteOutcome::NotExposed);
        };
        let Some(route_path) = descriptor.route_path.as_deref() else {
            warn!(
                "{} has httpMethod {} but no routePath; skipping route",
                compute.function_name, method
            );
            return Ok(RouteOutcome::MissingPath);
        };

        let full_path = self.full_path(route_path);
        self.reserve(&full_path, method)?;

        let mut node = self.root(registrar)?;
        for segment in route_path.split('/').filter(|s| !s.is_empty()) {
            node = self.segment(registrar, &node, segment)?;
        }

        let handler = descriptor.handler_symbol(defaults);
        let authorizer = if self.no_auth_handlers.contains(handler) {
            None
        } else {
            self.authorizer.as_deref()
        };

        registrar.add_method(&node, method, compute, authorizer)?;
        debug!(
            "Bound {} {} to {} (authorizer: {})",
            method,
            full_path,
            compute.function_name,
            authorizer.unwrap_or("none")
        );

        Ok(RouteOutcome::Bound {
            path: full_path,
            method,
        })
    }

    fn full_path(&self, route_path: &str) -> String {
        let mut path = String::new();
        for segment in self
            .root_segments
            .iter()
            .map(String::as_str)
            .chain(route_path.split('/'))
            .filter(|s| !s.is_empty())
        {
            path.push('/');
            path.push_str(segment);
        }
        path
    }

    /// Records `(path, method)` in the route table, failing on a second
    /// binding of the same pair.
    fn reserve(&mut self, full_path: &str, method: HttpMethod) -> SynthResult<()> {
        let template = matchit_template(full_path);
        let conflict = || SynthError::RouteConflict {
            path: full_path.to_string(),
            method: method.to_string(),
        };

        if let Ok(found) = self.table.at_mut(&template) {
            if found.value.template == template {
                if !found.value.methods.insert(method) {
                    return Err(conflict());
                }
                return Ok(());
            }
        }

        let entry = RouteEntry {
            template: template.clone(),
            methods: BTreeSet::from([method]),
        };
        match self.table.insert(template.as_str(), entry) {
            Ok(()) => Ok(()),
            Err(InsertError::Conflict { with }) => {
                warn!("Route {} overlaps existing route {}", full_path, with);
                Err(conflict())
            }
            Err(e) => Err(crate::config_error!("Invalid route path {}: {}", full_path, e)),
        }
    }

    fn root<R>(&mut self, registrar: &mut R) -> SynthResult<PathHandle>
    where
        R: RouteRegistrar + ?Sized,
    {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        let root = registrar.gateway_root(&self.root_segments)?;
        self.root = Some(root.clone());
        Ok(root)
    }

    fn segment<R>(
        &mut self,
        registrar: &mut R,
        parent: &PathHandle,
        name: &str,
    ) -> SynthResult<PathHandle>
    where
        R: RouteRegistrar + ?Sized,
    {
        let key = (parent.id, name.to_string());
        if let Some(handle) = self.segments.get(&key) {
            return Ok(handle.clone());
        }
        let handle = registrar.add_path_segment(parent, name)?;
        self.segments.insert(key, handle.clone());
        Ok(handle)
    }
}

// `{proxy+}` greedy segments become matchit catch-alls
fn matchit_template(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            match segment
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix("+}"))
            {
                Some(name) => format!("{{*{name}}}"),
                None => segment.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
