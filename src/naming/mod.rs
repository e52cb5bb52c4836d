//! Function naming
//!
//! A descriptor's simple name comes from the first strategy in an ordered
//! chain that yields a non-empty value. The final unique name prefixes it with
//! the application, component and tier.

use crate::config::{Defaults, FunctionDescriptor, Settings};

pub trait NamingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self, descriptor: &FunctionDescriptor, defaults: &Defaults) -> Option<String>;
}

/// `simpleName` when the descriptor sets one
pub struct ExplicitName;

impl NamingStrategy for ExplicitName {
    fn name(&self) -> &'static str {
        "explicit-name"
    }

    fn resolve(&self, descriptor: &FunctionDescriptor, _defaults: &Defaults) -> Option<String> {
        descriptor.simple_name.clone()
    }
}

/// The route path, regardless of the handler. Nested paths are flattened.
pub struct RoutePath;

impl NamingStrategy for RoutePath {
    fn name(&self) -> &'static str {
        "route-path"
    }

    fn resolve(&self, descriptor: &FunctionDescriptor, _defaults: &Defaults) -> Option<String> {
        descriptor.route_path.as_deref().map(flatten_route_path)
    }
}

/// The code entry index, for functions using the generic default handler
pub struct EntryIndex;

impl NamingStrategy for EntryIndex {
    fn name(&self) -> &'static str {
        "entry-index"
    }

    fn resolve(&self, descriptor: &FunctionDescriptor, defaults: &Defaults) -> Option<String> {
        if !descriptor.uses_default_handler(defaults) {
            return None;
        }
        Some(flatten_entry_index(&descriptor.code_entry_index(defaults)))
    }
}

/// The handler symbol verbatim
pub struct HandlerSymbol;

impl NamingStrategy for HandlerSymbol {
    fn name(&self) -> &'static str {
        "handler-symbol"
    }

    fn resolve(&self, descriptor: &FunctionDescriptor, defaults: &Defaults) -> Option<String> {
        Some(descriptor.handler_symbol(defaults).to_string())
    }
}

/// `trials/{id}` becomes `trials_id`
pub fn flatten_route_path(path: &str) -> String {
    path.trim_matches('/')
        .replace('/', "_")
        .replace(['{', '}', '+'], "")
}

/// `./api/runtime/foo.py` becomes `api_runtime_foo`
pub fn flatten_entry_index(index: &str) -> String {
    let index = index.strip_prefix("./").unwrap_or(index);
    let stem = match index.rfind('.') {
        // only strip an extension on the last path component
        Some(dot) if !index[dot..].contains(['/', '\\']) && dot > 0 => &index[..dot],
        _ => index,
    };
    stem.replace(['/', '\\'], "_")
}

pub struct NamingResolver {
    strategies: Vec<Box<dyn NamingStrategy>>,
    prefix: String,
}

impl NamingResolver {
    pub fn new(settings: &Settings) -> Self {
        Self::with_strategies(
            settings,
            vec![
                Box::new(ExplicitName),
                Box::new(RoutePath),
                Box::new(EntryIndex),
                Box::new(HandlerSymbol),
            ],
        )
    }

    pub fn with_strategies(settings: &Settings, strategies: Vec<Box<dyn NamingStrategy>>) -> Self {
        Self {
            strategies,
            prefix: resource_prefix(settings),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn simple_name(&self, descriptor: &FunctionDescriptor, defaults: &Defaults) -> String {
        for strategy in &self.strategies {
            if let Some(name) = strategy
                .resolve(descriptor, defaults)
                .filter(|n| !n.is_empty())
            {
                log::trace!("Name '{}' resolved by {}", name, strategy.name());
                return name;
            }
        }
        // the handler-symbol strategy always yields at least the default handler
        descriptor.handler_symbol(defaults).to_string()
    }

    pub fn function_name(&self, descriptor: &FunctionDescriptor, defaults: &Defaults) -> String {
        gen_resource_name(&self.prefix, &self.simple_name(descriptor, defaults))
    }
}

/// `<app>-<component>-<tier>`
pub fn resource_prefix(settings: &Settings) -> String {
    format!(
        "{}-{}-{}",
        settings.app_name, settings.component, settings.tier
    )
}

pub fn gen_resource_name(prefix: &str, simple_name: &str) -> String {
    format!("{prefix}-{simple_name}")
}

/// Key a compute handle is registered under: the final function name for
/// generic-handler functions, else the handler symbol.
pub fn handle_key(
    descriptor: &FunctionDescriptor,
    defaults: &Defaults,
    function_name: &str,
) -> String {
    if descriptor.uses_default_handler(defaults) {
        function_name.to_string()
    } else {
        descriptor.handler_symbol(defaults).to_string()
    }
}
