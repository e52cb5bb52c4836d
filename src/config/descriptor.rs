use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::core::error::{SynthError, SynthResult};

use super::Defaults;

pub const DEFAULT_EPHEMERAL_STORAGE_MB: u32 = 512;
pub const MAX_TIMEOUT_SECONDS: u64 = 15 * 60;

static ROUTE_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._~+{}-]+(?:/[A-Za-z0-9._~+{}-]+)*$").expect("valid route path regex")
});

#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HttpMethod {
    GET,
    POST,
    PUT,
    DELETE,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let method = match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::PUT => "PUT",
            HttpMethod::DELETE => "DELETE",
        };
        write!(f, "{}", method)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    #[default]
    Arm64,
    #[serde(alias = "amd64")]
    X86_64,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::X86_64 => write!(f, "x86_64"),
        }
    }
}

/// Function timeout, written as `{ minutes, seconds }` in configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "Timeout::validate_total"))]
pub struct Timeout {
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
}

impl Timeout {
    pub fn from_secs(seconds: u64) -> Self {
        Self {
            minutes: 0,
            seconds,
        }
    }

    /// Total length in seconds, `None` when it does not fit in a `u64`
    pub fn total_seconds(&self) -> Option<u64> {
        self.minutes.checked_mul(60)?.checked_add(self.seconds)
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.total_seconds().unwrap_or(u64::MAX))
    }

    fn validate_total(&self) -> Result<(), ValidationError> {
        match self.total_seconds() {
            Some(total) if (1..=MAX_TIMEOUT_SECONDS).contains(&total) => Ok(()),
            _ => {
                let mut err = ValidationError::new("timeout_out_of_range");
                err.add_param(Cow::from("field"), &"timeout");
                err.add_param(Cow::from("minutes"), &self.minutes);
                err.add_param(Cow::from("seconds"), &self.seconds);
                Err(err)
            }
        }
    }
}

/// One deployable unit of compute.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "FunctionDescriptor::validate_route_path"))]
pub struct FunctionDescriptor {
    #[serialize_always]
    #[serde(rename = "httpMethod")]
    pub http_method: Option<HttpMethod>,
    #[serialize_always]
    pub handler: Option<String>,
    #[serde(rename = "handlerFile")]
    pub handler_file: Option<String>,
    #[serde(rename = "codeEntryRoot")]
    pub code_entry_root: Option<String>,
    #[serde(rename = "routePath")]
    pub route_path: Option<String>,
    #[serde(rename = "memoryMB")]
    #[validate(range(min = 128))]
    pub memory_mb: Option<u32>,
    #[serde(rename = "ephemeralStorageMB")]
    #[validate(range(min = 512))]
    pub ephemeral_storage_mb: Option<u32>,
    #[validate(nested)]
    pub timeout: Option<Timeout>,
    pub architecture: Option<Architecture>,
    #[serde(rename = "layerNames", default, skip_serializing_if = "Vec::is_empty")]
    #[validate(custom(function = "FunctionDescriptor::validate_layer_names"))]
    pub layer_names: Vec<String>,
    #[serde(rename = "extraEnvVars", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_env_vars: BTreeMap<String, String>,
    #[serde(rename = "iamRoleName")]
    pub iam_role_name: Option<String>,
    #[serde(rename = "simpleName")]
    pub simple_name: Option<String>,
}

impl FunctionDescriptor {
    pub fn new(http_method: Option<HttpMethod>, handler: Option<&str>) -> Self {
        Self {
            http_method,
            handler: handler.map(str::to_string),
            ..Default::default()
        }
    }

    pub fn with_route_path(mut self, route_path: &str) -> Self {
        self.route_path = Some(route_path.to_string());
        self
    }

    pub fn with_handler_file(mut self, handler_file: &str) -> Self {
        self.handler_file = Some(handler_file.to_string());
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.extra_env_vars
            .insert(key.to_string(), value.to_string());
        self
    }

    /// True when the handler is absent, empty, or the generic default symbol.
    pub fn uses_default_handler(&self, defaults: &Defaults) -> bool {
        match self.handler.as_deref() {
            None | Some("") => true,
            Some(handler) => handler == defaults.handler,
        }
    }

    pub fn handler_symbol<'a>(&'a self, defaults: &'a Defaults) -> &'a str {
        match self.handler.as_deref() {
            Some(handler) if !handler.is_empty() => handler,
            _ => defaults.handler.as_str(),
        }
    }

    pub fn code_entry_index(&self, defaults: &Defaults) -> String {
        match &self.handler_file {
            Some(file) => file.clone(),
            None => format!(
                "{}.{}",
                self.handler_symbol(defaults),
                defaults.handler_extension
            ),
        }
    }

    pub fn code_entry_root<'a>(&'a self, defaults: &'a Defaults) -> &'a str {
        self.code_entry_root
            .as_deref()
            .unwrap_or(defaults.code_entry_root.as_str())
    }

    pub fn memory_mb(&self, defaults: &Defaults) -> u32 {
        self.memory_mb.unwrap_or(defaults.min_memory_mb)
    }

    pub fn ephemeral_storage_mb(&self) -> u32 {
        self.ephemeral_storage_mb
            .unwrap_or(DEFAULT_EPHEMERAL_STORAGE_MB)
    }

    /// Explicit timeout wins; otherwise gateway-exposed functions get the short
    /// API timeout and background functions the long one.
    pub fn timeout(&self, defaults: &Defaults) -> Duration {
        match (&self.timeout, self.http_method) {
            (Some(timeout), _) => timeout.as_duration(),
            (None, Some(_)) => Duration::from_secs(defaults.api_timeout_seconds),
            (None, None) => Duration::from_secs(defaults.background_timeout_seconds),
        }
    }

    pub fn architecture(&self, defaults: &Defaults) -> Architecture {
        self.architecture.unwrap_or(defaults.architecture)
    }

    pub fn layer_names(&self, defaults: &Defaults) -> Vec<String> {
        if self.layer_names.is_empty() {
            vec![defaults.layer.clone()]
        } else {
            self.layer_names.clone()
        }
    }

    /// Common environment overlaid with this descriptor's extra variables.
    pub fn merged_environment(
        &self,
        common: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut env = common.clone();
        env.extend(
            self.extra_env_vars
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        env
    }

    /// Identifying fields used in error messages and logs.
    pub fn label(&self) -> String {
        let method = self
            .http_method
            .map_or_else(|| "-".to_string(), |m| m.to_string());
        format!(
            "handler={} file={} route={} method={}",
            self.handler.as_deref().unwrap_or("<default>"),
            self.handler_file.as_deref().unwrap_or("-"),
            self.route_path.as_deref().unwrap_or("-"),
            method
        )
    }

    fn validate_route_path(&self) -> Result<(), ValidationError> {
        if let Some(path) = &self.route_path {
            if !ROUTE_PATH_RE.is_match(path) {
                let mut err = ValidationError::new("invalid_route_path");
                err.add_param(Cow::from("field"), &"routePath");
                err.add_param(Cow::from("value"), path);
                return Err(err);
            }
        }
        Ok(())
    }

    fn validate_layer_names(names: &[String]) -> Result<(), ValidationError> {
        if names.iter().any(|name| name.trim().is_empty()) {
            return Err(ValidationError::new("empty_layer_name"));
        }
        Ok(())
    }
}

/// Ordered list of descriptors plus the environment shared by all of them.
#[derive(Clone, Debug, Default)]
pub struct FunctionRegistry {
    functions: Vec<FunctionDescriptor>,
    common_env: BTreeMap<String, String>,
}

impl FunctionRegistry {
    pub fn new(common_env: BTreeMap<String, String>) -> Self {
        Self {
            functions: Vec::new(),
            common_env,
        }
    }

    pub fn from_parts(
        common_env: BTreeMap<String, String>,
        functions: Vec<FunctionDescriptor>,
    ) -> Self {
        Self {
            functions,
            common_env,
        }
    }

    pub fn append(&mut self, descriptor: FunctionDescriptor) {
        self.functions.push(descriptor);
    }

    pub fn list(&self) -> &[FunctionDescriptor] {
        &self.functions
    }

    pub fn common_environment(&self) -> &BTreeMap<String, String> {
        &self.common_env
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Typed checks over every descriptor. The first failure aborts with the
    /// dotted path of the offending field.
    pub fn validate(&self, strict_routes: bool) -> SynthResult<()> {
        for (index, descriptor) in self.functions.iter().enumerate() {
            if let Err(errors) = descriptor.validate() {
                let (field, message) = first_violation(&errors);
                return Err(SynthError::SchemaValidation {
                    path: format!("functions.{index}.{field}"),
                    message: format!("{message} ({})", descriptor.label()),
                });
            }

            if strict_routes {
                match (descriptor.http_method, &descriptor.route_path) {
                    (Some(method), None) => {
                        return Err(SynthError::SchemaValidation {
                            path: format!("functions.{index}.routePath"),
                            message: format!("'{method}' function requires a routePath"),
                        })
                    }
                    (None, Some(path)) => {
                        return Err(SynthError::SchemaValidation {
                            path: format!("functions.{index}.httpMethod"),
                            message: format!("routePath '{path}' requires an httpMethod"),
                        })
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

// Rust field names as reported by validator, mapped to their wire names
fn wire_name(field: &str) -> &str {
    match field {
        "http_method" => "httpMethod",
        "handler_file" => "handlerFile",
        "code_entry_root" => "codeEntryRoot",
        "route_path" => "routePath",
        "memory_mb" => "memoryMB",
        "ephemeral_storage_mb" => "ephemeralStorageMB",
        "layer_names" => "layerNames",
        "extra_env_vars" => "extraEnvVars",
        "iam_role_name" => "iamRoleName",
        "simple_name" => "simpleName",
        other => other,
    }
}

fn describe(err: &ValidationError) -> String {
    let mut message = err
        .message
        .as_ref()
        .map_or_else(|| err.code.to_string(), |m| m.to_string());
    let mut params: Vec<_> = err
        .params
        .iter()
        .filter(|(k, _)| k.as_ref() != "field")
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    params.sort();
    if !params.is_empty() {
        message = format!("{message} [{}]", params.join(", "));
    }
    message
}

/// Returns the dotted field path and message of the first violation, with
/// struct-level errors attributed to the field named in their params.
fn first_violation(errors: &ValidationErrors) -> (String, String) {
    let mut entries: Vec<_> = errors.errors().iter().collect();
    entries.sort_by_key(|(field, _)| field.to_string());

    for (field, kind) in entries {
        let field = field.to_string();
        match kind {
            ValidationErrorsKind::Field(errs) => {
                if let Some(err) = errs.first() {
                    let name = if field == "__all__" {
                        err.params
                            .get("field")
                            .and_then(|v| v.as_str())
                            .unwrap_or("__all__")
                            .to_string()
                    } else {
                        wire_name(&field).to_string()
                    };
                    return (name, describe(err));
                }
            }
            ValidationErrorsKind::Struct(inner) => {
                let (inner_field, message) = first_violation(inner);
                let outer = wire_name(&field);
                // schema-level errors on a nested struct already name the parent field
                if inner_field == outer || inner_field == "__all__" {
                    return (outer.to_string(), message);
                }
                return (format!("{outer}.{inner_field}"), message);
            }
            ValidationErrorsKind::List(items) => {
                if let Some((index, inner)) = items.iter().next() {
                    let (inner_field, message) = first_violation(inner);
                    return (
                        format!("{}.{index}.{inner_field}", wire_name(&field)),
                        message,
                    );
                }
            }
        }
    }
    ("__all__".to_string(), "validation failed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Defaults {
        Defaults::default()
    }

    #[test]
    fn test_defaults_for_background_function() {
        let d = FunctionDescriptor::new(None, None).with_handler_file("api_etl.py");
        let defaults = defaults();

        assert!(d.uses_default_handler(&defaults));
        assert_eq!(d.handler_symbol(&defaults), "lambda_handler");
        assert_eq!(d.code_entry_index(&defaults), "api_etl.py");
        assert_eq!(d.code_entry_root(&defaults), "api/runtime");
        assert_eq!(d.ephemeral_storage_mb(), 512);
        assert_eq!(d.memory_mb(&defaults), 512);
        assert_eq!(d.timeout(&defaults), Duration::from_secs(15 * 60));
        assert_eq!(d.architecture(&defaults), Architecture::Arm64);
        assert_eq!(d.layer_names(&defaults), vec!["psycopg3".to_string()]);
    }

    #[test]
    fn test_defaults_for_gateway_function() {
        let d = FunctionDescriptor::new(Some(HttpMethod::GET), Some("get_prior_therapy"));
        let defaults = defaults();

        assert!(!d.uses_default_handler(&defaults));
        assert_eq!(d.code_entry_index(&defaults), "get_prior_therapy.py");
        assert_eq!(d.timeout(&defaults), Duration::from_secs(60));
    }

    #[test]
    fn test_explicit_timeout_wins() {
        let mut d = FunctionDescriptor::new(Some(HttpMethod::POST), Some("h"));
        d.timeout = Some(Timeout {
            minutes: 2,
            seconds: 30,
        });
        assert_eq!(d.timeout(&defaults()), Duration::from_secs(150));
    }

    #[test]
    fn test_empty_handler_is_default() {
        let d = FunctionDescriptor::new(None, Some(""));
        assert!(d.uses_default_handler(&defaults()));
        assert_eq!(d.handler_symbol(&defaults()), "lambda_handler");
    }

    #[test]
    fn test_merged_environment_extra_wins() {
        let common = BTreeMap::from([
            ("LOG_LEVEL".to_string(), "INFO".to_string()),
            ("POOL".to_string(), "4".to_string()),
        ]);
        let d = FunctionDescriptor::new(None, None).with_env("LOG_LEVEL", "DEBUG");
        let env = d.merged_environment(&common);
        assert_eq!(env.get("LOG_LEVEL").map(String::as_str), Some("DEBUG"));
        assert_eq!(env.get("POOL").map(String::as_str), Some("4"));
    }

    #[test]
    fn test_validate_memory_minimum_reports_path() {
        let mut registry = FunctionRegistry::default();
        registry.append(FunctionDescriptor::new(None, None));
        let mut low = FunctionDescriptor::new(Some(HttpMethod::GET), Some("h"));
        low.memory_mb = Some(64);
        registry.append(low);

        match registry.validate(false) {
            Err(SynthError::SchemaValidation { path, .. }) => {
                assert_eq!(path, "functions.1.memoryMB")
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_timeout_range() {
        let mut d = FunctionDescriptor::new(None, None);
        d.timeout = Some(Timeout {
            minutes: 16,
            seconds: 0,
        });
        let registry = FunctionRegistry::from_parts(BTreeMap::new(), vec![d]);

        match registry.validate(false) {
            Err(SynthError::SchemaValidation { path, .. }) => {
                assert_eq!(path, "functions.0.timeout")
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_timeout_overflow() {
        let mut d = FunctionDescriptor::new(None, Some("h"));
        d.timeout = Some(Timeout {
            minutes: u64::MAX,
            seconds: 0,
        });
        assert_eq!(d.timeout.unwrap().total_seconds(), None);
        let registry = FunctionRegistry::from_parts(BTreeMap::new(), vec![d]);

        match registry.validate(false) {
            Err(SynthError::SchemaValidation { path, message }) => {
                assert_eq!(path, "functions.0.timeout");
                assert!(message.contains("timeout_out_of_range"));
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_route_path_syntax() {
        let d = FunctionDescriptor::new(Some(HttpMethod::GET), Some("h")).with_route_path("bad path");
        let registry = FunctionRegistry::from_parts(BTreeMap::new(), vec![d]);

        match registry.validate(false) {
            Err(SynthError::SchemaValidation { path, .. }) => {
                assert_eq!(path, "functions.0.routePath")
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_strict_routes_rejects_half_specified() {
        let d = FunctionDescriptor::new(Some(HttpMethod::GET), Some("h"));
        let registry = FunctionRegistry::from_parts(BTreeMap::new(), vec![d]);

        assert!(registry.validate(false).is_ok());
        match registry.validate(true) {
            Err(SynthError::SchemaValidation { path, .. }) => {
                assert_eq!(path, "functions.0.routePath")
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_serialize_keeps_nullable_required_keys() {
        let d = FunctionDescriptor::new(None, None);
        let yaml = serde_yaml::to_string(&d).unwrap();
        assert!(yaml.contains("httpMethod: null"));
        assert!(yaml.contains("handler: null"));
        assert!(!yaml.contains("routePath"));
    }
}
