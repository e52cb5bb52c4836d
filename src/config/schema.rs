//! Closed structural schema for function descriptors
//!
//! Runs over the raw YAML document before typed decoding, so that typos and
//! wrong types are reported with the dotted path of the offending field
//! instead of a generic decode error.

use serde_yaml::{Mapping, Value as YamlValue};

use crate::core::error::{SynthError, SynthResult};

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE"];
const ARCHITECTURES: &[&str] = &["arm64", "x86_64", "amd64"];
const TIMEOUT_KEYS: &[&str] = &["minutes", "seconds"];

#[derive(Clone, Copy, Debug)]
enum FieldType {
    /// One of the listed strings, or null
    NullableEnum(&'static [&'static str]),
    NullableString,
    String,
    Enum(&'static [&'static str]),
    Integer { minimum: u64, maximum: u64 },
    StringArray,
    StringMap,
    Timeout,
}

struct Field {
    name: &'static str,
    required: bool,
    ty: FieldType,
}

const FIELDS: &[Field] = &[
    Field {
        name: "httpMethod",
        required: true,
        ty: FieldType::NullableEnum(HTTP_METHODS),
    },
    Field {
        name: "handler",
        required: true,
        ty: FieldType::NullableString,
    },
    Field {
        name: "handlerFile",
        required: false,
        ty: FieldType::String,
    },
    Field {
        name: "routePath",
        required: false,
        ty: FieldType::String,
    },
    Field {
        name: "ephemeralStorageMB",
        required: false,
        ty: FieldType::Integer {
            minimum: 512,
            maximum: u32::MAX as u64,
        },
    },
    Field {
        name: "memoryMB",
        required: false,
        ty: FieldType::Integer {
            minimum: 128,
            maximum: u32::MAX as u64,
        },
    },
    Field {
        name: "timeout",
        required: false,
        ty: FieldType::Timeout,
    },
    Field {
        name: "codeEntryRoot",
        required: false,
        ty: FieldType::String,
    },
    Field {
        name: "layerNames",
        required: false,
        ty: FieldType::StringArray,
    },
    Field {
        name: "extraEnvVars",
        required: false,
        ty: FieldType::StringMap,
    },
    Field {
        name: "architecture",
        required: false,
        ty: FieldType::Enum(ARCHITECTURES),
    },
    Field {
        name: "iamRoleName",
        required: false,
        ty: FieldType::String,
    },
    Field {
        name: "simpleName",
        required: false,
        ty: FieldType::String,
    },
];

fn violation(path: String, message: impl Into<String>) -> SynthError {
    SynthError::SchemaValidation {
        path,
        message: message.into(),
    }
}

/// Validates the `functions` list of a whole configuration document. A missing
/// list is an empty registry.
pub fn validate_document(doc: &YamlValue) -> SynthResult<()> {
    match doc.get("functions") {
        None | Some(YamlValue::Null) => Ok(()),
        Some(YamlValue::Sequence(items)) => validate(items),
        Some(_) => Err(violation(
            "functions".to_string(),
            "expected a list of function descriptors",
        )),
    }
}

/// Checks every descriptor against the closed schema. The first violation
/// aborts with its dotted path.
pub fn validate(list: &[YamlValue]) -> SynthResult<()> {
    for (index, item) in list.iter().enumerate() {
        let path = format!("functions.{index}");
        match item {
            YamlValue::Mapping(mapping) => check_descriptor(&path, mapping)?,
            _ => return Err(violation(path, "expected a mapping")),
        }
    }
    Ok(())
}

fn check_descriptor(path: &str, mapping: &Mapping) -> SynthResult<()> {
    for field in FIELDS.iter().filter(|f| f.required) {
        if !mapping.contains_key(field.name) {
            return Err(violation(
                path.to_string(),
                format!("'{}' is a required property", field.name),
            ));
        }
    }

    for (key, value) in mapping {
        let Some(key) = key.as_str() else {
            return Err(violation(path.to_string(), "property names must be strings"));
        };
        let field_path = format!("{path}.{key}");
        let Some(field) = FIELDS.iter().find(|f| f.name == key) else {
            return Err(violation(
                field_path,
                format!("additional property '{key}' is not allowed"),
            ));
        };
        check_field(&field_path, field.ty, value)?;
    }
    Ok(())
}

fn check_field(path: &str, ty: FieldType, value: &YamlValue) -> SynthResult<()> {
    match ty {
        FieldType::NullableEnum(allowed) => match value {
            YamlValue::Null => Ok(()),
            YamlValue::String(s) if allowed.contains(&s.as_str()) => Ok(()),
            _ => Err(violation(
                path.to_string(),
                format!("{} is not one of {allowed:?} or null", render(value)),
            )),
        },
        FieldType::NullableString => match value {
            YamlValue::Null | YamlValue::String(_) => Ok(()),
            _ => Err(violation(
                path.to_string(),
                format!("{} is not of type string or null", render(value)),
            )),
        },
        FieldType::String => expect_string(path, value),
        FieldType::Enum(allowed) => match value {
            YamlValue::String(s) if allowed.contains(&s.as_str()) => Ok(()),
            _ => Err(violation(
                path.to_string(),
                format!("{} is not one of {allowed:?}", render(value)),
            )),
        },
        FieldType::Integer { minimum, maximum } => match value.as_u64() {
            Some(n) if n < minimum => Err(violation(
                path.to_string(),
                format!("{n} is less than the minimum of {minimum}"),
            )),
            Some(n) if n > maximum => Err(violation(
                path.to_string(),
                format!("{n} is greater than the maximum of {maximum}"),
            )),
            Some(_) => Ok(()),
            None => Err(violation(
                path.to_string(),
                format!("{} is not of type integer", render(value)),
            )),
        },
        FieldType::StringArray => match value {
            YamlValue::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    expect_string(&format!("{path}.{i}"), item)?;
                }
                Ok(())
            }
            _ => Err(violation(
                path.to_string(),
                format!("{} is not of type array", render(value)),
            )),
        },
        FieldType::StringMap => match value {
            YamlValue::Mapping(entries) => {
                for (k, v) in entries {
                    let Some(k) = k.as_str() else {
                        return Err(violation(path.to_string(), "keys must be strings"));
                    };
                    expect_string(&format!("{path}.{k}"), v)?;
                }
                Ok(())
            }
            _ => Err(violation(
                path.to_string(),
                format!("{} is not of type object", render(value)),
            )),
        },
        FieldType::Timeout => match value {
            YamlValue::Mapping(entries) => {
                for (k, v) in entries {
                    let key = k.as_str().unwrap_or_default();
                    let field_path = format!("{path}.{key}");
                    if !TIMEOUT_KEYS.contains(&key) {
                        return Err(violation(
                            field_path,
                            format!("additional property '{key}' is not allowed"),
                        ));
                    }
                    if v.as_u64().is_none() {
                        return Err(violation(
                            field_path,
                            format!("{} is not of type integer", render(v)),
                        ));
                    }
                }
                Ok(())
            }
            _ => Err(violation(
                path.to_string(),
                format!("{} is not of type object", render(value)),
            )),
        },
    }
}

fn expect_string(path: &str, value: &YamlValue) -> SynthResult<()> {
    match value {
        YamlValue::String(_) => Ok(()),
        _ => Err(violation(
            path.to_string(),
            format!("{} is not of type string", render(value)),
        )),
    }
}

fn render(value: &YamlValue) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_string())
        .unwrap_or_else(|_| "<unprintable>".to_string())
}
