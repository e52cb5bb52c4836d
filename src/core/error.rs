//! Unified error handling for fnstack
//!
//! Every failure in a synthesis run is fatal: errors are propagated to the
//! caller unchanged and nothing is applied partially.

use std::fmt;

/// The cache a duplicate or missing entry was reported against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Layer,
    LayerAsset,
    Role,
    Handle,
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheKind::Layer => "layer",
            CacheKind::LayerAsset => "layer-asset",
            CacheKind::Role => "role",
            CacheKind::Handle => "compute-handle",
        };
        write!(f, "{name}")
    }
}

/// Unified error types for a synthesis run
#[derive(Debug)]
pub enum SynthError {
    /// Structural or range violation in the function registry
    SchemaValidation { path: String, message: String },

    /// Invalid partition bounds
    Range { begin: usize, end: usize },

    /// A layer referenced before it was registered
    UndefinedLayer {
        name: String,
        architecture: String,
        function: String,
    },

    /// A layer asset referenced before it was registered
    UndefinedLayerAsset { name: String, architecture: String },

    /// An execution role referenced before it was registered
    UndefinedRole { role: String, function: String },

    /// Re-registration of an existing key without the overwrite flag
    DuplicateCacheEntry { cache: CacheKind, key: String },

    /// Two descriptors bound the same method on the same gateway path
    RouteConflict { path: String, method: String },

    /// Configuration-related errors
    Configuration(String),

    /// File I/O errors
    Io(std::io::Error),

    /// Encoding or decoding of config and manifest documents
    Serialization(String),
}

impl fmt::Display for SynthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthError::SchemaValidation { path, message } => {
                write!(f, "Configuration validation failed at {path}: {message}")
            }
            SynthError::Range { begin, end } => {
                write!(f, "Invalid range specified: begin='{begin}' end='{end}'")
            }
            SynthError::UndefinedLayer {
                name,
                architecture,
                function,
            } => write!(
                f,
                "Layer '{name}-{architecture}' is not registered (referenced by '{function}')"
            ),
            SynthError::UndefinedLayerAsset { name, architecture } => {
                write!(f, "Layer asset '{name}-{architecture}' is not registered")
            }
            SynthError::UndefinedRole { role, function } => {
                write!(f, "Undefined IAM role '{role}' (referenced by '{function}')")
            }
            SynthError::DuplicateCacheEntry { cache, key } => {
                write!(f, "Duplicate {cache} entry '{key}' (overwrite=false)")
            }
            SynthError::RouteConflict { path, method } => {
                write!(f, "Route conflict: {method} {path} is already bound")
            }
            SynthError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            SynthError::Io(err) => write!(f, "I/O error: {err}"),
            SynthError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
        }
    }
}

impl std::error::Error for SynthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SynthError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SynthError {
    fn from(err: std::io::Error) -> Self {
        SynthError::Io(err)
    }
}

impl From<serde_yaml::Error> for SynthError {
    fn from(err: serde_yaml::Error) -> Self {
        SynthError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for SynthError {
    fn from(err: serde_json::Error) -> Self {
        SynthError::Serialization(err.to_string())
    }
}

/// Result type alias for synthesis operations
pub type SynthResult<T> = std::result::Result<T, SynthError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> SynthResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> SynthResult<T> {
        self.map_err(|e| SynthError::Configuration(format!("{context}: {e}")))
    }
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::error::SynthError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::SynthError::Configuration(format!($fmt, $($arg)*))
    };
}
