use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which of the two compared datasets an error or value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Primary,
    Shadow,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Primary => f.write_str("primary"),
            Side::Shadow => f.write_str("shadow"),
        }
    }
}

/// Configuration or connectivity problem reported by `DataSource::validate`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct ValidationError {
    pub reason: String,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// I/O failure while fetching rows; wraps the backend error when there is one
#[derive(Error, Debug)]
#[error("{reason}")]
pub struct AccessError {
    pub reason: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AccessError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            cause: None,
        }
    }

    pub fn with_cause<E>(reason: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            reason: reason.into(),
            cause: Some(Box::new(cause)),
        }
    }
}

/// Structural problem with a comparison scheme, detected before any fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no data item is flagged unique; rows cannot be matched")]
    NoUniqueItems,

    #[error("data item code '{0}' is declared more than once")]
    DuplicateCode(String),

    #[error("data item #{0} has an empty code")]
    EmptyCode(usize),

    #[error("unknown data source kind '{0}'")]
    UnknownSourceKind(String),

    #[error("invalid options for '{kind}' source: {reason}")]
    InvalidSourceOptions { kind: String, reason: String },

    #[error("unsupported scheme version {0}")]
    UnsupportedSchemeVersion(u32),

    /// A source-level problem attributed to one side of the scheme
    #[error("{side} source is misconfigured: {source}")]
    Source {
        side: Side,
        #[source]
        source: Box<ConfigurationError>,
    },
}

impl ConfigurationError {
    /// Attribute this error to one side of the scheme
    pub fn on_side(self, side: Side) -> Self {
        ConfigurationError::Source {
            side,
            source: Box::new(self),
        }
    }

    pub fn side(&self) -> Option<Side> {
        match self {
            ConfigurationError::Source { side, .. } => Some(*side),
            _ => None,
        }
    }
}

/// Failure raised by a comparator, either while importing its configuration
/// or while comparing two values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ComparatorError {
    #[error("invalid comparator configuration: {0}")]
    InvalidConfig(String),

    #[error("values cannot be compared: {0}")]
    Incomparable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no {group} module named '{name}' is registered")]
    NotFound { group: String, name: String },

    #[error("{group} module '{name}' is already registered")]
    Collision { group: String, name: String },

    #[error("module '{name}' is a {actual}, not a {expected}")]
    WrongGroup {
        name: String,
        expected: String,
        actual: String,
    },
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid plugin archive {path}: {reason}")]
    InvalidArchive { path: String, reason: String },

    #[error("invalid plugin manifest in {path}: {reason}")]
    Manifest { path: String, reason: String },

    #[error("plugin {plugin} was not registered: {}", format_rejections(.rejected))]
    Rejected {
        plugin: String,
        rejected: Vec<RegistryError>,
    },
}

fn format_rejections(rejected: &[RegistryError]) -> String {
    rejected
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Terminal error of a comparison run or of a top-level operation
#[derive(Error, Debug)]
pub enum DataCmpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{side} source failed validation: {source}")]
    Validation {
        side: Side,
        #[source]
        source: ValidationError,
    },

    #[error("{side} source fetch failed: {source}")]
    Access {
        side: Side,
        #[source]
        source: AccessError,
    },

    #[error("Scheme error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("{side} source timed out during {operation} after {secs}s")]
    Timeout {
        side: Side,
        operation: String,
        secs: u64,
    },

    #[error("Comparison cancelled")]
    Cancelled,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),
}

impl DataCmpError {
    /// The side that caused the failure, when the failure belongs to one
    pub fn side(&self) -> Option<Side> {
        match self {
            DataCmpError::Validation { side, .. }
            | DataCmpError::Access { side, .. }
            | DataCmpError::Timeout { side, .. } => Some(*side),
            DataCmpError::Configuration(e) => e.side(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DataCmpError>;
