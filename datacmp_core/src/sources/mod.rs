pub mod command;
#[cfg(feature = "database")]
pub mod database;
#[cfg(feature = "file-sources")]
pub mod file;
#[cfg(feature = "http")]
pub mod http;
pub mod memory;
mod process;
pub mod script;

#[cfg(test)]
mod tests_backends;

pub use command::CommandSource;
#[cfg(feature = "database")]
pub use database::DatabaseSource;
#[cfg(feature = "file-sources")]
pub use file::{FileFormat, FileSource};
#[cfg(feature = "http")]
pub use http::HttpSource;
pub use memory::MemorySource;
pub use script::ScriptProcessor;

use datacmp_common::{AccessError, ConfigurationError, KeyMapping, Row, SourceBase};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Serialized form of a configured data source: the backend kind, the shared
/// settings and the kind-specific options the registry factory understands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: String,
    #[serde(default, skip_serializing_if = "KeyMapping::is_identity")]
    pub key_to_code: KeyMapping,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default = "empty_options")]
    pub options: serde_json::Value,
}

fn empty_options() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl SourceDescriptor {
    pub fn new(kind: impl Into<String>, options: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            key_to_code: KeyMapping::new(),
            script: None,
            options,
        }
    }

    pub fn with_key_to_code(mut self, key_to_code: KeyMapping) -> Self {
        self.key_to_code = key_to_code;
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn base(&self) -> SourceBase {
        SourceBase {
            key_to_code: self.key_to_code.clone(),
            script: self.script.clone(),
        }
    }

    /// Decode the kind-specific options
    pub fn options<T: DeserializeOwned>(&self) -> Result<T, ConfigurationError> {
        let options = if self.options.is_null() {
            empty_options()
        } else {
            self.options.clone()
        };
        serde_json::from_value(options).map_err(|e| ConfigurationError::InvalidSourceOptions {
            kind: self.kind.clone(),
            reason: e.to_string(),
        })
    }
}

/// Turn a decoded JSON document into rows; every element must be an object
pub(crate) fn rows_from_json(document: serde_json::Value, origin: &str) -> Result<Vec<Row>, AccessError> {
    let items = match document {
        serde_json::Value::Array(items) => items,
        other => {
            return Err(AccessError::new(format!(
                "{} returned {} instead of an array of rows",
                origin,
                json_kind(&other)
            )))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| {
            let kind = json_kind(&item);
            Row::from_json(item).ok_or_else(|| {
                AccessError::new(format!("{} row #{} is {} instead of an object", origin, idx + 1, kind))
            })
        })
        .collect()
}

pub(crate) fn rows_to_json(rows: &[Row]) -> serde_json::Value {
    serde_json::Value::Array(rows.iter().map(Row::to_json).collect())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
