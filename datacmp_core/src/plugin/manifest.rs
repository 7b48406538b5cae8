use crate::comparators::configured_comparator;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path};

/// `plugin.toml` at the root of a plugin archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub plugin: PluginInfo,
    #[serde(default, rename = "datasource", skip_serializing_if = "Vec::is_empty")]
    pub datasources: Vec<DataSourceDecl>,
    #[serde(default, rename = "comparator", skip_serializing_if = "Vec::is_empty")]
    pub comparators: Vec<ComparatorDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A data source backed by a program shipped inside the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceDecl {
    pub name: String,
    /// Archive-relative path of the program to run
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A preset over one of the built-in comparator kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparatorDecl {
    pub name: String,
    pub base: String,
    #[serde(default)]
    pub config: String,
}

impl PluginManifest {
    pub const FILE_NAME: &'static str = "plugin.toml";

    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    pub fn to_toml_string(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| e.to_string())
    }

    /// Structural checks against the archive contents. `has_entry` answers
    /// whether a normalized archive path exists as a file.
    pub fn check(&self, has_entry: impl Fn(&str) -> bool) -> Result<(), String> {
        let name = self.plugin.name.trim();
        if name.is_empty() {
            return Err("plugin name is empty".to_string());
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(format!("plugin name '{}' has characters outside [A-Za-z0-9._-]", name));
        }
        if self.plugin.version.trim().is_empty() {
            return Err("plugin version is empty".to_string());
        }
        if self.datasources.is_empty() && self.comparators.is_empty() {
            return Err("manifest declares no modules".to_string());
        }

        let mut seen = HashSet::new();
        for decl in &self.datasources {
            if decl.name.trim().is_empty() {
                return Err("a datasource has an empty name".to_string());
            }
            if !seen.insert(decl.name.as_str()) {
                return Err(format!("datasource '{}' declared twice", decl.name));
            }
            let command = normalize_entry(&decl.command)
                .ok_or_else(|| format!("datasource '{}' command '{}' escapes the archive", decl.name, decl.command))?;
            if !has_entry(&command) {
                return Err(format!(
                    "datasource '{}' command '{}' is not in the archive",
                    decl.name, decl.command
                ));
            }
        }

        seen.clear();
        for decl in &self.comparators {
            if decl.name.trim().is_empty() {
                return Err("a comparator has an empty name".to_string());
            }
            if !seen.insert(decl.name.as_str()) {
                return Err(format!("comparator '{}' declared twice", decl.name));
            }
            configured_comparator(&decl.base, &decl.config)
                .map_err(|e| format!("comparator '{}': {}", decl.name, e))?;
        }
        Ok(())
    }
}

/// Archive path with `./` prefixes removed, or `None` when it is absolute or
/// climbs out of the archive root
pub(crate) fn normalize_entry(path: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
