//! Comparison schemes: the data items plus the two configured sources.
//!
//! [`SchemeDocument`] is the saved, versioned form. Resolving it against a
//! [`ModuleRegistry`] produces a runnable [`ComparisonScheme`].

use crate::registry::{BindingError, ModuleRegistry};
use crate::sources::SourceDescriptor;
use datacmp_common::{
    Comparator, ConfigurationError, DataCmpError, DataItem, DataSource, Side,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::warn;

pub const SCHEME_VERSION: u32 = 1;

fn current_version() -> u32 {
    SCHEME_VERSION
}

/// Saved comparison scheme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemeDocument {
    #[serde(default = "current_version")]
    pub version: u32,
    #[serde(default)]
    pub name: String,
    pub items: Vec<DataItem>,
    pub primary: SourceDescriptor,
    pub shadow: SourceDescriptor,
}

impl SchemeDocument {
    pub fn new(
        name: impl Into<String>,
        items: Vec<DataItem>,
        primary: SourceDescriptor,
        shadow: SourceDescriptor,
    ) -> Self {
        Self {
            version: SCHEME_VERSION,
            name: name.into(),
            items,
            primary,
            shadow,
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, DataCmpError> {
        let document: SchemeDocument =
            toml::from_str(text).map_err(|e| DataCmpError::Serialization(e.to_string()))?;
        if document.version != SCHEME_VERSION {
            return Err(ConfigurationError::UnsupportedSchemeVersion(document.version).into());
        }
        Ok(document)
    }

    pub fn to_toml_string(&self) -> Result<String, DataCmpError> {
        toml::to_string_pretty(self).map_err(|e| DataCmpError::Serialization(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, DataCmpError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), DataCmpError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    pub fn descriptor(&self, side: Side) -> &SourceDescriptor {
        match side {
            Side::Primary => &self.primary,
            Side::Shadow => &self.shadow,
        }
    }

    /// Build live sources and comparators through `registry`.
    ///
    /// An unknown source kind or bad source options fail the whole scheme,
    /// naming the side at fault. An unknown or
    /// misconfigured comparator leaves that item without a comparator and
    /// records a warning on the scheme.
    pub fn resolve(&self, registry: &ModuleRegistry) -> Result<ComparisonScheme, ConfigurationError> {
        check_items(&self.items)?;

        let primary = registry
            .create_source(&self.primary)
            .map_err(|e| e.on_side(Side::Primary))?;
        let shadow = registry
            .create_source(&self.shadow)
            .map_err(|e| e.on_side(Side::Shadow))?;

        let mut scheme = ComparisonScheme::new(primary, shadow);
        scheme.name = self.name.clone();
        for item in &self.items {
            let comparator = match &item.comparator {
                None => None,
                Some(binding) => match registry.create_comparator(binding) {
                    Ok(comparator) => Some(comparator),
                    Err(e) => {
                        let warning = match e {
                            BindingError::Registry(_) => format!(
                                "comparator '{}' for item '{}' is unavailable; the column will not be compared",
                                binding.name, item.code
                            ),
                            BindingError::Config(e) => format!(
                                "comparator '{}' for item '{}' rejected its configuration ({}); the column will not be compared",
                                binding.name, item.code, e
                            ),
                        };
                        warn!("{}", warning);
                        scheme.warnings.push(warning);
                        None
                    }
                },
            };
            scheme.items.push(ResolvedItem {
                item: item.clone(),
                comparator,
            });
        }
        Ok(scheme)
    }
}

/// Structural checks every scheme must pass before any source is touched
pub fn check_items(items: &[DataItem]) -> Result<(), ConfigurationError> {
    let mut codes = HashSet::new();
    for (idx, item) in items.iter().enumerate() {
        if item.code.trim().is_empty() {
            return Err(ConfigurationError::EmptyCode(idx));
        }
        if !codes.insert(item.code.as_str()) {
            return Err(ConfigurationError::DuplicateCode(item.code.clone()));
        }
    }
    if !items.iter().any(|item| item.unique) {
        return Err(ConfigurationError::NoUniqueItems);
    }
    Ok(())
}

/// A data item together with its live comparator
pub struct ResolvedItem {
    pub item: DataItem,
    pub comparator: Option<Box<dyn Comparator>>,
}

impl ResolvedItem {
    pub fn new(item: DataItem, comparator: Option<Box<dyn Comparator>>) -> Self {
        Self { item, comparator }
    }
}

impl fmt::Debug for ResolvedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedItem")
            .field("item", &self.item)
            .field("comparator", &self.comparator.as_ref().map(|c| c.describe()))
            .finish()
    }
}

/// Runnable scheme. Each run owns its sources exclusively.
pub struct ComparisonScheme {
    pub name: String,
    pub items: Vec<ResolvedItem>,
    pub primary: Box<dyn DataSource>,
    pub shadow: Box<dyn DataSource>,
    /// Problems found while resolving that did not stop the scheme
    pub warnings: Vec<String>,
}

impl ComparisonScheme {
    pub fn new(primary: Box<dyn DataSource>, shadow: Box<dyn DataSource>) -> Self {
        Self {
            name: String::new(),
            items: Vec::new(),
            primary,
            shadow,
            warnings: Vec::new(),
        }
    }

    pub fn with_item(mut self, item: DataItem, comparator: Option<Box<dyn Comparator>>) -> Self {
        self.items.push(ResolvedItem::new(item, comparator));
        self
    }

    pub fn source(&self, side: Side) -> &dyn DataSource {
        match side {
            Side::Primary => self.primary.as_ref(),
            Side::Shadow => self.shadow.as_ref(),
        }
    }

    pub fn data_items(&self) -> impl Iterator<Item = &DataItem> {
        self.items.iter().map(|resolved| &resolved.item)
    }
}
