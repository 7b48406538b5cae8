//! Plugin archives: zip files carrying a `plugin.toml` manifest that declares
//! extra data sources (programs shipped in the archive) and comparator presets.

pub mod loader;
pub mod manifest;

pub use loader::{DiscoveryReport, LoadedPlugin, PluginLoader, SkippedArchive};
pub use manifest::{ComparatorDecl, DataSourceDecl, PluginInfo, PluginManifest};
