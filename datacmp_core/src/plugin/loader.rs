use super::manifest::{normalize_entry, ComparatorDecl, DataSourceDecl, PluginManifest};
use crate::comparators::configured_comparator;
use crate::registry::{LoaderContext, ModuleRegistration, ModuleRegistry};
use crate::sources::{CommandSource, SourceDescriptor};
use datacmp_common::{Comparator, ConfigurationError, DataSource, ModuleKey, PluginError};
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Length of the digest prefix in extraction directory names
const DIGEST_PREFIX_LEN: usize = 16;

/// A plugin archive that passed inspection and was registered
#[derive(Debug, Clone)]
pub struct LoadedPlugin {
    pub name: String,
    pub version: String,
    pub archive: PathBuf,
    pub root: PathBuf,
    pub modules: Vec<ModuleKey>,
}

#[derive(Debug, Clone)]
pub struct SkippedArchive {
    pub archive: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub loaded: Vec<LoadedPlugin>,
    pub skipped: Vec<SkippedArchive>,
}

impl DiscoveryReport {
    fn merge(&mut self, other: DiscoveryReport) {
        self.loaded.extend(other.loaded);
        self.skipped.extend(other.skipped);
    }
}

#[derive(Debug)]
struct InspectedArchive {
    path: PathBuf,
    manifest: PluginManifest,
    digest: String,
}

/// Extra options a scheme may pass to a plugin data source
#[derive(Debug, Default, Deserialize)]
struct PluginSourceOptions {
    #[serde(default)]
    args: Vec<String>,
}

/// Discovers plugin archives and registers the modules they declare.
///
/// Archives are inspected in parallel (open, read and check the manifest
/// against the entries) and then extracted and registered one at a time, so
/// the registry only ever sees whole plugins.
pub struct PluginLoader {
    cache_dir: PathBuf,
}

impl PluginLoader {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// `*.zip` files directly inside `dir`, sorted by path
    pub fn find_archives(dir: &Path) -> Result<Vec<PathBuf>, PluginError> {
        if !dir.is_dir() {
            return Err(PluginError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("plugin directory {} does not exist", dir.display()),
            )));
        }
        let pattern = dir.join("*.zip");
        let pattern = pattern.to_string_lossy();
        let paths = glob::glob(&pattern).map_err(|e| {
            PluginError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
        })?;

        let mut archives = paths
            .filter_map(|entry| match entry {
                Ok(path) if path.is_file() => Some(path),
                Ok(_) => None,
                Err(e) => {
                    warn!("Cannot read plugin directory entry: {}", e);
                    None
                }
            })
            .collect::<Vec<_>>();
        archives.sort();
        Ok(archives)
    }

    /// Scan one directory. Broken archives are reported as skipped, never as
    /// an error; only an unreadable directory fails the call.
    pub fn discover(&self, dir: &Path, registry: &ModuleRegistry) -> Result<DiscoveryReport, PluginError> {
        let archives = Self::find_archives(dir)?;
        debug!("Found {} plugin archive(s) in {}", archives.len(), dir.display());

        let inspected = archives
            .par_iter()
            .map(|path| (path.clone(), Self::inspect(path)))
            .collect::<Vec<_>>();

        let mut report = DiscoveryReport::default();
        for (path, outcome) in inspected {
            let loaded = outcome.and_then(|archive| self.load(archive, registry));
            match loaded {
                Ok(plugin) => {
                    info!(
                        "Loaded plugin {} {} from {} ({} module(s))",
                        plugin.name,
                        plugin.version,
                        path.display(),
                        plugin.modules.len()
                    );
                    report.loaded.push(plugin);
                }
                Err(e) => {
                    warn!("Skipping plugin archive {}: {}", path.display(), e);
                    report.skipped.push(SkippedArchive {
                        archive: path,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Scan several directories; a missing directory is logged and skipped
    pub fn discover_all(&self, dirs: &[PathBuf], registry: &ModuleRegistry) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for dir in dirs {
            match self.discover(dir, registry) {
                Ok(found) => report.merge(found),
                Err(e) => warn!("Cannot scan plugin directory {}: {}", dir.display(), e),
            }
        }
        report
    }

    fn inspect(path: &Path) -> Result<InspectedArchive, PluginError> {
        let invalid = |reason: String| PluginError::InvalidArchive {
            path: path.display().to_string(),
            reason,
        };

        let bytes = fs::read(path)?;
        let digest = blake3::hash(&bytes).to_hex().to_string();

        let mut archive = ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| invalid(format!("not a zip archive: {}", e)))?;

        let mut entries = HashSet::new();
        for i in 0..archive.len() {
            let file = archive
                .by_index(i)
                .map_err(|e| invalid(format!("unreadable entry #{}: {}", i, e)))?;
            if file.enclosed_name().is_none() {
                return Err(invalid(format!("entry '{}' escapes the archive root", file.name())));
            }
            if file.is_file() {
                if let Some(name) = normalize_entry(file.name()) {
                    entries.insert(name);
                }
            }
        }

        let text = {
            let mut file = archive
                .by_name(PluginManifest::FILE_NAME)
                .map_err(|_| invalid(format!("missing {}", PluginManifest::FILE_NAME)))?;
            let mut text = String::new();
            file.read_to_string(&mut text).map_err(|e| PluginError::Manifest {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            text
        };

        let manifest_error = |reason: String| PluginError::Manifest {
            path: path.display().to_string(),
            reason,
        };
        let manifest = PluginManifest::from_toml_str(&text).map_err(manifest_error)?;
        manifest
            .check(|entry| entries.contains(entry))
            .map_err(manifest_error)?;

        Ok(InspectedArchive {
            path: path.to_path_buf(),
            manifest,
            digest,
        })
    }

    /// Extract the archive into its cache directory unless an identical copy
    /// is already there
    fn extract(&self, archive: &InspectedArchive) -> Result<PathBuf, PluginError> {
        let dir_name = format!(
            "{}-{}",
            archive.manifest.plugin.name,
            &archive.digest[..DIGEST_PREFIX_LEN]
        );
        let root = self.cache_dir.join(&dir_name);
        if root.is_dir() {
            debug!("Reusing extracted plugin at {}", root.display());
            return Ok(root);
        }

        let staging = self.cache_dir.join(format!("{}.partial", dir_name));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let result = File::open(&archive.path)
            .map_err(PluginError::from)
            .and_then(|file| {
                ZipArchive::new(file).map_err(|e| PluginError::InvalidArchive {
                    path: archive.path.display().to_string(),
                    reason: e.to_string(),
                })
            })
            .and_then(|mut zip| {
                zip.extract(&staging).map_err(|e| PluginError::InvalidArchive {
                    path: archive.path.display().to_string(),
                    reason: format!("extraction failed: {}", e),
                })
            });
        if let Err(e) = result {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        for decl in &archive.manifest.datasources {
            if let Some(command) = normalize_entry(&decl.command) {
                mark_executable(&staging.join(command))?;
            }
        }

        fs::rename(&staging, &root)?;
        debug!("Extracted {} to {}", archive.path.display(), root.display());
        Ok(root)
    }

    fn load(&self, archive: InspectedArchive, registry: &ModuleRegistry) -> Result<LoadedPlugin, PluginError> {
        let root = self.extract(&archive)?;
        let manifest = &archive.manifest;

        let mut registrations = Vec::new();
        for decl in &manifest.datasources {
            registrations.push(datasource_registration(decl, &root));
        }
        for decl in &manifest.comparators {
            registrations.push(comparator_registration(decl));
        }

        let context = LoaderContext::Plugin {
            name: manifest.plugin.name.clone(),
            version: manifest.plugin.version.clone(),
            archive: archive.path.clone(),
            root: root.clone(),
        };
        let report = registry.register_batch(context, registrations);
        if !report.rejected.is_empty() {
            return Err(PluginError::Rejected {
                plugin: manifest.plugin.name.clone(),
                rejected: report.rejected,
            });
        }

        Ok(LoadedPlugin {
            name: manifest.plugin.name.clone(),
            version: manifest.plugin.version.clone(),
            archive: archive.path,
            root,
            modules: report.registered,
        })
    }
}

fn datasource_registration(decl: &DataSourceDecl, root: &Path) -> ModuleRegistration {
    let name = decl.name.clone();
    let program = normalize_entry(&decl.command)
        .map(|command| root.join(command))
        .unwrap_or_else(|| root.join(&decl.command));
    let args = decl.args.clone();
    let root = Arc::new(root.to_path_buf());
    let summary = decl
        .description
        .clone()
        .unwrap_or_else(|| format!("rows printed by {}", decl.command));

    ModuleRegistration::datasource(
        decl.name.clone(),
        summary,
        move |descriptor: &SourceDescriptor| -> Result<Box<dyn DataSource>, ConfigurationError> {
            let options: PluginSourceOptions = descriptor.options()?;
            let source = CommandSource::new(program.to_string_lossy(), args.clone())
                .with_kind(name.clone())
                .with_working_dir(root.as_path())
                .with_extra_args(options.args)
                .with_base(descriptor.base());
            Ok(Box::new(source))
        },
    )
}

fn comparator_registration(decl: &ComparatorDecl) -> ModuleRegistration {
    let base = decl.base.clone();
    let config = decl.config.clone();
    ModuleRegistration::comparator(decl.name.clone(), move || -> Box<dyn Comparator> {
        match configured_comparator(&base, &config) {
            Ok(comparator) => comparator,
            // The preset was checked during inspection
            Err(e) => {
                warn!("Preset over '{}' no longer imports ({}); using its defaults", base, e);
                crate::comparators::builtin_comparator(&base)
                    .unwrap_or_else(|| Box::new(crate::comparators::DefaultComparator::new()))
            }
        }
    })
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
