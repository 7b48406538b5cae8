//! Modules compiled into the core.

use super::{LoaderContext, ModuleRegistration, ModuleRegistry, RegistrationReport};
use crate::comparators::{DefaultComparator, NumericComparator, RulesComparator};
use crate::sources::{CommandSource, MemorySource, SourceDescriptor};
use datacmp_common::{Comparator, ConfigurationError, DataSource};
use tracing::warn;

/// Produces one registration, or explains why the module is unavailable
pub type ModuleConstructor = fn() -> Result<ModuleRegistration, String>;

type SourceResult = Result<Box<dyn DataSource>, ConfigurationError>;

pub const BUILTIN_MODULES: &[ModuleConstructor] = &[
    memory_source,
    file_source,
    database_source,
    http_source,
    command_source,
    default_comparator,
    numeric_comparator,
    rules_comparator,
];

/// Register every built-in module into `registry` as one batch
pub fn register_builtins(registry: &ModuleRegistry) -> RegistrationReport {
    register_modules(registry, LoaderContext::Builtin, BUILTIN_MODULES)
}

/// Run each constructor and register what they produce. A constructor that
/// fails is logged and skipped; the rest still register.
pub fn register_modules(
    registry: &ModuleRegistry,
    context: LoaderContext,
    constructors: &[ModuleConstructor],
) -> RegistrationReport {
    let registrations = constructors
        .iter()
        .filter_map(|constructor| match constructor() {
            Ok(registration) => Some(registration),
            Err(e) => {
                warn!("Skipping {} module: {}", context, e);
                None
            }
        })
        .collect();
    registry.register_batch(context, registrations)
}

fn memory_source() -> Result<ModuleRegistration, String> {
    Ok(ModuleRegistration::datasource(
        MemorySource::KIND,
        "rows held in memory or inlined in the scheme",
        |d: &SourceDescriptor| -> SourceResult { Ok(Box::new(MemorySource::from_descriptor(d)?)) },
    ))
}

#[cfg(feature = "file-sources")]
fn file_source() -> Result<ModuleRegistration, String> {
    use crate::sources::FileSource;
    Ok(ModuleRegistration::datasource(
        FileSource::KIND,
        "delimited text or spreadsheet file",
        |d: &SourceDescriptor| -> SourceResult { Ok(Box::new(FileSource::from_descriptor(d)?)) },
    ))
}

#[cfg(not(feature = "file-sources"))]
fn file_source() -> Result<ModuleRegistration, String> {
    Err("built without the file-sources feature".to_string())
}

#[cfg(feature = "database")]
fn database_source() -> Result<ModuleRegistration, String> {
    use crate::sources::DatabaseSource;
    Ok(ModuleRegistration::datasource(
        DatabaseSource::KIND,
        "SQL query against a SQLite database",
        |d: &SourceDescriptor| -> SourceResult { Ok(Box::new(DatabaseSource::from_descriptor(d)?)) },
    ))
}

#[cfg(not(feature = "database"))]
fn database_source() -> Result<ModuleRegistration, String> {
    Err("built without the database feature".to_string())
}

#[cfg(feature = "http")]
fn http_source() -> Result<ModuleRegistration, String> {
    use crate::sources::HttpSource;
    Ok(ModuleRegistration::datasource(
        HttpSource::KIND,
        "JSON rows from an HTTP endpoint",
        |d: &SourceDescriptor| -> SourceResult { Ok(Box::new(HttpSource::from_descriptor(d)?)) },
    ))
}

#[cfg(not(feature = "http"))]
fn http_source() -> Result<ModuleRegistration, String> {
    Err("built without the http feature".to_string())
}

fn command_source() -> Result<ModuleRegistration, String> {
    Ok(ModuleRegistration::datasource(
        CommandSource::KIND,
        "JSON rows printed by an external program",
        |d: &SourceDescriptor| -> SourceResult { Ok(Box::new(CommandSource::from_descriptor(d)?)) },
    ))
}

fn default_comparator() -> Result<ModuleRegistration, String> {
    Ok(ModuleRegistration::comparator(
        DefaultComparator::KIND,
        || -> Box<dyn Comparator> { Box::new(DefaultComparator::new()) },
    ))
}

fn numeric_comparator() -> Result<ModuleRegistration, String> {
    Ok(ModuleRegistration::comparator(
        NumericComparator::KIND,
        || -> Box<dyn Comparator> { Box::new(NumericComparator::new()) },
    ))
}

fn rules_comparator() -> Result<ModuleRegistration, String> {
    Ok(ModuleRegistration::comparator(
        RulesComparator::KIND,
        || -> Box<dyn Comparator> { Box::new(RulesComparator::new()) },
    ))
}
