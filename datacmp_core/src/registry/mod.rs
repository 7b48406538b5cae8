//! Module registry: maps `(group, name)` to factories for data sources and
//! comparators, whether compiled in or supplied by plugin archives.

pub mod builtin;

pub use builtin::{register_builtins, register_modules, ModuleConstructor, BUILTIN_MODULES};

use crate::sources::SourceDescriptor;
use datacmp_common::{
    CollisionPolicy, Comparator, ComparatorBinding, ComparatorError, ConfigurationError, DataSource,
    ModuleGroup, ModuleKey, RegistryError,
};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Builds a configured data source from its descriptor
pub trait DataSourceFactory: Send + Sync {
    fn create(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn DataSource>, ConfigurationError>;
}

impl<F> DataSourceFactory for F
where
    F: Fn(&SourceDescriptor) -> Result<Box<dyn DataSource>, ConfigurationError> + Send + Sync,
{
    fn create(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn DataSource>, ConfigurationError> {
        self(descriptor)
    }
}

/// Builds a comparator with its default (or preset) configuration
pub trait ComparatorFactory: Send + Sync {
    fn create(&self) -> Box<dyn Comparator>;
}

impl<F> ComparatorFactory for F
where
    F: Fn() -> Box<dyn Comparator> + Send + Sync,
{
    fn create(&self) -> Box<dyn Comparator> {
        self()
    }
}

#[derive(Clone)]
pub enum ModuleFactory {
    DataSource(Arc<dyn DataSourceFactory>),
    Comparator(Arc<dyn ComparatorFactory>),
}

impl ModuleFactory {
    pub fn group(&self) -> ModuleGroup {
        match self {
            ModuleFactory::DataSource(_) => ModuleGroup::DataSource,
            ModuleFactory::Comparator(_) => ModuleGroup::Comparator,
        }
    }
}

impl fmt::Debug for ModuleFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleFactory::{}", self.group())
    }
}

/// Where a batch of modules came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderContext {
    /// Compiled into the core
    Builtin,
    /// Loaded from a plugin archive, extracted under `root`
    Plugin {
        name: String,
        version: String,
        archive: PathBuf,
        root: PathBuf,
    },
    /// Registered programmatically by an embedding application
    Manual(String),
}

impl fmt::Display for LoaderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderContext::Builtin => f.write_str("builtin"),
            LoaderContext::Plugin { name, version, .. } => write!(f, "plugin:{}@{}", name, version),
            LoaderContext::Manual(label) => write!(f, "manual:{}", label),
        }
    }
}

/// One module offered to the registry
#[derive(Debug, Clone)]
pub struct ModuleRegistration {
    pub key: ModuleKey,
    pub factory: ModuleFactory,
    pub summary: String,
}

impl ModuleRegistration {
    pub fn datasource<F>(name: impl Into<String>, summary: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&SourceDescriptor) -> Result<Box<dyn DataSource>, ConfigurationError> + Send + Sync + 'static,
    {
        Self {
            key: ModuleKey::datasource(name),
            factory: ModuleFactory::DataSource(Arc::new(factory)),
            summary: summary.into(),
        }
    }

    pub fn comparator<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Comparator> + Send + Sync + 'static,
    {
        let summary = factory.create().describe();
        Self {
            key: ModuleKey::comparator(name),
            factory: ModuleFactory::Comparator(Arc::new(factory)),
            summary,
        }
    }
}

struct RegistryEntry {
    factory: ModuleFactory,
    origin: LoaderContext,
    summary: String,
}

/// Snapshot of one registry entry for listings
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub group: ModuleGroup,
    pub name: String,
    pub origin: String,
    pub summary: String,
}

/// A registration that replaced an existing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    pub key: ModuleKey,
    pub previous: LoaderContext,
    pub replacement: LoaderContext,
}

/// Outcome of one registration batch
#[derive(Debug, Clone, Default)]
pub struct RegistrationReport {
    pub registered: Vec<ModuleKey>,
    pub overridden: Vec<Override>,
    pub rejected: Vec<RegistryError>,
}

/// Notified after every registration batch
pub trait DiscoveryObserver: Send + Sync {
    fn on_modules_discovered(
        &self,
        context: &LoaderContext,
        discovered: &[ModuleKey],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Thread-safe registry of data source and comparator factories.
///
/// Writes happen one batch at a time under a single write lock, so a reader
/// sees either none or all of a batch. Lookups return cloned factory handles
/// and never hold the lock while a factory runs.
pub struct ModuleRegistry {
    entries: RwLock<HashMap<ModuleKey, RegistryEntry>>,
    observers: RwLock<Vec<Arc<dyn DiscoveryObserver>>>,
    policy: RwLock<CollisionPolicy>,
    /// Serializes the check-then-register of [`ModuleRegistry::ensure_builtins`]
    builtins_guard: Mutex<()>,
}

static GLOBAL: OnceLock<ModuleRegistry> = OnceLock::new();

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::with_policy(CollisionPolicy::default())
    }

    pub fn with_policy(policy: CollisionPolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            policy: RwLock::new(policy),
            builtins_guard: Mutex::new(()),
        }
    }

    /// Registry with every built-in module registered
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        register_builtins(&registry);
        registry
    }

    /// Process-wide registry; empty until [`ModuleRegistry::init`] runs
    pub fn global() -> &'static ModuleRegistry {
        GLOBAL.get_or_init(ModuleRegistry::new)
    }

    /// Register the built-ins into the process-wide registry when it holds
    /// none yet
    pub fn init() -> &'static ModuleRegistry {
        let registry = Self::global();
        registry.ensure_builtins();
        registry
    }

    /// Register the built-ins unless some are already present. Concurrent
    /// callers register them once; returns whether this call did.
    pub fn ensure_builtins(&self) -> bool {
        let _guard = self.builtins_guard.lock().unwrap_or_else(PoisonError::into_inner);
        let has_builtins = self
            .read_entries()
            .values()
            .any(|entry| entry.origin == LoaderContext::Builtin);
        if has_builtins {
            return false;
        }
        register_builtins(self);
        true
    }

    /// Drop every entry and observer and restore the default policy
    pub fn reset(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.observers.write().unwrap_or_else(PoisonError::into_inner).clear();
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = CollisionPolicy::default();
        debug!("Module registry reset");
    }

    pub fn set_policy(&self, policy: CollisionPolicy) {
        *self.policy.write().unwrap_or_else(PoisonError::into_inner) = policy;
    }

    pub fn policy(&self) -> CollisionPolicy {
        *self.policy.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_observer(&self, observer: Arc<dyn DiscoveryObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ModuleKey, RegistryEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a batch of modules from one origin, then notify observers.
    ///
    /// A batch is all-or-nothing: when any registration is malformed, or
    /// collides with an existing entry under [`CollisionPolicy::Reject`],
    /// nothing from the batch is registered and every problem is reported.
    pub fn register_batch(
        &self,
        context: LoaderContext,
        registrations: Vec<ModuleRegistration>,
    ) -> RegistrationReport {
        let policy = self.policy();
        let mut report = RegistrationReport::default();

        {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

            for registration in &registrations {
                let key = &registration.key;
                if registration.factory.group() != key.group {
                    report.rejected.push(RegistryError::WrongGroup {
                        name: key.name.clone(),
                        expected: key.group.to_string(),
                        actual: registration.factory.group().to_string(),
                    });
                    continue;
                }
                if policy == CollisionPolicy::Reject {
                    if let Some(existing) = entries.get(key) {
                        warn!(
                            "Refusing {} from {}: already provided by {}",
                            key, context, existing.origin
                        );
                        report.rejected.push(RegistryError::Collision {
                            group: key.group.to_string(),
                            name: key.name.clone(),
                        });
                    }
                }
            }

            if !report.rejected.is_empty() {
                warn!(
                    "Discarding all {} module(s) from {}: {} registration(s) rejected",
                    registrations.len(),
                    context,
                    report.rejected.len()
                );
                return report;
            }

            for registration in registrations {
                let key = registration.key.clone();
                if let Some(existing) = entries.get(&key) {
                    warn!(
                        "{} from {} overrides the one from {}",
                        key, context, existing.origin
                    );
                    report.overridden.push(Override {
                        key: key.clone(),
                        previous: existing.origin.clone(),
                        replacement: context.clone(),
                    });
                }

                entries.insert(
                    key.clone(),
                    RegistryEntry {
                        factory: registration.factory,
                        origin: context.clone(),
                        summary: registration.summary,
                    },
                );
                report.registered.push(key);
            }
        }

        info!(
            "Registered {} module(s) from {} ({} overridden)",
            report.registered.len(),
            context,
            report.overridden.len()
        );

        self.notify(&context, &report.registered);
        report
    }

    fn notify(&self, context: &LoaderContext, discovered: &[ModuleKey]) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (idx, observer) in observers.iter().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                observer.on_modules_discovered(context, discovered)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Discovery observer #{} failed for {}: {}", idx, context, e),
                Err(_) => warn!("Discovery observer #{} panicked for {}", idx, context),
            }
        }
    }

    pub fn lookup(&self, group: ModuleGroup, name: &str) -> Result<ModuleFactory, RegistryError> {
        self.read_entries()
            .get(&ModuleKey::new(group, name))
            .map(|entry| entry.factory.clone())
            .ok_or_else(|| RegistryError::NotFound {
                group: group.to_string(),
                name: name.to_string(),
            })
    }

    /// Origin of a registered module
    pub fn origin(&self, key: &ModuleKey) -> Option<LoaderContext> {
        self.read_entries().get(key).map(|entry| entry.origin.clone())
    }

    pub fn contains(&self, key: &ModuleKey) -> bool {
        self.read_entries().contains_key(key)
    }

    /// Build a data source for `descriptor` through the factory registered
    /// under its kind
    pub fn create_source(&self, descriptor: &SourceDescriptor) -> Result<Box<dyn DataSource>, ConfigurationError> {
        match self.lookup(ModuleGroup::DataSource, &descriptor.kind) {
            Ok(ModuleFactory::DataSource(factory)) => factory.create(descriptor),
            _ => Err(ConfigurationError::UnknownSourceKind(descriptor.kind.clone())),
        }
    }

    /// Build a comparator for `binding` and import its configuration
    pub fn create_comparator(&self, binding: &ComparatorBinding) -> Result<Box<dyn Comparator>, BindingError> {
        let factory = match self.lookup(ModuleGroup::Comparator, &binding.name)? {
            ModuleFactory::Comparator(factory) => factory,
            other => {
                return Err(BindingError::Registry(RegistryError::WrongGroup {
                    name: binding.name.clone(),
                    expected: ModuleGroup::Comparator.to_string(),
                    actual: other.group().to_string(),
                }))
            }
        };
        let mut comparator = factory.create();
        if !binding.config.is_empty() {
            comparator.import_config(&binding.config)?;
        }
        Ok(comparator)
    }

    /// Sorted snapshot of every entry
    pub fn list(&self) -> Vec<ModuleInfo> {
        let mut modules = self
            .read_entries()
            .iter()
            .map(|(key, entry)| ModuleInfo {
                group: key.group,
                name: key.name.clone(),
                origin: entry.origin.to_string(),
                summary: entry.summary.clone(),
            })
            .collect::<Vec<_>>();
        modules.sort_by(|a, b| (a.group, &a.name).cmp(&(b.group, &b.name)));
        modules
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a comparator binding could not be turned into a comparator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Config(#[from] ComparatorError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparators::{DefaultComparator, NumericComparator, RulesComparator};
    use crate::sources::MemorySource;
    use datacmp_common::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn rules_registration(name: &str, program: &'static str) -> ModuleRegistration {
        ModuleRegistration::comparator(name, move || -> Box<dyn Comparator> {
            Box::new(RulesComparator::from_program(program).unwrap_or_default())
        })
    }

    #[test]
    fn test_lookup_not_found_is_recoverable() {
        let registry = ModuleRegistry::new();
        let err = registry.lookup(ModuleGroup::Comparator, "fuzzy").unwrap_err();
        assert_eq!(
            err,
            RegistryError::NotFound {
                group: "comparator".to_string(),
                name: "fuzzy".to_string()
            }
        );
    }

    #[test]
    fn test_collision_last_registered_wins() {
        let registry = ModuleRegistry::new();
        registry.register_batch(
            LoaderContext::Builtin,
            vec![rules_registration("case", "")],
        );
        let report = registry.register_batch(
            LoaderContext::Manual("test".to_string()),
            vec![rules_registration("case", "lower")],
        );

        assert_eq!(report.overridden.len(), 1);
        assert_eq!(report.overridden[0].previous, LoaderContext::Builtin);
        assert_eq!(
            registry.origin(&ModuleKey::comparator("case")),
            Some(LoaderContext::Manual("test".to_string()))
        );

        let cmp = registry
            .create_comparator(&ComparatorBinding::new("case", ""))
            .unwrap();
        assert!(cmp.equals(&Value::from("A"), &Value::from("a")).unwrap());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reject_policy_keeps_first() {
        let registry = ModuleRegistry::with_policy(CollisionPolicy::Reject);
        registry.register_batch(LoaderContext::Builtin, vec![rules_registration("case", "")]);
        let report = registry.register_batch(
            LoaderContext::Manual("late".to_string()),
            vec![rules_registration("case", "lower")],
        );

        assert!(report.registered.is_empty());
        assert!(matches!(report.rejected[0], RegistryError::Collision { .. }));
        assert_eq!(registry.origin(&ModuleKey::comparator("case")), Some(LoaderContext::Builtin));
    }

    #[test]
    fn test_reject_policy_discards_the_whole_batch() {
        let registry = ModuleRegistry::with_policy(CollisionPolicy::Reject);
        registry.register_batch(LoaderContext::Builtin, vec![rules_registration("case", "")]);
        let report = registry.register_batch(
            LoaderContext::Manual("late".to_string()),
            vec![rules_registration("trimmed", "trim"), rules_registration("case", "lower")],
        );

        assert!(report.registered.is_empty());
        assert_eq!(report.rejected.len(), 1);
        assert!(!registry.contains(&ModuleKey::comparator("trimmed")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_same_name_in_different_groups_do_not_collide() {
        let registry = ModuleRegistry::new();
        let report = registry.register_batch(
            LoaderContext::Builtin,
            vec![
                ModuleRegistration::datasource("memory", "memory rows", |d: &SourceDescriptor| {
                    MemorySource::from_descriptor(d).map(|s| Box::new(s) as Box<dyn DataSource>)
                }),
                ModuleRegistration::comparator("memory", || -> Box<dyn Comparator> {
                    Box::new(DefaultComparator::new())
                }),
            ],
        );
        assert!(report.overridden.is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_create_comparator_imports_binding_config() {
        let registry = ModuleRegistry::with_builtins();
        let cmp = registry
            .create_comparator(&ComparatorBinding::new("numeric", "tolerance=0.5"))
            .unwrap();
        assert!(cmp.equals(&Value::Float(1.4), &Value::Int(1)).unwrap());

        let err = registry
            .create_comparator(&ComparatorBinding::new("numeric", "tolerance=abc"))
            .unwrap_err();
        assert!(matches!(err, BindingError::Config(_)));

        let err = registry
            .create_comparator(&ComparatorBinding::new("memory", ""))
            .unwrap_err();
        assert!(matches!(err, BindingError::Registry(RegistryError::NotFound { .. })));
    }

    #[test]
    fn test_unknown_source_kind() {
        let registry = ModuleRegistry::with_builtins();
        let err = registry
            .create_source(&SourceDescriptor::new("mainframe", serde_json::json!({})))
            .err()
            .unwrap();
        assert_eq!(err, ConfigurationError::UnknownSourceKind("mainframe".to_string()));
    }

    struct Recorder {
        seen: Mutex<Vec<(String, usize)>>,
    }

    impl DiscoveryObserver for Recorder {
        fn on_modules_discovered(
            &self,
            context: &LoaderContext,
            discovered: &[ModuleKey],
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.seen.lock().unwrap().push((context.to_string(), discovered.len()));
            Ok(())
        }
    }

    struct Failing;

    impl DiscoveryObserver for Failing {
        fn on_modules_discovered(
            &self,
            _context: &LoaderContext,
            _discovered: &[ModuleKey],
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            Err("catalog offline".into())
        }
    }

    struct Panicking(AtomicUsize);

    impl DiscoveryObserver for Panicking {
        fn on_modules_discovered(
            &self,
            _context: &LoaderContext,
            _discovered: &[ModuleKey],
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            panic!("observer bug");
        }
    }

    #[test]
    fn test_observer_failures_are_isolated() {
        let registry = ModuleRegistry::new();
        let panicking = Arc::new(Panicking(AtomicUsize::new(0)));
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        registry.add_observer(Arc::new(Failing));
        registry.add_observer(panicking.clone());
        registry.add_observer(recorder.clone());

        registry.register_batch(
            LoaderContext::Manual("batch".to_string()),
            vec![
                rules_registration("a", ""),
                ModuleRegistration::comparator("b", || -> Box<dyn Comparator> {
                    Box::new(NumericComparator::new())
                }),
            ],
        );

        assert_eq!(panicking.0.load(Ordering::SeqCst), 1);
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![("manual:batch".to_string(), 2)]
        );
    }

    #[test]
    fn test_reset_clears_everything() {
        let registry = ModuleRegistry::with_builtins();
        registry.set_policy(CollisionPolicy::Reject);
        assert!(!registry.is_empty());
        registry.reset();
        assert!(registry.is_empty());
        assert_eq!(registry.policy(), CollisionPolicy::Override);
    }

    #[test]
    fn test_concurrent_ensure_builtins_registers_once() {
        struct Counter(AtomicUsize);
        impl DiscoveryObserver for Counter {
            fn on_modules_discovered(
                &self,
                _context: &LoaderContext,
                _discovered: &[ModuleKey],
            ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let registry = Arc::new(ModuleRegistry::new());
        let batches = Arc::new(Counter(AtomicUsize::new(0)));
        registry.add_observer(batches.clone());

        let handles = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.ensure_builtins())
            })
            .collect::<Vec<_>>();
        let registered = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|did| *did)
            .count();

        assert_eq!(registered, 1);
        assert_eq!(batches.0.load(Ordering::SeqCst), 1);
        assert!(!registry.ensure_builtins());
    }

    #[test]
    fn test_concurrent_lookups_see_whole_batches() {
        let registry = Arc::new(ModuleRegistry::new());
        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for round in 0..50 {
                    let batch = (0..4)
                        .map(|i| rules_registration(&format!("r{}-{}", round, i), ""))
                        .collect();
                    registry.register_batch(LoaderContext::Manual(round.to_string()), batch);
                }
            })
        };

        // Every observed size is a whole number of batches
        for _ in 0..200 {
            assert_eq!(registry.len() % 4, 0);
        }
        writer.join().unwrap();
        assert_eq!(registry.len(), 200);
    }
}
