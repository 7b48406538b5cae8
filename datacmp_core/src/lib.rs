pub mod comparators;
pub mod engine;
pub mod plugin;
pub mod registry;
pub mod scheme;
pub mod sources;

pub use comparators::{DefaultComparator, NumericComparator, RulesComparator};
pub use engine::{
    reconcile, ComparisonEngine, ComparisonReport, EngineOptions, FetchedSide, ReportSummary, RunState,
};
pub use plugin::{DiscoveryReport, PluginLoader, PluginManifest};
pub use registry::{DiscoveryObserver, LoaderContext, ModuleRegistration, ModuleRegistry};
pub use scheme::{ComparisonScheme, ResolvedItem, SchemeDocument};
pub use sources::{CommandSource, MemorySource, SourceDescriptor};
