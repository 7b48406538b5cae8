pub mod default;
pub mod numeric;
pub mod rules;

pub use default::DefaultComparator;
pub use numeric::NumericComparator;
pub use rules::RulesComparator;

use datacmp_common::{Comparator, ComparatorError};

/// Names of the comparator kinds compiled into the core
pub const BUILTIN_COMPARATORS: &[&str] = &[
    DefaultComparator::KIND,
    NumericComparator::KIND,
    RulesComparator::KIND,
];

/// Fresh comparator of a built-in kind with its default configuration
pub fn builtin_comparator(kind: &str) -> Option<Box<dyn Comparator>> {
    match kind {
        DefaultComparator::KIND => Some(Box::new(DefaultComparator::new())),
        NumericComparator::KIND => Some(Box::new(NumericComparator::new())),
        RulesComparator::KIND => Some(Box::new(RulesComparator::new())),
        _ => None,
    }
}

/// Built-in comparator of `kind` with `config` imported
pub fn configured_comparator(kind: &str, config: &str) -> Result<Box<dyn Comparator>, ComparatorError> {
    let mut comparator = builtin_comparator(kind)
        .ok_or_else(|| ComparatorError::InvalidConfig(format!("unknown comparator kind '{}'", kind)))?;
    comparator.import_config(config)?;
    Ok(comparator)
}
