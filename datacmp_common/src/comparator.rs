use crate::error::ComparatorError;
use crate::value::Value;

/// Per-column equality logic bound to a data item.
///
/// Implementations receive raw values, including `Value::Null` on either
/// side, and decide their own null semantics. Configuration round-trips
/// through `export_config` / `import_config`: importing the exported text
/// into a fresh comparator of the same kind yields the same behavior.
pub trait Comparator: Send + Sync + std::fmt::Debug {
    /// Registry name of this comparator kind
    fn kind(&self) -> &str;

    /// Whether the two values count as equal
    fn equals(&self, a: &Value, b: &Value) -> Result<bool, ComparatorError>;

    /// Serialize the configuration
    fn export_config(&self) -> String;

    /// Replace the configuration with a previously exported one
    fn import_config(&mut self, config: &str) -> Result<(), ComparatorError>;

    /// Human readable summary for reports and module listings
    fn describe(&self) -> String;
}
