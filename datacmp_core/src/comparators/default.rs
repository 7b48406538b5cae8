use datacmp_common::{Comparator, ComparatorError, Value};

/// Normalized textual equality: trim both sides, null reads as empty text
#[derive(Debug, Clone, Default)]
pub struct DefaultComparator;

impl DefaultComparator {
    pub const KIND: &'static str = "default";

    pub fn new() -> Self {
        Self
    }
}

impl Comparator for DefaultComparator {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn equals(&self, a: &Value, b: &Value) -> Result<bool, ComparatorError> {
        Ok(a.normalized() == b.normalized())
    }

    fn export_config(&self) -> String {
        String::new()
    }

    fn import_config(&mut self, config: &str) -> Result<(), ComparatorError> {
        if config.trim().is_empty() {
            Ok(())
        } else {
            Err(ComparatorError::InvalidConfig(format!(
                "default comparator takes no configuration, got '{}'",
                config
            )))
        }
    }

    fn describe(&self) -> String {
        "text equality after trimming (null = empty)".to_string()
    }
}
