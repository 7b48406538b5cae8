use datacmp_common::{Comparator, ComparatorError, Value};

/// Numeric equality within an absolute tolerance.
///
/// Null and blank text are treated as "no number": two of them are equal, one
/// of them against a number is not. Text that does not parse as a number is
/// an error for the cell rather than a silent mismatch.
#[derive(Debug, Clone, Default)]
pub struct NumericComparator {
    tolerance: f64,
}

impl NumericComparator {
    pub const KIND: &'static str = "numeric";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.abs(),
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn number(value: &Value) -> Result<Option<f64>, ComparatorError> {
        match value {
            Value::Null => Ok(None),
            Value::Text(s) if s.trim().is_empty() => Ok(None),
            other => other
                .as_f64()
                .map(Some)
                .ok_or_else(|| ComparatorError::Incomparable(format!("'{}' is not a number", other))),
        }
    }
}

impl Comparator for NumericComparator {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn equals(&self, a: &Value, b: &Value) -> Result<bool, ComparatorError> {
        match (Self::number(a)?, Self::number(b)?) {
            (None, None) => Ok(true),
            (Some(x), Some(y)) => Ok((x - y).abs() <= self.tolerance),
            _ => Ok(false),
        }
    }

    fn export_config(&self) -> String {
        format!("tolerance={}", self.tolerance)
    }

    fn import_config(&mut self, config: &str) -> Result<(), ComparatorError> {
        let config = config.trim();
        if config.is_empty() {
            self.tolerance = 0.0;
            return Ok(());
        }

        let value = config
            .strip_prefix("tolerance=")
            .ok_or_else(|| ComparatorError::InvalidConfig(format!("expected 'tolerance=<number>', got '{}'", config)))?;
        let tolerance: f64 = value
            .trim()
            .parse()
            .map_err(|_| ComparatorError::InvalidConfig(format!("'{}' is not a number", value)))?;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ComparatorError::InvalidConfig(format!(
                "tolerance must be a non-negative number, got {}",
                tolerance
            )));
        }
        self.tolerance = tolerance;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("numeric equality within ±{}", self.tolerance)
    }
}
