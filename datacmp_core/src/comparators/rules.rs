use datacmp_common::{Comparator, ComparatorError, Value};
use regex::Regex;

/// One normalization step of a rules program
#[derive(Debug, Clone)]
enum Step {
    Trim,
    Lower,
    Upper,
    CollapseWhitespace,
    Strip(Vec<char>),
    Replace { pattern: Regex, replacement: String },
}

impl Step {
    fn apply(&self, text: String) -> String {
        match self {
            Step::Trim => text.trim().to_string(),
            Step::Lower => text.to_lowercase(),
            Step::Upper => text.to_uppercase(),
            Step::CollapseWhitespace => text.split_whitespace().collect::<Vec<_>>().join(" "),
            Step::Strip(chars) => text.chars().filter(|c| !chars.contains(c)).collect(),
            Step::Replace {
                pattern,
                replacement,
            } => pattern.replace_all(&text, replacement.as_str()).into_owned(),
        }
    }
}

/// Script-style comparator: both values run through a small normalization
/// program, then compare as text.
///
/// The program is a `;`-separated list of steps (`\;` escapes a literal
/// semicolon):
///
/// - `trim`, `lower`, `upper`, `collapse-ws`
/// - `null=<text>`: text used for a null value (default: empty)
/// - `strip=<chars>`: remove every listed character
/// - `regex=<pattern>=><replacement>`: regex replace-all
///
/// Example: `trim;lower;null=n/a;regex=\s+=> `
#[derive(Debug, Clone, Default)]
pub struct RulesComparator {
    program: String,
    null_text: String,
    steps: Vec<Step>,
}

impl RulesComparator {
    pub const KIND: &'static str = "rules";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_program(program: &str) -> Result<Self, ComparatorError> {
        let mut cmp = Self::new();
        cmp.import_config(program)?;
        Ok(cmp)
    }

    /// Text a value turns into after the program ran
    pub fn normalize(&self, value: &Value) -> String {
        let initial = match value {
            Value::Null => self.null_text.clone(),
            other => other.to_string(),
        };
        self.steps.iter().fold(initial, |text, step| step.apply(text))
    }

    fn split_program(program: &str) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut chars = program.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' if chars.peek() == Some(&';') => {
                    current.push(';');
                    chars.next();
                }
                ';' => parts.push(std::mem::take(&mut current)),
                other => current.push(other),
            }
        }
        parts.push(current);
        parts
    }

    fn parse_step(raw: &str) -> Result<Step, ComparatorError> {
        let step = match raw {
            "trim" => Step::Trim,
            "lower" => Step::Lower,
            "upper" => Step::Upper,
            "collapse-ws" => Step::CollapseWhitespace,
            _ => {
                if let Some(chars) = raw.strip_prefix("strip=") {
                    Step::Strip(chars.chars().collect())
                } else if let Some(body) = raw.strip_prefix("regex=") {
                    let (pattern, replacement) = body.split_once("=>").ok_or_else(|| {
                        ComparatorError::InvalidConfig(format!(
                            "regex step needs '<pattern>=><replacement>', got '{}'",
                            body
                        ))
                    })?;
                    let pattern = Regex::new(pattern).map_err(|e| {
                        ComparatorError::InvalidConfig(format!("bad pattern '{}': {}", pattern, e))
                    })?;
                    Step::Replace {
                        pattern,
                        replacement: replacement.to_string(),
                    }
                } else {
                    return Err(ComparatorError::InvalidConfig(format!(
                        "unknown rules step '{}'",
                        raw
                    )));
                }
            }
        };
        Ok(step)
    }
}

impl Comparator for RulesComparator {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn equals(&self, a: &Value, b: &Value) -> Result<bool, ComparatorError> {
        Ok(self.normalize(a) == self.normalize(b))
    }

    fn export_config(&self) -> String {
        self.program.clone()
    }

    fn import_config(&mut self, config: &str) -> Result<(), ComparatorError> {
        let mut null_text = String::new();
        let mut steps = Vec::new();

        for part in Self::split_program(config) {
            let raw = part.trim();
            if raw.is_empty() {
                continue;
            }
            if let Some(text) = raw.strip_prefix("null=") {
                null_text = text.to_string();
                continue;
            }
            steps.push(Self::parse_step(raw)?);
        }

        // Only commit once the whole program parsed
        self.program = config.to_string();
        self.null_text = null_text;
        self.steps = steps;
        Ok(())
    }

    fn describe(&self) -> String {
        if self.program.trim().is_empty() {
            "exact text equality".to_string()
        } else {
            format!("text equality after rules '{}'", self.program)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_whitespace_rules() {
        let cmp = RulesComparator::from_program("trim;lower;collapse-ws").unwrap();
        assert!(cmp.equals(&Value::from("  Hello   World "), &Value::from("hello world")).unwrap());
        assert!(!cmp.equals(&Value::from("hello"), &Value::from("help")).unwrap());
    }

    #[test]
    fn test_null_equivalence() {
        let cmp = RulesComparator::from_program("trim;null=N/A").unwrap();
        assert!(cmp.equals(&Value::Null, &Value::from(" N/A")).unwrap());
        assert!(!cmp.equals(&Value::Null, &Value::from("")).unwrap());
    }

    #[test]
    fn test_strip_and_regex() {
        let cmp = RulesComparator::from_program("strip=$,;regex=\\.0+$=>").unwrap();
        assert!(cmp.equals(&Value::from("$1,200.00"), &Value::from("1200")).unwrap());
    }

    #[test]
    fn test_escaped_semicolon() {
        let cmp = RulesComparator::from_program("strip=\\;").unwrap();
        assert!(cmp.equals(&Value::from("a;b"), &Value::from("ab")).unwrap());
    }

    #[test]
    fn test_invalid_program_keeps_previous_config() {
        let mut cmp = RulesComparator::from_program("lower").unwrap();
        assert!(cmp.import_config("lower;shout").is_err());
        assert!(cmp.import_config("regex=(=>x").is_err());
        assert_eq!(cmp.export_config(), "lower");
        assert!(cmp.equals(&Value::from("A"), &Value::from("a")).unwrap());
    }

    #[test]
    fn test_config_round_trip() {
        let cmp = RulesComparator::from_program("trim;upper;null=-").unwrap();
        let mut fresh = RulesComparator::new();
        fresh.import_config(&cmp.export_config()).unwrap();
        for (a, b) in [
            (Value::from(" x"), Value::from("X")),
            (Value::Null, Value::from("-")),
            (Value::from("a"), Value::from("b")),
        ] {
            assert_eq!(cmp.equals(&a, &b).unwrap(), fresh.equals(&a, &b).unwrap());
        }
    }
}
