use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Dynamically typed scalar produced by a data source
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text used for key building and default equality: null becomes the
    /// empty string, everything else its display form with surrounding
    /// whitespace removed
    pub fn normalized(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.trim().to_string(),
            other => other.to_string().trim().to_string(),
        }
    }

    /// Best-effort numeric view; `None` for null, empty text and non-numbers
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null | Value::Date(_) => None,
        }
    }

    /// Parse a date in `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` form
    pub fn parse_date(text: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(text, DATE_FORMAT)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            // 1.0 renders as "1" so integral floats line up with integer columns
            Value::Float(v) if v.fract() == 0.0 && v.abs() < 1e15 => write!(f, "{}", *v as i64),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            // Nested structures have no scalar form; keep their JSON text
            other => Value::Text(other.to_string()),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s),
            Value::Date(d) => serde_json::Value::String(d.format(DATE_FORMAT).to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One fetched row: field names in the order the backend reported them
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing an existing one in place
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build a row from a JSON object; `None` when `value` is not an object
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(map) => Some(
                map.into_iter()
                    .map(|(field, value)| (field, Value::from(value)))
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(field, value)| (field.clone(), serde_json::Value::from(value.clone())))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (field, value) in iter {
            row.insert(field, value);
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Maps source-native field names to data item codes (`keyToCode`).
///
/// A code no field is mapped to is fed by the field named like the code,
/// unless that field is itself mapped to another code. An empty mapping is
/// therefore the identity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyMapping {
    fields: BTreeMap<String, String>,
}

impl KeyMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(mut self, field: impl Into<String>, code: impl Into<String>) -> Self {
        self.fields.insert(field.into(), code.into());
        self
    }

    pub fn is_identity(&self) -> bool {
        self.fields.is_empty()
    }

    /// Source field feeding `code`; the first field (by name) wins when several
    /// map to the same code
    pub fn field_for<'a>(&'a self, code: &'a str) -> Option<&'a str> {
        let mapped = self
            .fields
            .iter()
            .find(|(_, mapped)| mapped.as_str() == code)
            .map(|(field, _)| field.as_str());
        match mapped {
            Some(field) => Some(field),
            // A field renamed to another code no longer answers to its own name
            None if self.fields.contains_key(code) => None,
            None => Some(code),
        }
    }

    /// Value of `code` in `row`, or null when the code has no mapped field or
    /// the row lacks it
    pub fn value_for(&self, row: &Row, code: &str) -> Value {
        self.field_for(code)
            .and_then(|field| row.get(field))
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(f, c)| (f.as_str(), c.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_trims_and_blanks_null() {
        assert_eq!(Value::Null.normalized(), "");
        assert_eq!(Value::from(" a ").normalized(), "a");
        assert_eq!(Value::Float(1.0).normalized(), "1");
        assert_eq!(Value::Float(1.5).normalized(), "1.5");
        assert_eq!(Value::Int(42).normalized(), "42");
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"id": 1, "name": "A", "ratio": 0.5, "gone": null});
        let row = Row::from_json(json).unwrap();
        assert_eq!(row.column_names(), vec!["id", "name", "ratio", "gone"]);
        assert_eq!(row.get("id"), Some(&Value::Int(1)));
        assert_eq!(row.get("ratio"), Some(&Value::Float(0.5)));
        assert_eq!(row.get("gone"), Some(&Value::Null));
        assert!(Row::from_json(serde_json::json!([1, 2])).is_none());
    }

    #[test]
    fn test_row_insert_replaces_in_place() {
        let row = Row::new().with("a", 1i64).with("b", 2i64).with("a", 3i64);
        assert_eq!(row.column_names(), vec!["a", "b"]);
        assert_eq!(row.get("a"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_key_mapping_identity_and_explicit() {
        let row = Row::new().with("ID", "7").with("NAME", "x");

        let identity = KeyMapping::new();
        assert_eq!(identity.value_for(&row, "ID"), Value::from("7"));
        assert_eq!(identity.value_for(&row, "id"), Value::Null);

        let mapping = KeyMapping::new().map("ID", "id").map("NAME", "name");
        assert_eq!(mapping.value_for(&row, "id"), Value::from("7"));
        assert_eq!(mapping.value_for(&row, "name"), Value::from("x"));
        assert_eq!(mapping.value_for(&row, "missing"), Value::Null);
    }

    #[test]
    fn test_partial_mapping_falls_back_to_code_name() {
        let row = Row::new()
            .with("ORDER_ID", "1")
            .with("amount", 10.0)
            .with("status", "open");

        let mapping = KeyMapping::new().map("ORDER_ID", "id").map("status", "state");
        assert_eq!(mapping.value_for(&row, "id"), Value::from("1"));
        assert_eq!(mapping.value_for(&row, "amount"), Value::Float(10.0));
        assert_eq!(mapping.value_for(&row, "state"), Value::from("open"));
        // Renamed away, so the old name no longer resolves
        assert_eq!(mapping.value_for(&row, "status"), Value::Null);
        assert_eq!(mapping.field_for("ORDER_ID"), None);
        assert_eq!(mapping.value_for(&row, "missing"), Value::Null);
    }

    #[test]
    fn test_parse_date() {
        let d = Value::parse_date("2024-03-01").unwrap();
        assert_eq!(Value::Date(d).to_string(), "2024-03-01 00:00:00");
        assert!(Value::parse_date("yesterday").is_none());
    }
}
