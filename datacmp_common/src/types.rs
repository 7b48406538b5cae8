use crate::comparator::Comparator;
use crate::value::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Name of the comparator bound when a document does not name one
pub const DEFAULT_COMPARATOR: &str = "default";

/// Binding name meaning "no comparator": the column is shown, never flagged
pub const NO_COMPARATOR: &str = "none";

/// Marker placed between the two sides of a differing cell
pub const DIFF_MARKER: &str = " ❌ ";

/// Which comparator kind a data item uses, plus that comparator's exported
/// configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparatorBinding {
    pub name: String,
    #[serde(default)]
    pub config: String,
}

impl ComparatorBinding {
    pub fn new(name: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: config.into(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.name == NO_COMPARATOR
    }
}

impl Default for ComparatorBinding {
    fn default() -> Self {
        Self::new(DEFAULT_COMPARATOR, "")
    }
}

fn default_binding() -> Option<ComparatorBinding> {
    Some(ComparatorBinding::default())
}

fn serialize_binding<S: Serializer>(binding: &Option<ComparatorBinding>, serializer: S) -> Result<S::Ok, S::Error> {
    match binding {
        Some(binding) => binding.serialize(serializer),
        None => ComparatorBinding::new(NO_COMPARATOR, "").serialize(serializer),
    }
}

fn deserialize_binding<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<ComparatorBinding>, D::Error> {
    let binding = Option::<ComparatorBinding>::deserialize(deserializer)?;
    Ok(binding.filter(|b| !b.is_none()))
}

/// One logical column to compare
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataItem {
    /// Stable identifier, unique within a scheme
    pub code: String,
    /// Display alias
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
    /// Participates in the row-matching key
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remark: String,
    /// `None` is written out as the `none` binding so it survives a round trip
    #[serde(
        default = "default_binding",
        serialize_with = "serialize_binding",
        deserialize_with = "deserialize_binding"
    )]
    pub comparator: Option<ComparatorBinding>,
}

impl DataItem {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            nick: None,
            unique: false,
            remark: String::new(),
            comparator: default_binding(),
        }
    }

    /// A key column bound to the default comparator
    pub fn key(code: impl Into<String>) -> Self {
        Self::new(code).unique(true)
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn nick(mut self, nick: impl Into<String>) -> Self {
        self.nick = Some(nick.into());
        self
    }

    pub fn remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = remark.into();
        self
    }

    pub fn comparator(mut self, binding: Option<ComparatorBinding>) -> Self {
        self.comparator = binding;
        self
    }

    /// Header text: the nick when set, the code otherwise
    pub fn label(&self) -> &str {
        self.nick.as_deref().unwrap_or(&self.code)
    }
}

/// Row-level reconciliation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowStatus {
    /// Key present on both sides
    Matched,
    /// Key present only in the primary rows
    PrimaryOnly,
    /// Key present only in the shadow rows
    ShadowOnly,
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowStatus::Matched => f.write_str("MATCHED"),
            RowStatus::PrimaryOnly => f.write_str("PRIMARY_ONLY"),
            RowStatus::ShadowOnly => f.write_str("SHADOW_ONLY"),
        }
    }
}

/// Computed comparison of one (row, column) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellResult {
    pub primary_value: Value,
    pub shadow_value: Value,
    pub is_different: bool,
    /// Set when the comparator failed on this cell
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl CellResult {
    /// Apply the cell difference rule.
    ///
    /// `counterpart_missing` is true when the owning row exists on one side
    /// only. Such rows flag a cell only when it is a key column whose
    /// comparator rejects the value against the missing side; other columns
    /// are shown but never flagged. A comparator failure flags the cell and
    /// records a warning.
    pub fn compute(
        unique: bool,
        comparator: Option<&dyn Comparator>,
        primary_value: Value,
        shadow_value: Value,
        counterpart_missing: bool,
    ) -> Self {
        let mut warning = None;
        let is_different = match comparator {
            Some(cmp) if !counterpart_missing || unique => {
                match cmp.equals(&primary_value, &shadow_value) {
                    Ok(equal) => !equal,
                    Err(e) => {
                        warning = Some(format!("comparator error: {}", e));
                        true
                    }
                }
            }
            _ => false,
        };

        Self {
            primary_value,
            shadow_value,
            is_different,
            warning,
        }
    }

    /// Text for rendering: both sides joined by a marker when different,
    /// otherwise whichever side has content, preferring primary
    pub fn display_value(&self) -> String {
        let primary = self.primary_value.to_string();
        let shadow = self.shadow_value.to_string();
        if self.is_different {
            format!("{}{}{}", primary, DIFF_MARKER, shadow)
        } else if !primary.is_empty() {
            primary
        } else {
            shadow
        }
    }
}

/// One reconciled row: the key tuple, its classification and one cell per
/// data item in declaration order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub key: Vec<String>,
    pub status: RowStatus,
    pub cells: Vec<CellResult>,
    /// Position of the row in the primary fetch
    pub primary_index: Option<usize>,
    /// Position of the row in the shadow fetch
    pub shadow_index: Option<usize>,
}

impl ComparisonRow {
    pub fn different_cells(&self) -> usize {
        self.cells.iter().filter(|c| c.is_different).count()
    }

    pub fn has_differences(&self) -> bool {
        self.status != RowStatus::Matched || self.cells.iter().any(|c| c.is_different)
    }
}

/// Kind of module a registry entry produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleGroup {
    DataSource,
    Comparator,
}

impl fmt::Display for ModuleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleGroup::DataSource => f.write_str("datasource"),
            ModuleGroup::Comparator => f.write_str("comparator"),
        }
    }
}

/// Registry key: group plus friendly name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleKey {
    pub group: ModuleGroup,
    pub name: String,
}

impl ModuleKey {
    pub fn new(group: ModuleGroup, name: impl Into<String>) -> Self {
        Self {
            group,
            name: name.into(),
        }
    }

    pub fn datasource(name: impl Into<String>) -> Self {
        Self::new(ModuleGroup::DataSource, name)
    }

    pub fn comparator(name: impl Into<String>) -> Self {
        Self::new(ModuleGroup::Comparator, name)
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.name)
    }
}

/// Identifier of one comparison run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
