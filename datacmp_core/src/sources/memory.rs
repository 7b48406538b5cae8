use super::SourceDescriptor;
use async_trait::async_trait;
use datacmp_common::{
    AccessError, ConfigurationError, DataSource, Row, SourceBase, ValidationError,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct MemoryOptions {
    #[serde(default)]
    rows: Vec<serde_json::Value>,
}

/// Literal rows held in memory; used for fixtures and tests
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    base: SourceBase,
    rows: Vec<Row>,
}

impl MemorySource {
    pub const KIND: &'static str = "memory";

    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            base: SourceBase::default(),
            rows,
        }
    }

    pub fn with_base(mut self, base: SourceBase) -> Self {
        self.base = base;
        self
    }

    pub fn from_descriptor(descriptor: &SourceDescriptor) -> Result<Self, ConfigurationError> {
        let options: MemoryOptions = descriptor.options()?;
        let rows = options
            .rows
            .into_iter()
            .enumerate()
            .map(|(idx, value)| {
                Row::from_json(value).ok_or_else(|| ConfigurationError::InvalidSourceOptions {
                    kind: Self::KIND.to_string(),
                    reason: format!("row #{} is not a table of fields", idx + 1),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(rows).with_base(descriptor.base()))
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn describe(&self) -> String {
        format!("memory:{} rows", self.rows.len())
    }

    fn base(&self) -> &SourceBase {
        &self.base
    }

    async fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn fetch_rows(&self) -> Result<Vec<Row>, AccessError> {
        Ok(self.rows.clone())
    }
}
