use crate::error::{AccessError, ValidationError};
use crate::value::{KeyMapping, Row};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Data source trait for abstracting row retrieval
///
/// This trait allows DataCmp to treat databases, CSV/Excel files, in-memory
/// fixtures, HTTP endpoints and plugin commands uniformly. Every call is
/// self-contained: a source opens what it needs and releases it before
/// returning, so dropping an in-flight future releases its resources too.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Registry name of the backend kind (e.g. "file", "database")
    fn kind(&self) -> &str;

    /// Human readable target (e.g. "file:orders.csv")
    fn describe(&self) -> String;

    /// Shared settings every backend carries
    fn base(&self) -> &SourceBase;

    /// Source field to data item code mapping
    fn key_to_code(&self) -> &KeyMapping {
        &self.base().key_to_code
    }

    /// Check configuration completeness and reach the target without
    /// mutating anything
    async fn validate(&self) -> Result<(), ValidationError>;

    /// Run the configured retrieval; all rows or an error, never a prefix
    async fn fetch_rows(&self) -> Result<Vec<Row>, AccessError>;

    /// Column names as the backend reports them
    async fn column_names(&self) -> Result<Vec<String>, AccessError> {
        let rows = self.fetch_rows().await?;
        Ok(rows.first().map(Row::column_names).unwrap_or_default())
    }
}

/// Settings shared by every backend, embedded in each concrete source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBase {
    #[serde(default, skip_serializing_if = "KeyMapping::is_identity")]
    pub key_to_code: KeyMapping,
    /// Optional pre-processing command line; rows are piped through it after
    /// each fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl SourceBase {
    pub fn new(key_to_code: KeyMapping) -> Self {
        Self {
            key_to_code,
            script: None,
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        base: SourceBase,
        rows: Vec<Row>,
    }

    #[async_trait]
    impl DataSource for Fixed {
        fn kind(&self) -> &str {
            "fixed"
        }
        fn describe(&self) -> String {
            "fixed".to_string()
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

    #[tokio::test]
    async fn test_default_column_names_from_first_row() {
        let source = Fixed {
            base: SourceBase::default(),
            rows: vec![Row::new().with("ID", 1i64).with("NAME", "a")],
        };
        assert_eq!(source.column_names().await.unwrap(), vec!["ID", "NAME"]);
        assert!(source.key_to_code().is_identity());

        let empty = Fixed {
            base: SourceBase::default(),
            rows: vec![],
        };
        assert!(empty.column_names().await.unwrap().is_empty());
    }
}
