use super::SourceDescriptor;
use async_trait::async_trait;
use datacmp_common::{
    AccessError, ConfigurationError, DataSource, Row, SourceBase, ValidationError, Value,
};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

const SQLITE_DRIVER: &str = "sqlite";

#[derive(Debug, Deserialize)]
struct DatabaseOptions {
    #[serde(default = "default_driver")]
    driver: String,
    path: PathBuf,
    query: String,
}

fn default_driver() -> String {
    SQLITE_DRIVER.to_string()
}

/// SQL query against a SQLite database file.
///
/// Each call opens a read-only connection, runs its statement and closes the
/// connection again. Column names are reported exactly as the engine returns
/// them.
#[derive(Debug, Clone)]
pub struct DatabaseSource {
    base: SourceBase,
    path: PathBuf,
    query: String,
}

impl DatabaseSource {
    pub const KIND: &'static str = "database";

    pub fn new(path: impl Into<PathBuf>, query: impl Into<String>) -> Self {
        Self {
            base: SourceBase::default(),
            path: path.into(),
            query: query.into(),
        }
    }

    pub fn with_base(mut self, base: SourceBase) -> Self {
        self.base = base;
        self
    }

    pub fn from_descriptor(descriptor: &SourceDescriptor) -> Result<Self, ConfigurationError> {
        let options: DatabaseOptions = descriptor.options()?;
        if !options.driver.eq_ignore_ascii_case(SQLITE_DRIVER) {
            return Err(ConfigurationError::InvalidSourceOptions {
                kind: Self::KIND.to_string(),
                reason: format!("unsupported driver '{}'", options.driver),
            });
        }
        Ok(Self::new(options.path, options.query).with_base(descriptor.base()))
    }

    fn connect(path: &Path) -> rusqlite::Result<Connection> {
        Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
    }

    fn check_query(path: &Path, query: &str) -> Result<(), ValidationError> {
        if !path.is_file() {
            return Err(ValidationError::new(format!(
                "database file {} does not exist",
                path.display()
            )));
        }
        let conn = Self::connect(path)
            .map_err(|e| ValidationError::new(format!("cannot open {}: {}", path.display(), e)))?;
        // Preparing compiles the statement without running it
        conn.prepare(query)
            .map_err(|e| ValidationError::new(format!("malformed query: {}", e)))?;
        Ok(())
    }

    fn query_rows(path: &Path, query: &str) -> Result<Vec<Row>, AccessError> {
        let conn = Self::connect(path)
            .map_err(|e| AccessError::with_cause(format!("cannot open {}", path.display()), e))?;
        let mut stmt = conn
            .prepare(query)
            .map_err(|e| AccessError::with_cause("failed to prepare query", e))?;
        let columns = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();

        let mut result = stmt
            .query([])
            .map_err(|e| AccessError::with_cause("failed to run query", e))?;

        let mut rows = Vec::new();
        while let Some(record) = result
            .next()
            .map_err(|e| AccessError::with_cause("failed to read result row", e))?
        {
            let mut row = Row::new();
            for (idx, column) in columns.iter().enumerate() {
                let value = record
                    .get_ref(idx)
                    .map_err(|e| AccessError::with_cause(format!("failed to read column {}", column), e))?;
                row.insert(column.clone(), sql_value(value));
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

fn sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Text(hex::encode(bytes)),
    }
}

#[async_trait]
impl DataSource for DatabaseSource {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    fn base(&self) -> &SourceBase {
        &self.base
    }

    async fn validate(&self) -> Result<(), ValidationError> {
        if self.path.as_os_str().is_empty() {
            return Err(ValidationError::new("no database path configured"));
        }
        if self.query.trim().is_empty() {
            return Err(ValidationError::new("no query configured"));
        }

        let path = self.path.clone();
        let query = self.query.clone();
        tokio::task::spawn_blocking(move || Self::check_query(&path, &query))
            .await
            .map_err(|e| ValidationError::new(format!("validation task failed: {}", e)))?
    }

    async fn fetch_rows(&self) -> Result<Vec<Row>, AccessError> {
        let path = self.path.clone();
        let query = self.query.clone();
        let rows = tokio::task::spawn_blocking(move || Self::query_rows(&path, &query))
            .await
            .map_err(|e| AccessError::with_cause("query task failed", e))??;

        debug!("Query on {} returned {} rows", self.path.display(), rows.len());
        Ok(rows)
    }
}
