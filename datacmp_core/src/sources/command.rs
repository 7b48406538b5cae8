use super::process::{program_exists, run_command};
use super::{rows_from_json, SourceDescriptor};
use async_trait::async_trait;
use datacmp_common::{
    AccessError, ConfigurationError, DataSource, Row, SourceBase, ValidationError,
};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct CommandOptions {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    working_dir: Option<PathBuf>,
}

/// Rows produced by an external program printing a JSON array of objects on
/// stdout. Plugin-declared data sources run through this backend.
#[derive(Debug, Clone)]
pub struct CommandSource {
    base: SourceBase,
    kind: String,
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CommandSource {
    pub const KIND: &'static str = "command";

    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            base: SourceBase::default(),
            kind: Self::KIND.to_string(),
            program: program.into(),
            args,
            working_dir: None,
        }
    }

    pub fn with_base(mut self, base: SourceBase) -> Self {
        self.base = base;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Report a different registry kind (plugin sources use their own name)
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Append extra arguments after the configured ones
    pub fn with_extra_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn from_descriptor(descriptor: &SourceDescriptor) -> Result<Self, ConfigurationError> {
        let options: CommandOptions = descriptor.options()?;
        let mut source = Self::new(options.program, options.args).with_base(descriptor.base());
        source.working_dir = options.working_dir;
        Ok(source)
    }
}

#[async_trait]
impl DataSource for CommandSource {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn describe(&self) -> String {
        format!("command:{}", self.program)
    }

    fn base(&self) -> &SourceBase {
        &self.base
    }

    async fn validate(&self) -> Result<(), ValidationError> {
        if self.program.trim().is_empty() {
            return Err(ValidationError::new("no program configured"));
        }
        if let Some(dir) = &self.working_dir {
            if !dir.is_dir() {
                return Err(ValidationError::new(format!(
                    "working directory {} does not exist",
                    dir.display()
                )));
            }
        }
        if !program_exists(&self.program, self.working_dir.as_deref()) {
            return Err(ValidationError::new(format!(
                "program '{}' not found",
                self.program
            )));
        }
        Ok(())
    }

    async fn fetch_rows(&self) -> Result<Vec<Row>, AccessError> {
        let stdout = run_command(&self.program, &self.args, self.working_dir.as_deref(), None).await?;
        let document: serde_json::Value = serde_json::from_slice(&stdout).map_err(|e| {
            AccessError::with_cause(format!("'{}' did not print valid JSON", self.program), e)
        })?;
        rows_from_json(document, &format!("'{}'", self.program))
    }
}
