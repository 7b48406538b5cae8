use super::process::run_command;
use super::{rows_from_json, rows_to_json};
use datacmp_common::{AccessError, Row};
use tracing::debug;

/// Pre-processing step attached to a source: fetched rows are written to the
/// program's stdin as a JSON array and the array it prints replaces them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptProcessor {
    program: String,
    args: Vec<String>,
}

impl ScriptProcessor {
    /// Parse a whitespace-separated command line; no shell is involved
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub async fn process(&self, rows: Vec<Row>) -> Result<Vec<Row>, AccessError> {
        debug!("Piping {} rows through script '{}'", rows.len(), self.program);
        let input = serde_json::to_vec(&rows_to_json(&rows))
            .map_err(|e| AccessError::with_cause("failed to encode rows for script", e))?;
        let stdout = run_command(&self.program, &self.args, None, Some(input)).await?;
        let document: serde_json::Value = serde_json::from_slice(&stdout).map_err(|e| {
            AccessError::with_cause(format!("script '{}' did not print valid JSON", self.program), e)
        })?;
        rows_from_json(document, &format!("script '{}'", self.program))
    }
}
