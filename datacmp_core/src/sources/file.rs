use super::SourceDescriptor;
use async_trait::async_trait;
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate};
use datacmp_common::{
    AccessError, ConfigurationError, DataSource, Row, SourceBase, ValidationError, Value,
};
use serde::Deserialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Layout of a file source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileFormat {
    /// Delimited text with a header row
    Csv { delimiter: u8 },
    /// Workbook sheet with a header row; first sheet when none is named
    Excel { sheet: Option<String> },
}

impl FileFormat {
    /// Format implied by the file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        match ext.as_str() {
            "csv" => Some(FileFormat::Csv { delimiter: b',' }),
            "tsv" => Some(FileFormat::Csv { delimiter: b'\t' }),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(FileFormat::Excel { sheet: None }),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileOptions {
    path: PathBuf,
    #[serde(default)]
    delimiter: Option<char>,
    #[serde(default)]
    sheet: Option<String>,
}

/// CSV/TSV or spreadsheet file read in full on every fetch
#[derive(Debug, Clone)]
pub struct FileSource {
    base: SourceBase,
    path: PathBuf,
    format: FileFormat,
}

impl FileSource {
    pub const KIND: &'static str = "file";

    pub fn new(path: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            base: SourceBase::default(),
            path: path.into(),
            format,
        }
    }

    /// Source whose format follows the file extension
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigurationError> {
        let path = path.into();
        let format = FileFormat::from_path(&path).ok_or_else(|| unsupported(&path))?;
        Ok(Self::new(path, format))
    }

    pub fn with_base(mut self, base: SourceBase) -> Self {
        self.base = base;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> &FileFormat {
        &self.format
    }

    pub fn from_descriptor(descriptor: &SourceDescriptor) -> Result<Self, ConfigurationError> {
        let options: FileOptions = descriptor.options()?;
        let mut format = FileFormat::from_path(&options.path).ok_or_else(|| unsupported(&options.path))?;

        match (&mut format, options.delimiter, options.sheet) {
            (FileFormat::Csv { delimiter }, Some(custom), _) => {
                if !custom.is_ascii() {
                    return Err(ConfigurationError::InvalidSourceOptions {
                        kind: Self::KIND.to_string(),
                        reason: format!("delimiter '{}' is not a single-byte character", custom),
                    });
                }
                *delimiter = custom as u8;
            }
            (FileFormat::Excel { sheet }, _, Some(name)) => *sheet = Some(name),
            _ => {}
        }

        Ok(Self::new(options.path, format).with_base(descriptor.base()))
    }

    fn read_csv(path: &Path, delimiter: u8) -> Result<Vec<Row>, AccessError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .from_path(path)
            .map_err(|e| AccessError::with_cause(format!("failed to open {}", path.display()), e))?;

        let headers = reader
            .headers()
            .map_err(|e| AccessError::with_cause(format!("failed to read headers of {}", path.display()), e))?
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| {
                AccessError::with_cause(format!("failed to read record from {}", path.display()), e)
            })?;
            let row = headers
                .iter()
                .enumerate()
                .map(|(idx, header)| {
                    let value = match record.get(idx) {
                        Some(text) if !text.is_empty() => Value::Text(text.to_string()),
                        _ => Value::Null,
                    };
                    (header.clone(), value)
                })
                .collect::<Row>();
            rows.push(row);
        }
        Ok(rows)
    }

    fn read_excel(path: &Path, sheet: Option<&str>) -> Result<Vec<Row>, AccessError> {
        let mut workbook = open_workbook_auto(path)
            .map_err(|e| AccessError::with_cause(format!("failed to open workbook {}", path.display()), e))?;

        let sheet_name = match sheet {
            Some(name) => name.to_string(),
            None => workbook
                .sheet_names()
                .first()
                .cloned()
                .ok_or_else(|| AccessError::new(format!("workbook {} has no sheets", path.display())))?,
        };

        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| AccessError::with_cause(format!("failed to read sheet '{}'", sheet_name), e))?;

        let mut lines = range.rows();
        let headers = match lines.next() {
            Some(header_row) => header_row.iter().map(|cell| cell_value(cell).to_string()).collect::<Vec<_>>(),
            None => return Ok(Vec::new()),
        };

        let rows = lines
            .map(|cells| {
                headers
                    .iter()
                    .enumerate()
                    .map(|(idx, header)| (header.clone(), cells.get(idx).map(cell_value).unwrap_or(Value::Null)))
                    .collect::<Row>()
            })
            .collect();
        Ok(rows)
    }

    fn check_sheet(path: &Path, sheet: &str) -> Result<(), ValidationError> {
        let workbook = open_workbook_auto(path)
            .map_err(|e| ValidationError::new(format!("{} is not a readable workbook: {}", path.display(), e)))?;
        if workbook.sheet_names().iter().any(|name| name == sheet) {
            Ok(())
        } else {
            Err(ValidationError::new(format!(
                "sheet '{}' not found in {}",
                sheet,
                path.display()
            )))
        }
    }
}

fn unsupported(path: &Path) -> ConfigurationError {
    ConfigurationError::InvalidSourceOptions {
        kind: FileSource::KIND.to_string(),
        reason: format!("unsupported file type: {}", path.display()),
    }
}

/// Convert a spreadsheet cell; serial dates use the 1900 date system
fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::Int(i) => Value::Int(*i),
        Data::Float(f) => Value::Float(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::String(s) if s.is_empty() => Value::Null,
        Data::String(s) => Value::Text(s.clone()),
        Data::DateTime(dt) => excel_serial_to_date(dt.as_f64())
            .map(Value::Date)
            .unwrap_or(Value::Float(dt.as_f64())),
        Data::DateTimeIso(s) => Value::parse_date(s)
            .map(Value::Date)
            .unwrap_or_else(|| Value::Text(s.clone())),
        Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(e) => Value::Text(format!("#{:?}", e)),
    }
}

fn excel_serial_to_date(serial: f64) -> Option<chrono::NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(Duration::milliseconds(millis))
}

#[async_trait]
impl DataSource for FileSource {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn base(&self) -> &SourceBase {
        &self.base
    }

    async fn validate(&self) -> Result<(), ValidationError> {
        if self.path.as_os_str().is_empty() {
            return Err(ValidationError::new("no file path configured"));
        }

        let path = self.path.clone();
        let format = self.format.clone();
        tokio::task::spawn_blocking(move || {
            if !path.exists() {
                return Err(ValidationError::new(format!("{} does not exist", path.display())));
            }
            if !path.is_file() {
                return Err(ValidationError::new(format!("{} is not a file", path.display())));
            }
            // Open and immediately close to surface permission problems
            File::open(&path)
                .map_err(|e| ValidationError::new(format!("cannot read {}: {}", path.display(), e)))?;

            if let FileFormat::Excel { sheet: Some(sheet) } = &format {
                Self::check_sheet(&path, sheet)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| ValidationError::new(format!("validation task failed: {}", e)))?
    }

    async fn fetch_rows(&self) -> Result<Vec<Row>, AccessError> {
        let path = self.path.clone();
        let format = self.format.clone();
        let rows = tokio::task::spawn_blocking(move || match &format {
            FileFormat::Csv { delimiter } => Self::read_csv(&path, *delimiter),
            FileFormat::Excel { sheet } => Self::read_excel(&path, sheet.as_deref()),
        })
        .await
        .map_err(|e| AccessError::with_cause("file read task failed", e))??;

        debug!("Read {} rows from {}", rows.len(), self.path.display());
        Ok(rows)
    }
}
