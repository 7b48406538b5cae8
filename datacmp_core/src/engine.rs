use crate::scheme::{check_items, ComparisonScheme, ResolvedItem};
use crate::sources::ScriptProcessor;
use datacmp_common::{
    AppConfig, CellResult, ComparisonRow, ConfigurationError, DataCmpError, DataItem, DataSource,
    KeyMapping, Row, RowStatus, RunId, Side, Value,
};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of a comparison run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Idle,
    Fetching,
    Reconciling,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub validate_timeout: Duration,
    pub fetch_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl EngineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            validate_timeout: Duration::from_secs(config.validate_timeout_secs),
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
        }
    }
}

/// Rows fetched from one side together with the mapping that turns source
/// fields into data item codes
#[derive(Debug, Clone, Default)]
pub struct FetchedSide {
    pub rows: Vec<Row>,
    pub key_to_code: KeyMapping,
}

impl FetchedSide {
    pub fn new(rows: Vec<Row>, key_to_code: KeyMapping) -> Self {
        Self { rows, key_to_code }
    }

    fn value(&self, row: &Row, code: &str) -> Value {
        self.key_to_code.value_for(row, code)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub matched: usize,
    pub matched_with_differences: usize,
    pub primary_only: usize,
    pub shadow_only: usize,
    pub different_cells: usize,
    pub comparator_errors: usize,
}

impl ReportSummary {
    pub fn from_rows(rows: &[ComparisonRow]) -> Self {
        let mut summary = Self {
            total: rows.len(),
            ..Self::default()
        };
        for row in rows {
            match row.status {
                RowStatus::Matched => {
                    summary.matched += 1;
                    if row.has_differences() {
                        summary.matched_with_differences += 1;
                    }
                }
                RowStatus::PrimaryOnly => summary.primary_only += 1,
                RowStatus::ShadowOnly => summary.shadow_only += 1,
            }
            summary.different_cells += row.different_cells();
            summary.comparator_errors += row.cells.iter().filter(|c| c.warning.is_some()).count();
        }
        summary
    }

    pub fn has_differences(&self) -> bool {
        self.matched_with_differences + self.primary_only + self.shadow_only > 0
    }
}

/// Result of one successful run
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub run_id: RunId,
    pub scheme: String,
    /// Column headers in data item order
    pub columns: Vec<String>,
    pub rows: Vec<ComparisonRow>,
    pub summary: ReportSummary,
    pub warnings: Vec<String>,
}

impl ComparisonReport {
    pub fn has_differences(&self) -> bool {
        self.summary.has_differences()
    }

    /// Rows that are one-sided or carry at least one flagged cell
    pub fn differing_rows(&self) -> impl Iterator<Item = &ComparisonRow> {
        self.rows.iter().filter(|row| row.has_differences())
    }
}

/// Composite key of `row`: the normalized value of every key code, in order
pub fn composite_key(side: &FetchedSide, row: &Row, key_codes: &[&str]) -> Vec<String> {
    key_codes
        .iter()
        .map(|code| side.value(row, code).normalized())
        .collect()
}

/// Align primary and shadow rows by composite key and compare every cell.
///
/// Output order: primary rows in fetch order (MATCHED or PRIMARY_ONLY),
/// then unconsumed shadow rows in fetch order (SHADOW_ONLY). Duplicate keys
/// pair first-in-first-out.
pub fn reconcile(
    items: &[ResolvedItem],
    primary: &FetchedSide,
    shadow: &FetchedSide,
) -> Result<Vec<ComparisonRow>, ConfigurationError> {
    let key_codes = items
        .iter()
        .filter(|resolved| resolved.item.unique)
        .map(|resolved| resolved.item.code.as_str())
        .collect::<Vec<_>>();
    if key_codes.is_empty() {
        return Err(ConfigurationError::NoUniqueItems);
    }

    let mut index: HashMap<Vec<String>, VecDeque<usize>> = HashMap::new();
    for (idx, row) in shadow.rows.iter().enumerate() {
        index
            .entry(composite_key(shadow, row, &key_codes))
            .or_default()
            .push_back(idx);
    }

    let mut consumed = vec![false; shadow.rows.len()];
    let mut output = Vec::with_capacity(primary.rows.len().max(shadow.rows.len()));

    for (p_idx, p_row) in primary.rows.iter().enumerate() {
        let key = composite_key(primary, p_row, &key_codes);
        let paired = index.get_mut(&key).and_then(VecDeque::pop_front);

        let row = match paired {
            Some(s_idx) => {
                consumed[s_idx] = true;
                let s_row = &shadow.rows[s_idx];
                ComparisonRow {
                    cells: build_cells(items, &key, |code| {
                        (primary.value(p_row, code), shadow.value(s_row, code))
                    }, false),
                    key,
                    status: RowStatus::Matched,
                    primary_index: Some(p_idx),
                    shadow_index: Some(s_idx),
                }
            }
            None => ComparisonRow {
                cells: build_cells(items, &key, |code| (primary.value(p_row, code), Value::Null), true),
                key,
                status: RowStatus::PrimaryOnly,
                primary_index: Some(p_idx),
                shadow_index: None,
            },
        };
        output.push(row);
    }

    for (s_idx, s_row) in shadow.rows.iter().enumerate() {
        if consumed[s_idx] {
            continue;
        }
        let key = composite_key(shadow, s_row, &key_codes);
        output.push(ComparisonRow {
            cells: build_cells(items, &key, |code| (Value::Null, shadow.value(s_row, code)), true),
            key,
            status: RowStatus::ShadowOnly,
            primary_index: None,
            shadow_index: Some(s_idx),
        });
    }

    Ok(output)
}

fn build_cells(
    items: &[ResolvedItem],
    key: &[String],
    values: impl Fn(&str) -> (Value, Value),
    counterpart_missing: bool,
) -> Vec<CellResult> {
    items
        .iter()
        .map(|resolved| {
            let (primary_value, shadow_value) = values(&resolved.item.code);
            let cell = CellResult::compute(
                resolved.item.unique,
                resolved.comparator.as_deref(),
                primary_value,
                shadow_value,
                counterpart_missing,
            );
            if let Some(warning) = &cell.warning {
                warn!("Row {:?}, column {}: {}", key, resolved.item.code, warning);
            }
            cell
        })
        .collect()
}

/// Runs comparison schemes.
///
/// Both sides are validated, then fetched, concurrently. Every source call is
/// bounded by a timeout and abandoned as soon as the cancellation token
/// fires; dropping the abandoned future releases whatever it held.
/// Reconciliation itself is never interrupted.
pub struct ComparisonEngine {
    options: EngineOptions,
    state: watch::Sender<RunState>,
}

impl ComparisonEngine {
    pub fn new(options: EngineOptions) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self { options, state }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Follow state transitions of the runs made by this engine
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    fn set_state(&self, state: RunState) {
        let previous = self.state.send_replace(state);
        debug!("Engine state {:?} -> {:?}", previous, state);
    }

    pub async fn run(
        &self,
        scheme: &ComparisonScheme,
        cancel: &CancellationToken,
    ) -> Result<ComparisonReport, DataCmpError> {
        self.set_state(RunState::Idle);
        let outcome = self.execute(scheme, cancel).await;
        self.set_state(if outcome.is_ok() { RunState::Done } else { RunState::Failed });
        outcome
    }

    async fn execute(
        &self,
        scheme: &ComparisonScheme,
        cancel: &CancellationToken,
    ) -> Result<ComparisonReport, DataCmpError> {
        let items = scheme.data_items().cloned().collect::<Vec<DataItem>>();
        check_items(&items)?;
        if cancel.is_cancelled() {
            return Err(DataCmpError::Cancelled);
        }

        let run_id = RunId::new();
        info!(
            "Run {}: comparing {} against {}",
            run_id,
            scheme.primary.describe(),
            scheme.shadow.describe()
        );

        self.set_state(RunState::Fetching);
        tokio::try_join!(
            self.validate_side(Side::Primary, scheme.primary.as_ref(), cancel),
            self.validate_side(Side::Shadow, scheme.shadow.as_ref(), cancel),
        )?;

        let (primary, shadow) = tokio::try_join!(
            self.fetch_side(Side::Primary, scheme.primary.as_ref(), cancel),
            self.fetch_side(Side::Shadow, scheme.shadow.as_ref(), cancel),
        )?;
        info!("Fetched {} primary rows and {} shadow rows", primary.rows.len(), shadow.rows.len());

        // Last point at which a run can be abandoned
        if cancel.is_cancelled() {
            return Err(DataCmpError::Cancelled);
        }

        self.set_state(RunState::Reconciling);
        let rows = reconcile(&scheme.items, &primary, &shadow)?;
        let summary = ReportSummary::from_rows(&rows);

        let mut warnings = scheme.warnings.clone();
        if summary.comparator_errors > 0 {
            warnings.push(format!(
                "{} cell(s) could not be compared and were flagged as different",
                summary.comparator_errors
            ));
        }

        info!(
            "Run {}: {} rows, {} matched ({} with differences), {} primary-only, {} shadow-only",
            run_id,
            summary.total,
            summary.matched,
            summary.matched_with_differences,
            summary.primary_only,
            summary.shadow_only
        );

        Ok(ComparisonReport {
            run_id,
            scheme: scheme.name.clone(),
            columns: items.iter().map(|item| item.label().to_string()).collect(),
            rows,
            summary,
            warnings,
        })
    }

    /// Column names of one side, bounded like a fetch
    pub async fn column_names(
        &self,
        source: &dyn DataSource,
        side: Side,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, DataCmpError> {
        self.validate_side(side, source, cancel).await?;
        guarded(side, "fetch", self.options.fetch_timeout, cancel, async {
            source
                .column_names()
                .await
                .map_err(|source| DataCmpError::Access { side, source })
        })
        .await
    }

    async fn validate_side(
        &self,
        side: Side,
        source: &dyn DataSource,
        cancel: &CancellationToken,
    ) -> Result<(), DataCmpError> {
        guarded(side, "validate", self.options.validate_timeout, cancel, async {
            source
                .validate()
                .await
                .map_err(|source| DataCmpError::Validation { side, source })
        })
        .await
    }

    async fn fetch_side(
        &self,
        side: Side,
        source: &dyn DataSource,
        cancel: &CancellationToken,
    ) -> Result<FetchedSide, DataCmpError> {
        let rows = guarded(side, "fetch", self.options.fetch_timeout, cancel, async {
            let rows = source
                .fetch_rows()
                .await
                .map_err(|source| DataCmpError::Access { side, source })?;

            match source.base().script.as_deref().and_then(ScriptProcessor::parse) {
                Some(script) => script
                    .process(rows)
                    .await
                    .map_err(|source| DataCmpError::Access { side, source }),
                None => Ok(rows),
            }
        })
        .await?;

        debug!("{} side produced {} rows", side, rows.len());
        Ok(FetchedSide::new(rows, source.key_to_code().clone()))
    }
}

impl Default for ComparisonEngine {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

async fn guarded<T, F>(
    side: Side,
    operation: &str,
    limit: Duration,
    cancel: &CancellationToken,
    work: F,
) -> Result<T, DataCmpError>
where
    F: Future<Output = Result<T, DataCmpError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DataCmpError::Cancelled),
        outcome = tokio::time::timeout(limit, work) => match outcome {
            Ok(result) => result,
            Err(_) => Err(DataCmpError::Timeout {
                side,
                operation: operation.to_string(),
                secs: limit.as_secs(),
            }),
        },
    }
}
