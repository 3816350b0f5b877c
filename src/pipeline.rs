//! Workbook walker and the periodic scheduler around it.

use std::{path::Path, thread};

use anyhow::{Result, bail};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::{
    config::{Config, DirtyCellPolicy},
    db::{Connector, SqlExecutor},
    error::SyncError,
    loader::{LoadSummary, load_rows},
    metadata::{ColumnType, TableLayout, infer_column_types, infer_columns},
    schema_sync::{ensure_namespace, ensure_table},
    sql::Identifier,
    workbook::{CalamineWorkbook, RowSource, schema_name_for},
};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub ignored_sheets: Vec<String>,
    pub dirty_cells: DirtyCellPolicy,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        SyncOptions {
            ignored_sheets: config.ignorant_sheets.clone(),
            dirty_cells: config.dirty_cells,
        }
    }

    pub fn is_ignored(&self, sheet: &str) -> bool {
        self.ignored_sheets.iter().any(|name| name == sheet)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetOutcome {
    Excluded,
    Unreadable(String),
    /// Fewer than two rows: nothing below the header.
    Empty,
    InvalidHeader,
    Failed(String),
    Loaded { created: bool, summary: LoadSummary },
}

#[derive(Debug, Clone)]
pub struct SheetReport {
    pub sheet: String,
    pub outcome: SheetOutcome,
}

#[derive(Debug, Clone)]
pub struct WorkbookReport {
    pub schema: String,
    pub schema_created: bool,
    pub sheets: Vec<SheetReport>,
}

impl WorkbookReport {
    pub fn outcome(&self, sheet: &str) -> Option<&SheetOutcome> {
        self.sheets
            .iter()
            .find(|report| report.sheet == sheet)
            .map(|report| &report.outcome)
    }

    pub fn loaded_sheets(&self) -> usize {
        self.sheets
            .iter()
            .filter(|report| matches!(report.outcome, SheetOutcome::Loaded { .. }))
            .count()
    }

    pub fn failed_rows(&self) -> usize {
        self.sheets
            .iter()
            .filter_map(|report| match &report.outcome {
                SheetOutcome::Loaded { summary, .. } => Some(summary.failed),
                _ => None,
            })
            .sum()
    }
}

/// Mirrors every sheet of `source` into tables of `schema_name`.
///
/// Sheet-level problems are recorded in the report and the walk continues;
/// fatal errors end the run.
pub fn sync_workbook(
    source: &mut dyn RowSource,
    schema_name: &str,
    executor: &mut dyn SqlExecutor,
    options: &SyncOptions,
) -> Result<WorkbookReport, SyncError> {
    let schema = Identifier::new(schema_name).map_err(SyncError::SchemaName)?;
    let schema_created = ensure_namespace(executor, &schema)?;

    let mut sheets = Vec::new();
    for sheet in source.sheet_names() {
        if sheet.is_empty() {
            continue;
        }
        let outcome = if options.is_ignored(&sheet) {
            info!("Sheet {sheet} is in the ignore list; skipping");
            SheetOutcome::Excluded
        } else {
            match sync_sheet(source, &schema, &sheet, executor, options) {
                Ok(outcome) => outcome,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    error!("Sheet {sheet} was not synchronized: {err}");
                    SheetOutcome::Failed(err.to_string())
                }
            }
        };
        sheets.push(SheetReport { sheet, outcome });
    }

    Ok(WorkbookReport {
        schema: schema.to_string(),
        schema_created,
        sheets,
    })
}

fn sync_sheet(
    source: &mut dyn RowSource,
    schema: &Identifier,
    sheet: &str,
    executor: &mut dyn SqlExecutor,
    options: &SyncOptions,
) -> Result<SheetOutcome, SyncError> {
    let rows = match source.rows(sheet) {
        Ok(rows) => rows,
        Err(err) => {
            warn!("Failed to read rows from sheet {sheet}: {err}");
            return Ok(SheetOutcome::Unreadable(err.to_string()));
        }
    };
    let Some((header, data)) = rows.split_first().filter(|(_, data)| !data.is_empty()) else {
        warn!("Sheet {sheet} has no data rows; skipping");
        return Ok(SheetOutcome::Empty);
    };

    let types = infer_column_types(data, header.len());
    let layout = TableLayout::from_header(header, &types);
    if layout.is_empty() {
        warn!("Sheet {sheet} has no usable column names in its header row; skipping");
        return Ok(SheetOutcome::InvalidHeader);
    }
    let table_name = match Identifier::new(sheet) {
        Ok(name) => name,
        Err(err) => {
            warn!("Sheet {sheet:?} cannot be used as a table name: {err}");
            return Ok(SheetOutcome::Failed(err.to_string()));
        }
    };
    debug!(
        "Inferred column types for {sheet}: {}",
        layout
            .columns
            .iter()
            .map(|c| format!("{}:{}", c.name, c.data_type))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut table = ensure_table(executor, schema, &table_name, &layout)?;
    let summary = load_rows(executor, &mut table, data, layout.width, options.dirty_cells)?;
    info!(
        "Data inserted or updated in table {}: {} row(s) stored, {} failed, {} column(s) widened",
        table.label(),
        summary.upserted,
        summary.failed,
        summary.widened
    );
    Ok(SheetOutcome::Loaded {
        created: table.created,
        summary,
    })
}

/// One full run over a workbook file with its own connection.
pub fn sync_workbook_file(
    path: &Path,
    config: &Config,
    connector: &dyn Connector,
) -> Result<WorkbookReport, SyncError> {
    let mut workbook = CalamineWorkbook::open(path)?;
    let schema = schema_name_for(path);
    let mut executor = connector
        .connect(&config.postgres_url_base_db)
        .map_err(SyncError::Connect)?;
    let report = sync_workbook(
        &mut workbook,
        &schema,
        executor.as_mut(),
        &SyncOptions::from_config(config),
    )?;
    info!(
        "Schema generation and data insertion complete for {} ({} sheet(s) loaded)",
        path.display(),
        report.loaded_sheets()
    );
    Ok(report)
}

/// Runs every configured workbook once. Returns how many of them failed.
pub fn run_pass(config: &Config, connector: &dyn Connector) -> usize {
    let mut failures = 0;
    for path in &config.excel_file_paths {
        if let Err(err) = sync_workbook_file(path, config, connector) {
            failures += 1;
            error!("Error while processing workbook {}: {err}", path.display());
        }
    }
    failures
}

pub fn run_schedule(config: &Config, connector: &dyn Connector, once: bool) -> Result<()> {
    loop {
        let failures = run_pass(config, connector);
        if once {
            if failures > 0 {
                bail!(
                    "{failures} of {} workbook(s) failed to synchronize",
                    config.excel_file_paths.len()
                );
            }
            return Ok(());
        }
        debug!(
            "Pass finished with {failures} failed workbook(s); next pass in {}s",
            config.interval_seconds
        );
        thread::sleep(config.interval());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbedColumn {
    pub name: String,
    pub data_type: ColumnType,
    pub non_blank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetProbe {
    pub sheet: String,
    pub rows: usize,
    pub columns: Vec<ProbedColumn>,
}

/// Infers the table every included sheet would produce, without a database.
pub fn probe_workbook(source: &mut dyn RowSource, ignored: &[String]) -> Vec<SheetProbe> {
    let mut probes = Vec::new();
    for sheet in source.sheet_names() {
        if sheet.is_empty() || ignored.contains(&sheet) {
            continue;
        }
        let rows = match source.rows(&sheet) {
            Ok(rows) => rows,
            Err(err) => {
                warn!("Failed to read rows from sheet {sheet}: {err}");
                continue;
            }
        };
        let Some((header, data)) = rows.split_first().filter(|(_, data)| !data.is_empty())
        else {
            warn!("Sheet {sheet} has no data rows; skipping");
            continue;
        };
        let profiles = infer_columns(data, header.len());
        let types: Vec<ColumnType> = profiles.iter().map(|p| p.data_type).collect();
        let layout = TableLayout::from_header(header, &types);
        if layout.is_empty() {
            warn!("Sheet {sheet} has no usable column names in its header row; skipping");
            continue;
        }
        let columns = layout
            .columns
            .iter()
            .map(|column| ProbedColumn {
                name: column.name.to_string(),
                data_type: column.data_type,
                non_blank: profiles[column.index].non_blank,
            })
            .collect();
        probes.push(SheetProbe {
            sheet,
            rows: data.len(),
            columns,
        });
    }
    probes
}
