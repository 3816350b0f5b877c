use log::{debug, error};
use serde::Serialize;

use crate::{
    config::DirtyCellPolicy,
    data::{Value, convert_value, is_blank},
    db::{DbErrorKind, SqlExecutor},
    error::SyncError,
    schema_sync::{TableState, widen_columns},
    sql::{self, Identifier, Statement},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub upserted: usize,
    pub failed: usize,
    /// Columns whose type was widened while loading.
    pub widened: usize,
}

/// Right-pads `row` with empty cells up to `width`.
pub fn pad_row(row: &[String], width: usize) -> Vec<String> {
    let mut padded = row.to_vec();
    if padded.len() < width {
        padded.resize(width, String::new());
    }
    padded
}

/// Converts the cells of `row` that belong to a table column, in column order.
pub fn convert_row(table: &TableState, row: &[String], policy: DirtyCellPolicy) -> Vec<Value> {
    table
        .columns
        .iter()
        .map(|column| {
            let raw = row.get(column.index).map(String::as_str).unwrap_or("");
            match convert_value(raw, column.data_type) {
                Value::Absent if policy == DirtyCellPolicy::Widen && !is_blank(raw) => {
                    Value::Text(raw.to_string())
                }
                value => value,
            }
        })
        .collect()
}

pub fn upsert_statement(
    table: &TableState,
    row: &[String],
    ordinal: usize,
    policy: DirtyCellPolicy,
) -> Statement {
    let names: Vec<&Identifier> = table.columns.iter().map(|c| &c.name).collect();
    sql::upsert(
        &table.schema,
        &table.name,
        &names,
        ordinal as i64,
        convert_row(table, row, policy),
    )
}

/// Upserts every data row keyed by its 1-based ordinal.
///
/// A failed row is logged and skipped. When the failure is a type mismatch
/// the offending columns are widened once so the next pass can store the row.
pub fn load_rows(
    executor: &mut dyn SqlExecutor,
    table: &mut TableState,
    rows: &[Vec<String>],
    width: usize,
    policy: DirtyCellPolicy,
) -> Result<LoadSummary, SyncError> {
    let mut summary = LoadSummary::default();
    for (offset, row) in rows.iter().enumerate() {
        let ordinal = offset + 1;
        let row = pad_row(row, width);
        let statement = upsert_statement(table, &row, ordinal, policy);
        match executor.execute(&statement) {
            Ok(_) => summary.upserted += 1,
            Err(err) if err.is_connection_lost() => return Err(SyncError::ConnectionLost(err)),
            Err(err) => {
                summary.failed += 1;
                error!(
                    "Failed to insert or update row {ordinal} in table {}: {err}",
                    table.label()
                );
                error!("Query: {statement}");
                error!("Values: {}", statement.describe_params());
                error!("Columns: {}", table.describe_columns());
                if err.kind() == DbErrorKind::TypeMismatch {
                    summary.widened += widen_columns(executor, table, &row)?.len();
                }
            }
        }
    }
    debug!(
        "Loaded {} of {} row(s) into {}",
        summary.upserted,
        rows.len(),
        table.label()
    );
    Ok(summary)
}
