//! Namespace and table DDL, plus in-place column widening.

use std::collections::HashMap;

use itertools::Itertools;
use log::{error, info, warn};

use crate::{
    db::{DbError, SqlExecutor},
    error::SyncError,
    metadata::{ColumnMeta, ColumnType, TableLayout, classify_value},
    sql::{self, Identifier},
};

/// A table as the current run sees it. Column types track the database,
/// including widenings made during this run.
#[derive(Debug, Clone)]
pub struct TableState {
    pub schema: Identifier,
    pub name: Identifier,
    pub columns: Vec<ColumnMeta>,
    pub created: bool,
}

impl TableState {
    pub fn label(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn describe_columns(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{}:{}", c.name, c.data_type))
            .join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Widening {
    pub column: Identifier,
    pub from: ColumnType,
    pub to: ColumnType,
}

/// Creates the schema unless it exists. Returns whether it was created.
pub fn ensure_namespace(
    executor: &mut dyn SqlExecutor,
    schema: &Identifier,
) -> Result<bool, SyncError> {
    let failed = |source| SyncError::Namespace {
        schema: schema.to_string(),
        source,
    };
    if executor
        .query_bool(&sql::schema_exists(schema))
        .map_err(failed)?
    {
        info!("Schema {schema} already exists");
        return Ok(false);
    }
    executor
        .execute(&sql::create_schema(schema))
        .map_err(failed)?;
    info!("Schema {schema} created");
    Ok(true)
}

/// Creates the table from `layout` when missing. An existing table keeps its
/// stored column types; header columns it lacks are added.
pub fn ensure_table(
    executor: &mut dyn SqlExecutor,
    schema: &Identifier,
    table: &Identifier,
    layout: &TableLayout,
) -> Result<TableState, SyncError> {
    let label = format!("{schema}.{table}");
    let exists = executor
        .query_bool(&sql::table_exists(schema, table))
        .map_err(|source| SyncError::ExistenceCheck {
            table: label.clone(),
            source,
        })?;

    if !exists {
        executor
            .execute(&sql::create_table(schema, table, &layout.columns))
            .map_err(|source| SyncError::CreateTable {
                table: label.clone(),
                source,
            })?;
        info!(
            "Table {label} created with {} column(s)",
            layout.columns.len()
        );
        return Ok(TableState {
            schema: schema.clone(),
            name: table.clone(),
            columns: layout.columns.clone(),
            created: true,
        });
    }

    info!("Table {label} already exists");
    let stored = stored_column_types(executor, schema, table).map_err(|source| {
        SyncError::DescribeTable {
            table: label.clone(),
            source,
        }
    })?;

    let mut columns = Vec::with_capacity(layout.columns.len());
    for column in &layout.columns {
        match stored.get(column.name.as_str()) {
            Some(Some(data_type)) => columns.push(ColumnMeta {
                data_type: *data_type,
                ..column.clone()
            }),
            Some(None) => {
                warn!(
                    "Column {} of table {label} has a type this tool does not manage; values are bound as text",
                    column.name
                );
                columns.push(ColumnMeta {
                    data_type: ColumnType::Text,
                    ..column.clone()
                });
            }
            None => {
                executor
                    .execute(&sql::add_column(schema, table, column))
                    .map_err(|source| SyncError::AddColumn {
                        table: label.clone(),
                        column: column.name.to_string(),
                        source,
                    })?;
                info!(
                    "Added column {} ({}) to table {label}",
                    column.name, column.data_type
                );
                columns.push(column.clone());
            }
        }
    }

    Ok(TableState {
        schema: schema.clone(),
        name: table.clone(),
        columns,
        created: false,
    })
}

fn stored_column_types(
    executor: &mut dyn SqlExecutor,
    schema: &Identifier,
    table: &Identifier,
) -> Result<HashMap<String, Option<ColumnType>>, DbError> {
    let rows = executor.query_rows(&sql::table_columns(schema, table))?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let mut cells = row.into_iter();
            let name = cells.next().flatten()?;
            let data_type = cells
                .next()
                .flatten()
                .and_then(|ty| ColumnType::from_sql_name(&ty));
            Some((name, data_type))
        })
        .collect())
}

/// Widens every column of `table` whose recorded type cannot hold the
/// corresponding raw cell of `row`.
///
/// When no cell calls for a wider type, the row was rejected for range or
/// precision (a SMALLINT, REAL or NUMERIC column managed as Integer or Float),
/// so its numeric columns with a value in this row are widened to Text.
///
/// Columns that fail to alter are logged and left as they are; only a lost
/// connection is returned as an error.
pub fn widen_columns(
    executor: &mut dyn SqlExecutor,
    table: &mut TableState,
    row: &[String],
) -> Result<Vec<Widening>, SyncError> {
    let mut widened = Vec::new();
    let mut attempted = false;
    let label = table.label();
    for column in table.columns.iter_mut() {
        let Some(observed) = row.get(column.index).and_then(|raw| classify_value(raw)) else {
            continue;
        };
        let target = column.data_type.widen(observed);
        if target == column.data_type {
            continue;
        }
        attempted = true;
        widened.extend(alter_column(executor, &table.schema, &table.name, &label, column, target)?);
    }

    if !attempted {
        for column in table.columns.iter_mut() {
            let filled = row.get(column.index).is_some_and(|raw| !raw.trim().is_empty());
            if !filled || !column.data_type.is_numeric() {
                continue;
            }
            warn!(
                "Row does not fit column {} ({}) of table {label}; falling back to text",
                column.name, column.data_type
            );
            widened.extend(alter_column(
                executor,
                &table.schema,
                &table.name,
                &label,
                column,
                ColumnType::Text,
            )?);
        }
    }
    Ok(widened)
}

fn alter_column(
    executor: &mut dyn SqlExecutor,
    schema: &Identifier,
    table: &Identifier,
    label: &str,
    column: &mut ColumnMeta,
    target: ColumnType,
) -> Result<Option<Widening>, SyncError> {
    let statement = sql::alter_column_type(schema, table, &column.name, target);
    match executor.execute(&statement) {
        Ok(_) => {
            info!(
                "Widened column {} of table {label} from {} to {target}",
                column.name, column.data_type
            );
            let widening = Widening {
                column: column.name.clone(),
                from: column.data_type,
                to: target,
            };
            column.data_type = target;
            Ok(Some(widening))
        }
        Err(err) if err.is_connection_lost() => Err(SyncError::ConnectionLost(err)),
        Err(err) => {
            error!(
                "Failed to change type of column {} in table {label} to {target}: {err}",
                column.name
            );
            Ok(None)
        }
    }
}
