//! SQL text for every statement the engine issues.
//!
//! Identifiers (schema, table and column names) come from workbook file
//! names, sheet names and header cells, so they are validated and quoted
//! through [`Identifier`]. Cell values never appear in SQL text; they travel
//! as positional parameters in [`Statement::params`].

use std::fmt;

use itertools::Itertools;
use thiserror::Error;

use crate::{
    data::Value,
    metadata::{ColumnMeta, ColumnType},
};

/// PostgreSQL truncates longer identifiers silently.
pub const MAX_IDENTIFIER_BYTES: usize = 63;

/// Synthetic ordinal key of every synchronized table.
pub const ROW_KEY: &str = "id_row";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier {0:?} contains control characters")]
    ControlCharacter(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(raw: &str) -> Result<Self, IdentifierError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IdentifierError::Empty);
        }
        if trimmed.chars().any(char::is_control) {
            return Err(IdentifierError::ControlCharacter(trimmed.to_string()));
        }
        Ok(Identifier(truncate(trimmed, MAX_IDENTIFIER_BYTES).to_string()))
    }

    pub(crate) fn reserved(name: &'static str) -> Self {
        Identifier(name.to_string())
    }

    /// `name_<n>`, shortening the base so the suffix survives truncation.
    pub fn with_suffix(&self, n: usize) -> Self {
        let suffix = format!("_{n}");
        let base = truncate(&self.0, MAX_IDENTIFIER_BYTES - suffix.len());
        Identifier(format!("{base}{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form with embedded quotes doubled.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0.replace('"', "\"\""))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn truncate(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Statement {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Statement {
            sql: sql.into(),
            params,
        }
    }

    pub fn describe_params(&self) -> String {
        format!("[{}]", self.params.iter().join(", "))
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

pub fn qualified(schema: &Identifier, table: &Identifier) -> String {
    format!("{}.{}", schema.quoted(), table.quoted())
}

fn name_param(ident: &Identifier) -> Value {
    Value::Text(ident.as_str().to_string())
}

pub fn schema_exists(schema: &Identifier) -> Statement {
    Statement::with_params(
        "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1::text)",
        vec![name_param(schema)],
    )
}

pub fn create_schema(schema: &Identifier) -> Statement {
    Statement::new(format!("CREATE SCHEMA IF NOT EXISTS {}", schema.quoted()))
}

pub fn table_exists(schema: &Identifier, table: &Identifier) -> Statement {
    Statement::with_params(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
         WHERE table_schema = $1::text AND table_name = $2::text)",
        vec![name_param(schema), name_param(table)],
    )
}

/// Yields `(column_name, data_type)` rows in column order.
pub fn table_columns(schema: &Identifier, table: &Identifier) -> Statement {
    Statement::with_params(
        "SELECT column_name::text, data_type::text FROM information_schema.columns \
         WHERE table_schema = $1::text AND table_name = $2::text ORDER BY ordinal_position",
        vec![name_param(schema), name_param(table)],
    )
}

fn column_definition(column: &ColumnMeta) -> String {
    format!("{} {}", column.name.quoted(), column.data_type.sql_type())
}

pub fn create_table(schema: &Identifier, table: &Identifier, columns: &[ColumnMeta]) -> Statement {
    let definitions = std::iter::once(format!("{ROW_KEY} BIGSERIAL PRIMARY KEY"))
        .chain(columns.iter().map(column_definition))
        .join(", ");
    Statement::new(format!(
        "CREATE TABLE {} ({definitions})",
        qualified(schema, table)
    ))
}

pub fn add_column(schema: &Identifier, table: &Identifier, column: &ColumnMeta) -> Statement {
    Statement::new(format!(
        "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
        qualified(schema, table),
        column_definition(column)
    ))
}

/// Insert keyed by `id_row`; on conflict every supplied column is overwritten.
pub fn upsert(
    schema: &Identifier,
    table: &Identifier,
    columns: &[&Identifier],
    row_key: i64,
    values: Vec<Value>,
) -> Statement {
    let names = columns.iter().map(|c| c.quoted()).join(", ");
    let placeholders = (2..=columns.len() + 1).map(|n| format!("${n}")).join(", ");
    let updates = columns
        .iter()
        .map(|c| format!("{0} = EXCLUDED.{0}", c.quoted()))
        .join(", ");
    let mut params = Vec::with_capacity(values.len() + 1);
    params.push(Value::Integer(row_key));
    params.extend(values);
    let sql = if columns.is_empty() {
        format!(
            "INSERT INTO {} ({ROW_KEY}) VALUES ($1) ON CONFLICT ({ROW_KEY}) DO NOTHING",
            qualified(schema, table)
        )
    } else {
        format!(
            "INSERT INTO {} ({ROW_KEY}, {names}) VALUES ($1, {placeholders}) \
             ON CONFLICT ({ROW_KEY}) DO UPDATE SET {updates}",
            qualified(schema, table)
        )
    };
    Statement::with_params(sql, params)
}

pub fn alter_column_type(
    schema: &Identifier,
    table: &Identifier,
    column: &Identifier,
    ty: ColumnType,
) -> Statement {
    Statement::new(format!(
        "ALTER TABLE {} ALTER COLUMN {col} TYPE {ty} USING {col}::{ty}",
        qualified(schema, table),
        col = column.quoted(),
        ty = ty.sql_type()
    ))
}
