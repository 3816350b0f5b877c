use std::{collections::HashSet, fmt};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{
    data::{is_blank, parse_float, parse_integer, parse_naive_date},
    sql::{Identifier, ROW_KEY},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Float,
    Date,
    Text,
}

impl ColumnType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "Integer",
            ColumnType::Float => "Float",
            ColumnType::Date => "Date",
            ColumnType::Text => "Text",
        }
    }

    /// PostgreSQL type used in DDL for this column type.
    pub const fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "BIGINT",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Date => "DATE",
            ColumnType::Text => "TEXT",
        }
    }

    /// Maps an `information_schema.columns.data_type` value back to a column type.
    pub fn from_sql_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bigint" | "integer" | "smallint" => Some(ColumnType::Integer),
            "double precision" | "real" | "numeric" => Some(ColumnType::Float),
            "date" => Some(ColumnType::Date),
            "text" | "character varying" | "character" => Some(ColumnType::Text),
            _ => None,
        }
    }

    /// Narrowest type able to hold values of both `self` and `other`.
    pub fn widen(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, Float) | (Float, Integer) => Float,
            _ => Text,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct TypeCandidate {
    possible_integer: bool,
    possible_float: bool,
    possible_date: bool,
    non_blank: usize,
}

impl TypeCandidate {
    fn new() -> Self {
        Self {
            possible_integer: true,
            possible_float: true,
            possible_date: true,
            non_blank: 0,
        }
    }

    fn observe(&mut self, value: &str) {
        if is_blank(value) {
            return;
        }
        self.non_blank += 1;
        if self.possible_integer && parse_integer(value).is_none() {
            self.possible_integer = false;
        }
        if self.possible_float && parse_float(value).is_none() {
            self.possible_float = false;
        }
        if self.possible_date && parse_naive_date(value).is_none() {
            self.possible_date = false;
        }
    }

    fn decide(&self) -> ColumnType {
        if self.non_blank == 0 {
            ColumnType::Text
        } else if self.possible_integer {
            ColumnType::Integer
        } else if self.possible_float {
            ColumnType::Float
        } else if self.possible_date {
            ColumnType::Date
        } else {
            ColumnType::Text
        }
    }
}

/// Inferred type of one column plus the number of non-blank cells seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnProfile {
    pub data_type: ColumnType,
    pub non_blank: usize,
}

pub fn infer_columns(rows: &[Vec<String>], width: usize) -> Vec<ColumnProfile> {
    let mut candidates = vec![TypeCandidate::new(); width];
    for row in rows {
        for (candidate, value) in candidates.iter_mut().zip(row.iter()) {
            candidate.observe(value);
        }
    }
    candidates
        .iter()
        .map(|candidate| ColumnProfile {
            data_type: candidate.decide(),
            non_blank: candidate.non_blank,
        })
        .collect()
}

/// One type per column index. Numeric wins over date, date over text; blank
/// cells are ignored and an all-blank column is text.
pub fn infer_column_types(rows: &[Vec<String>], width: usize) -> Vec<ColumnType> {
    infer_columns(rows, width)
        .into_iter()
        .map(|profile| profile.data_type)
        .collect()
}

/// Type of a single cell, or `None` for a blank one.
pub fn classify_value(value: &str) -> Option<ColumnType> {
    let mut candidate = TypeCandidate::new();
    candidate.observe(value);
    (candidate.non_blank > 0).then(|| candidate.decide())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Position of the column in the sheet's rows.
    pub index: usize,
    pub name: Identifier,
    pub data_type: ColumnType,
}

/// Header-derived column set of a sheet. Empty header cells are not part of it.
#[derive(Debug, Clone)]
pub struct TableLayout {
    pub width: usize,
    pub columns: Vec<ColumnMeta>,
}

impl TableLayout {
    pub fn from_header(header: &[String], types: &[ColumnType]) -> Self {
        let mut seen: HashSet<Identifier> = HashSet::new();
        seen.insert(Identifier::reserved(ROW_KEY));
        let mut columns = Vec::new();
        for (index, raw) in header.iter().enumerate() {
            if is_blank(raw) {
                continue;
            }
            let base = match Identifier::new(raw) {
                Ok(ident) => ident,
                Err(err) => {
                    warn!("Skipping column {}: {err}", index + 1);
                    continue;
                }
            };
            let mut name = base.clone();
            let mut suffix = 2;
            while seen.contains(&name) {
                name = base.with_suffix(suffix);
                suffix += 1;
            }
            if name != base {
                warn!("Column '{base}' is duplicated; stored as '{name}'");
            }
            seen.insert(name.clone());
            columns.push(ColumnMeta {
                index,
                name,
                data_type: types.get(index).copied().unwrap_or(ColumnType::Text),
            });
        }
        TableLayout {
            width: header.len(),
            columns,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
