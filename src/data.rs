use std::{fmt, sync::OnceLock};

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::metadata::ColumnType;

/// Date patterns accepted for inference and conversion, in priority order.
pub const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%Y.%m.%d",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%B %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%d-%m-%y",
];

// Workbook readers render date cells with a time part; the time is dropped.
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// A converted cell, ready to be bound as a statement parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Text(String),
    Absent,
}

impl Value {
    pub fn as_display(&self) -> String {
        match self {
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Text(s) => s.clone(),
            Value::Absent => "NULL".to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "'{s}'"),
            other => write!(f, "{}", other.as_display()),
        }
    }
}

fn numeric_literal() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").expect("valid numeric pattern")
    })
}

/// Removes surrounding whitespace and thousands-separator commas.
pub fn strip_thousands(value: &str) -> String {
    value.trim().replace(',', "")
}

pub fn parse_integer(value: &str) -> Option<i64> {
    strip_thousands(value).parse::<i64>().ok()
}

pub fn parse_float(value: &str) -> Option<f64> {
    let stripped = strip_thousands(value);
    if !numeric_literal().is_match(&stripped) {
        return None;
    }
    stripped.parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Integer first, then floating point. `None` when the cell is not a number.
pub fn parse_number(value: &str) -> Option<Value> {
    parse_integer(value)
        .map(Value::Integer)
        .or_else(|| parse_float(value).map(Value::Float))
}

/// Years below 1000 come from `%Y` accepting short digit runs such as `15-03-24`.
pub fn parse_naive_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .chain(
            DATETIME_FORMATS
                .iter()
                .filter_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
                .map(|dt| dt.date()),
        )
        .find(|date| date.year() >= 1000)
}

pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Converts a raw cell into a value compatible with a column of type `ty`.
///
/// Never fails: blanks and cells that cannot be represented under `ty`
/// become [`Value::Absent`].
pub fn convert_value(raw: &str, ty: ColumnType) -> Value {
    if is_blank(raw) {
        return Value::Absent;
    }
    match ty {
        ColumnType::Integer | ColumnType::Float => parse_number(raw).unwrap_or(Value::Absent),
        ColumnType::Date => match parse_naive_date(raw) {
            Some(date) => Value::Date(date),
            None => {
                warn!("Cannot convert '{raw}' to a date");
                Value::Absent
            }
        },
        ColumnType::Text => Value::Text(raw.to_string()),
    }
}
