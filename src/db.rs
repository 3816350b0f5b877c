//! SQL executor boundary.
//!
//! The engine talks to the database only through [`SqlExecutor`]. Driver
//! failures are classified into a [`DbErrorKind`] here so callers never
//! inspect driver-specific error codes.

use std::error::Error as StdError;

use bytes::BytesMut;
use log::debug;
use postgres::{
    Client, NoTls,
    error::SqlState,
    types::{IsNull, ToSql, Type, to_sql_checked},
};
use rust_decimal::{Decimal, prelude::FromPrimitive};
use thiserror::Error;

use crate::{data::Value, sql::Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// A value does not fit the column type it was bound to.
    TypeMismatch,
    ConnectionLost,
    ConstraintViolation,
    Other,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct DbError {
    kind: DbErrorKind,
    message: String,
    code: Option<String>,
}

impl DbError {
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        DbError {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn kind(&self) -> DbErrorKind {
        self.kind
    }

    /// SQLSTATE reported by the server, when there is one.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn is_connection_lost(&self) -> bool {
        self.kind == DbErrorKind::ConnectionLost
    }
}

pub trait SqlExecutor {
    /// Runs a statement and returns the number of affected rows.
    fn execute(&mut self, statement: &Statement) -> Result<u64, DbError>;

    /// Runs a query whose first row's first column is a boolean.
    fn query_bool(&mut self, statement: &Statement) -> Result<bool, DbError>;

    /// Runs a query whose columns are all textual.
    fn query_rows(&mut self, statement: &Statement) -> Result<Vec<Vec<Option<String>>>, DbError>;
}

/// Opens a fresh executor for one workbook run.
pub trait Connector {
    fn connect(&self, url: &str) -> Result<Box<dyn SqlExecutor>, DbError>;
}

pub struct PostgresConnector;

impl Connector for PostgresConnector {
    fn connect(&self, url: &str) -> Result<Box<dyn SqlExecutor>, DbError> {
        Ok(Box::new(PostgresExecutor::connect(url)?))
    }
}

pub struct PostgresExecutor {
    client: Client,
}

impl PostgresExecutor {
    pub fn connect(url: &str) -> Result<Self, DbError> {
        let client = Client::connect(url, NoTls).map_err(classify)?;
        debug!("Connected to PostgreSQL");
        Ok(PostgresExecutor { client })
    }
}

impl Drop for PostgresExecutor {
    fn drop(&mut self) {
        debug!("Closing PostgreSQL connection");
    }
}

fn bind(statement: &Statement) -> Vec<&(dyn ToSql + Sync)> {
    statement
        .params
        .iter()
        .map(|value| value as &(dyn ToSql + Sync))
        .collect()
}

impl SqlExecutor for PostgresExecutor {
    fn execute(&mut self, statement: &Statement) -> Result<u64, DbError> {
        debug!("Executing: {statement}");
        self.client
            .execute(statement.sql.as_str(), &bind(statement))
            .map_err(classify)
    }

    fn query_bool(&mut self, statement: &Statement) -> Result<bool, DbError> {
        let row = self
            .client
            .query_one(statement.sql.as_str(), &bind(statement))
            .map_err(classify)?;
        row.try_get::<_, bool>(0).map_err(classify)
    }

    fn query_rows(&mut self, statement: &Statement) -> Result<Vec<Vec<Option<String>>>, DbError> {
        let rows = self
            .client
            .query(statement.sql.as_str(), &bind(statement))
            .map_err(classify)?;
        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|idx| row.try_get::<_, Option<String>>(idx))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(classify)
            })
            .collect()
    }
}

/// Raised while binding a [`Value`] to a parameter of an incompatible type.
#[derive(Debug, Error)]
#[error("cannot bind {value} to a {target} parameter")]
pub struct ValueTypeError {
    value: String,
    target: String,
}

fn is_textual(ty: &Type) -> bool {
    *ty == Type::TEXT
        || *ty == Type::VARCHAR
        || *ty == Type::BPCHAR
        || *ty == Type::NAME
        || *ty == Type::UNKNOWN
}

impl Value {
    fn bind_error(&self, ty: &Type) -> Box<dyn StdError + Sync + Send> {
        Box::new(ValueTypeError {
            value: self.to_string(),
            target: ty.name().to_string(),
        })
    }
}

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            Value::Absent => Ok(IsNull::Yes),
            Value::Integer(i) => {
                if *ty == Type::INT8 {
                    i.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    let narrowed = i32::try_from(*i).map_err(|_| self.bind_error(ty))?;
                    narrowed.to_sql(ty, out)
                } else if *ty == Type::INT2 {
                    let narrowed = i16::try_from(*i).map_err(|_| self.bind_error(ty))?;
                    narrowed.to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*i as f64).to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    (*i as f32).to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    Decimal::from(*i).to_sql(ty, out)
                } else if is_textual(ty) {
                    self.as_display().as_str().to_sql(ty, out)
                } else {
                    Err(self.bind_error(ty))
                }
            }
            Value::Float(f) => {
                if *ty == Type::FLOAT8 {
                    f.to_sql(ty, out)
                } else if *ty == Type::FLOAT4 {
                    let narrowed = *f as f32;
                    if narrowed.is_infinite() {
                        return Err(self.bind_error(ty));
                    }
                    narrowed.to_sql(ty, out)
                } else if *ty == Type::NUMERIC {
                    let decimal = Decimal::from_f64(*f).ok_or_else(|| self.bind_error(ty))?;
                    decimal.to_sql(ty, out)
                } else if is_textual(ty) {
                    self.as_display().as_str().to_sql(ty, out)
                } else {
                    Err(self.bind_error(ty))
                }
            }
            Value::Date(d) if *ty == Type::DATE => d.to_sql(ty, out),
            Value::Date(_) if is_textual(ty) => self.as_display().as_str().to_sql(ty, out),
            Value::Text(s) if is_textual(ty) => s.as_str().to_sql(ty, out),
            Value::Date(_) | Value::Text(_) => Err(self.bind_error(ty)),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn classify(err: postgres::Error) -> DbError {
    let message = err.to_string();
    if let Some(db_error) = err.as_db_error() {
        let code = db_error.code();
        let class = &code.code()[..2];
        let kind = if class == "22"
            || *code == SqlState::DATATYPE_MISMATCH
            || *code == SqlState::CANNOT_COERCE
        {
            DbErrorKind::TypeMismatch
        } else if class == "23" {
            DbErrorKind::ConstraintViolation
        } else if class == "08"
            || *code == SqlState::ADMIN_SHUTDOWN
            || *code == SqlState::CRASH_SHUTDOWN
            || *code == SqlState::CANNOT_CONNECT_NOW
        {
            DbErrorKind::ConnectionLost
        } else {
            DbErrorKind::Other
        };
        return DbError::new(kind, message).with_code(code.code());
    }
    if err.is_closed() {
        return DbError::new(DbErrorKind::ConnectionLost, message);
    }
    let source = err.source();
    if source.is_some_and(|s| s.is::<ValueTypeError>()) {
        DbError::new(DbErrorKind::TypeMismatch, message)
    } else if source.is_some_and(|s| s.is::<std::io::Error>()) {
        DbError::new(DbErrorKind::ConnectionLost, message)
    } else {
        DbError::new(DbErrorKind::Other, message)
    }
}
