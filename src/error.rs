use thiserror::Error;

use crate::{db::DbError, sql::IdentifierError, workbook::WorkbookError};

/// Failures raised while synchronizing a workbook.
///
/// Fatal variants abort the whole workbook run; the rest only cost the
/// current sheet.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Workbook(#[from] WorkbookError),
    #[error("invalid schema name: {0}")]
    SchemaName(#[source] IdentifierError),
    #[error("failed to connect to database: {0}")]
    Connect(#[source] DbError),
    #[error("failed to ensure schema '{schema}': {source}")]
    Namespace { schema: String, source: DbError },
    #[error("failed to check whether table {table} exists: {source}")]
    ExistenceCheck { table: String, source: DbError },
    #[error("failed to create table {table}: {source}")]
    CreateTable { table: String, source: DbError },
    #[error("failed to read columns of table {table}: {source}")]
    DescribeTable { table: String, source: DbError },
    #[error("failed to add column {column} to table {table}: {source}")]
    AddColumn {
        table: String,
        column: String,
        source: DbError,
    },
    #[error("lost database connection: {0}")]
    ConnectionLost(#[source] DbError),
}

impl SyncError {
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Workbook(_)
            | SyncError::SchemaName(_)
            | SyncError::Connect(_)
            | SyncError::Namespace { .. }
            | SyncError::ExistenceCheck { .. }
            | SyncError::ConnectionLost(_) => true,
            SyncError::CreateTable { source, .. }
            | SyncError::DescribeTable { source, .. }
            | SyncError::AddColumn { source, .. } => source.is_connection_lost(),
        }
    }
}
