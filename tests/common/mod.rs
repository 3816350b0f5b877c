#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    rc::Rc,
    sync::OnceLock,
};

use regex::Regex;
use rust_xlsxwriter::Workbook;
use tempfile::{TempDir, tempdir};
use xlsx_sync::{
    data::Value,
    db::{Connector, DbError, DbErrorKind, SqlExecutor},
    metadata::ColumnType,
    sql::Statement,
    workbook::{RowSource, WorkbookError},
};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, contents).expect("write temp file");
        path
    }

    /// Writes an .xlsx file. Cells that parse as numbers are stored as numbers.
    pub fn write_workbook(&self, name: &str, sheets: &[(&str, &[&[&str]])]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut workbook = Workbook::new();
        for (sheet, rows) in sheets {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(*sheet).expect("sheet name");
            for (r, row) in rows.iter().enumerate() {
                for (c, cell) in row.iter().enumerate() {
                    if cell.is_empty() {
                        continue;
                    }
                    match cell.parse::<f64>() {
                        Ok(number) => worksheet
                            .write_number(r as u32, c as u16, number)
                            .expect("write number"),
                        Err(_) => worksheet
                            .write_string(r as u32, c as u16, *cell)
                            .expect("write string"),
                    };
                }
            }
        }
        workbook.save(&path).expect("save workbook");
        path
    }
}

pub fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| row.iter().map(|c| c.to_string()).collect())
        .collect()
}

/// In-memory [`RowSource`]; sheets can be marked unreadable.
#[derive(Default)]
pub struct MemoryWorkbook {
    sheets: Vec<(String, Result<Vec<Vec<String>>, String>)>,
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet(mut self, name: &str, rows: &[&[&str]]) -> Self {
        self.sheets.push((name.to_string(), Ok(grid(rows))));
        self
    }

    pub fn unreadable(mut self, name: &str) -> Self {
        self.sheets
            .push((name.to_string(), Err("corrupt sheet xml".to_string())));
        self
    }

    pub fn set_cell(&mut self, sheet: &str, row: usize, col: usize, value: &str) {
        let (_, rows) = self
            .sheets
            .iter_mut()
            .find(|(name, _)| name == sheet)
            .expect("sheet present");
        let rows = rows.as_mut().expect("readable sheet");
        rows[row][col] = value.to_string();
    }

    pub fn push_row(&mut self, sheet: &str, row: &[&str]) {
        let (_, rows) = self
            .sheets
            .iter_mut()
            .find(|(name, _)| name == sheet)
            .expect("sheet present");
        rows.as_mut()
            .expect("readable sheet")
            .push(row.iter().map(|c| c.to_string()).collect());
    }
}

impl RowSource for MemoryWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn rows(&mut self, sheet: &str) -> Result<Vec<Vec<String>>, WorkbookError> {
        let (_, rows) = self
            .sheets
            .iter()
            .find(|(name, _)| name == sheet)
            .ok_or_else(|| WorkbookError::Sheet {
                sheet: sheet.to_string(),
                message: "no such sheet".to_string(),
            })?;
        rows.clone().map_err(|message| WorkbookError::Sheet {
            sheet: sheet.to_string(),
            message,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<(String, ColumnType)>,
    pub rows: BTreeMap<i64, BTreeMap<String, Value>>,
}

impl MemoryTable {
    fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, ty)| *ty)
    }
}

#[derive(Debug, Default)]
struct DbState {
    schemas: BTreeSet<String>,
    tables: BTreeMap<(String, String), MemoryTable>,
    statements: Vec<String>,
    failures: Vec<(String, DbErrorKind)>,
    connections: usize,
}

/// Fake PostgreSQL that understands the statements `xlsx_sync::sql` emits.
///
/// Values are checked against column types the way parameter binding does,
/// so a text value bound to a BIGINT column fails with a type mismatch.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Rc<RefCell<DbState>>,
}

fn quoted_ident() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#""((?:[^"]|"")*)""#).unwrap())
}

fn idents(fragment: &str) -> Vec<String> {
    quoted_ident()
        .captures_iter(fragment)
        .map(|caps| caps[1].replace("\"\"", "\""))
        .collect()
}

fn sql_type(name: &str) -> ColumnType {
    match name {
        "BIGINT" => ColumnType::Integer,
        "DOUBLE PRECISION" => ColumnType::Float,
        "DATE" => ColumnType::Date,
        _ => ColumnType::Text,
    }
}

fn information_schema_name(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Integer => "bigint",
        ColumnType::Float => "double precision",
        ColumnType::Date => "date",
        ColumnType::Text => "text",
    }
}

fn text_param(statement: &Statement, idx: usize) -> String {
    match &statement.params[idx] {
        Value::Text(s) => s.clone(),
        other => panic!("expected text parameter, got {other:?}"),
    }
}

fn bind(value: &Value, ty: ColumnType) -> Result<Value, DbError> {
    let bound = match (value, ty) {
        (Value::Absent, _) => Value::Absent,
        (Value::Integer(i), ColumnType::Integer) => Value::Integer(*i),
        (Value::Integer(i), ColumnType::Float) => Value::Float(*i as f64),
        (Value::Float(f), ColumnType::Float) => Value::Float(*f),
        (Value::Date(d), ColumnType::Date) => Value::Date(*d),
        (other, ColumnType::Text) => Value::Text(other.as_display()),
        (other, ty) => {
            return Err(DbError::new(
                DbErrorKind::TypeMismatch,
                format!("cannot bind {other} to a {} parameter", ty.sql_type()),
            ));
        }
    };
    Ok(bound)
}

fn cast(value: &Value, ty: ColumnType) -> Result<Value, DbError> {
    match (value, ty) {
        (Value::Text(s), ColumnType::Integer | ColumnType::Float | ColumnType::Date) => {
            Err(DbError::new(
                DbErrorKind::TypeMismatch,
                format!("invalid input syntax for type {}: \"{s}\"", ty.sql_type()),
            )
            .with_code("22P02"))
        }
        _ => bind(value, ty),
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every statement whose SQL contains `fragment` fails with `kind`.
    pub fn fail_on(&self, fragment: &str, kind: DbErrorKind) {
        self.state
            .borrow_mut()
            .failures
            .push((fragment.to_string(), kind));
    }

    pub fn clear_failures(&self) {
        self.state.borrow_mut().failures.clear();
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.state.borrow().schemas.contains(schema)
    }

    pub fn has_table(&self, schema: &str, table: &str) -> bool {
        self.state
            .borrow()
            .tables
            .contains_key(&(schema.to_string(), table.to_string()))
    }

    pub fn table(&self, schema: &str, table: &str) -> MemoryTable {
        self.state
            .borrow()
            .tables
            .get(&(schema.to_string(), table.to_string()))
            .cloned()
            .expect("table exists")
    }

    pub fn column_types(&self, schema: &str, table: &str) -> Vec<(String, ColumnType)> {
        self.table(schema, table).columns
    }

    pub fn row(&self, schema: &str, table: &str, id_row: i64) -> BTreeMap<String, Value> {
        self.table(schema, table)
            .rows
            .get(&id_row)
            .cloned()
            .expect("row exists")
    }

    pub fn row_count(&self, schema: &str, table: &str) -> usize {
        self.table(schema, table).rows.len()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.borrow().statements.clone()
    }

    pub fn statements_starting_with(&self, prefix: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|sql| sql.starts_with(prefix))
            .collect()
    }

    pub fn clear_statements(&self) {
        self.state.borrow_mut().statements.clear();
    }

    pub fn connections(&self) -> usize {
        self.state.borrow().connections
    }

    fn check_failures(&self, statement: &Statement) -> Result<(), DbError> {
        let state = self.state.borrow();
        match state
            .failures
            .iter()
            .find(|(fragment, _)| statement.sql.contains(fragment.as_str()))
        {
            Some((_, kind)) => Err(DbError::new(*kind, "injected failure")),
            None => Ok(()),
        }
    }

    fn run(&self, statement: &Statement) -> Result<u64, DbError> {
        self.check_failures(statement)?;
        let sql = statement.sql.as_str();
        let mut state = self.state.borrow_mut();
        state.statements.push(sql.to_string());

        if let Some(rest) = sql.strip_prefix("CREATE SCHEMA IF NOT EXISTS ") {
            let name = idents(rest).remove(0);
            state.schemas.insert(name);
            return Ok(0);
        }

        if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
            let (target, definitions) = rest.split_once(" (").expect("column list");
            let names = idents(target);
            let key = (names[0].clone(), names[1].clone());
            if !state.schemas.contains(&key.0) {
                return Err(DbError::new(DbErrorKind::Other, "schema does not exist"));
            }
            if state.tables.contains_key(&key) {
                return Err(DbError::new(DbErrorKind::Other, "relation already exists")
                    .with_code("42P07"));
            }
            let definitions = definitions
                .strip_suffix(')')
                .expect("closing parenthesis");
            let columns = definitions
                .split(", ")
                .filter(|def| !def.starts_with("id_row "))
                .map(|def| {
                    let (name, ty) = def.rsplit_once("\" ").expect("column definition");
                    (idents(&format!("{name}\""))[0].clone(), sql_type(ty))
                })
                .collect();
            state.tables.insert(
                key,
                MemoryTable {
                    columns,
                    rows: BTreeMap::new(),
                },
            );
            return Ok(0);
        }

        if let Some(rest) = sql.strip_prefix("ALTER TABLE ") {
            let names = idents(rest);
            let key = (names[0].clone(), names[1].clone());
            let column = names[2].clone();
            let table = state
                .tables
                .get_mut(&key)
                .ok_or_else(|| DbError::new(DbErrorKind::Other, "relation does not exist"))?;
            if rest.contains(" ADD COLUMN IF NOT EXISTS ") {
                let (_, ty) = rest.rsplit_once("\" ").expect("column type");
                if table.column_type(&column).is_none() {
                    table.columns.push((column, sql_type(ty)));
                }
                return Ok(0);
            }
            let target = rest
                .split(" TYPE ")
                .nth(1)
                .and_then(|tail| tail.split(" USING ").next())
                .map(sql_type)
                .expect("target type");
            let mut converted = BTreeMap::new();
            for (id, row) in &table.rows {
                if let Some(value) = row.get(&column) {
                    converted.insert(*id, cast(value, target)?);
                }
            }
            for (id, value) in converted {
                if let Some(row) = table.rows.get_mut(&id) {
                    row.insert(column.clone(), value);
                }
            }
            if let Some(entry) = table.columns.iter_mut().find(|(name, _)| *name == column) {
                entry.1 = target;
            }
            return Ok(0);
        }

        if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
            let (target, tail) = rest.split_once(" (").expect("column list");
            let names = idents(target);
            let key = (names[0].clone(), names[1].clone());
            let (column_list, _) = tail.split_once(") VALUES").expect("values clause");
            let columns = idents(column_list);
            let table = state
                .tables
                .get_mut(&key)
                .ok_or_else(|| DbError::new(DbErrorKind::Other, "relation does not exist"))?;
            let id_row = match statement.params[0] {
                Value::Integer(id) => id,
                ref other => panic!("id_row bound as {other:?}"),
            };
            let mut values = BTreeMap::new();
            for (name, value) in columns.iter().zip(&statement.params[1..]) {
                let ty = table
                    .column_type(name)
                    .ok_or_else(|| DbError::new(DbErrorKind::Other, "column does not exist"))?;
                values.insert(name.clone(), bind(value, ty)?);
            }
            let row = table.rows.entry(id_row).or_default();
            row.extend(values);
            return Ok(1);
        }

        panic!("unexpected statement: {sql}");
    }
}

impl SqlExecutor for MemoryDatabase {
    fn execute(&mut self, statement: &Statement) -> Result<u64, DbError> {
        self.run(statement)
    }

    fn query_bool(&mut self, statement: &Statement) -> Result<bool, DbError> {
        self.check_failures(statement)?;
        let state = self.state.borrow();
        if statement.sql.contains("information_schema.schemata") {
            return Ok(state.schemas.contains(&text_param(statement, 0)));
        }
        if statement.sql.contains("information_schema.tables") {
            let key = (text_param(statement, 0), text_param(statement, 1));
            return Ok(state.tables.contains_key(&key));
        }
        panic!("unexpected query: {}", statement.sql);
    }

    fn query_rows(&mut self, statement: &Statement) -> Result<Vec<Vec<Option<String>>>, DbError> {
        self.check_failures(statement)?;
        assert!(statement.sql.contains("information_schema.columns"));
        let key = (text_param(statement, 0), text_param(statement, 1));
        let state = self.state.borrow();
        let rows = std::iter::once(vec![
            Some("id_row".to_string()),
            Some("bigint".to_string()),
        ])
        .chain(state.tables.get(&key).into_iter().flat_map(|table| {
            table.columns.iter().map(|(name, ty)| {
                vec![
                    Some(name.clone()),
                    Some(information_schema_name(*ty).to_string()),
                ]
            })
        }))
        .collect();
        Ok(rows)
    }
}

/// Hands out executors that share one [`MemoryDatabase`].
pub struct MemoryConnector {
    pub db: MemoryDatabase,
    pub refuse: bool,
}

impl Connector for MemoryConnector {
    fn connect(&self, _url: &str) -> Result<Box<dyn SqlExecutor>, DbError> {
        if self.refuse {
            return Err(DbError::new(
                DbErrorKind::ConnectionLost,
                "connection refused",
            ));
        }
        self.db.state.borrow_mut().connections += 1;
        Ok(Box::new(self.db.clone()))
    }
}
