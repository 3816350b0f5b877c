use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use calamine::{Data, Reader, Sheets, open_workbook_auto};
use chrono::Timelike;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("failed to open workbook {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: calamine::Error,
    },
    #[error("failed to read sheet '{sheet}': {message}")]
    Sheet { sheet: String, message: String },
}

/// Grid-of-strings view over a workbook.
pub trait RowSource {
    fn sheet_names(&self) -> Vec<String>;

    /// Header row followed by data rows, every cell rendered as a string.
    fn rows(&mut self, sheet: &str) -> Result<Vec<Vec<String>>, WorkbookError>;
}

pub struct CalamineWorkbook {
    path: PathBuf,
    workbook: Sheets<BufReader<File>>,
}

impl CalamineWorkbook {
    pub fn open(path: &Path) -> Result<Self, WorkbookError> {
        let workbook = open_workbook_auto(path).map_err(|source| WorkbookError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(CalamineWorkbook {
            path: path.to_path_buf(),
            workbook,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RowSource for CalamineWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.workbook.sheet_names()
    }

    fn rows(&mut self, sheet: &str) -> Result<Vec<Vec<String>>, WorkbookError> {
        let range = self
            .workbook
            .worksheet_range(sheet)
            .map_err(|err| WorkbookError::Sheet {
                sheet: sheet.to_string(),
                message: err.to_string(),
            })?;
        // Ranges start at the first used cell; rows and columns are anchored at A1.
        let (top, left) = range.start().unwrap_or((0, 0));
        let mut rows = vec![Vec::new(); top as usize];
        rows.extend(range.rows().map(|row| {
            std::iter::repeat_n(String::new(), left as usize)
                .chain(row.iter().map(cell_to_string))
                .collect()
        }));
        Ok(rows)
    }
}

pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) if dt.is_duration() => dt.as_f64().to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ts) if ts.time().num_seconds_from_midnight() == 0 => {
                ts.format("%Y-%m-%d").to_string()
            }
            Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(e) => e.to_string(),
    }
}

/// Namespace name for a workbook: the file stem with every character that is
/// not alphanumeric replaced by `_`, lowercased.
pub fn schema_name_for(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy())
        .unwrap_or_default()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .to_lowercase()
}
