use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::DirtyCellPolicy;

#[derive(Debug, Parser)]
#[command(author, version, about = "Mirror spreadsheet workbooks into PostgreSQL", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load every configured workbook into PostgreSQL, repeating on the configured interval
    Sync(SyncArgs),
    /// Infer the table layout of each sheet in a workbook without touching a database
    Probe(ProbeArgs),
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,
    /// Run a single pass and exit (non-zero status when a workbook fails)
    #[arg(long)]
    pub once: bool,
    /// Override how unconvertible cells are stored
    #[arg(long = "dirty-cells", value_enum)]
    pub dirty_cells: Option<DirtyCellPolicy>,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Workbook to inspect (.xlsx, .xlsm, .xlsb, .xls or .ods)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Sheets to leave out (repeatable or comma-separated)
    #[arg(long = "exclude", value_delimiter = ',', action = clap::ArgAction::Append)]
    pub exclude: Vec<String>,
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}
