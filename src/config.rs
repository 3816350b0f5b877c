//! Runtime configuration loaded from YAML.

use std::{fs::File, io::BufReader, path::Path, path::PathBuf, time::Duration};

use anyhow::{Context, Result, ensure};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

fn default_interval_seconds() -> u64 {
    60
}

/// What to store for a non-blank cell that cannot be converted to its
/// column's type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DirtyCellPolicy {
    /// Bind the raw text so the column gets widened.
    #[default]
    Widen,
    /// Store NULL and keep the column type.
    Nullify,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub excel_file_paths: Vec<PathBuf>,
    pub postgres_url_base_db: String,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default)]
    pub ignorant_sheets: Vec<String>,
    #[serde(default)]
    pub dirty_cells: DirtyCellPolicy,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let reader = BufReader::new(file);
        let config: Config = serde_yaml::from_reader(reader).context("Parsing config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(input).context("Parsing config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.excel_file_paths.is_empty(),
            "excel_file_paths must list at least one workbook"
        );
        ensure!(
            !self.postgres_url_base_db.trim().is_empty(),
            "postgres_url_base_db must not be empty"
        );
        ensure!(
            self.interval_seconds > 0,
            "interval_seconds must be greater than zero"
        );
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Database named by the connection string, without credentials or host.
    pub fn database_name(&self) -> &str {
        let url = self.postgres_url_base_db.trim();
        if let Some(rest) = url
            .strip_prefix("postgres://")
            .or_else(|| url.strip_prefix("postgresql://"))
        {
            let after_host = rest.split_once('/').map(|(_, db)| db).unwrap_or("");
            return after_host.split(['?', '#']).next().unwrap_or("");
        }
        url.split_whitespace()
            .find_map(|pair| pair.strip_prefix("dbname="))
            .unwrap_or("")
    }
}
