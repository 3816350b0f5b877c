pub mod cli;
pub mod config;
pub mod data;
pub mod db;
pub mod error;
pub mod loader;
pub mod metadata;
pub mod pipeline;
pub mod schema_sync;
pub mod sql;
pub mod table;
pub mod workbook;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};

use crate::{
    cli::{Cli, Commands},
    config::Config,
    db::PostgresConnector,
    workbook::CalamineWorkbook,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("xlsx_sync", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => handle_sync(&args),
        Commands::Probe(args) => handle_probe(&args),
    }
}

fn handle_sync(args: &cli::SyncArgs) -> Result<()> {
    let mut config = Config::load(&args.config)
        .with_context(|| format!("Loading configuration from {:?}", args.config))?;
    if let Some(policy) = args.dirty_cells {
        config.dirty_cells = policy;
    }
    info!(
        "Synchronizing {} workbook(s) into database '{}'{}",
        config.excel_file_paths.len(),
        config.database_name(),
        if args.once {
            String::from(" (single pass)")
        } else {
            format!(" every {}s", config.interval_seconds)
        }
    );
    pipeline::run_schedule(&config, &PostgresConnector, args.once)
}

fn handle_probe(args: &cli::ProbeArgs) -> Result<()> {
    info!("Probing workbook '{}'", args.input.display());
    let mut workbook = CalamineWorkbook::open(&args.input)
        .with_context(|| format!("Opening workbook {:?}", args.input))?;
    let probes = pipeline::probe_workbook(&mut workbook, &args.exclude);
    if args.json {
        let json = serde_json::to_string_pretty(&probes).context("Serializing probe results")?;
        println!("{json}");
    } else {
        print!("{}", table::render_probes(&probes));
    }
    info!(
        "Inferred {} sheet(s) from {:?}",
        probes.len(),
        workbook.path()
    );
    Ok(())
}
