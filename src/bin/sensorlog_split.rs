use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sensorlog::{split_raw_to_daily, Config};

#[derive(Parser)]
#[command(name = "sensorlog-split")]
#[command(about = "Split raw logger files into daily per-table files")]
struct Cli {
    /// Directory holding the raw logger files
    #[arg(long)]
    inpath: PathBuf,

    /// Root directory for the daily files
    #[arg(long)]
    outpath: PathBuf,

    /// Config JSON file (defaults apply without one)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Table to split; repeat for several (default: all configured tables)
    #[arg(long = "table")]
    tables: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => Config::default(),
    };
    let tables = (!cli.tables.is_empty()).then_some(cli.tables.as_slice());

    let outcomes = split_raw_to_daily(&config, &cli.inpath, &cli.outpath, tables)
        .context("splitting raw files")?;
    for outcome in &outcomes {
        println!(
            "{}: {} rows into {} day file(s), {} discarded",
            outcome.table, outcome.rows_written, outcome.days, outcome.rows_discarded
        );
    }
    Ok(())
}
