use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tracklog::application::import::{run_import, StdinChooser};
use tracklog::infrastructure::repository::Store;
use tracklog::infrastructure::storage::initialize_database;

/// Imports legacy time-tracking exports from a directory of JSON files.
#[derive(Debug, Parser)]
#[command(name = "tracklog-import")]
struct Args {
    /// Directory holding the exported files and their order.json.
    directory: PathBuf,

    /// SQLite database to import into; created if it does not exist.
    #[arg(long)]
    database: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    initialize_database(&args.database)
        .with_context(|| format!("initializing database at {}", args.database.display()))?;
    let store = Store::new(&args.database);

    let started = Instant::now();
    run_import(&store, &args.directory, &mut StdinChooser)
        .with_context(|| format!("importing from {}", args.directory.display()))?;

    tracing::info!(
        elapsed_seconds = started.elapsed().as_secs_f64(),
        "successfully imported all data"
    );
    Ok(())
}
