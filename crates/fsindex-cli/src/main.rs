mod log;

use clap::{Parser, Subcommand};
use fsindex_core::{FileIndexer, IndexerConfig, PaginationArgs, QueryParams};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Upper bound for `rebuild` waiting on its full scans.
const REBUILD_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Parser, Debug)]
#[command(name = "fsindex", version, about = "Background file indexer with ranked filename search")]
struct Cli {
    /// TOML configuration file. Defaults to <config dir>/fsindex/config.toml when it exists
    #[arg(long, global = true, env = "FSINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Where logs are written
    #[arg(long, global = true, env = "FSINDEX_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Mirror logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index the configured paths and keep watching them until Ctrl+C
    Run,
    /// Search indexed file names
    Query {
        /// Words matched as prefixes of file name tokens, or a regex with --regex
        #[arg(required = true)]
        text: Vec<String>,
        #[arg(long)]
        regex: bool,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Drop the index and run full scans of every configured path
    Rebuild,
    /// List recorded scans
    Scans,
    /// Show database size and row counts
    Health,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let log_file = cli.log_file.clone().unwrap_or_else(log::default_log_file);
    let _guard = log::init_tracing(&log_file, cli.verbose)?;

    let config = load_config(cli.config.as_deref())?;
    info!(command = ?cli.command, database = ?config.database_path, "fsindex starting");

    let indexer = FileIndexer::new(config)?;
    match cli.command {
        Command::Run => run(&indexer)?,
        Command::Query {
            text,
            regex,
            limit,
            offset,
        } => {
            let params = QueryParams {
                pagination: PaginationArgs { offset, limit },
                use_regex: regex,
            };
            for result in indexer.query(&text.join(" "), params) {
                println!("{}", result.path.display());
            }
        }
        Command::Rebuild => {
            indexer.rebuild_index()?;
            if !indexer.wait_for_scans(REBUILD_TIMEOUT) {
                return Err("rebuild did not finish in time".into());
            }
            println!("Index rebuilt");
        }
        Command::Scans => {
            for record in indexer.scan_history()? {
                println!(
                    "{:>6}  {:<11}  {:<11}  {}  {}{}",
                    record.id,
                    record.scan_type.to_string(),
                    record.status.to_string(),
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.entrypoint.display(),
                    record
                        .error
                        .map(|error| format!("  ({error})"))
                        .unwrap_or_default()
                );
            }
        }
        Command::Health => {
            let health = indexer.health()?;
            println!("database: {}", health.path);
            println!("size:     {} bytes", health.disk_size);
            for (table, count) in health.entry_counts {
                println!("{table}: {count}");
            }
        }
    }

    indexer.shutdown();
    Ok(())
}

fn run(indexer: &FileIndexer) -> Result<(), Box<dyn Error>> {
    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    indexer.start()?;

    let preferences = indexer.preferences();
    println!(
        "Indexing {} path(s), watching {}. Press Ctrl+C to stop.",
        preferences.paths.len(),
        preferences.watcher_paths.len()
    );

    let _ = stop_rx.recv();
    println!("Shutting down...");
    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<IndexerConfig, Box<dyn Error>> {
    if let Some(path) = explicit {
        return Ok(IndexerConfig::load(path)?);
    }

    let default_path = dirs::config_dir().map(|dir| dir.join("fsindex").join("config.toml"));
    match default_path {
        Some(path) if path.is_file() => Ok(IndexerConfig::load(&path)?),
        _ => Ok(IndexerConfig::default()),
    }
}
