//! MarketLake CLI: ingestion and lake inspection commands.
//!
//! Commands:
//! - `update`: ingest the configured universe (or `--symbol` picks) into the lake
//! - `status`: list partitions with row counts, date ranges and sizes
//! - `init-config`: write a default TOML config

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use marketlake_core::config::{build_pipeline, Credentials, PipelineConfig};
use marketlake_core::data::{PartitionedStore, StdoutProgress};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "marketlake.toml";
const API_KEY_VAR: &str = "ALPHA_VANTAGE_API_KEY";

#[derive(Parser)]
#[command(
    name = "marketlake",
    about = "MarketLake CLI: daily OHLCV ingestion into a partitioned Parquet lake"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, validate and merge daily bars into the lake.
    Update {
        /// Symbol to ingest (repeatable). Defaults to the configured universe.
        #[arg(long = "symbol")]
        symbols: Vec<String>,

        /// Path to a TOML config file. Defaults to ./marketlake.toml if present.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Lake root directory. Overrides `data_dir` from the config.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Symbols ingested in parallel. Overrides `batch.jobs` from the config.
        #[arg(long)]
        jobs: Option<usize>,
    },
    /// List stored partitions.
    Status {
        /// Only show this symbol.
        #[arg(long)]
        symbol: Option<String>,

        /// Path to a TOML config file. Defaults to ./marketlake.toml if present.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Lake root directory. Overrides `data_dir` from the config.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Write a default config file.
    InitConfig {
        /// Destination path.
        #[arg(long, default_value = DEFAULT_CONFIG)]
        path: PathBuf,

        /// Overwrite an existing file.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Update {
            symbols,
            config,
            data_dir,
            jobs,
        } => run_update(symbols, config, data_dir, jobs),
        Commands::Status {
            symbol,
            config,
            data_dir,
        } => run_status(symbol.as_deref(), config, data_dir),
        Commands::InitConfig { path, force } => run_init_config(&path, force),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => Some(PathBuf::from(DEFAULT_CONFIG)).filter(|p| p.is_file()),
    };
    match path {
        Some(p) => {
            info!(path = %p.display(), "loading config");
            PipelineConfig::from_file(&p).with_context(|| format!("config {}", p.display()))
        }
        None => Ok(PipelineConfig {
            symbols: Vec::new(),
            ..PipelineConfig::default()
        }),
    }
}

fn run_update(
    symbols: Vec<String>,
    config_path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    jobs: Option<usize>,
) -> Result<()> {
    let mut config = load_config(config_path.as_deref())?;
    if !symbols.is_empty() {
        config.symbols = symbols;
    }
    config.symbols = config
        .symbols
        .iter()
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    if let Some(jobs) = jobs {
        if jobs == 0 {
            bail!("--jobs must be at least 1");
        }
        config.batch.jobs = jobs;
    }
    if config.symbols.is_empty() {
        bail!("no symbols to ingest: pass --symbol or list `symbols` in {DEFAULT_CONFIG}");
    }

    let credentials = Credentials {
        alpha_vantage_api_key: std::env::var(API_KEY_VAR).ok().filter(|k| !k.is_empty()),
    };
    let pipeline = build_pipeline(&config, &credentials)?;

    println!("Lake: {}", config.data_dir.display());
    println!("Providers: {}", pipeline.resolver().provider_names().join(" -> "));
    println!();

    let manifest = pipeline.run_batch(&config.symbols, config.batch.jobs, &StdoutProgress);
    let path = manifest
        .save(&config.data_dir)
        .context("saving run manifest")?;
    println!("Run manifest: {}", path.display());

    if !manifest.all_succeeded() {
        for outcome in manifest.symbols.iter().filter(|s| !s.succeeded()) {
            eprintln!(
                "Error for {}: {}",
                outcome.symbol,
                outcome.error.as_deref().unwrap_or("unknown failure")
            );
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Lake root: `--data-dir` wins over the config's `data_dir`.
fn resolve_data_dir(config_path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<PathBuf> {
    match data_dir {
        Some(dir) => Ok(dir),
        None => Ok(load_config(config_path)?.data_dir),
    }
}

fn run_status(
    symbol: Option<&str>,
    config_path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    let data_dir = resolve_data_dir(config_path.as_deref(), data_dir)?;
    let data_dir = data_dir.as_path();
    if !data_dir.exists() {
        println!("Lake directory does not exist: {}", data_dir.display());
        return Ok(());
    }

    let store = PartitionedStore::new(data_dir);
    let symbols = match symbol {
        Some(s) => vec![s.to_ascii_uppercase()],
        None => store.symbols()?,
    };

    println!("Lake: {}", data_dir.display());
    println!("Symbols: {}", symbols.len());
    println!("Total size: {}", format_size(dir_size(data_dir)));
    println!();
    println!(
        "{:<8} {:<10} {:<25} {:>8} {:>10}",
        "Symbol", "Partition", "Date Range", "Rows", "Size"
    );
    println!("{}", "-".repeat(65));

    for sym in &symbols {
        let partitions = store.describe(sym)?;
        if partitions.is_empty() {
            println!("{sym:<8} (no partitions)");
            continue;
        }
        for p in &partitions {
            println!(
                "{:<8} {:<10} {:<25} {:>8} {:>10}",
                sym,
                format!("{}-{:02}", p.key.year, p.key.month),
                format!("{} to {}", p.first, p.last),
                p.rows,
                format_size(p.bytes)
            );
        }
    }

    Ok(())
}

fn run_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    let toml = PipelineConfig::default().to_toml()?;
    std::fs::write(path, toml).with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote {}", path.display());
    println!("Set {API_KEY_VAR} in the environment or .env to enable Alpha Vantage.");
    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    let mut size = 0u64;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            match entry.file_type() {
                Ok(t) if t.is_dir() => size += dir_size(&entry.path()),
                Ok(_) => size += entry.metadata().map(|m| m.len()).unwrap_or(0),
                Err(_) => {}
            }
        }
    }
    size
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
