use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lintcache_core::{CacheConfig, FileStatePersistence, Snapshot, StatePersistence};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod analyzer;
mod check;
mod discovery;

use analyzer::Finding;
use check::{CheckOptions, OutputFormat};

#[derive(Parser)]
#[command(name = "lintcache")]
#[command(author, version, about = "Incremental linter with a persistent result cache", long_about = None)]
struct Cli {
    /// Increase log output (-v debug, -vv trace); defaults to RUST_LOG or warn
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lint every unit under DIR, reusing results that are still valid
    Check {
        /// Project directory
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,

        /// Ignore and do not write the persisted cache state
        #[arg(long)]
        no_cache: bool,

        /// Keep running and re-check on file changes
        #[arg(long)]
        watch: bool,

        /// Analyze cache misses in parallel
        #[arg(long)]
        parallel: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print the persisted cache state of DIR as JSON
    State {
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },

    /// Remove the cache directory of DIR
    Clean {
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Check {
            dir,
            no_cache,
            watch,
            parallel,
            format,
        } => check::check(
            &dir,
            &CheckOptions {
                no_cache,
                watch,
                parallel,
                format,
            },
        )
        .map(|failed| if failed { ExitCode::from(1) } else { ExitCode::SUCCESS }),
        Commands::State { dir } => print_state(&dir).map(|()| ExitCode::SUCCESS),
        Commands::Clean { dir } => clean(&dir).map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn print_state(dir: &Path) -> Result<()> {
    let root = dir
        .canonicalize()
        .with_context(|| format!("Cannot open project directory {}", dir.display()))?;
    let config = CacheConfig::load(&root)?;
    let persistence = FileStatePersistence::new(&config.cache_dir);
    let options = config.program_state_options(&root)?;

    let snapshot: Option<Snapshot<Vec<Finding>>> = persistence.load(&options.project);
    let Some(snapshot) = snapshot else {
        bail!("No usable cache state for {}", root.display());
    };
    println!("{}", snapshot.to_json_pretty()?);
    Ok(())
}

fn clean(dir: &Path) -> Result<()> {
    let config = CacheConfig::load(dir)?;
    let cache_dir = dir.join(&config.cache_dir);
    if cache_dir.is_dir() {
        fs::remove_dir_all(&cache_dir)
            .with_context(|| format!("Failed to remove {}", cache_dir.display()))?;
        println!("Removed {}", cache_dir.display());
    } else {
        println!("Nothing to clean in {}", dir.display());
    }
    Ok(())
}
