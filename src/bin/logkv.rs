//! logkv CLI
//!
//! Thin command-line front end over [`logkv::Db`].
//!
//! ```text
//! logkv ./data/my.kv put greeting hello
//! logkv ./data/my.kv get greeting
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use logkv::{Db, DbConfig, DbError, LockMode};
use tracing_subscriber::EnvFilter;

/// Single-file append-only key-value store.
#[derive(Parser, Debug)]
#[command(name = "logkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database file (created if missing)
    path: PathBuf,

    /// Wait for another process to release the database instead of failing
    #[arg(short, long)]
    wait: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a value under a key
    Put {
        /// The key to set
        key: String,

        /// The value to store
        value: String,
    },

    /// Print the value stored under a key
    Get {
        /// The key to look up
        key: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(DbError::KeyNotFound) => {
            eprintln!("key not found");
            ExitCode::from(1)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<(), DbError> {
    if let Some(parent) = cli.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let config = DbConfig {
        lock_mode: if cli.wait {
            LockMode::Wait
        } else {
            LockMode::FailFast
        },
        ..DbConfig::default()
    };
    let db = Db::open_with_config(&cli.path, config)?;

    match cli.command {
        Commands::Put { key, value } => {
            db.put(key.as_bytes(), value.as_bytes())?;
        }
        Commands::Get { key } => {
            let value = db.get(key.as_bytes())?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&value)?;
            stdout.write_all(b"\n")?;
        }
    }

    db.close()
}
