//! coordmem - operator tool for the coordination memory store
//!
//! # Usage
//! ```bash
//! coordmem [--db .swarm/memory.db] [--volatile] [--json] <command>
//! coordmem set agents agent:1 '{"status":"active"}' --ttl 300
//! coordmem search agents 'agent:*' --limit 10
//! coordmem export backup.json
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use coord_memory::{
    Entry, ListOptions, Metadata, MemoryStore, StoreConfig, StoreError, StoreOptions,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Coordination memory - inspect and edit the shared store
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Backing database file (overrides config and COORD_MEMORY_DB)
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,

    /// Run against an in-memory store only
    #[arg(long, global = true)]
    volatile: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active backend and entry counts
    Status,

    /// Store a value; non-JSON input is stored as a string
    Set {
        namespace: String,
        key: String,
        value: String,
        /// Time-to-live in seconds
        #[arg(long)]
        ttl: Option<u64>,
        /// Metadata as a JSON object
        #[arg(long)]
        meta: Option<String>,
    },

    /// Print one entry
    Get { namespace: String, key: String },

    /// Delete one entry
    Delete { namespace: String, key: String },

    /// List a namespace in insertion order
    List {
        namespace: String,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search keys by substring or `*` pattern
    Search {
        namespace: String,
        pattern: String,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Remove expired entries
    Cleanup,

    /// Write a JSON backup
    Export {
        file: PathBuf,
        /// Export a single namespace
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Restore a JSON backup
    Import { file: PathBuf },
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<StoreError>() {
            Some(store_err) if store_err.is_input_error() => {
                eprintln!("invalid input: {}", store_err);
                ExitCode::from(2)
            }
            _ => {
                eprintln!("error: {:#}", err);
                ExitCode::FAILURE
            }
        },
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<StoreConfig> {
    let base = match &cli.config {
        Some(path) => StoreConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StoreConfig::default(),
    };
    let mut config = base.apply_env(|name| std::env::var(name).ok())?;
    if let Some(db) = &cli.db {
        config = config.with_db_path(db);
    }
    if cli.volatile {
        config = config.with_force_volatile(true);
    }
    Ok(config)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    tracing::debug!(
        db = %config.db_path.display(),
        volatile = config.force_volatile,
        "configuration loaded"
    );
    let store = MemoryStore::open(&config);
    let requested_volatile = cli.volatile || config.force_volatile;
    if let Some(reason) = store.health().reason.filter(|_| !requested_volatile) {
        eprintln!("warning: using in-memory storage, changes will not persist ({})", reason);
    }

    match cli.command {
        Commands::Status => {
            let stats = store.stats()?;
            if cli.json {
                let status = serde_json::json!({ "health": store.health(), "stats": stats });
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("backend:  {} ({:?})", stats.backend, stats.mode);
                if !store.is_using_fallback() {
                    println!("database: {}", config.db_path.display());
                }
                println!("entries:  {}", stats.total_entries);
                for (namespace, count) in &stats.namespaces {
                    println!("  {:<16} {}", namespace, count);
                }
            }
        }
        Commands::Set {
            namespace,
            key,
            value,
            ttl,
            meta,
        } => {
            let value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            let mut options = StoreOptions::default();
            if let Some(secs) = ttl {
                options = options.ttl(Duration::from_secs(secs));
            }
            if let Some(meta) = meta {
                let metadata: Metadata = serde_json::from_str(&meta)
                    .map_err(|e| StoreError::serialization("--meta", e))?;
                options = options.metadata(metadata);
            }
            let entry = store.store(&namespace, &key, value, options)?;
            print_entries(&[entry], cli.json)?;
        }
        Commands::Get { namespace, key } => match store.retrieve(&namespace, &key)? {
            Some(entry) => print_entries(&[entry], cli.json)?,
            None => anyhow::bail!("{}/{} not found", namespace, key),
        },
        Commands::Delete { namespace, key } => {
            let existed = store.delete(&namespace, &key)?;
            if cli.json {
                println!("{}", serde_json::json!({ "deleted": existed }));
            } else if existed {
                println!("deleted {}/{}", namespace, key);
            } else {
                println!("{}/{} did not exist", namespace, key);
            }
        }
        Commands::List { namespace, limit } => {
            let entries = store.list(&namespace, ListOptions { limit })?;
            print_entries(&entries, cli.json)?;
        }
        Commands::Search {
            namespace,
            pattern,
            limit,
        } => {
            let entries = store.search(&namespace, &pattern, ListOptions { limit })?;
            print_entries(&entries, cli.json)?;
        }
        Commands::Cleanup => {
            let removed = store.cleanup()?;
            if cli.json {
                println!("{}", serde_json::json!({ "removed": removed }));
            } else {
                println!("removed {} expired entries", removed);
            }
        }
        Commands::Export { file, namespace } => {
            let count = store.export_to_file(&file, namespace.as_deref())?;
            println!("exported {} entries to {}", count, file.display());
        }
        Commands::Import { file } => {
            let summary = store.import_from_file(&file)?;
            if cli.json {
                println!("{}", serde_json::to_string(&summary)?);
            } else {
                println!(
                    "imported {} entries ({} already expired, skipped)",
                    summary.imported, summary.skipped_expired
                );
            }
        }
    }

    Ok(())
}

fn print_entries(entries: &[Entry], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
        return Ok(());
    }
    for entry in entries {
        let expiry = entry
            .expires_at
            .map(|at| {
                let at = at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
                format!("  (expires {})", at)
            })
            .unwrap_or_default();
        println!("{}/{} = {}{}", entry.namespace, entry.key, entry.value, expiry);
    }
    Ok(())
}
