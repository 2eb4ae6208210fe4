/*!
StateStash CLI - Command-line interface for persisted store state.

This CLI inspects and maintains the single-file local backend: listing keys,
decoding compressed values, evicting old stores and running the LZW codec
directly.
*/

use anyhow::Context;
use clap::{Parser, Subcommand};
use statestash_core::{
    compress, compression_ratio, decompress, evict_stale_stores, LocalFileStorage,
    StorageAdapter, PERSIST_KEY_PREFIX,
};
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "statestash")]
#[command(about = "CLI for StateStash persisted store state")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Local storage file
    #[arg(
        short,
        long,
        global = true,
        env = "STATESTASH_FILE",
        default_value = "./statestash.json"
    )]
    file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored keys
    List {
        /// Only keys in the persist_ namespace
        #[arg(short, long)]
        namespaced: bool,
    },
    /// Print the value stored under a key
    Show {
        key: String,
        /// Decompress the value before printing
        #[arg(short, long)]
        compressed: bool,
    },
    /// Compress text with the LZW codec
    Compress { text: String },
    /// Decompress LZW codec output
    Decompress { text: String },
    /// Remove the oldest namespaced keys beyond a limit
    Evict {
        #[arg(long)]
        max_stores: usize,
    },
    /// Delete a key
    Delete {
        key: String,
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

#[derive(Tabled)]
struct KeyInfo {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Namespaced")]
    namespaced: bool,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Preview")]
    preview: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::List { namespaced } => list_keys(&cli.file, namespaced)?,
        Commands::Show { key, compressed } => show_key(&cli.file, &key, compressed)?,
        Commands::Compress { text } => {
            let compressed = compress(&text);
            info!(
                ratio = compression_ratio(&text, &compressed),
                "Compressed {} bytes to {}",
                text.len(),
                compressed.len()
            );
            println!("{compressed}");
        }
        Commands::Decompress { text } => {
            let data = decompress(&text).context("input is not valid LZW codec output")?;
            println!("{data}");
        }
        Commands::Evict { max_stores } => evict(&cli.file, max_stores)?,
        Commands::Delete { key, force } => delete_key(&cli.file, &key, force)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_storage(file: &Path) -> LocalFileStorage {
    if !file.exists() {
        warn!("Storage file not found at: {}", file.display());
    }
    LocalFileStorage::new(file)
}

fn list_keys(file: &Path, namespaced_only: bool) -> Result<(), anyhow::Error> {
    let storage = open_storage(file);
    let mut rows = Vec::new();

    for key in storage.keys()? {
        let namespaced = key.starts_with(PERSIST_KEY_PREFIX);
        if namespaced_only && !namespaced {
            continue;
        }
        let value = storage.load(&key)?.unwrap_or_default();
        rows.push(KeyInfo {
            size: format_size(value.len() as u64),
            preview: preview(&value, 40),
            namespaced,
            key,
        });
    }

    if rows.is_empty() {
        println!("No keys found");
    } else {
        println!("{}", Table::new(rows));
    }

    Ok(())
}

fn show_key(file: &Path, key: &str, compressed: bool) -> Result<(), anyhow::Error> {
    let storage = open_storage(file);
    let value = storage
        .load(key)?
        .ok_or_else(|| anyhow::anyhow!("no value stored under '{key}'"))?;

    let data = if compressed {
        decompress(&value).with_context(|| format!("value of '{key}' is not compressed"))?
    } else {
        value
    };

    // Pretty-print JSON values, print anything else verbatim
    match serde_json::from_str::<serde_json::Value>(&data) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{data}"),
    }

    Ok(())
}

fn evict(file: &Path, max_stores: usize) -> Result<(), anyhow::Error> {
    anyhow::ensure!(max_stores > 0, "--max-stores must be at least 1");

    let storage = open_storage(file);
    let evicted = evict_stale_stores(&storage, max_stores, &[])?;

    if evicted.is_empty() {
        println!("Nothing to evict");
    } else {
        for key in &evicted {
            println!("✓ Evicted {key}");
        }
    }

    Ok(())
}

fn delete_key(file: &Path, key: &str, force: bool) -> Result<(), anyhow::Error> {
    if !force {
        print!("Are you sure you want to delete '{key}'? (y/N): ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            println!("Deletion cancelled");
            return Ok(());
        }
    }

    let storage = open_storage(file);
    if !storage.exists(key) {
        anyhow::bail!("no value stored under '{key}'");
    }
    storage.delete(key)?;
    println!("✓ Deleted {key}");

    Ok(())
}

fn preview(value: &str, max_chars: usize) -> String {
    let mut preview: String = value.chars().take(max_chars).collect();
    if value.chars().count() > max_chars {
        preview.push('…');
    }
    preview
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
