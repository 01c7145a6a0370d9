//! STOWAGE Admin Binary
//!
//! Operator tool for inspecting and trimming a persistent store root.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use stowage::persistence::{entry_files, JsonSerializer, PersistentStore};
use stowage::{ExpirableStore, PartitionedStore};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// STOWAGE Admin - inspect persistent object stores
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List partitions with their directories and entry counts
    Partitions {
        /// Persistent root directory
        root: PathBuf,
    },

    /// List the keys of one partition
    Keys {
        root: PathBuf,
        partition: String,
    },

    /// Run one eviction pass over a partition
    Expire {
        root: PathBuf,
        partition: String,

        /// Keep at most this many entries
        #[arg(long)]
        max_entries: Option<usize>,

        /// Remove entries at least this old (milliseconds)
        #[arg(long)]
        ttl_ms: Option<u64>,
    },
}

type AdminStore = PersistentStore<serde_json::Value, JsonSerializer>;

fn open(root: PathBuf) -> anyhow::Result<AdminStore> {
    let store = AdminStore::with_serializer(root, JsonSerializer);
    store.open()?;
    Ok(store)
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("stowage=info".parse()?))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Partitions { root } => {
            let store = open(root)?;
            for (name, dir) in store.partition_dirs()? {
                let entries = entry_files(&dir)?.len();
                println!("{}\t{}\t{}", name, dir.display(), entries);
            }
        }
        Command::Keys { root, partition } => {
            let store = open(root)?;
            for key in store.all_keys(&partition)? {
                println!("{}", key);
            }
        }
        Command::Expire {
            root,
            partition,
            max_entries,
            ttl_ms,
        } => {
            if max_entries.is_none() && ttl_ms.is_none() {
                anyhow::bail!("expire needs --max-entries, --ttl-ms or both");
            }
            let store = open(root)?;
            let removed = store.expire(ttl_ms.map(Duration::from_millis), max_entries, &partition)?;
            info!(partition = %partition, removed = removed, "Eviction pass finished");
            println!("{}", removed);
        }
    }

    Ok(())
}
