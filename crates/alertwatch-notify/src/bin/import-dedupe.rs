//! Migrate notified-alert state from the text file into RocksDB.
//!
//! The text file and the RocksDB store hold the same identifier set; this
//! tool copies one into the other so a deployment can switch
//! `ALERTWATCH_DEDUP_BACKEND` without re-notifying old alerts.
//!
//! # Usage
//!
//! ```bash
//! # Copy identifiers into a (new or existing) RocksDB store
//! import-dedupe --from processed_ids.txt --to /var/lib/alertwatch/db
//!
//! # Check that every identifier in the file is present in the store
//! import-dedupe --from processed_ids.txt --to /var/lib/alertwatch/db --verify
//!
//! # Show statistics about the store
//! import-dedupe --to /var/lib/alertwatch/db --stats
//! ```

use alertwatch_notify::{DedupeStore, FileDedupeStore, RocksDedupeStore};
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "import-dedupe")]
#[command(about = "Copy or verify alertwatch dedupe state between backends")]
struct Args {
    /// Newline-delimited identifier file to read
    #[arg(long)]
    from: Option<PathBuf>,

    /// RocksDB dedupe store directory
    #[arg(long)]
    to: PathBuf,

    /// Only check that every identifier from --from is present in --to
    #[arg(long)]
    verify: bool,

    /// Show statistics about the RocksDB store
    #[arg(long)]
    stats: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args = Args::parse();

    let store = RocksDedupeStore::open(&args.to)
        .with_context(|| format!("Failed to open dedupe store at {}", args.to.display()))?;

    if let Some(ref from) = args.from {
        let ids = FileDedupeStore::new(from)
            .load()
            .with_context(|| format!("Failed to read {}", from.display()))?;
        println!("Read {} identifiers from {}", ids.len(), from.display());

        if args.verify {
            verify(&store, &ids)?;
        } else {
            store.commit(&ids).context("Failed to write identifiers")?;
            println!("✓ Imported {} identifiers into {}", ids.len(), args.to.display());
        }
    }

    if args.stats {
        let approx = store.approximate_count()?;
        let exact = store.load()?.len();
        println!("  Approximate keys: {}", approx);
        println!("  Actual key count: {}", exact);
    }

    if args.from.is_none() && !args.stats {
        println!("No action specified. Use --from (with optional --verify) or --stats");
        println!("Run with --help for usage information");
    }

    Ok(())
}

fn verify(store: &RocksDedupeStore, ids: &HashSet<String>) -> Result<()> {
    let mut missing: Vec<&String> = Vec::new();
    for id in ids {
        if !store.contains(id)? {
            missing.push(id);
        }
    }

    if missing.is_empty() {
        println!("✓ All {} identifiers present", ids.len());
        return Ok(());
    }

    missing.sort();
    for id in missing.iter().take(10) {
        println!("  ⚠ missing: {}", id);
    }
    anyhow::bail!("{} of {} identifiers missing", missing.len(), ids.len());
}
