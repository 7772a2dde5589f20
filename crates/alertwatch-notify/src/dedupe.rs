//! Persistent record of already-notified alert identifiers.
//!
//! The pipeline reads the full set once per run and appends the identifiers
//! it delivered at the end of the run. Entries are never removed.
//!
//! # Backends
//!
//! - [`FileDedupeStore`] - newline-delimited text file, opened in append mode
//! - [`RocksDedupeStore`] - RocksDB database keyed by identifier
//!
//! Both implement [`DedupeStore`], so the pipeline does not care which one is
//! configured.

use crate::error::{Error, Result};
use rocksdb::{DBWithThreadMode, IteratorMode, MultiThreaded, Options, WriteBatch, WriteOptions};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Append-only set of notified identifiers.
pub trait DedupeStore: Send + Sync {
    /// Human-readable backend name (used in logs).
    fn name(&self) -> &'static str;

    /// Every identifier ever committed. Empty when no state exists yet.
    fn load(&self) -> Result<HashSet<String>>;

    /// Durably add `ids` to the store. An empty set is a no-op.
    fn commit(&self, ids: &HashSet<String>) -> Result<()>;
}

/// Which [`DedupeStore`] implementation to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeBackend {
    File,
    RocksDb,
}

impl std::str::FromStr for DedupeBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "rocksdb" => Ok(Self::RocksDb),
            other => Err(Error::Config(format!(
                "unknown dedupe backend '{other}' (expected 'file' or 'rocksdb')"
            ))),
        }
    }
}

/// Open the configured backend at `path`.
pub fn open_store(backend: DedupeBackend, path: &Path) -> Result<Box<dyn DedupeStore>> {
    Ok(match backend {
        DedupeBackend::File => Box::new(FileDedupeStore::new(path)),
        DedupeBackend::RocksDb => Box::new(RocksDedupeStore::open(path)?),
    })
}

// =============================================================================
// File backend
// =============================================================================

/// Newline-delimited identifiers in a single text file.
///
/// Compatible with the `processed_ids.txt` written by earlier deployments.
#[derive(Debug, Clone)]
pub struct FileDedupeStore {
    path: PathBuf,
}

impl FileDedupeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DedupeStore for FileDedupeStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn load(&self) -> Result<HashSet<String>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    "No dedupe state at {}, starting empty",
                    self.path.display()
                );
                return Ok(HashSet::new());
            }
            Err(e) => {
                return Err(Error::DedupeLoad(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let mut ids = HashSet::new();
        for line in BufReader::new(file).lines() {
            let line = line
                .map_err(|e| Error::DedupeLoad(format!("{}: {}", self.path.display(), e)))?;
            let id = line.trim();
            if !id.is_empty() {
                ids.insert(id.to_string());
            }
        }

        debug!("Loaded {} identifiers from {}", ids.len(), self.path.display());
        Ok(ids)
    }

    fn commit(&self, ids: &HashSet<String>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        if let Some(bad) = ids.iter().find(|id| id.contains(['\n', '\r'])) {
            return Err(Error::DedupeCommit(format!(
                "identifier {bad:?} contains a line break"
            )));
        }

        let commit_err = |e: std::io::Error| {
            Error::DedupeCommit(format!("{}: {}", self.path.display(), e))
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(commit_err)?;
        }

        // Sorted so the file contents are deterministic for a given set.
        let mut sorted: Vec<&String> = ids.iter().collect();
        sorted.sort();

        let mut buf = String::with_capacity(sorted.iter().map(|id| id.len() + 1).sum());
        for id in sorted {
            buf.push_str(id);
            buf.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(commit_err)?;
        file.write_all(buf.as_bytes()).map_err(commit_err)?;
        file.sync_all().map_err(commit_err)?;

        debug!("Appended {} identifiers to {}", ids.len(), self.path.display());
        Ok(())
    }
}

// =============================================================================
// RocksDB backend
// =============================================================================

/// RocksDB-backed identifier set.
///
/// Keys are the UTF-8 identifier bytes; values are empty.
pub struct RocksDedupeStore {
    db: DBWithThreadMode<MultiThreaded>,
}

impl RocksDedupeStore {
    /// Open or create a store at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening dedupe index at {}", path.display());

        let mut opts = Options::default();
        opts.create_if_missing(true);

        // Bloom filters for fast "not found" lookups
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.increase_parallelism(num_cpus::get().min(4) as i32);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path)
            .map_err(|e| Error::DedupeLoad(format!("{}: {}", path.display(), e)))?;

        Ok(Self { db })
    }

    /// Check whether a single identifier has been committed.
    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.db.get_pinned(id.as_bytes())?.is_some())
    }

    /// Get the approximate number of keys in the database.
    pub fn approximate_count(&self) -> Result<u64> {
        let count = self
            .db
            .property_int_value("rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(count)
    }
}

impl DedupeStore for RocksDedupeStore {
    fn name(&self) -> &'static str {
        "rocksdb"
    }

    fn load(&self) -> Result<HashSet<String>> {
        let mut ids = HashSet::new();
        for item in self.db.iterator(IteratorMode::Start) {
            let (key, _) = item.map_err(|e| Error::DedupeLoad(e.to_string()))?;
            let id = String::from_utf8(key.into_vec())
                .map_err(|e| Error::DedupeLoad(format!("non UTF-8 identifier: {e}")))?;
            ids.insert(id);
        }
        Ok(ids)
    }

    fn commit(&self, ids: &HashSet<String>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::default();
        for id in ids {
            batch.put(id.as_bytes(), []);
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true); // Ensure durability
        self.db
            .write_opt(batch, &write_opts)
            .map_err(|e| Error::DedupeCommit(e.to_string()))?;

        debug!("Committed {} identifiers", ids.len());
        Ok(())
    }
}
