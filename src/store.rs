//! Key-value persistence for notebooks.
//!
//! The controller treats storage as an opaque table/key/value store and
//! writes each notebook as one JSON document under [`NOTEBOOKS_TABLE`].
//! [`MemoryStore`] backs tests and embedding; [`FileStore`] keeps one
//! `<dir>/<table>/<key>.json` file per value and writes atomically.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde_json::Value;
use thiserror::Error;

/// Table holding serialized notebooks.
pub const NOTEBOOKS_TABLE: &str = "notebooks";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store key '{key}'")]
    InvalidKey { key: String },

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt value at {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("store lock poisoned")]
    Poisoned,
}

/// Opaque table/key/value persistence.
pub trait KeyValueStore: Send + Sync {
    fn put(&self, table: &str, value: &Value, key: &str) -> Result<(), StoreError>;

    fn get(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError>;

    /// Remove a value. Deleting a missing key is not an error.
    fn delete(&self, table: &str, key: &str) -> Result<(), StoreError>;

    /// Keys present in `table`, sorted.
    fn keys(&self, table: &str) -> Result<Vec<String>, StoreError>;
}

/// Keys become file names, so they are restricted to a safe alphabet.
fn validate_key(key: &str) -> Result<(), StoreError> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey {
            key: key.to_string(),
        })
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory store that also counts writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
    puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&self, table: &str, value: &Value, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let mut tables = self.tables.lock().map_err(|_| StoreError::Poisoned)?;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let tables = self.tables.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(tables.get(table).and_then(|rows| rows.get(key)).cloned())
    }

    fn delete(&self, table: &str, key: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(rows) = tables.get_mut(table) {
            rows.remove(key);
        }
        Ok(())
    }

    fn keys(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(tables
            .get(table)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default())
    }
}

// ============================================================================
// FileStore
// ============================================================================

/// One pretty-printed JSON file per key under `<root>/<table>/`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, table: &str) -> Result<PathBuf, StoreError> {
        validate_key(table)?;
        Ok(self.root.join(table))
    }

    fn value_path(&self, table: &str, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.table_dir(table)?.join(format!("{}.json", key)))
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl KeyValueStore for FileStore {
    fn put(&self, table: &str, value: &Value, key: &str) -> Result<(), StoreError> {
        let path = self.value_path(table, key)?;
        let dir = self.table_dir(table)?;
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let json = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        atomic_write(&path, &json).map_err(io_err(&path))
    }

    fn get(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.value_path(table, key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(&path)(err)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { path, source })
    }

    fn delete(&self, table: &str, key: &str) -> Result<(), StoreError> {
        let path = self.value_path(table, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&path)(err)),
        }
    }

    fn keys(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.table_dir(table)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_err(&dir)(err)),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_err(&dir))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if validate_key(stem).is_ok() {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Write content to a file atomically using temp + rename.
///
/// Readers see either the old or the new content, never a partial write.
/// The temp name carries PID and timestamp so concurrent writers to the same
/// file do not collide.
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> io::Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let pid = std::process::id();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    let temp_path = path.with_file_name(format!(
        ".{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        pid,
        timestamp
    ));
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
