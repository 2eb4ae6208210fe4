/*!
Local filesystem storage adapter implementation.
*/

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::debug;

use super::StorageAdapter;
use crate::{PersistError, Result};

/// Local filesystem storage adapter
///
/// This is the durable counterpart of [`MemoryStorage`](super::MemoryStorage):
/// the whole key-value map is kept in a single JSON document so that key
/// order survives restarts. Every write replaces the document atomically
/// through a temporary file in the same directory.
///
/// # Example
/// ```rust
/// use statestash_core::storage::{LocalFileStorage, StorageAdapter};
///
/// # let dir = tempfile::tempdir()?;
/// # let path = dir.path().join("stores.json");
/// let storage = LocalFileStorage::new(&path);
/// storage.save("persist_settings", r#"{"theme":"dark"}"#)?;
/// assert!(storage.exists("persist_settings"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct LocalFileStorage {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl LocalFileStorage {
    /// Create a storage adapter backed by the JSON document at `path`
    ///
    /// The file and its parent directories are created on the first write.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Location of the backing document
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| PersistError::storage("local storage lock poisoned"))
    }

    /// Read the backing document; a missing file is an empty map
    fn read_document(&self) -> Result<Map<String, Value>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => {
                return Err(PersistError::storage(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if raw.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => Ok(map),
            _ => Err(PersistError::invalid_format(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
        }
    }

    /// Ensure the parent directory exists, creating it if necessary
    fn ensure_parent_dir(&self) -> Result<&Path> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                PersistError::storage(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(parent)
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<()> {
        let parent = self.ensure_parent_dir()?;
        let contents = serde_json::to_vec_pretty(document)?;

        let mut file = NamedTempFile::new_in(parent)?;
        file.write_all(&contents)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| {
            PersistError::storage(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e.error
            ))
        })?;

        debug!(path = %self.path.display(), keys = document.len(), "Wrote storage document");
        Ok(())
    }
}

impl StorageAdapter for LocalFileStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock()?;
        match self.read_document()?.remove(key) {
            None => Ok(None),
            Some(Value::String(value)) => Ok(Some(value)),
            Some(_) => Err(PersistError::invalid_format(format!(
                "value stored under '{key}' is not a string"
            ))),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock()?;
        let mut document = self.read_document()?;
        // Map::insert keeps the position of an existing key
        document.insert(key.to_string(), Value::String(value.to_string()));
        self.write_document(&document)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock()?;
        let mut document = self.read_document()?;
        if document.shift_remove(key).is_some() {
            self.write_document(&document)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let _guard = self.lock()?;
        Ok(self.read_document()?.keys().cloned().collect())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
