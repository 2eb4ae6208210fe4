/*!
In-memory storage adapter, the session-scoped default backend.
*/

use std::sync::{Arc, Mutex, MutexGuard};

use super::StorageAdapter;
use crate::{PersistError, Result};

/// Memory-based storage adapter
///
/// Values live as long as any clone of the handle, which makes this the
/// natural "session" backend. Clones share the same data. A byte quota or a
/// disabled mode can be configured to reproduce the failure modes of real
/// browser storage.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    entries: Arc<Mutex<Vec<(String, String)>>>,
    quota: Option<usize>,
    disabled: bool,
}

impl MemoryStorage {
    /// Create an empty, unbounded memory store
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            quota: None,
            disabled: false,
        }
    }

    /// Create a memory store that rejects writes once keys and values together
    /// exceed `quota` bytes
    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::new()
        }
    }

    /// Create a memory store that rejects every write
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::new()
        }
    }

    /// Total bytes held by keys and values
    pub fn used_bytes(&self) -> usize {
        self.entries()
            .map(|entries| used_bytes(&entries))
            .unwrap_or(0)
    }

    fn entries(&self) -> Result<MutexGuard<'_, Vec<(String, String)>>> {
        self.entries
            .lock()
            .map_err(|_| PersistError::storage("memory storage lock poisoned"))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn used_bytes(entries: &[(String, String)]) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

impl StorageAdapter for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries()?;
        Ok(entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone()))
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        if self.disabled {
            return Err(PersistError::backend_unavailable(self.name()));
        }

        let mut entries = self.entries()?;
        let position = entries.iter().position(|(k, _)| k == key);

        if let Some(quota) = self.quota {
            let replaced = position.map_or(0, |i| entries[i].0.len() + entries[i].1.len());
            let needed = used_bytes(&entries) - replaced + key.len() + value.len();
            if needed > quota {
                return Err(PersistError::QuotaExceeded { needed, quota });
            }
        }

        match position {
            Some(i) => entries[i].1 = value.to_string(),
            None => entries.push((key.to_string(), value.to_string())),
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries()?;
        entries.retain(|(k, _)| k != key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries()?;
        Ok(entries.iter().map(|(k, _)| k.clone()).collect())
    }

    fn name(&self) -> &'static str {
        "session"
    }
}
