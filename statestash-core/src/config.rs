//! Configuration for store persistence
//!
//! This module provides the declarative registration API: [`PersistOptions`]
//! attached to a store and the [`PersistStrategy`] rules it lists. Both can be
//! built in code or deserialized from camelCase JSON; a custom backend or
//! serializer can only be attached in code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::merge::MergeStrategy;
use crate::serializer::Serializer;
use crate::storage::StorageAdapter;
use crate::{PersistError, Result};

/// Prefix of the reserved key namespace counted by `max_stores` eviction
pub const PERSIST_KEY_PREFIX: &str = "persist_";

/// Debounce of the implicit strategy used when none are configured
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Build a storage key inside the reserved namespace
///
/// Only keys built this way take part in `max_stores` eviction.
pub fn namespaced_key(store_id: &str) -> String {
    format!("{PERSIST_KEY_PREFIX}{store_id}")
}

/// Which backend a strategy writes to
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageRef {
    /// The persister's session-scoped backend
    #[default]
    Session,
    /// The persister's durable backend
    Local,
    /// An explicitly supplied backend
    #[serde(skip)]
    Custom(Arc<dyn StorageAdapter>),
}

impl fmt::Debug for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageRef::Session => f.write_str("Session"),
            StorageRef::Local => f.write_str("Local"),
            StorageRef::Custom(storage) => write!(f, "Custom({})", storage.name()),
        }
    }
}

/// One persistence rule for a store
///
/// # Example
/// ```rust
/// use statestash_core::{MergeStrategy, PersistStrategy, StorageRef};
///
/// let strategy = PersistStrategy::new()
///     .with_key("persist_sql_console")
///     .with_storage(StorageRef::Local)
///     .with_paths(["history", "favorites"])
///     .with_debounce(250)
///     .with_merge_strategy(MergeStrategy::Deep)
///     .compressed(true);
/// assert_eq!(strategy.debounce_duration().as_millis(), 250);
/// ```
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PersistStrategy {
    /// Storage key; defaults to the store id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    #[serde(default)]
    pub storage: StorageRef,

    /// Fields to save and restore; `None` means every field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paths: Option<Vec<String>>,

    /// Debounce in milliseconds; `None` or 0 saves on every mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce: Option<u64>,

    /// Custom format; `None` means compact JSON
    #[serde(skip)]
    pub serializer: Option<Arc<dyn Serializer>>,

    #[serde(default)]
    pub merge_strategy: MergeStrategy,

    #[serde(default)]
    pub compress: bool,
}

impl PersistStrategy {
    /// A strategy with every field at its default
    pub fn new() -> Self {
        Self::default()
    }

    /// The strategy used when a store enables persistence without listing any:
    /// `storage`, 100 ms debounce, shallow merge
    pub fn default_with_storage(storage: StorageRef) -> Self {
        Self {
            storage,
            debounce: Some(DEFAULT_DEBOUNCE_MS),
            merge_strategy: MergeStrategy::Shallow,
            ..Self::default()
        }
    }

    /// [`PersistStrategy::default_with_storage`] on the session backend
    pub fn session_default() -> Self {
        Self::default_with_storage(StorageRef::Session)
    }

    pub fn with_key<S: Into<String>>(mut self, key: S) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_storage(mut self, storage: StorageRef) -> Self {
        self.storage = storage;
        self
    }

    /// Write to a specific backend instead of one of the persister's own
    pub fn with_backend(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = StorageRef::Custom(storage);
        self
    }

    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    /// Debounce in milliseconds
    pub fn with_debounce(mut self, millis: u64) -> Self {
        self.debounce = Some(millis);
        self
    }

    pub fn with_serializer<S: Serializer + 'static>(mut self, serializer: S) -> Self {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    pub fn with_merge_strategy(mut self, merge_strategy: MergeStrategy) -> Self {
        self.merge_strategy = merge_strategy;
        self
    }

    pub fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Debounce as a duration; zero means "save immediately"
    pub fn debounce_duration(&self) -> Duration {
        Duration::from_millis(self.debounce.unwrap_or(0))
    }

    /// The key this strategy writes under for the given store
    pub fn resolved_key<'a>(&'a self, store_id: &'a str) -> &'a str {
        self.key.as_deref().unwrap_or(store_id)
    }

    /// Validate the strategy
    pub fn validate(&self) -> Result<()> {
        if matches!(self.key.as_deref(), Some(key) if key.is_empty()) {
            return Err(PersistError::validation("strategy key must not be empty"));
        }
        if let Some(paths) = &self.paths {
            if paths.is_empty() {
                return Err(PersistError::validation(
                    "strategy paths must list at least one field",
                ));
            }
            if paths.iter().any(|p| p.is_empty()) {
                return Err(PersistError::validation(
                    "strategy paths must not contain empty field names",
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for PersistStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistStrategy")
            .field("key", &self.key)
            .field("storage", &self.storage)
            .field("paths", &self.paths)
            .field("debounce", &self.debounce)
            .field(
                "serializer",
                &if self.serializer.is_some() { "custom" } else { "json" },
            )
            .field("merge_strategy", &self.merge_strategy)
            .field("compress", &self.compress)
            .finish()
    }
}

/// Per-store persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PersistOptions {
    pub enabled: bool,

    /// Empty means one [`PersistStrategy::session_default`]
    #[serde(default)]
    pub strategies: Vec<PersistStrategy>,

    /// Upper bound on namespaced keys kept in the session backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_stores: Option<usize>,
}

impl PersistOptions {
    /// Enabled options with the implicit default strategy
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: PersistStrategy) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn with_max_stores(mut self, max_stores: usize) -> Self {
        self.max_stores = Some(max_stores);
        self
    }

    /// Parse and validate options from JSON
    ///
    /// ```rust
    /// use statestash_core::PersistOptions;
    ///
    /// let options = PersistOptions::from_json(
    ///     r#"{"enabled": true, "maxStores": 5,
    ///         "strategies": [{"key": "persist_tables", "mergeStrategy": "deep",
    ///                         "compress": true}]}"#,
    /// )?;
    /// assert_eq!(options.max_stores, Some(5));
    /// # Ok::<(), statestash_core::PersistError>(())
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let options: PersistOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Validate the options and every strategy
    pub fn validate(&self) -> Result<()> {
        if self.max_stores == Some(0) {
            return Err(PersistError::validation("max_stores must be at least 1"));
        }
        for (index, strategy) in self.strategies.iter().enumerate() {
            strategy
                .validate()
                .map_err(|e| PersistError::validation(format!("strategy {index}: {e}")))?;
        }
        Ok(())
    }

    /// The strategies to install, substituting the implicit default for an empty list
    pub fn effective_strategies(&self) -> Vec<PersistStrategy> {
        if self.strategies.is_empty() {
            vec![PersistStrategy::session_default()]
        } else {
            self.strategies.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JsonSerializer;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_implicit_default_strategy() {
        let options = PersistOptions::enabled();
        let strategies = options.effective_strategies();

        assert_eq!(strategies.len(), 1);
        let strategy = &strategies[0];
        assert!(matches!(strategy.storage, StorageRef::Session));
        assert_eq!(strategy.debounce, Some(DEFAULT_DEBOUNCE_MS));
        assert_eq!(strategy.merge_strategy, MergeStrategy::Shallow);
        assert!(strategy.key.is_none());
        assert!(strategy.paths.is_none());
        assert!(!strategy.compress);
    }

    #[test]
    fn test_explicit_strategy_defaults() {
        let strategy = PersistStrategy::new();
        assert_eq!(strategy.merge_strategy, MergeStrategy::Overwrite);
        assert_eq!(strategy.debounce_duration(), Duration::ZERO);
        assert_eq!(strategy.resolved_key("tables"), "tables");
        assert_eq!(
            strategy.with_key("persist_x").resolved_key("tables"),
            "persist_x"
        );
    }

    #[test]
    fn test_from_json() {
        let options = PersistOptions::from_json(
            r#"{
                "enabled": true,
                "maxStores": 3,
                "strategies": [
                    {"key": "persist_queries", "storage": "local", "paths": ["history"],
                     "debounce": 250, "mergeStrategy": "deep", "compress": true},
                    {}
                ]
            }"#,
        )
        .unwrap();

        assert!(options.enabled);
        assert_eq!(options.max_stores, Some(3));
        assert_eq!(options.strategies.len(), 2);

        let first = &options.strategies[0];
        assert_eq!(first.key.as_deref(), Some("persist_queries"));
        assert!(matches!(first.storage, StorageRef::Local));
        assert_eq!(first.paths, Some(vec!["history".to_string()]));
        assert_eq!(first.debounce_duration(), Duration::from_millis(250));
        assert_eq!(first.merge_strategy, MergeStrategy::Deep);
        assert!(first.compress);

        let second = &options.strategies[1];
        assert!(matches!(second.storage, StorageRef::Session));
        assert_eq!(second.merge_strategy, MergeStrategy::Overwrite);
        assert!(second.serializer.is_none());
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        assert!(matches!(
            PersistOptions::from_json(r#"{"enabled": true, "maxStores": 0}"#),
            Err(PersistError::Validation(_))
        ));
        assert!(matches!(
            PersistOptions::from_json(r#"{"enabled": true, "strategies": [{"storage": "cloud"}]}"#),
            Err(PersistError::Json(_))
        ));
        assert!(matches!(
            PersistOptions::from_json(r#"{"enabled": true, "strategies": [{"paths": []}]}"#),
            Err(PersistError::Validation(_))
        ));
        assert!(PersistOptions::from_json(r#"{"enabled": true, "ttl": 5}"#).is_err());
    }

    #[test]
    fn test_validation_names_the_strategy() {
        let options = PersistOptions::enabled()
            .with_strategy(PersistStrategy::new())
            .with_strategy(PersistStrategy::new().with_key(""));

        let error = options.validate().unwrap_err();
        assert!(error.to_string().contains("strategy 1"));
    }

    #[test]
    fn test_builder_sets_code_only_fields() {
        let strategy = PersistStrategy::new()
            .with_backend(Arc::new(MemoryStorage::new()))
            .with_serializer(JsonSerializer::new());

        assert!(matches!(strategy.storage, StorageRef::Custom(_)));
        assert!(strategy.serializer.is_some());
        let debug = format!("{strategy:?}");
        assert!(debug.contains("Custom(session)"));
        assert!(debug.contains("custom"));
    }

    #[test]
    fn test_namespaced_key() {
        assert_eq!(namespaced_key("dbTables"), "persist_dbTables");
        assert!(namespaced_key("x").starts_with(PERSIST_KEY_PREFIX));
    }
}
