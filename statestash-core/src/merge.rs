/*!
Merge policies combining restored state with the live state of a store.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a restored snapshot is combined with live state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Patch the snapshot's keys onto live state; other keys are untouched
    #[default]
    Overwrite,
    /// Recursively merge nested objects; arrays and scalars are replaced
    Deep,
    /// Replace top-level keys wholesale
    Shallow,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Overwrite => "overwrite",
            MergeStrategy::Deep => "deep",
            MergeStrategy::Shallow => "shallow",
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Combine `loaded` with `live` under `strategy`
///
/// If either side is not a JSON object the loaded value wins outright.
pub fn merge(live: Value, loaded: Value, strategy: MergeStrategy) -> Value {
    match strategy {
        MergeStrategy::Overwrite => patch(live, loaded),
        MergeStrategy::Shallow => shallow_merge(live, loaded),
        MergeStrategy::Deep => deep_merge(live, loaded),
    }
}

/// Assign each top-level key of `loaded` onto `live` in place
pub fn patch(live: Value, loaded: Value) -> Value {
    match (live, loaded) {
        (Value::Object(mut target), Value::Object(source)) => {
            for (key, value) in source {
                target.insert(key, value);
            }
            Value::Object(target)
        }
        (_, loaded) => loaded,
    }
}

/// Build a new object from `live` with every top-level key of `loaded` replacing its counterpart
pub fn shallow_merge(live: Value, loaded: Value) -> Value {
    match (live, loaded) {
        (Value::Object(target), Value::Object(source)) => {
            let mut merged = serde_json::Map::with_capacity(target.len() + source.len());
            merged.extend(target);
            merged.extend(source);
            Value::Object(merged)
        }
        (_, loaded) => loaded,
    }
}

/// Recursively merge nested objects key by key
pub fn deep_merge(live: Value, loaded: Value) -> Value {
    match (live, loaded) {
        (Value::Object(mut target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => {
                        let current = existing.take();
                        *existing = deep_merge(current, value);
                    }
                    None => {
                        target.insert(key, value);
                    }
                }
            }
            Value::Object(target)
        }
        (_, loaded) => loaded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shallow_replaces_nested_objects() {
        let live = json!({"a": {"x": 1}, "b": 2});
        let loaded = json!({"a": {"y": 2}});

        assert_eq!(
            merge(live, loaded, MergeStrategy::Shallow),
            json!({"a": {"y": 2}, "b": 2})
        );
    }

    #[test]
    fn test_deep_merges_nested_objects() {
        let live = json!({"a": {"x": 1}, "b": 2});
        let loaded = json!({"a": {"y": 2}});

        assert_eq!(
            merge(live, loaded, MergeStrategy::Deep),
            json!({"a": {"x": 1, "y": 2}, "b": 2})
        );
    }

    #[test]
    fn test_deep_replaces_arrays() {
        let live = json!({"tabs": [1, 2, 3], "nested": {"list": ["a", "b"], "keep": true}});
        let loaded = json!({"tabs": [9], "nested": {"list": []}});

        assert_eq!(
            merge(live, loaded, MergeStrategy::Deep),
            json!({"tabs": [9], "nested": {"list": [], "keep": true}})
        );
    }

    #[test]
    fn test_deep_non_object_wins_at_any_depth() {
        let live = json!({"a": {"b": {"c": 1}}, "d": 5});
        let loaded = json!({"a": {"b": "flat"}, "d": {"now": "object"}});

        assert_eq!(
            merge(live, loaded, MergeStrategy::Deep),
            json!({"a": {"b": "flat"}, "d": {"now": "object"}})
        );
    }

    #[test]
    fn test_overwrite_only_touches_listed_keys() {
        let live = json!({"query": "select 1", "history": ["a"], "limit": 50});
        let loaded = json!({"limit": 100});

        assert_eq!(
            merge(live, loaded, MergeStrategy::Overwrite),
            json!({"query": "select 1", "history": ["a"], "limit": 100})
        );
    }

    #[test]
    fn test_non_object_sides_take_loaded_value() {
        for strategy in [
            MergeStrategy::Overwrite,
            MergeStrategy::Shallow,
            MergeStrategy::Deep,
        ] {
            assert_eq!(merge(json!(1), json!({"a": 1}), strategy), json!({"a": 1}));
            assert_eq!(merge(json!({"a": 1}), json!([1]), strategy), json!([1]));
            assert_eq!(merge(json!(null), json!("x"), strategy), json!("x"));
        }
    }

    #[test]
    fn test_merge_keeps_live_key_order() {
        let live = json!({"first": 1, "second": 2, "third": 3});
        let merged = merge(live, json!({"second": 20, "fourth": 4}), MergeStrategy::Deep);

        let keys: Vec<_> = merged.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["first", "second", "third", "fourth"]);
    }

    #[test]
    fn test_strategy_serde_names() {
        assert_eq!(
            serde_json::to_string(&MergeStrategy::Shallow).unwrap(),
            "\"shallow\""
        );
        let parsed: MergeStrategy = serde_json::from_str("\"deep\"").unwrap();
        assert_eq!(parsed, MergeStrategy::Deep);
        assert_eq!(MergeStrategy::default(), MergeStrategy::Overwrite);
    }
}
