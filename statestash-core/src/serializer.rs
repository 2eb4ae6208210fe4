/*!
Serializers turning a [`StateSnapshot`] into the string a backend stores.
*/

use serde_json::{Map, Value};

use crate::{PersistError, Result};

/// Field name to value, in the order the fields were declared
pub type StateSnapshot = Map<String, Value>;

/// Pluggable snapshot format
///
/// A strategy that carries a custom serializer always uses it; there is no
/// fallback to [`JsonSerializer`] when it fails.
pub trait Serializer: Send + Sync {
    fn serialize(&self, snapshot: &StateSnapshot) -> Result<String>;

    fn deserialize(&self, data: &str) -> Result<StateSnapshot>;
}

/// Compact JSON, the default format
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonSerializer {
    fn serialize(&self, snapshot: &StateSnapshot) -> Result<String> {
        Ok(serde_json::to_string(snapshot)?)
    }

    fn deserialize(&self, data: &str) -> Result<StateSnapshot> {
        match serde_json::from_str::<Value>(data)? {
            Value::Object(map) => Ok(map),
            other => Err(PersistError::invalid_format(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }
}

/// Serializer assembled from a pair of closures
///
/// Handy for one-off formats that do not warrant their own type.
pub struct FnSerializer<S, D> {
    serialize: S,
    deserialize: D,
}

impl<S, D> FnSerializer<S, D>
where
    S: Fn(&StateSnapshot) -> Result<String> + Send + Sync,
    D: Fn(&str) -> Result<StateSnapshot> + Send + Sync,
{
    pub fn new(serialize: S, deserialize: D) -> Self {
        Self {
            serialize,
            deserialize,
        }
    }
}

impl<S, D> Serializer for FnSerializer<S, D>
where
    S: Fn(&StateSnapshot) -> Result<String> + Send + Sync,
    D: Fn(&str) -> Result<StateSnapshot> + Send + Sync,
{
    fn serialize(&self, snapshot: &StateSnapshot) -> Result<String> {
        (self.serialize)(snapshot)
    }

    fn deserialize(&self, data: &str) -> Result<StateSnapshot> {
        (self.deserialize)(data)
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> StateSnapshot {
        match value {
            Value::Object(map) => map,
            _ => panic!("test snapshot must be an object"),
        }
    }

    #[test]
    fn test_json_roundtrip_keeps_field_order() {
        let serializer = JsonSerializer::new();
        let original = snapshot(json!({"zeta": 1, "alpha": [1, 2], "mid": {"x": null}}));

        let data = serializer.serialize(&original).unwrap();
        assert_eq!(data, r#"{"zeta":1,"alpha":[1,2],"mid":{"x":null}}"#);

        let restored = serializer.deserialize(&data).unwrap();
        assert_eq!(restored, original);
        assert_eq!(
            restored.keys().collect::<Vec<_>>(),
            vec!["zeta", "alpha", "mid"]
        );
    }

    #[test]
    fn test_json_rejects_non_object() {
        let serializer = JsonSerializer::new();

        let result = serializer.deserialize("[1, 2, 3]");
        assert!(matches!(result, Err(PersistError::InvalidFormat(_))));
        assert!(result.unwrap_err().to_string().contains("an array"));

        assert!(matches!(
            serializer.deserialize("{broken"),
            Err(PersistError::Json(_))
        ));
    }

    #[test]
    fn test_fn_serializer_uses_closures() {
        let serializer = FnSerializer::new(
            |snapshot: &StateSnapshot| -> Result<String> {
                Ok(format!("v1:{}", serde_json::to_string(snapshot)?))
            },
            |data: &str| -> Result<StateSnapshot> {
                let body = data
                    .strip_prefix("v1:")
                    .ok_or_else(|| PersistError::serializer("missing version prefix"))?;
                JsonSerializer.deserialize(body)
            },
        );

        let original = snapshot(json!({"count": 3}));
        let data = serializer.serialize(&original).unwrap();
        assert_eq!(data, r#"v1:{"count":3}"#);
        assert_eq!(serializer.deserialize(&data).unwrap(), original);
        assert!(matches!(
            serializer.deserialize(r#"{"count":3}"#),
            Err(PersistError::Serializer(_))
        ));
    }
}
