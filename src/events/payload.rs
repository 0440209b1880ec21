use serde_json::{Map, Value};
use std::str::Utf8Error;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] Utf8Error),

    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload is JSON but not an object (got {0})")]
    NotAnObject(&'static str),
}

/// Decoded sensor telemetry. Any JSON object is accepted, no schema is enforced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorPayload {
    fields: Map<String, Value>,
}

impl SensorPayload {
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(bytes)?;
        match serde_json::from_str::<Value>(text)? {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(DecodeError::NotAnObject(json_kind(&other))),
        }
    }

    /// Boolean field lookup. Missing keys and non-boolean values both yield `None`.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(Value::as_bool)
    }

    pub fn is_true(&self, key: &str) -> bool {
        self.flag(key) == Some(true)
    }

    pub fn is_false(&self, key: &str) -> bool {
        self.flag(key) == Some(false)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
