//! Opaque JSON messages relayed by the hub.

use serde_json::Value;
use std::str::FromStr;

/// Why an inbound payload was not relayed.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("binary message is not UTF-8")]
    NotUtf8,
    #[error("message of {len} bytes exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },
}

/// A validated JSON object. Contents are never inspected beyond parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage(Value);

impl DataMessage {
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        match serde_json::from_str::<Value>(text)? {
            value @ Value::Object(_) => Ok(Self(value)),
            other => Err(MessageError::NotAnObject(kind(&other))),
        }
    }

    /// Parse a binary frame holding UTF-8 JSON.
    pub fn parse_bytes(data: &[u8]) -> Result<Self, MessageError> {
        let text = std::str::from_utf8(data).map_err(|_| MessageError::NotUtf8)?;
        Self::parse(text)
    }

    /// Compact JSON, keys in their original order.
    pub fn to_json(&self) -> String {
        self.0.to_string()
    }
}

impl FromStr for DataMessage {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
