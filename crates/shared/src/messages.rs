//! Broadcast envelope.
//!
//! ```json
//! {"device_id": "battle-workshop", "battle_state": "fighting", "battle_boss_hp": 2}
//! ```
//!
//! Senders always transmit their *full* accumulated state, not a diff.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEVICE_ID_KEY: &str = "device_id";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Broadcast must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Broadcast is missing a string device_id")]
    MissingDeviceId,
}

/// One broadcast frame: the sender and its state fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub device_id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl BroadcastMessage {
    pub fn new(device_id: impl Into<String>, fields: Map<String, Value>) -> Self {
        let mut fields = fields;
        fields.remove(DEVICE_ID_KEY);
        Self {
            device_id: device_id.into(),
            fields,
        }
    }

    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let mut fields = match value {
            Value::Object(map) => map,
            other => return Err(ProtocolError::NotAnObject(json_kind(&other))),
        };
        let device_id = match fields.remove(DEVICE_ID_KEY) {
            Some(Value::String(id)) => id,
            _ => return Err(ProtocolError::MissingDeviceId),
        };
        Ok(Self { device_id, fields })
    }

    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_from(&self, device_id: &str) -> bool {
        self.device_id == device_id
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
