//! Payload and action value types exchanged with the uplink endpoint.
//!
//! The client itself treats payloads as opaque serializable values; these are
//! the concrete shapes the uplink backend understands.

use crate::config::ActionStatusConfig;
use crate::error::{Result, UplinkError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Conversion of a response into the payload that carries it.
pub trait ToPayload {
    type Payload: Serialize;

    fn to_payload(&self) -> Self::Payload;
}

/// One data point published on a stream.
///
/// Serializes flat: `fields` sit next to `stream`, `sequence` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub stream: String,
    pub sequence: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Payload {
    const HEADER_KEYS: [&'static str; 3] = ["stream", "sequence", "timestamp"];

    /// Create a payload stamped with the current time.
    pub fn new(stream: impl Into<String>, sequence: u32) -> Self {
        Self {
            stream: stream.into(),
            sequence,
            timestamp: chrono::Utc::now().timestamp_millis(),
            fields: Map::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Check that every field is a scalar and none shadows a header key.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in &self.fields {
            if Self::HEADER_KEYS.contains(&key.as_str()) {
                return Err(UplinkError::Validation {
                    field: key.clone(),
                    message: "field name collides with a payload header".to_string(),
                });
            }
            if matches!(value, Value::Array(_) | Value::Object(_) | Value::Null) {
                return Err(UplinkError::Validation {
                    field: key.clone(),
                    message: format!("unsupported value type: {}", value),
                });
            }
        }
        Ok(())
    }

    /// Render as a single flat JSON object.
    pub fn to_flat_json(&self) -> Result<String> {
        self.validate()?;
        Ok(serde_json::to_string(self)?)
    }
}

/// Action pushed by the backend to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_id: String,
    pub name: String,
    /// Action arguments as JSON text.
    #[serde(default)]
    pub payload: String,
}

impl Action {
    /// Parse the JSON-encoded arguments.
    pub fn payload_json(&self) -> Result<Value> {
        if self.payload.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.payload).map_err(|e| UplinkError::Json {
            message: format!("Failed to parse payload of action {}: {}", self.action_id, e),
            source: Some(e),
        })
    }
}

/// Progress report for an action, published on the action status stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub action_id: String,
    pub sequence: u32,
    pub timestamp: i64,
    pub state: String,
    pub progress: u8,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ActionResponse {
    fn new(action_id: impl Into<String>, sequence: u32, state: &str, progress: u8) -> Self {
        Self {
            action_id: action_id.into(),
            sequence,
            timestamp: chrono::Utc::now().timestamp_millis(),
            state: state.to_string(),
            progress: progress.min(100),
            errors: Vec::new(),
        }
    }

    pub fn progress(action_id: impl Into<String>, sequence: u32, percent: u8) -> Self {
        Self::new(
            action_id,
            sequence,
            ActionStatusConfig::STATE_RUNNING,
            percent,
        )
    }

    pub fn success(action_id: impl Into<String>, sequence: u32) -> Self {
        Self::new(action_id, sequence, ActionStatusConfig::STATE_COMPLETED, 100)
    }

    pub fn failure(action_id: impl Into<String>, sequence: u32, error: impl Into<String>) -> Self {
        let mut response = Self::new(action_id, sequence, ActionStatusConfig::STATE_FAILED, 100);
        response.errors.push(error.into());
        response
    }
}

impl ToPayload for ActionResponse {
    type Payload = Payload;

    fn to_payload(&self) -> Payload {
        Payload::new(ActionStatusConfig::STREAM, self.sequence)
            .with_timestamp(self.timestamp)
            .with_field("id", self.action_id.clone())
            .with_field("state", self.state.clone())
            .with_field("progress", self.progress)
            .with_field("errors", self.errors.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_serializes_flat() {
        let payload = Payload::new("gps", 7)
            .with_timestamp(1_000)
            .with_field("lat", 12.5)
            .with_field("fix", true);

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            json!({"stream": "gps", "sequence": 7, "timestamp": 1000, "lat": 12.5, "fix": true})
        );

        let back: Payload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_flat_json_rejects_nested_values() {
        let payload = Payload::new("gps", 1).with_field("nested", json!({"a": 1}));
        let err = payload.to_flat_json().unwrap_err();
        assert!(matches!(err, UplinkError::Validation { ref field, .. } if field == "nested"));
    }

    #[test]
    fn test_flat_json_rejects_header_collision() {
        let payload = Payload::new("gps", 1).with_field("sequence", 3);
        assert!(payload.to_flat_json().is_err());
    }

    #[test]
    fn test_action_payload_json() {
        let action = Action {
            action_id: "42".into(),
            name: "reboot".into(),
            payload: r#"{"delay": 5}"#.into(),
        };
        assert_eq!(action.payload_json().unwrap(), json!({"delay": 5}));

        let empty = Action {
            payload: String::new(),
            ..action.clone()
        };
        assert_eq!(empty.payload_json().unwrap(), Value::Null);

        let broken = Action {
            payload: "{".into(),
            ..action
        };
        assert!(broken.payload_json().is_err());
    }

    #[test]
    fn test_action_response_to_payload() {
        let response = ActionResponse::failure("42", 3, "disk full");
        let payload = response.to_payload();

        assert_eq!(payload.stream, ActionStatusConfig::STREAM);
        assert_eq!(payload.sequence, 3);
        assert_eq!(payload.timestamp, response.timestamp);
        assert_eq!(payload.fields["id"], json!("42"));
        assert_eq!(payload.fields["state"], json!("Failed"));
        assert_eq!(payload.fields["errors"], json!("disk full"));
        assert!(payload.to_flat_json().is_ok());
    }

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(ActionResponse::progress("1", 1, 250).progress, 100);
        assert_eq!(ActionResponse::success("1", 2).state, "Completed");
    }
}
