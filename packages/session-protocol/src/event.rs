//! Session events: the append-only transcript log.
//!
//! Events travel as raw JSON (`content`) and are decoded into the
//! [`EventContent`] tagged union at the edges that interpret them. The server
//! decodes once on submission to reject malformed payloads; readers decode
//! again and drop anything they cannot interpret.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity_ids::{EventId, LocalId, SessionId};
use crate::error::ProtocolError;

/// A tool invocation carried by an agent turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

/// Decoded event content, keyed by `role`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum EventContent {
    /// A user turn.
    User { text: String },
    /// An agent turn: text, a tool call, or both.
    Agent {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        tool: Option<ToolCall>,
    },
    /// A session-level event (mode switch, permission change, ...).
    ///
    /// The payload is opaque and rendered as a synthetic agent turn.
    Event { payload: Value },
    /// A role this build does not interpret. Stored and ordered like any
    /// other event but never rendered.
    #[serde(other)]
    Unknown,
}

impl EventContent {
    /// Decodes raw content, rejecting anything without a well-formed shape.
    pub fn decode(raw: &Value) -> Result<Self, ProtocolError> {
        if !raw.is_object() {
            return Err(ProtocolError::MalformedEvent(
                "content must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(raw.clone())
            .map_err(|e| ProtocolError::MalformedEvent(e.to_string()))
    }

    pub fn role_name(&self) -> &'static str {
        match self {
            EventContent::User { .. } => "user",
            EventContent::Agent { .. } => "agent",
            EventContent::Event { .. } => "event",
            EventContent::Unknown => "unknown",
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Opaque event metadata.
///
/// Only `sidechain` is interpreted: events from a background conversation
/// branch are kept in the log but never surfaced in the main transcript.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    #[serde(default, skip_serializing_if = "is_false")]
    pub sidechain: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventMeta {
    pub fn sidechain() -> Self {
        Self {
            sidechain: true,
            extra: Map::new(),
        }
    }
}

/// A persisted, sequenced event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub id: EventId,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_id: Option<LocalId>,
    pub seq: i64,
    pub content: Value,
    #[serde(default)]
    pub meta: EventMeta,
    pub created_at: DateTime<Utc>,
}

impl SessionEvent {
    pub fn decode_content(&self) -> Result<EventContent, ProtocolError> {
        EventContent::decode(&self.content)
    }

    pub fn is_sidechain(&self) -> bool {
        self.meta.sidechain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_each_known_role() {
        assert_eq!(
            EventContent::decode(&json!({"role": "user", "text": "hi"})).unwrap(),
            EventContent::User { text: "hi".into() }
        );
        assert_eq!(
            EventContent::decode(&json!({
                "role": "agent",
                "tool": {"name": "bash", "input": {"cmd": "ls"}}
            }))
            .unwrap()
            .role_name(),
            "agent"
        );
        assert_eq!(
            EventContent::decode(&json!({
                "role": "event",
                "payload": {"type": "switch", "mode": "remote"}
            }))
            .unwrap(),
            EventContent::Event {
                payload: json!({"type": "switch", "mode": "remote"})
            }
        );
    }

    #[test]
    fn unknown_role_decodes_to_unknown() {
        let content = EventContent::decode(&json!({"role": "telemetry", "x": 1})).unwrap();
        assert_eq!(content, EventContent::Unknown);
    }

    #[test]
    fn missing_role_or_fields_is_malformed() {
        assert!(EventContent::decode(&json!({"text": "hi"})).is_err());
        assert!(EventContent::decode(&json!({"role": "user"})).is_err());
        assert!(EventContent::decode(&json!("just a string")).is_err());
    }

    #[test]
    fn meta_keeps_unknown_keys_and_reads_sidechain() {
        let meta: EventMeta =
            serde_json::from_value(json!({"sidechain": true, "model": "x"})).unwrap();
        assert!(meta.sidechain);
        assert_eq!(meta.extra["model"], "x");

        let plain: EventMeta = serde_json::from_value(json!({})).unwrap();
        assert!(!plain.sidechain);
    }
}
