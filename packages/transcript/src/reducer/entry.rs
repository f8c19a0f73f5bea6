use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use session_protocol::{EventContent, EventId, LocalId, ToolCall};

/// Key of a transcript entry.
///
/// Confirmed entries are keyed by the server event id, optimistic ones by the
/// local id they were submitted under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EntryId {
    Confirmed(EventId),
    Local(LocalId),
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::Confirmed(id) => write!(f, "event:{id}"),
            EntryId::Local(id) => write!(f, "local:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryRole {
    User,
    Agent,
}

/// Display position. Every confirmed entry sorts before every optimistic one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Position {
    Confirmed { seq: i64 },
    Pending { order: u64 },
}

/// One visible row of the transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub id: EntryId,
    pub local_id: Option<LocalId>,
    pub position: Position,
    pub role: EntryRole,
    pub text: Option<String>,
    pub tool: Option<ToolCall>,
    /// Payload of a session-level event rendered as an agent turn.
    pub event: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    /// Builds the entry for decoded content. Roles that are not rendered give `None`.
    pub(crate) fn from_content(
        id: EntryId,
        local_id: Option<LocalId>,
        position: Position,
        content: EventContent,
        created_at: DateTime<Utc>,
    ) -> Option<Self> {
        let (role, text, tool, event) = match content {
            EventContent::User { text } => (EntryRole::User, Some(text), None, None),
            EventContent::Agent { text, tool } => (EntryRole::Agent, text, tool, None),
            EventContent::Event { payload } => (EntryRole::Agent, None, None, Some(payload)),
            EventContent::Unknown => return None,
        };

        Some(Self {
            id,
            local_id,
            position,
            role,
            text,
            tool,
            event,
            created_at,
        })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.position, Position::Pending { .. })
    }
}
