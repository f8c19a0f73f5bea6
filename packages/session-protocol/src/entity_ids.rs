//! Typed ID definitions for every entity in the session log.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use crate::id::Id;

// ============================================================================
// Entity marker types
// ============================================================================

/// Marker type for accounts (owners of sessions and of the update stream).
pub struct Account;

/// Marker type for agent sessions.
pub struct Session;

/// Marker type for persisted session events.
pub struct PersistedEvent;

/// Marker type for update envelopes pushed to subscribers.
pub struct Update;

// ============================================================================
// Type aliases
// ============================================================================

pub type AccountId = Id<Account>;

pub type SessionId = Id<Session>;

/// Server-assigned id of a persisted event.
pub type EventId = Id<PersistedEvent>;

pub type UpdateId = Id<Update>;

// ============================================================================
// Client-chosen ids
// ============================================================================

/// Client-generated id of a local write.
///
/// The submitting device sends it as the event's `realId`, which makes
/// submission idempotent and lets the device match its optimistic entry to
/// the confirmed event. The server treats it as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(String);

impl LocalId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generates a fresh random local id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LocalId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for LocalId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
