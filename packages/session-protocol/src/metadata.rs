//! Per-session metadata document.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::entity_ids::{LocalId, SessionId};

/// Version of a freshly created metadata document.
pub const INITIAL_METADATA_VERSION: i64 = 0;

/// Metadata carried alongside a session's event log.
///
/// `metadata_version` is a compare-and-set token, independent of the event
/// `seq`. Every accepted write bumps it by exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub session_id: SessionId,
    pub metadata_version: i64,
    #[serde(default)]
    pub metadata: Value,
    /// Local ids whose committed event must stay out of the transcript.
    ///
    /// Entries are never removed; a suppressed event remains in the log.
    #[serde(default)]
    pub discarded_committed_message_local_ids: BTreeSet<LocalId>,
}

impl SessionMetadata {
    pub fn new(session_id: SessionId, metadata: Value) -> Self {
        Self {
            session_id,
            metadata_version: INITIAL_METADATA_VERSION,
            metadata,
            discarded_committed_message_local_ids: BTreeSet::new(),
        }
    }

    pub fn is_discarded(&self, local_id: &LocalId) -> bool {
        self.discarded_committed_message_local_ids.contains(local_id)
    }
}

/// Outcome of a compare-and-set metadata write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum MetadataWriteResult {
    Success { version: i64 },
    /// The caller's expected version was stale; nothing was written.
    VersionMismatch {
        version: i64,
        document: SessionMetadata,
    },
}
