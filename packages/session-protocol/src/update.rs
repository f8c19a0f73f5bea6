//! Update envelopes pushed to subscribers after a write commits.
//!
//! Every envelope consumes one number from the owning account's scope, so a
//! device following its account sees a gapless, ordered update stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::entity_ids::{LocalId, SessionId, UpdateId};
use crate::event::SessionEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEnvelope {
    pub id: UpdateId,
    /// Account-scope sequence number of this update.
    pub seq: i64,
    pub body: UpdateBody,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "kebab-case")]
pub enum UpdateBody {
    #[serde(rename_all = "camelCase")]
    NewEvent {
        session_id: SessionId,
        event: SessionEvent,
    },
    #[serde(rename_all = "camelCase")]
    UpdateMetadata {
        session_id: SessionId,
        metadata_version: i64,
        discarded_committed_message_local_ids: BTreeSet<LocalId>,
    },
}

impl UpdateBody {
    pub fn session_id(&self) -> SessionId {
        match self {
            UpdateBody::NewEvent { session_id, .. } => *session_id,
            UpdateBody::UpdateMetadata { session_id, .. } => *session_id,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            UpdateBody::NewEvent { .. } => "new-event",
            UpdateBody::UpdateMetadata { .. } => "update-metadata",
        }
    }
}
