//! Holding area for this device's unconfirmed writes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use session_protocol::{EventMeta, LocalId, SubmitEventRequest};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalStatus {
    Pending,
    Confirmed,
    Discarded,
}

/// A write made on this device that the server has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalMessage {
    pub local_id: LocalId,
    pub content: Value,
    #[serde(default)]
    pub meta: EventMeta,
    pub created_at: DateTime<Utc>,
    pub status: LocalStatus,
    /// Submission order on this device, assigned by the queue.
    #[serde(default)]
    pub order: u64,
}

impl LocalMessage {
    pub fn new(local_id: LocalId, content: Value) -> Self {
        Self {
            local_id,
            content,
            meta: EventMeta::default(),
            created_at: Utc::now(),
            status: LocalStatus::Pending,
            order: 0,
        }
    }

    /// The request that submits this message, keyed by its local id.
    pub fn to_request(&self) -> SubmitEventRequest {
        SubmitEventRequest {
            real_id: Some(self.local_id.clone()),
            content: self.content.clone(),
            meta: self.meta.clone(),
            created_at: Some(self.created_at),
        }
    }
}

/// Pending local writes in submission order.
///
/// Ids of this device's own settled writes are remembered so a late retry of
/// the same write cannot bring it back. Ids that were never queued here
/// (peer writes) are not tracked.
#[derive(Debug, Default)]
pub struct LocalOptimisticQueue {
    pending: Vec<LocalMessage>,
    settled: HashMap<LocalId, LocalStatus>,
    next_order: u64,
}

impl LocalOptimisticQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message to the pending set.
    ///
    /// Returns false when the local id is already known.
    pub fn enqueue(&mut self, mut message: LocalMessage) -> bool {
        if self.status(&message.local_id).is_some() {
            debug!(local_id = %message.local_id, "local message already queued");
            return false;
        }

        message.status = LocalStatus::Pending;
        message.order = self.next_order;
        self.next_order += 1;
        self.pending.push(message);
        true
    }

    /// Settles the message whose local id matches a confirmed event's `realId`.
    pub fn on_confirmed(&mut self, real_id: &LocalId) -> Option<LocalMessage> {
        self.settle(real_id, LocalStatus::Confirmed)
    }

    /// Settles a message that was superseded or withdrawn.
    pub fn on_discarded(&mut self, local_id: &LocalId) -> Option<LocalMessage> {
        self.settle(local_id, LocalStatus::Discarded)
    }

    fn settle(&mut self, local_id: &LocalId, status: LocalStatus) -> Option<LocalMessage> {
        let index = self.pending.iter().position(|m| &m.local_id == local_id)?;
        let mut message = self.pending.remove(index);
        message.status = status;
        self.settled.insert(local_id.clone(), status);
        Some(message)
    }

    pub fn status(&self, local_id: &LocalId) -> Option<LocalStatus> {
        if let Some(status) = self.settled.get(local_id) {
            return Some(*status);
        }
        self.pending
            .iter()
            .any(|m| &m.local_id == local_id)
            .then_some(LocalStatus::Pending)
    }

    /// Pending messages in submission order.
    pub fn snapshot(&self) -> &[LocalMessage] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
