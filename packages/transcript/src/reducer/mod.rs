//! Reconciliation of the authoritative event log with local optimistic writes.
//!
//! [`apply`] is a pure function over `(state, input)`. Every pass rebuilds the
//! visible map from all applied events through four phases:
//!
//! 1. sidechain filter
//! 2. event synthesis
//! 3. committed-discard suppression
//! 4. optimistic merge
//!
//! and diffs it against the previous map to produce `changed`. Events are
//! keyed by their immutable id, so applying one twice has no further effect.

mod entry;
mod phases;

pub use entry::{EntryId, EntryRole, Position, TranscriptEntry};

use std::collections::{BTreeMap, BTreeSet, HashSet};

use session_protocol::{EventId, LocalId, SessionEvent};
use tracing::debug;

use crate::queue::LocalMessage;

/// Reducer output, owned by the session object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReducerState {
    /// Every applied authoritative event, including hidden ones.
    events: BTreeMap<EventId, SessionEvent>,
    /// Visible entries.
    pub messages: BTreeMap<EntryId, TranscriptEntry>,
    /// Entries added, modified or removed by the pass that built this state.
    pub changed: BTreeSet<EntryId>,
}

/// Inputs of one reducer pass.
#[derive(Debug, Clone, Copy)]
pub struct ReducerInput<'a> {
    /// New authoritative events, in ascending `seq` order.
    pub events: &'a [SessionEvent],
    /// Pending local messages.
    pub local: &'a [LocalMessage],
    /// Current `discardedCommittedMessageLocalIds`.
    pub discarded: &'a BTreeSet<LocalId>,
}

impl ReducerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visible entries in display order: confirmed by `seq`, then optimistic
    /// by submission order.
    pub fn transcript(&self) -> Vec<&TranscriptEntry> {
        let mut entries: Vec<_> = self.messages.values().collect();
        entries.sort_by_key(|entry| entry.position);
        entries
    }

    /// Highest applied `seq`, hidden events included.
    pub fn last_seq(&self) -> Option<i64> {
        self.events.values().map(|event| event.seq).max()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

/// Runs one reducer pass.
pub fn apply(state: &ReducerState, input: ReducerInput<'_>) -> ReducerState {
    let mut events = state.events.clone();
    for event in input.events {
        if events.contains_key(&event.id) {
            debug!(event_id = %event.id, seq = event.seq, "event already applied");
            continue;
        }
        events.insert(event.id, event.clone());
    }

    let mut ordered: Vec<&SessionEvent> = events.values().collect();
    ordered.sort_by_key(|event| event.seq);

    let mut messages = BTreeMap::new();
    phases::synthesize(&mut messages, phases::filter_sidechain(ordered.iter().copied()));
    phases::suppress_discarded(&mut messages, input.discarded);

    let confirmed: HashSet<&LocalId> = ordered
        .iter()
        .filter_map(|event| event.real_id.as_ref())
        .collect();
    phases::merge_optimistic(&mut messages, input.local, &confirmed, input.discarded);

    let changed = diff(&state.messages, &messages);
    if !changed.is_empty() {
        debug!(changed = changed.len(), visible = messages.len(), "transcript updated");
    }

    ReducerState {
        events,
        messages,
        changed,
    }
}

fn diff(
    before: &BTreeMap<EntryId, TranscriptEntry>,
    after: &BTreeMap<EntryId, TranscriptEntry>,
) -> BTreeSet<EntryId> {
    let updated = after
        .iter()
        .filter(|(id, entry)| before.get(*id) != Some(*entry))
        .map(|(id, _)| id.clone());
    let removed = before
        .keys()
        .filter(|id| !after.contains_key(*id))
        .cloned();
    updated.chain(removed).collect()
}
