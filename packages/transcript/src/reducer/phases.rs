//! The reducer's phases, in pipeline order.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use session_protocol::{EventContent, LocalId, SessionEvent};
use tracing::debug;

use super::entry::{EntryId, Position, TranscriptEntry};
use crate::queue::{LocalMessage, LocalStatus};

pub(super) type Messages = BTreeMap<EntryId, TranscriptEntry>;

/// Events on a background conversation branch stay in state but are not shown.
pub(super) fn filter_sidechain<'a>(
    events: impl Iterator<Item = &'a SessionEvent>,
) -> impl Iterator<Item = &'a SessionEvent> {
    events.filter(|event| !event.is_sidechain())
}

/// Materializes confirmed events as entries.
///
/// Role `event` becomes an agent turn carrying the payload. Unknown roles and
/// undecodable content produce nothing.
pub(super) fn synthesize<'a>(
    messages: &mut Messages,
    events: impl Iterator<Item = &'a SessionEvent>,
) {
    for event in events {
        let content = match event.decode_content() {
            Ok(content) => content,
            Err(e) => {
                debug!(
                    event_id = %event.id,
                    seq = event.seq,
                    error = %e,
                    "dropping undecodable event"
                );
                continue;
            }
        };

        let id = EntryId::Confirmed(event.id);
        let position = Position::Confirmed { seq: event.seq };
        match TranscriptEntry::from_content(
            id.clone(),
            event.real_id.clone(),
            position,
            content,
            event.created_at,
        ) {
            Some(entry) => {
                messages.insert(id, entry);
            }
            None => debug!(
                event_id = %event.id,
                seq = event.seq,
                "ignoring event with unrendered role"
            ),
        }
    }
}

/// Removes confirmed entries whose local id was discarded after commit.
pub(super) fn suppress_discarded(messages: &mut Messages, discarded: &BTreeSet<LocalId>) {
    if discarded.is_empty() {
        return;
    }
    messages.retain(|_, entry| {
        entry
            .local_id
            .as_ref()
            .map_or(true, |local_id| !discarded.contains(local_id))
    });
}

/// Adds pending local writes that have no confirmed event yet.
///
/// Discarded ids are skipped here too, so a suppressed write never comes back
/// as an optimistic entry.
pub(super) fn merge_optimistic(
    messages: &mut Messages,
    local: &[LocalMessage],
    confirmed: &HashSet<&LocalId>,
    discarded: &BTreeSet<LocalId>,
) {
    for message in local {
        if message.status != LocalStatus::Pending
            || message.meta.sidechain
            || confirmed.contains(&message.local_id)
            || discarded.contains(&message.local_id)
        {
            continue;
        }

        let content = match EventContent::decode(&message.content) {
            Ok(content) => content,
            Err(e) => {
                debug!(
                    local_id = %message.local_id,
                    error = %e,
                    "dropping undecodable local message"
                );
                continue;
            }
        };

        let id = EntryId::Local(message.local_id.clone());
        let position = Position::Pending {
            order: message.order,
        };
        if let Some(entry) = TranscriptEntry::from_content(
            id.clone(),
            Some(message.local_id.clone()),
            position,
            content,
            message.created_at,
        ) {
            messages.insert(id, entry);
        }
    }
}
