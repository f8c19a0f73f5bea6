//! Buffers authoritative events until they can be applied in `seq` order.

use std::collections::BTreeMap;

use session_protocol::{SequenceRange, SessionEvent, SEQ_FLOOR};
use tracing::debug;

/// Releases only contiguous runs starting right after the applied watermark.
#[derive(Debug, Clone)]
pub struct ReorderBuffer {
    applied: i64,
    buffered: BTreeMap<i64, SessionEvent>,
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new(SEQ_FLOOR)
    }
}

impl ReorderBuffer {
    /// A buffer whose events up to and including `applied` are already applied.
    pub fn new(applied: i64) -> Self {
        Self {
            applied,
            buffered: BTreeMap::new(),
        }
    }

    /// Buffers an event. Returns false for redelivery of an applied or
    /// already-buffered seq.
    pub fn push(&mut self, event: SessionEvent) -> bool {
        if event.seq <= self.applied || self.buffered.contains_key(&event.seq) {
            debug!(seq = event.seq, applied = self.applied, "dropping redelivered event");
            return false;
        }
        self.buffered.insert(event.seq, event);
        true
    }

    /// Takes the contiguous run starting at `applied + 1` and advances the watermark.
    pub fn drain_ready(&mut self) -> Vec<SessionEvent> {
        let mut ready = Vec::new();
        while let Some(event) = self.buffered.remove(&(self.applied + 1)) {
            self.applied = event.seq;
            ready.push(event);
        }
        ready
    }

    /// Highest seq released so far.
    pub fn applied(&self) -> i64 {
        self.applied
    }

    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }

    /// Sequence numbers between the watermark and the first buffered event.
    ///
    /// `None` when nothing is buffered or the next event is already here.
    pub fn missing(&self) -> Option<SequenceRange> {
        let (&first, _) = self.buffered.iter().next()?;
        let count = first - self.applied - 1;
        (count > 0).then_some(SequenceRange {
            start: self.applied + 1,
            count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use session_protocol::{EventId, EventMeta, SessionId};

    fn event(seq: i64) -> SessionEvent {
        SessionEvent {
            id: EventId::new(),
            session_id: SessionId::new(),
            real_id: None,
            seq,
            content: json!({"role": "user", "text": seq.to_string()}),
            meta: EventMeta::default(),
            created_at: Utc::now(),
        }
    }

    fn seqs(events: &[SessionEvent]) -> Vec<i64> {
        events.iter().map(|e| e.seq).collect()
    }

    #[test]
    fn out_of_order_events_are_released_in_order() {
        let mut buffer = ReorderBuffer::default();
        buffer.push(event(3));
        buffer.push(event(2));
        assert!(buffer.drain_ready().is_empty());

        buffer.push(event(1));
        assert_eq!(seqs(&buffer.drain_ready()), [1, 2, 3]);
        assert_eq!(buffer.applied(), 3);
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn gap_is_reported_until_filled() {
        let mut buffer = ReorderBuffer::new(4);
        buffer.push(event(8));
        buffer.push(event(9));

        assert_eq!(buffer.missing(), Some(SequenceRange { start: 5, count: 3 }));
        assert!(buffer.drain_ready().is_empty());

        for seq in 5..=7 {
            buffer.push(event(seq));
        }
        assert_eq!(buffer.missing(), None);
        assert_eq!(seqs(&buffer.drain_ready()), [5, 6, 7, 8, 9]);
    }

    #[test]
    fn redelivery_is_dropped() {
        let mut buffer = ReorderBuffer::default();
        assert!(buffer.push(event(1)));
        buffer.drain_ready();

        assert!(!buffer.push(event(1)));
        assert!(buffer.push(event(3)));
        assert!(!buffer.push(event(3)));
        assert_eq!(buffer.buffered(), 1);
    }
}
