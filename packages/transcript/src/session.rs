//! The per-session client object.
//!
//! `SessionSync` owns everything a session view needs to render: the reducer
//! state, this device's optimistic queue, the reorder buffer for the
//! authoritative stream and the last seen discard set. All mutation goes
//! through `&mut self`, so reducer passes for one session never overlap.

use std::collections::BTreeSet;

use serde_json::Value;
use session_protocol::{
    EventsPage, LocalId, SequenceRange, SessionEvent, SessionId, SessionMetadata,
    SubmitEventRequest, SubmitReceipt, UpdateBody, UpdateEnvelope, SEQ_FLOOR,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::Transport;
use crate::error::{ClientError, Result};
use crate::queue::{LocalMessage, LocalOptimisticQueue};
use crate::reducer::{self, EntryId, ReducerInput, ReducerState, TranscriptEntry};
use crate::reorder::ReorderBuffer;

/// Page size used when filling gaps in the authoritative stream.
pub const CATCH_UP_PAGE_LIMIT: i64 = 100;

pub struct SessionSync {
    session_id: SessionId,
    state: ReducerState,
    queue: LocalOptimisticQueue,
    reorder: ReorderBuffer,
    metadata_version: Option<i64>,
    discarded: BTreeSet<LocalId>,
}

impl SessionSync {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            state: ReducerState::new(),
            queue: LocalOptimisticQueue::new(),
            reorder: ReorderBuffer::new(SEQ_FLOOR),
            metadata_version: None,
            discarded: BTreeSet::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Queues a new local write and returns the request that submits it.
    pub fn send(&mut self, content: Value) -> SubmitEventRequest {
        self.send_message(LocalMessage::new(LocalId::generate(), content))
    }

    /// Queues `message` unless its local id is already known.
    ///
    /// Either way the returned request carries the message's local id as
    /// `realId`, so resubmitting it is safe.
    pub fn send_message(&mut self, message: LocalMessage) -> SubmitEventRequest {
        let request = message.to_request();
        if self.queue.enqueue(message) {
            self.reduce(&[]);
        }
        request
    }

    /// Ingests authoritative events in any order.
    ///
    /// Only the contiguous run after the applied watermark reaches the
    /// reducer; the rest waits in the reorder buffer (see [`Self::missing`]).
    /// Returns the ids changed by the pass.
    pub fn receive(
        &mut self,
        events: impl IntoIterator<Item = SessionEvent>,
    ) -> &BTreeSet<EntryId> {
        for event in events {
            if event.session_id != self.session_id {
                warn!(
                    session_id = %self.session_id,
                    event_session_id = %event.session_id,
                    "ignoring event for another session"
                );
                continue;
            }
            self.reorder.push(event);
        }

        let ready = self.reorder.drain_ready();
        if ready.is_empty() {
            self.state.changed.clear();
            return &self.state.changed;
        }

        self.reduce(&ready);
        for real_id in ready.iter().filter_map(|event| event.real_id.as_ref()) {
            if self.queue.on_confirmed(real_id).is_some() {
                debug!(local_id = %real_id, "local message confirmed");
            }
        }
        &self.state.changed
    }

    /// Routes an update envelope pushed by the server.
    pub fn apply_update(&mut self, update: UpdateEnvelope) -> &BTreeSet<EntryId> {
        if update.body.session_id() != self.session_id {
            self.state.changed.clear();
            return &self.state.changed;
        }
        match update.body {
            UpdateBody::NewEvent { event, .. } => self.receive([event]),
            UpdateBody::UpdateMetadata {
                metadata_version,
                discarded_committed_message_local_ids,
                ..
            } => {
                self.apply_discarded(metadata_version, discarded_committed_message_local_ids);
                &self.state.changed
            }
        }
    }

    /// Adopts a metadata document. Returns false when it is not newer than
    /// the one already applied.
    pub fn apply_metadata(&mut self, doc: &SessionMetadata) -> bool {
        if doc.session_id != self.session_id {
            return false;
        }
        self.apply_discarded(
            doc.metadata_version,
            doc.discarded_committed_message_local_ids.clone(),
        )
    }

    fn apply_discarded(&mut self, version: i64, discarded: BTreeSet<LocalId>) -> bool {
        if self.metadata_version.is_some_and(|current| version <= current) {
            debug!(version, current = ?self.metadata_version, "ignoring stale metadata");
            self.state.changed.clear();
            return false;
        }

        for local_id in discarded.difference(&self.discarded) {
            self.queue.on_discarded(local_id);
        }
        self.metadata_version = Some(version);
        self.discarded = discarded;
        self.reduce(&[]);
        true
    }

    /// Withdraws a pending local write. Returns false when it was not pending.
    pub fn discard_local(&mut self, local_id: &LocalId) -> bool {
        let discarded = self.queue.on_discarded(local_id).is_some();
        if discarded {
            self.reduce(&[]);
        }
        discarded
    }

    /// Submits a request, giving up when `token` is cancelled.
    ///
    /// Cancelling does not retract the optimistic entry: it stays pending
    /// until confirmed or discarded.
    pub async fn submit_cancellable<T: Transport + ?Sized>(
        &self,
        transport: &T,
        request: &SubmitEventRequest,
        token: &CancellationToken,
    ) -> Result<SubmitReceipt> {
        tokio::select! {
            _ = token.cancelled() => {
                info!(
                    session_id = %self.session_id,
                    real_id = ?request.real_id,
                    "submission cancelled"
                );
                Err(ClientError::Cancelled)
            }
            result = transport.submit(self.session_id, request) => result,
        }
    }

    /// Fetches the log after the applied watermark until it is caught up.
    ///
    /// Returns the number of events fetched.
    pub async fn catch_up<T: Transport + ?Sized>(&mut self, transport: &T) -> Result<usize> {
        let mut fetched = 0;
        loop {
            let after_seq = self.reorder.applied();
            let EventsPage { events, has_more } = transport
                .events_after(self.session_id, after_seq, Some(CATCH_UP_PAGE_LIMIT))
                .await?;
            fetched += events.len();
            self.receive(events);

            if !has_more || self.reorder.applied() == after_seq {
                break;
            }
        }
        Ok(fetched)
    }

    /// Visible entries in display order.
    pub fn transcript(&self) -> Vec<&TranscriptEntry> {
        self.state.transcript()
    }

    pub fn state(&self) -> &ReducerState {
        &self.state
    }

    /// Ids changed by the most recent pass.
    pub fn changed(&self) -> &BTreeSet<EntryId> {
        &self.state.changed
    }

    pub fn pending(&self) -> &[LocalMessage] {
        self.queue.snapshot()
    }

    pub fn queue(&self) -> &LocalOptimisticQueue {
        &self.queue
    }

    /// Gap between the applied watermark and the earliest buffered event.
    pub fn missing(&self) -> Option<SequenceRange> {
        self.reorder.missing()
    }

    pub fn applied_seq(&self) -> i64 {
        self.reorder.applied()
    }

    pub fn metadata_version(&self) -> Option<i64> {
        self.metadata_version
    }

    fn reduce(&mut self, events: &[SessionEvent]) {
        self.state = reducer::apply(
            &self.state,
            ReducerInput {
                events,
                local: self.queue.snapshot(),
                discarded: &self.discarded,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use session_protocol::{EventId, EventMeta};
    use std::sync::Mutex;

    use crate::queue::LocalStatus;
    use crate::reducer::EntryRole;

    fn event(
        session_id: SessionId,
        seq: i64,
        real_id: Option<&str>,
        content: Value,
    ) -> SessionEvent {
        SessionEvent {
            id: EventId::new(),
            session_id,
            real_id: real_id.map(LocalId::from),
            seq,
            content,
            meta: EventMeta::default(),
            created_at: Utc::now(),
        }
    }

    fn confirm(session_id: SessionId, seq: i64, request: &SubmitEventRequest) -> SessionEvent {
        event(
            session_id,
            seq,
            request.real_id.as_ref().map(LocalId::as_str),
            request.content.clone(),
        )
    }

    /// Serves a fixed log and records submissions.
    struct FakeTransport {
        log: Vec<SessionEvent>,
        submitted: Mutex<Vec<SubmitEventRequest>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn submit(
            &self,
            _session_id: SessionId,
            request: &SubmitEventRequest,
        ) -> Result<SubmitReceipt> {
            self.submitted.lock().unwrap().push(request.clone());
            Ok(SubmitReceipt {
                id: EventId::new(),
                seq: 1,
                duplicate: false,
            })
        }

        async fn events_after(
            &self,
            _session_id: SessionId,
            after_seq: i64,
            limit: Option<i64>,
        ) -> Result<EventsPage> {
            let limit = limit.unwrap_or(100) as usize;
            let rest: Vec<_> = self.log.iter().filter(|e| e.seq > after_seq).cloned().collect();
            Ok(EventsPage {
                has_more: rest.len() > limit,
                events: rest.into_iter().take(limit).collect(),
            })
        }
    }

    /// Never answers.
    struct StalledTransport;

    #[async_trait]
    impl Transport for StalledTransport {
        async fn submit(&self, _: SessionId, _: &SubmitEventRequest) -> Result<SubmitReceipt> {
            std::future::pending().await
        }

        async fn events_after(&self, _: SessionId, _: i64, _: Option<i64>) -> Result<EventsPage> {
            std::future::pending().await
        }
    }

    #[test]
    fn sent_message_is_visible_until_confirmed() {
        let session_id = SessionId::new();
        let mut sync = SessionSync::new(session_id);

        let request = sync.send(json!({"role": "user", "text": "hello"}));
        let local_id = request.real_id.clone().unwrap();
        let transcript = sync.transcript();
        assert_eq!(transcript.len(), 1);
        assert!(transcript[0].is_pending());
        assert_eq!(transcript[0].id, EntryId::Local(local_id.clone()));

        sync.receive([confirm(session_id, 1, &request)]);

        let transcript = sync.transcript();
        assert_eq!(transcript.len(), 1);
        assert!(!transcript[0].is_pending());
        assert_eq!(transcript[0].text.as_deref(), Some("hello"));
        assert!(sync.pending().is_empty());
        assert_eq!(sync.queue().status(&local_id), Some(LocalStatus::Confirmed));
    }

    #[test]
    fn event_role_renders_as_one_agent_entry() {
        let session_id = SessionId::new();
        let mut sync = SessionSync::new(session_id);
        let payload = json!({"type": "switch", "mode": "local"});

        let request = sync.send_message(LocalMessage::new(
            LocalId::from("m1"),
            json!({"role": "event", "payload": payload.clone()}),
        ));
        sync.receive([confirm(session_id, 1, &request)]);

        let transcript = sync.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].role, EntryRole::Agent);
        assert_eq!(transcript[0].event, Some(payload));
        assert_eq!(transcript[0].text, None);
        assert_eq!(transcript[0].tool, None);
    }

    #[test]
    fn out_of_order_delivery_waits_for_the_gap() {
        let session_id = SessionId::new();
        let mut sync = SessionSync::new(session_id);
        let text = |seq: i64| json!({"role": "user", "text": seq.to_string()});

        let changed = sync.receive([
            event(session_id, 2, None, text(2)),
            event(session_id, 3, None, text(3)),
        ]);
        assert!(changed.is_empty());
        assert!(sync.transcript().is_empty());
        assert_eq!(sync.missing(), Some(SequenceRange { start: 1, count: 1 }));

        let changed = sync.receive([event(session_id, 1, None, text(1))]);
        assert_eq!(changed.len(), 3);
        let order: Vec<_> = sync.transcript().iter().map(|e| e.text.clone().unwrap()).collect();
        assert_eq!(order, ["1", "2", "3"]);
        assert_eq!(sync.applied_seq(), 3);
    }

    #[test]
    fn redelivered_events_change_nothing() {
        let session_id = SessionId::new();
        let mut sync = SessionSync::new(session_id);
        let first = event(session_id, 1, None, json!({"role": "user", "text": "x"}));

        sync.receive([first.clone()]);
        let before = sync.state().clone();
        let changed = sync.receive([first]);

        assert!(changed.is_empty());
        assert_eq!(sync.state().messages, before.messages);
    }

    #[test]
    fn events_for_other_sessions_are_ignored() {
        let mut sync = SessionSync::new(SessionId::new());
        sync.receive([event(SessionId::new(), 1, None, json!({"role": "user", "text": "x"}))]);
        assert!(sync.transcript().is_empty());
        assert_eq!(sync.applied_seq(), SEQ_FLOOR);
    }

    #[test]
    fn committed_discard_hides_a_confirmed_message() {
        let session_id = SessionId::new();
        let mut sync = SessionSync::new(session_id);
        let request = sync.send_message(LocalMessage::new(
            LocalId::from("m1"),
            json!({"role": "user", "text": "superseded"}),
        ));
        sync.receive([confirm(session_id, 1, &request)]);
        assert_eq!(sync.transcript().len(), 1);

        let mut doc = SessionMetadata::new(session_id, json!({}));
        doc.metadata_version = 1;
        doc.discarded_committed_message_local_ids.insert(LocalId::from("m1"));
        assert!(sync.apply_metadata(&doc));
        assert!(sync.transcript().is_empty());

        // A later pass with new events must not bring it back
        sync.receive([event(session_id, 2, None, json!({"role": "user", "text": "next"}))]);
        let texts: Vec<_> = sync.transcript().iter().map(|e| e.text.clone().unwrap()).collect();
        assert_eq!(texts, ["next"]);
    }

    #[test]
    fn stale_metadata_is_ignored() {
        let session_id = SessionId::new();
        let mut sync = SessionSync::new(session_id);

        let mut newer = SessionMetadata::new(session_id, json!({}));
        newer.metadata_version = 2;
        assert!(sync.apply_metadata(&newer));

        let mut older = SessionMetadata::new(session_id, json!({}));
        older.metadata_version = 1;
        older.discarded_committed_message_local_ids.insert(LocalId::from("m1"));
        assert!(!sync.apply_metadata(&older));
        assert_eq!(sync.metadata_version(), Some(2));
    }

    #[test]
    fn metadata_update_discards_pending_local_messages() {
        let session_id = SessionId::new();
        let mut sync = SessionSync::new(session_id);
        let draft = json!({"role": "user", "text": "draft"});
        sync.send_message(LocalMessage::new(LocalId::from("m1"), draft));

        let update = UpdateEnvelope {
            id: session_protocol::UpdateId::new(),
            seq: 4,
            body: UpdateBody::UpdateMetadata {
                session_id,
                metadata_version: 1,
                discarded_committed_message_local_ids: [LocalId::from("m1")].into(),
            },
            created_at: Utc::now(),
        };
        let changed = sync.apply_update(update);

        assert_eq!(changed.len(), 1);
        assert!(sync.pending().is_empty());
        assert!(sync.transcript().is_empty());
    }

    #[test]
    fn discard_local_removes_a_pending_entry() {
        let mut sync = SessionSync::new(SessionId::new());
        let request = sync.send(json!({"role": "user", "text": "oops"}));
        let local_id = request.real_id.unwrap();

        assert!(sync.discard_local(&local_id));
        assert!(sync.transcript().is_empty());
        assert!(!sync.discard_local(&local_id));
    }

    #[tokio::test]
    async fn cancelled_submission_keeps_the_entry_pending() {
        let mut sync = SessionSync::new(SessionId::new());
        let request = sync.send(json!({"role": "user", "text": "slow"}));
        let token = CancellationToken::new();
        token.cancel();

        let result = sync
            .submit_cancellable(&StalledTransport, &request, &token)
            .await;

        assert!(matches!(result, Err(ClientError::Cancelled)));
        assert_eq!(sync.pending().len(), 1);
        assert!(sync.transcript()[0].is_pending());
    }

    #[tokio::test]
    async fn submission_goes_through_the_transport() {
        let sync = SessionSync::new(SessionId::new());
        let transport = FakeTransport {
            log: Vec::new(),
            submitted: Mutex::new(Vec::new()),
        };
        let request = SubmitEventRequest {
            real_id: Some(LocalId::from("m1")),
            content: json!({"role": "user", "text": "hi"}),
            meta: EventMeta::default(),
            created_at: None,
        };

        let receipt = sync
            .submit_cancellable(&transport, &request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(receipt.seq, 1);
        assert_eq!(*transport.submitted.lock().unwrap(), vec![request]);
    }

    #[tokio::test]
    async fn catch_up_pages_through_the_log() {
        let session_id = SessionId::new();
        let log: Vec<_> = (1..=250)
            .map(|seq| {
                let content = json!({"role": "user", "text": seq.to_string()});
                event(session_id, seq, None, content)
            })
            .collect();
        let transport = FakeTransport {
            log,
            submitted: Mutex::new(Vec::new()),
        };
        let mut sync = SessionSync::new(session_id);

        let fetched = sync.catch_up(&transport).await.unwrap();

        assert_eq!(fetched, 250);
        assert_eq!(sync.applied_seq(), 250);
        assert_eq!(sync.transcript().len(), 250);
    }
}
