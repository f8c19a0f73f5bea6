//! Event submission and paging.
//!
//! A submission is validated before any transaction is opened, then
//! deduplicated, sequenced, persisted and announced in one coordinated
//! transaction. The `new-event` update is published only after commit.

use std::sync::Arc;

use chrono::Utc;
use session_protocol::{
    EventContent, EventId, EventsPage, ProtocolError, ScopeKey, SessionEvent, SessionId,
    SubmitEventRequest, SubmitReceipt, UpdateBody,
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::domains::sequencing::{allocate_next_in, next_update, AllocationError};
use crate::kernel::{
    AfterCommit, BaseSessionStore, Outcome, ServerDeps, StoreError, TransactionFailure,
};

pub const DEFAULT_PAGE_LIMIT: i64 = 100;
pub const MAX_PAGE_LIMIT: i64 = 500;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("malformed event: {0}")]
    MalformedEvent(#[source] ProtocolError),

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("submission conflicted on all {attempts} attempts; try again")]
    ConflictExhausted {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SubmitError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::ConflictExhausted { .. })
    }
}

impl TransactionFailure for SubmitError {
    fn is_serialization_conflict(&self) -> bool {
        matches!(self, SubmitError::Store(err) if err.is_serialization_conflict())
    }

    fn exhausted(attempts: u32, last: Self) -> Self {
        match last {
            SubmitError::Store(source) => SubmitError::ConflictExhausted { attempts, source },
            other => other,
        }
    }
}

impl From<AllocationError> for SubmitError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::ScopeNotFound(ScopeKey::Session(id)) => {
                SubmitError::SessionNotFound(id)
            }
            AllocationError::ConflictExhausted { attempts, source } => {
                SubmitError::ConflictExhausted { attempts, source }
            }
            AllocationError::Store(err) => SubmitError::Store(err),
            other => SubmitError::Store(StoreError::Constraint(other.to_string())),
        }
    }
}

/// Persists one event, or returns the receipt of the event already stored
/// under the same `real_id`.
#[instrument(skip(deps, request), fields(real_id = ?request.real_id))]
pub async fn submit_event<S: BaseSessionStore>(
    deps: &ServerDeps<S>,
    session_id: SessionId,
    request: SubmitEventRequest,
) -> Result<SubmitReceipt, SubmitError> {
    let content = EventContent::decode(&request.content).map_err(|err| {
        warn!(session_id = %session_id, error = %err, "rejecting malformed event");
        SubmitError::MalformedEvent(err)
    })?;
    let role = content.role_name();
    let created_at = request.created_at.unwrap_or_else(Utc::now);
    let request = Arc::new(request);
    let shared = deps.clone();

    let receipt = deps
        .coordinator
        .run::<_, SubmitError, _>(move |tx| {
            let deps = shared.clone();
            let request = request.clone();
            Box::pin(async move {
                let storage = deps.storage.as_ref();
                let account_id = storage
                    .session_owner(tx, session_id)
                    .await?
                    .ok_or(SubmitError::SessionNotFound(session_id))?;

                if let Some(real_id) = &request.real_id {
                    if let Some(existing) = storage
                        .find_event_by_real_id(tx, session_id, real_id)
                        .await?
                    {
                        return Ok(Outcome::new(SubmitReceipt {
                            id: existing.id,
                            seq: existing.seq,
                            duplicate: true,
                        }));
                    }
                }

                let seq = allocate_next_in(storage, tx, ScopeKey::Session(session_id)).await?;
                let event = SessionEvent {
                    id: EventId::new(),
                    session_id,
                    real_id: request.real_id.clone(),
                    seq,
                    content: request.content.clone(),
                    meta: request.meta.clone(),
                    created_at,
                };
                storage.insert_event(tx, &event).await?;

                let receipt = SubmitReceipt {
                    id: event.id,
                    seq,
                    duplicate: false,
                };
                let update = next_update(
                    storage,
                    tx,
                    account_id,
                    UpdateBody::NewEvent { session_id, event },
                    Utc::now(),
                )
                .await?;

                let mut after_commit = AfterCommit::new();
                deps.stage_updates(&mut after_commit, account_id, vec![update]);
                Ok(Outcome::with_after_commit(receipt, after_commit))
            })
        })
        .await?;

    if receipt.duplicate {
        debug!(
            session_id = %session_id,
            seq = receipt.seq,
            "duplicate submission, returning original receipt"
        );
    } else {
        info!(session_id = %session_id, seq = receipt.seq, role, "event persisted");
    }
    Ok(receipt)
}

/// Clamps a requested page size to `1..=MAX_PAGE_LIMIT`.
pub fn page_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

/// Events with `seq > after_seq` in ascending order.
pub async fn events_after<S: BaseSessionStore>(
    deps: &ServerDeps<S>,
    session_id: SessionId,
    after_seq: i64,
    limit: Option<i64>,
) -> Result<EventsPage, SubmitError> {
    let limit = page_limit(limit);
    let storage = deps.storage.clone();

    deps.coordinator
        .run(move |tx| {
            let storage = storage.clone();
            Box::pin(async move {
                storage
                    .session_owner(tx, session_id)
                    .await?
                    .ok_or(SubmitError::SessionNotFound(session_id))?;

                // One extra row tells whether another page follows.
                let mut events = storage
                    .events_after(tx, session_id, after_seq, limit + 1)
                    .await?;
                let has_more = events.len() as i64 > limit;
                events.truncate(limit as usize);
                Ok(Outcome::new(EventsPage { events, has_more }))
            })
        })
        .await
}
