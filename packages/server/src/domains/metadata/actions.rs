//! Compare-and-set writes to the per-session metadata document.
//!
//! Both writes check the caller's `expected_version` against the stored one.
//! A stale caller gets the current document back and nothing is written; a
//! current caller's write bumps the version by one and publishes an
//! `update-metadata` envelope after commit.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use session_protocol::{
    LocalId, MetadataWriteResult, ScopeKey, SessionId, SessionMetadata, UpdateBody,
};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::domains::sequencing::{next_update, AllocationError};
use crate::kernel::{
    AfterCommit, BaseSessionStore, Outcome, ServerDeps, StoreError, TransactionFailure,
};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("metadata write conflicted on all {attempts} attempts; try again")]
    ConflictExhausted {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MetadataError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, MetadataError::ConflictExhausted { .. })
    }
}

impl TransactionFailure for MetadataError {
    fn is_serialization_conflict(&self) -> bool {
        matches!(self, MetadataError::Store(err) if err.is_serialization_conflict())
    }

    fn exhausted(attempts: u32, last: Self) -> Self {
        match last {
            MetadataError::Store(source) => MetadataError::ConflictExhausted { attempts, source },
            other => other,
        }
    }
}

impl From<AllocationError> for MetadataError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::ScopeNotFound(ScopeKey::Session(id)) => {
                MetadataError::SessionNotFound(id)
            }
            AllocationError::ConflictExhausted { attempts, source } => {
                MetadataError::ConflictExhausted { attempts, source }
            }
            AllocationError::Store(err) => MetadataError::Store(err),
            other => MetadataError::Store(StoreError::Constraint(other.to_string())),
        }
    }
}

pub async fn get_metadata<S: BaseSessionStore>(
    deps: &ServerDeps<S>,
    session_id: SessionId,
) -> Result<SessionMetadata, MetadataError> {
    let storage = deps.storage.clone();
    deps.coordinator
        .run(move |tx| {
            let storage = storage.clone();
            Box::pin(async move {
                let doc = storage
                    .load_metadata(tx, session_id)
                    .await?
                    .ok_or(MetadataError::SessionNotFound(session_id))?;
                Ok(Outcome::new(doc))
            })
        })
        .await
}

/// Replaces the opaque metadata value.
#[instrument(skip(deps, metadata))]
pub async fn update_metadata<S: BaseSessionStore>(
    deps: &ServerDeps<S>,
    session_id: SessionId,
    expected_version: i64,
    metadata: Value,
) -> Result<MetadataWriteResult, MetadataError> {
    let metadata = Arc::new(metadata);
    write_metadata(deps, session_id, expected_version, move |doc| {
        doc.metadata = metadata.as_ref().clone();
    })
    .await
}

/// Adds `local_ids` to the committed-discard set. Ids already present are
/// kept once; nothing is ever removed from the set.
#[instrument(skip(deps, local_ids), fields(count = local_ids.len()))]
pub async fn discard_committed<S: BaseSessionStore>(
    deps: &ServerDeps<S>,
    session_id: SessionId,
    expected_version: i64,
    local_ids: Vec<LocalId>,
) -> Result<MetadataWriteResult, MetadataError> {
    let local_ids = Arc::new(local_ids);
    write_metadata(deps, session_id, expected_version, move |doc| {
        doc.discarded_committed_message_local_ids
            .extend(local_ids.iter().cloned());
    })
    .await
}

async fn write_metadata<S, F>(
    deps: &ServerDeps<S>,
    session_id: SessionId,
    expected_version: i64,
    mutate: F,
) -> Result<MetadataWriteResult, MetadataError>
where
    S: BaseSessionStore,
    F: Fn(&mut SessionMetadata) + Send + Sync + 'static,
{
    let mutate = Arc::new(mutate);
    let shared = deps.clone();

    let result = deps
        .coordinator
        .run::<_, MetadataError, _>(move |tx| {
            let deps = shared.clone();
            let mutate = mutate.clone();
            Box::pin(async move {
                let storage = deps.storage.as_ref();
                let current = storage
                    .load_metadata(tx, session_id)
                    .await?
                    .ok_or(MetadataError::SessionNotFound(session_id))?;

                if current.metadata_version != expected_version {
                    return Ok(Outcome::new(MetadataWriteResult::VersionMismatch {
                        version: current.metadata_version,
                        document: current,
                    }));
                }

                let mut next = current;
                mutate(&mut next);
                next.metadata_version = expected_version + 1;
                if !storage
                    .compare_and_store_metadata(tx, &next, expected_version)
                    .await?
                {
                    // Another writer slipped in; rerun against its version.
                    return Err(StoreError::conflict().into());
                }

                let account_id = storage
                    .session_owner(tx, session_id)
                    .await?
                    .ok_or(MetadataError::SessionNotFound(session_id))?;
                let update = next_update(
                    storage,
                    tx,
                    account_id,
                    UpdateBody::UpdateMetadata {
                        session_id,
                        metadata_version: next.metadata_version,
                        discarded_committed_message_local_ids: next
                            .discarded_committed_message_local_ids
                            .clone(),
                    },
                    Utc::now(),
                )
                .await?;

                let mut after_commit = AfterCommit::new();
                deps.stage_updates(&mut after_commit, account_id, vec![update]);
                Ok(Outcome::with_after_commit(
                    MetadataWriteResult::Success {
                        version: next.metadata_version,
                    },
                    after_commit,
                ))
            })
        })
        .await?;

    match &result {
        MetadataWriteResult::Success { version } => {
            info!(session_id = %session_id, version, "metadata updated");
        }
        MetadataWriteResult::VersionMismatch { version, .. } => {
            debug!(session_id = %session_id, expected_version, version, "stale metadata version");
        }
    }
    Ok(result)
}
