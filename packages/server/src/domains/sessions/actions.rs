//! Account and session creation.
//!
//! Scopes are only ever created here. Allocation against an id that was not
//! created through these actions fails with "scope not found".

use chrono::Utc;
use serde_json::Value;
use session_protocol::{
    AccountId, ScopeKey, SessionCreated, SessionId, SessionMetadata, SEQ_FLOOR,
};
use thiserror::Error;
use tracing::{info, instrument};

use crate::kernel::{BaseSessionStore, Outcome, ServerDeps, StoreError, TransactionFailure};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("session creation conflicted on all {attempts} attempts; try again")]
    ConflictExhausted {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::ConflictExhausted { .. })
    }
}

impl TransactionFailure for SessionError {
    fn is_serialization_conflict(&self) -> bool {
        matches!(self, SessionError::Store(err) if err.is_serialization_conflict())
    }

    fn exhausted(attempts: u32, last: Self) -> Self {
        match last {
            SessionError::Store(source) => SessionError::ConflictExhausted { attempts, source },
            other => other,
        }
    }
}

/// Creates an account whose update counter starts at the floor.
#[instrument(skip(deps))]
pub async fn create_account<S: BaseSessionStore>(
    deps: &ServerDeps<S>,
) -> Result<AccountId, SessionError> {
    let account_id = AccountId::new();
    let storage = deps.storage.clone();
    deps.coordinator
        .run::<_, SessionError, _>(move |tx| {
            let storage = storage.clone();
            Box::pin(async move {
                storage.insert_account(tx, account_id, Utc::now()).await?;
                Ok(Outcome::new(()))
            })
        })
        .await?;

    info!(account_id = %account_id, "account created");
    Ok(account_id)
}

/// Creates a session under `account_id` with an empty event log and the
/// initial metadata version.
#[instrument(skip(deps, metadata))]
pub async fn create_session<S: BaseSessionStore>(
    deps: &ServerDeps<S>,
    account_id: AccountId,
    metadata: Value,
) -> Result<SessionCreated, SessionError> {
    let session_id = SessionId::new();
    let document = SessionMetadata::new(session_id, metadata);
    let metadata_version = document.metadata_version;
    let storage = deps.storage.clone();

    deps.coordinator
        .run::<_, SessionError, _>(move |tx| {
            let storage = storage.clone();
            let document = document.clone();
            Box::pin(async move {
                storage
                    .read_counter(tx, ScopeKey::Account(account_id))
                    .await?
                    .ok_or(SessionError::AccountNotFound(account_id))?;
                storage
                    .insert_session(tx, account_id, &document, Utc::now())
                    .await?;
                Ok(Outcome::new(()))
            })
        })
        .await?;

    info!(account_id = %account_id, session_id = %session_id, "session created");
    Ok(SessionCreated {
        id: session_id,
        account_id,
        seq: SEQ_FLOOR,
        metadata_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    use crate::kernel::{MemoryStorage, RetryPolicy, StreamHub};

    fn deps() -> ServerDeps<MemoryStorage> {
        ServerDeps::new(
            Arc::new(MemoryStorage::new()),
            RetryPolicy::immediate(),
            StreamHub::new(),
        )
    }

    #[tokio::test]
    async fn new_session_starts_at_the_floor() {
        let deps = deps();
        let account = create_account(&deps).await.unwrap();
        let created = create_session(&deps, account, json!({"title": "fix tests"}))
            .await
            .unwrap();

        assert_eq!(created.account_id, account);
        assert_eq!(created.seq, SEQ_FLOOR);
        assert_eq!(created.metadata_version, 0);

        let mut tx = deps.storage.begin().await.unwrap();
        let owner = deps.storage.session_owner(&mut tx, created.id).await.unwrap();
        assert_eq!(owner, Some(account));
        let doc = deps.storage.load_metadata(&mut tx, created.id).await.unwrap().unwrap();
        assert_eq!(doc.metadata, json!({"title": "fix tests"}));
    }

    #[tokio::test]
    async fn sessions_need_an_existing_account() {
        let deps = deps();
        let missing = AccountId::new();
        let err = create_session(&deps, missing, json!({})).await.unwrap_err();
        assert!(matches!(err, SessionError::AccountNotFound(id) if id == missing));
    }
}
