//! In-memory session store for tests and local development.
//!
//! Transactions work on a private snapshot of the whole state and validate
//! at commit time: if any other writing transaction committed since the
//! snapshot was taken, the commit fails with a serialization conflict
//! (first committer wins). That gives serializable semantics with the same
//! failure mode the Postgres store produces, so the coordinator's retry path
//! is exercised for real.
//!
//! Counters here live only as long as the process; production uses
//! [`PgSessionStore`](super::postgres::PgSessionStore).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use session_protocol::{
    AccountId, LocalId, ScopeKey, SessionEvent, SessionId, SessionMetadata, SEQ_FLOOR,
};
use tokio::sync::Mutex;

use super::error::StoreError;
use super::traits::BaseSessionStore;

#[derive(Debug, Clone)]
struct AccountRow {
    seq: i64,
}

#[derive(Debug, Clone)]
struct SessionRow {
    account_id: AccountId,
    seq: i64,
    metadata: SessionMetadata,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    accounts: HashMap<AccountId, AccountRow>,
    sessions: HashMap<SessionId, SessionRow>,
    /// Per-session log, kept sorted by `seq`.
    events: HashMap<SessionId, Vec<SessionEvent>>,
}

#[derive(Debug, Default)]
struct Committed {
    version: u64,
    state: MemoryState,
}

/// Snapshot-isolated transaction handle.
#[derive(Debug)]
pub struct MemoryTransaction {
    base_version: u64,
    state: MemoryState,
    dirty: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    committed: Arc<Mutex<Committed>>,
    injected_conflicts: Arc<AtomicU32>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with a serialization conflict.
    pub fn inject_commit_conflicts(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BaseSessionStore for MemoryStorage {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        let committed = self.committed.lock().await;
        Ok(MemoryTransaction {
            base_version: committed.version,
            state: committed.state.clone(),
            dirty: false,
        })
    }

    async fn commit(&self, tx: Self::Transaction) -> Result<(), StoreError> {
        if self.take_injected_conflict() {
            return Err(StoreError::conflict());
        }
        if !tx.dirty {
            return Ok(());
        }

        let mut committed = self.committed.lock().await;
        if committed.version != tx.base_version {
            return Err(StoreError::conflict());
        }
        committed.state = tx.state;
        committed.version += 1;
        Ok(())
    }

    async fn rollback(&self, _tx: Self::Transaction) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_account(
        &self,
        tx: &mut Self::Transaction,
        id: AccountId,
        _now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if tx.state.accounts.contains_key(&id) {
            return Err(StoreError::Constraint(format!("account {} exists", id)));
        }
        tx.state.accounts.insert(id, AccountRow { seq: SEQ_FLOOR });
        tx.dirty = true;
        Ok(())
    }

    async fn insert_session(
        &self,
        tx: &mut Self::Transaction,
        account_id: AccountId,
        metadata: &SessionMetadata,
        _now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !tx.state.accounts.contains_key(&account_id) {
            return Err(StoreError::Constraint(format!(
                "account {} does not exist",
                account_id
            )));
        }
        if tx.state.sessions.contains_key(&metadata.session_id) {
            return Err(StoreError::Constraint(format!(
                "session {} exists",
                metadata.session_id
            )));
        }
        tx.state.sessions.insert(
            metadata.session_id,
            SessionRow {
                account_id,
                seq: SEQ_FLOOR,
                metadata: metadata.clone(),
            },
        );
        tx.dirty = true;
        Ok(())
    }

    async fn session_owner(
        &self,
        tx: &mut Self::Transaction,
        session_id: SessionId,
    ) -> Result<Option<AccountId>, StoreError> {
        Ok(tx.state.sessions.get(&session_id).map(|row| row.account_id))
    }

    async fn increment_counter(
        &self,
        tx: &mut Self::Transaction,
        scope: ScopeKey,
        by: i64,
    ) -> Result<Option<i64>, StoreError> {
        let seq = match scope {
            ScopeKey::Account(id) => tx.state.accounts.get_mut(&id).map(|row| &mut row.seq),
            ScopeKey::Session(id) => tx.state.sessions.get_mut(&id).map(|row| &mut row.seq),
        };
        let Some(seq) = seq else {
            return Ok(None);
        };
        let value = seq
            .checked_add(by)
            .ok_or_else(|| StoreError::CounterOverflow(format!("{scope} at {seq} + {by}")))?;
        *seq = value;
        tx.dirty = true;
        Ok(Some(value))
    }

    async fn read_counter(
        &self,
        tx: &mut Self::Transaction,
        scope: ScopeKey,
    ) -> Result<Option<i64>, StoreError> {
        Ok(match scope {
            ScopeKey::Account(id) => tx.state.accounts.get(&id).map(|row| row.seq),
            ScopeKey::Session(id) => tx.state.sessions.get(&id).map(|row| row.seq),
        })
    }

    async fn find_event_by_real_id(
        &self,
        tx: &mut Self::Transaction,
        session_id: SessionId,
        real_id: &LocalId,
    ) -> Result<Option<SessionEvent>, StoreError> {
        Ok(tx.state.events.get(&session_id).and_then(|log| {
            log.iter()
                .find(|event| event.real_id.as_ref() == Some(real_id))
                .cloned()
        }))
    }

    async fn insert_event(
        &self,
        tx: &mut Self::Transaction,
        event: &SessionEvent,
    ) -> Result<(), StoreError> {
        let log = tx.state.events.entry(event.session_id).or_default();
        if log.iter().any(|existing| existing.seq == event.seq) {
            return Err(StoreError::Constraint(format!(
                "seq {} already used in session {}",
                event.seq, event.session_id
            )));
        }
        if event.real_id.is_some() && log.iter().any(|existing| existing.real_id == event.real_id) {
            // Same failure class Postgres reports for the racing insert.
            return Err(StoreError::conflict());
        }
        let position = log.partition_point(|existing| existing.seq < event.seq);
        log.insert(position, event.clone());
        tx.dirty = true;
        Ok(())
    }

    async fn events_after(
        &self,
        tx: &mut Self::Transaction,
        session_id: SessionId,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<SessionEvent>, StoreError> {
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(tx
            .state
            .events
            .get(&session_id)
            .map(|log| {
                log.iter()
                    .filter(|event| event.seq > after_seq)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn load_metadata(
        &self,
        tx: &mut Self::Transaction,
        session_id: SessionId,
    ) -> Result<Option<SessionMetadata>, StoreError> {
        Ok(tx
            .state
            .sessions
            .get(&session_id)
            .map(|row| row.metadata.clone()))
    }

    async fn compare_and_store_metadata(
        &self,
        tx: &mut Self::Transaction,
        doc: &SessionMetadata,
        expected_version: i64,
    ) -> Result<bool, StoreError> {
        let Some(row) = tx.state.sessions.get_mut(&doc.session_id) else {
            return Ok(false);
        };
        if row.metadata.metadata_version != expected_version {
            return Ok(false);
        }
        row.metadata = doc.clone();
        tx.dirty = true;
        Ok(true)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seeded() -> (MemoryStorage, AccountId, SessionId) {
        let storage = MemoryStorage::new();
        let account = AccountId::new();
        let session = SessionId::new();
        let mut tx = storage.begin().await.unwrap();
        storage.insert_account(&mut tx, account, Utc::now()).await.unwrap();
        storage
            .insert_session(&mut tx, account, &SessionMetadata::new(session, json!({})), Utc::now())
            .await
            .unwrap();
        storage.commit(tx).await.unwrap();
        (storage, account, session)
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let (storage, _, session) = seeded().await;

        let mut writer = storage.begin().await.unwrap();
        storage
            .increment_counter(&mut writer, ScopeKey::Session(session), 5)
            .await
            .unwrap();

        let mut reader = storage.begin().await.unwrap();
        let seen = storage
            .read_counter(&mut reader, ScopeKey::Session(session))
            .await
            .unwrap();
        assert_eq!(seen, Some(SEQ_FLOOR));

        storage.rollback(writer).await.unwrap();
    }

    #[tokio::test]
    async fn counter_refuses_to_wrap() {
        let (storage, _, session) = seeded().await;
        let scope = ScopeKey::Session(session);

        let mut tx = storage.begin().await.unwrap();
        storage.increment_counter(&mut tx, scope, i64::MAX).await.unwrap();
        let err = storage.increment_counter(&mut tx, scope, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::CounterOverflow(_)));
        assert_eq!(storage.read_counter(&mut tx, scope).await.unwrap(), Some(i64::MAX));
        storage.rollback(tx).await.unwrap();
    }

    #[tokio::test]
    async fn second_concurrent_writer_conflicts() {
        let (storage, _, session) = seeded().await;
        let scope = ScopeKey::Session(session);

        let mut first = storage.begin().await.unwrap();
        let mut second = storage.begin().await.unwrap();
        storage.increment_counter(&mut first, scope, 1).await.unwrap();
        storage.increment_counter(&mut second, scope, 1).await.unwrap();

        storage.commit(first).await.unwrap();
        let err = storage.commit(second).await.unwrap_err();
        assert!(err.is_serialization_conflict());
    }

    #[tokio::test]
    async fn read_only_transactions_always_commit() {
        let (storage, _, session) = seeded().await;
        let scope = ScopeKey::Session(session);

        let mut reader = storage.begin().await.unwrap();
        let mut writer = storage.begin().await.unwrap();
        storage.increment_counter(&mut writer, scope, 1).await.unwrap();
        storage.commit(writer).await.unwrap();

        storage.read_counter(&mut reader, scope).await.unwrap();
        storage.commit(reader).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_scope_has_no_counter() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin().await.unwrap();
        let result = storage
            .increment_counter(&mut tx, ScopeKey::Account(AccountId::new()), 1)
            .await
            .unwrap();
        assert_eq!(result, None);
    }
}
