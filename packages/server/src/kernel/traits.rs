// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Sequencing, submission and metadata rules live in domains/ and drive
// storage through these traits.
//
// Naming convention: Base* for trait names (e.g., BaseSessionStore)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use session_protocol::{
    AccountId, LocalId, ScopeKey, SessionEvent, SessionId, SessionMetadata, UpdateEnvelope,
};

use super::error::StoreError;

// =============================================================================
// Storage Trait (Infrastructure - transactional persistence)
// =============================================================================

/// Transactional persistence for scopes, the event log and metadata.
///
/// Every operation runs against an explicit transaction handle. `begin` must
/// open the transaction at SERIALIZABLE isolation; the coordinator relies on
/// that to turn concurrent writers into serialization conflicts instead of
/// lost updates.
#[async_trait]
pub trait BaseSessionStore: Send + Sync + 'static {
    type Transaction: Send;

    // Transaction support
    async fn begin(&self) -> Result<Self::Transaction, StoreError>;
    async fn commit(&self, tx: Self::Transaction) -> Result<(), StoreError>;
    async fn rollback(&self, tx: Self::Transaction) -> Result<(), StoreError>;

    // Scopes
    async fn insert_account(
        &self,
        tx: &mut Self::Transaction,
        id: AccountId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Creates a session with its counter at the floor and its metadata
    /// document at the initial version.
    async fn insert_session(
        &self,
        tx: &mut Self::Transaction,
        account_id: AccountId,
        metadata: &SessionMetadata,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn session_owner(
        &self,
        tx: &mut Self::Transaction,
        session_id: SessionId,
    ) -> Result<Option<AccountId>, StoreError>;

    /// Adds `by` to the scope counter and returns the new value in one
    /// read-modify-write. `None` when the scope does not exist.
    async fn increment_counter(
        &self,
        tx: &mut Self::Transaction,
        scope: ScopeKey,
        by: i64,
    ) -> Result<Option<i64>, StoreError>;

    async fn read_counter(
        &self,
        tx: &mut Self::Transaction,
        scope: ScopeKey,
    ) -> Result<Option<i64>, StoreError>;

    // Events (append-only)
    async fn find_event_by_real_id(
        &self,
        tx: &mut Self::Transaction,
        session_id: SessionId,
        real_id: &LocalId,
    ) -> Result<Option<SessionEvent>, StoreError>;

    async fn insert_event(
        &self,
        tx: &mut Self::Transaction,
        event: &SessionEvent,
    ) -> Result<(), StoreError>;

    /// Events with `seq > after_seq`, ascending, at most `limit`.
    async fn events_after(
        &self,
        tx: &mut Self::Transaction,
        session_id: SessionId,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<SessionEvent>, StoreError>;

    // Metadata
    async fn load_metadata(
        &self,
        tx: &mut Self::Transaction,
        session_id: SessionId,
    ) -> Result<Option<SessionMetadata>, StoreError>;

    /// Writes `doc` only if the stored version still equals
    /// `expected_version`. Returns whether the write happened.
    async fn compare_and_store_metadata(
        &self,
        tx: &mut Self::Transaction,
        doc: &SessionMetadata,
        expected_version: i64,
    ) -> Result<bool, StoreError>;

    /// Cheap liveness check used by the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}

// =============================================================================
// Notification Trait (Infrastructure - post-commit fan-out)
// =============================================================================

/// Receives update envelopes after the write that produced them committed.
#[async_trait]
pub trait BaseUpdateNotifier: Send + Sync {
    async fn notify(&self, account_id: AccountId, update: &UpdateEnvelope) -> anyhow::Result<()>;
}
