//! Postgres-backed session store.
//!
//! Scope counters are the `seq` columns of `accounts` and `sessions`.
//! Allocation is a single `UPDATE ... SET seq = seq + $n RETURNING seq`, so
//! the read-modify-write happens in one statement inside the caller's
//! SERIALIZABLE transaction. The event table is append-only (enforced by a
//! trigger, see `migrations/`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use session_protocol::{
    AccountId, EventContent, EventId, LocalId, ScopeKey, SessionEvent, SessionId,
    SessionMetadata,
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::error::StoreError;
use super::traits::BaseSessionStore;

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    session_id: Uuid,
    real_id: Option<String>,
    seq: i64,
    content: Value,
    meta: Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for SessionEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let meta = serde_json::from_value(row.meta)
            .map_err(|e| StoreError::Decode(format!("event {} meta: {}", row.id, e)))?;
        Ok(SessionEvent {
            id: EventId::from_uuid(row.id),
            session_id: SessionId::from_uuid(row.session_id),
            real_id: row.real_id.map(LocalId::from),
            seq: row.seq,
            content: row.content,
            meta,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MetadataRow {
    id: Uuid,
    metadata: Value,
    metadata_version: i64,
    discarded_committed_message_local_ids: Vec<String>,
}

impl From<MetadataRow> for SessionMetadata {
    fn from(row: MetadataRow) -> Self {
        SessionMetadata {
            session_id: SessionId::from_uuid(row.id),
            metadata_version: row.metadata_version,
            metadata: row.metadata,
            discarded_committed_message_local_ids: row
                .discarded_committed_message_local_ids
                .into_iter()
                .map(LocalId::from)
                .collect(),
        }
    }
}

fn counter_table(scope: &ScopeKey) -> &'static str {
    match scope {
        ScopeKey::Account(_) => "accounts",
        ScopeKey::Session(_) => "sessions",
    }
}

#[async_trait]
impl BaseSessionStore for PgSessionStore {
    type Transaction = Transaction<'static, Postgres>;

    // ========================================================================
    // TRANSACTION SUPPORT
    // ========================================================================

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn commit(&self, tx: Self::Transaction) -> Result<(), StoreError> {
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Transaction) -> Result<(), StoreError> {
        tx.rollback().await?;
        Ok(())
    }

    // ========================================================================
    // SCOPES
    // ========================================================================

    async fn insert_account(
        &self,
        tx: &mut Self::Transaction,
        id: AccountId,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO accounts (id, created_at, updated_at) VALUES ($1, $2, $2)")
            .bind(id)
            .bind(now)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn insert_session(
        &self,
        tx: &mut Self::Transaction,
        account_id: AccountId,
        metadata: &SessionMetadata,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let discarded: Vec<String> = metadata
            .discarded_committed_message_local_ids
            .iter()
            .map(|id| id.as_str().to_string())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, account_id, metadata, metadata_version,
                discarded_committed_message_local_ids, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(metadata.session_id)
        .bind(account_id)
        .bind(&metadata.metadata)
        .bind(metadata.metadata_version)
        .bind(discarded)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn session_owner(
        &self,
        tx: &mut Self::Transaction,
        session_id: SessionId,
    ) -> Result<Option<AccountId>, StoreError> {
        let owner =
            sqlx::query_scalar::<_, AccountId>("SELECT account_id FROM sessions WHERE id = $1")
                .bind(session_id)
                .fetch_optional(&mut **tx)
                .await?;
        Ok(owner)
    }

    async fn increment_counter(
        &self,
        tx: &mut Self::Transaction,
        scope: ScopeKey,
        by: i64,
    ) -> Result<Option<i64>, StoreError> {
        let sql = format!(
            "UPDATE {} SET seq = seq + $2, updated_at = NOW() WHERE id = $1 RETURNING seq",
            counter_table(&scope)
        );
        let end = sqlx::query_scalar::<_, i64>(&sql)
            .bind(scope.uuid())
            .bind(by)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(end)
    }

    async fn read_counter(
        &self,
        tx: &mut Self::Transaction,
        scope: ScopeKey,
    ) -> Result<Option<i64>, StoreError> {
        let sql = format!("SELECT seq FROM {} WHERE id = $1", counter_table(&scope));
        let current = sqlx::query_scalar::<_, i64>(&sql)
            .bind(scope.uuid())
            .fetch_optional(&mut **tx)
            .await?;
        Ok(current)
    }

    // ========================================================================
    // EVENTS
    // ========================================================================

    async fn find_event_by_real_id(
        &self,
        tx: &mut Self::Transaction,
        session_id: SessionId,
        real_id: &LocalId,
    ) -> Result<Option<SessionEvent>, StoreError> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, session_id, real_id, seq, content, meta, created_at
            FROM session_events
            WHERE session_id = $1 AND real_id = $2
            "#,
        )
        .bind(session_id)
        .bind(real_id.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        row.map(SessionEvent::try_from).transpose()
    }

    async fn insert_event(
        &self,
        tx: &mut Self::Transaction,
        event: &SessionEvent,
    ) -> Result<(), StoreError> {
        let role = EventContent::decode(&event.content)
            .map(|content| content.role_name())
            .unwrap_or("unknown");
        let meta = serde_json::to_value(&event.meta)
            .map_err(|e| StoreError::Decode(format!("event {} meta: {}", event.id, e)))?;

        sqlx::query(
            r#"
            INSERT INTO session_events
                (id, session_id, real_id, seq, role, content, meta, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(event.session_id)
        .bind(event.real_id.as_ref().map(LocalId::as_str))
        .bind(event.seq)
        .bind(role)
        .bind(&event.content)
        .bind(meta)
        .bind(event.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn events_after(
        &self,
        tx: &mut Self::Transaction,
        session_id: SessionId,
        after_seq: i64,
        limit: i64,
    ) -> Result<Vec<SessionEvent>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            SELECT id, session_id, real_id, seq, content, meta, created_at
            FROM session_events
            WHERE session_id = $1 AND seq > $2
            ORDER BY seq ASC
            LIMIT $3
            "#,
        )
        .bind(session_id)
        .bind(after_seq)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter().map(SessionEvent::try_from).collect()
    }

    // ========================================================================
    // METADATA
    // ========================================================================

    async fn load_metadata(
        &self,
        tx: &mut Self::Transaction,
        session_id: SessionId,
    ) -> Result<Option<SessionMetadata>, StoreError> {
        let row = sqlx::query_as::<_, MetadataRow>(
            r#"
            SELECT id, metadata, metadata_version, discarded_committed_message_local_ids
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(SessionMetadata::from))
    }

    async fn compare_and_store_metadata(
        &self,
        tx: &mut Self::Transaction,
        doc: &SessionMetadata,
        expected_version: i64,
    ) -> Result<bool, StoreError> {
        let discarded: Vec<String> = doc
            .discarded_committed_message_local_ids
            .iter()
            .map(|id| id.as_str().to_string())
            .collect();

        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET metadata = $2,
                metadata_version = $3,
                discarded_committed_message_local_ids = $4,
                updated_at = NOW()
            WHERE id = $1 AND metadata_version = $5
            "#,
        )
        .bind(doc.session_id)
        .bind(&doc.metadata)
        .bind(doc.metadata_version)
        .bind(discarded)
        .bind(expected_version)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
