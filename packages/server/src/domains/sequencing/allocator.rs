//! Per-scope sequence allocation.
//!
//! A scope counter is advanced by exactly one increment-and-read inside a
//! serializable transaction; the allocated range is `[end - count + 1, end]`.
//! Concurrent allocators on one scope either serialize through the database
//! or conflict and rerun, so ranges never overlap and their union is gapless.

use session_protocol::{ScopeKey, SequenceRange};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::kernel::{
    BaseSessionStore, Outcome, StoreError, TransactionCoordinator, TransactionFailure,
};

/// Largest range a single call may allocate.
pub const MAX_BATCH_SIZE: i64 = 10_000;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("scope {0} not found")]
    ScopeNotFound(ScopeKey),

    #[error("batch of {count} exceeds the maximum of {MAX_BATCH_SIZE}")]
    BatchTooLarge { count: i64 },

    #[error("allocation conflicted on all {attempts} attempts; try again")]
    ConflictExhausted {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AllocationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, AllocationError::ConflictExhausted { .. })
    }
}

impl TransactionFailure for AllocationError {
    fn is_serialization_conflict(&self) -> bool {
        matches!(self, AllocationError::Store(err) if err.is_serialization_conflict())
    }

    fn exhausted(attempts: u32, last: Self) -> Self {
        match last {
            AllocationError::Store(source) => {
                AllocationError::ConflictExhausted { attempts, source }
            }
            other => other,
        }
    }
}

/// Allocates `count` numbers from `scope` inside an enclosing transaction.
///
/// `count <= 0` reads the counter and returns the empty range positioned
/// after it; the counter is not written. `count` above [`MAX_BATCH_SIZE`] is
/// rejected before the counter is touched.
pub async fn allocate_batch_in<S: BaseSessionStore>(
    storage: &S,
    tx: &mut S::Transaction,
    scope: ScopeKey,
    count: i64,
) -> Result<SequenceRange, AllocationError> {
    if count > MAX_BATCH_SIZE {
        return Err(AllocationError::BatchTooLarge { count });
    }
    if count <= 0 {
        let current = storage
            .read_counter(tx, scope)
            .await?
            .ok_or(AllocationError::ScopeNotFound(scope))?;
        return Ok(SequenceRange::empty_after(current));
    }

    let end = storage
        .increment_counter(tx, scope, count)
        .await?
        .ok_or(AllocationError::ScopeNotFound(scope))?;
    Ok(SequenceRange::ending_at(end, count))
}

/// Allocates a single number from `scope` inside an enclosing transaction.
pub async fn allocate_next_in<S: BaseSessionStore>(
    storage: &S,
    tx: &mut S::Transaction,
    scope: ScopeKey,
) -> Result<i64, AllocationError> {
    let range = allocate_batch_in(storage, tx, scope, 1).await?;
    Ok(range.start)
}

/// Standalone allocator: every call is its own coordinated transaction.
pub struct SequenceAllocator<S: BaseSessionStore> {
    coordinator: TransactionCoordinator<S>,
}

impl<S: BaseSessionStore> Clone for SequenceAllocator<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: BaseSessionStore> SequenceAllocator<S> {
    pub fn new(coordinator: TransactionCoordinator<S>) -> Self {
        Self { coordinator }
    }

    #[instrument(skip(self))]
    pub async fn allocate_next(&self, scope: ScopeKey) -> Result<i64, AllocationError> {
        let range = self.allocate_batch(scope, 1).await?;
        Ok(range.start)
    }

    #[instrument(skip(self))]
    pub async fn allocate_batch(
        &self,
        scope: ScopeKey,
        count: i64,
    ) -> Result<SequenceRange, AllocationError> {
        let storage = self.coordinator.storage().clone();
        let range = self
            .coordinator
            .run::<_, AllocationError, _>(move |tx| {
                let storage = storage.clone();
                Box::pin(async move {
                    let range = allocate_batch_in(storage.as_ref(), tx, scope, count).await?;
                    Ok(Outcome::new(range))
                })
            })
            .await?;

        debug!(start = range.start, count = range.count, "allocated sequence range");
        Ok(range)
    }

    /// Current counter value without allocating.
    pub async fn current(&self, scope: ScopeKey) -> Result<i64, AllocationError> {
        let storage = self.coordinator.storage().clone();
        self.coordinator
            .run(move |tx| {
                let storage = storage.clone();
                Box::pin(async move {
                    let current = storage
                        .read_counter(tx, scope)
                        .await?
                        .ok_or(AllocationError::ScopeNotFound(scope))?;
                    Ok(Outcome::new(current))
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::json;
    use session_protocol::{AccountId, SessionId, SessionMetadata, SEQ_FLOOR};

    use crate::kernel::{MemoryStorage, RetryPolicy};

    async fn session_scope(storage: &MemoryStorage) -> ScopeKey {
        let account = AccountId::new();
        let session = SessionId::new();
        let mut tx = storage.begin().await.unwrap();
        storage.insert_account(&mut tx, account, Utc::now()).await.unwrap();
        storage
            .insert_session(&mut tx, account, &SessionMetadata::new(session, json!({})), Utc::now())
            .await
            .unwrap();
        storage.commit(tx).await.unwrap();
        ScopeKey::Session(session)
    }

    fn allocator(
        storage: &Arc<MemoryStorage>,
        policy: RetryPolicy,
    ) -> SequenceAllocator<MemoryStorage> {
        SequenceAllocator::new(TransactionCoordinator::new(storage.clone(), policy))
    }

    #[tokio::test]
    async fn first_number_follows_the_floor() {
        let storage = Arc::new(MemoryStorage::new());
        let scope = session_scope(&storage).await;
        let allocator = allocator(&storage, RetryPolicy::immediate());

        assert_eq!(allocator.allocate_next(scope).await.unwrap(), SEQ_FLOOR + 1);
        assert_eq!(allocator.allocate_next(scope).await.unwrap(), SEQ_FLOOR + 2);
        assert_eq!(allocator.current(scope).await.unwrap(), SEQ_FLOOR + 2);
    }

    #[tokio::test]
    async fn empty_batch_leaves_the_counter_alone() {
        let storage = Arc::new(MemoryStorage::new());
        let scope = session_scope(&storage).await;
        let allocator = allocator(&storage, RetryPolicy::immediate());
        allocator.allocate_batch(scope, 4).await.unwrap();

        let empty = allocator.allocate_batch(scope, 0).await.unwrap();
        assert_eq!(empty, SequenceRange { start: 5, count: 0 });
        assert!(empty.is_empty());

        let negative = allocator.allocate_batch(scope, -3).await.unwrap();
        assert!(negative.is_empty());
        assert_eq!(allocator.current(scope).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn oversized_batches_are_rejected_without_advancing() {
        let storage = Arc::new(MemoryStorage::new());
        let scope = session_scope(&storage).await;
        let allocator = allocator(&storage, RetryPolicy::immediate());

        let err = allocator.allocate_batch(scope, i64::MAX).await.unwrap_err();
        assert!(matches!(err, AllocationError::BatchTooLarge { count: i64::MAX }));
        assert!(!err.is_retryable());

        let full = allocator.allocate_batch(scope, MAX_BATCH_SIZE).await.unwrap();
        assert_eq!(full, SequenceRange { start: 1, count: MAX_BATCH_SIZE });
        assert_eq!(allocator.allocate_next(scope).await.unwrap(), MAX_BATCH_SIZE + 1);
    }

    #[tokio::test]
    async fn exhausted_counter_reports_overflow() {
        let storage = Arc::new(MemoryStorage::new());
        let scope = session_scope(&storage).await;
        let mut tx = storage.begin().await.unwrap();
        storage.increment_counter(&mut tx, scope, i64::MAX - 1).await.unwrap();
        storage.commit(tx).await.unwrap();
        let allocator = allocator(&storage, RetryPolicy::immediate());

        assert_eq!(allocator.allocate_next(scope).await.unwrap(), i64::MAX);
        let err = allocator.allocate_next(scope).await.unwrap_err();
        assert!(matches!(err, AllocationError::Store(StoreError::CounterOverflow(_))));
        assert_eq!(allocator.current(scope).await.unwrap(), i64::MAX);
    }

    #[tokio::test]
    async fn unknown_scope_is_not_created_implicitly() {
        let storage = Arc::new(MemoryStorage::new());
        let allocator = allocator(&storage, RetryPolicy::immediate());
        let scope = ScopeKey::Session(SessionId::new());

        let err = allocator.allocate_next(scope).await.unwrap_err();
        assert!(matches!(err, AllocationError::ScopeNotFound(s) if s == scope));
    }

    #[tokio::test]
    async fn batches_from_five_land_back_to_back() {
        let storage = Arc::new(MemoryStorage::new());
        let scope = session_scope(&storage).await;
        let allocator = allocator(&storage, RetryPolicy::immediate());
        allocator.allocate_batch(scope, 5).await.unwrap();

        let (a, b) = tokio::join!(
            allocator.allocate_batch(scope, 3),
            allocator.allocate_batch(scope, 3)
        );
        let mut ranges = vec![a.unwrap(), b.unwrap()];
        ranges.sort_by_key(|r| r.start);

        assert_eq!(ranges[0], SequenceRange { start: 6, count: 3 });
        assert_eq!(ranges[1], SequenceRange { start: 9, count: 3 });
        assert_eq!(allocator.current(scope).await.unwrap(), 11);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_allocations_cover_the_counter_without_gaps() {
        let storage = Arc::new(MemoryStorage::new());
        let scope = session_scope(&storage).await;
        let allocator = allocator(&storage, RetryPolicy::immediate());

        let mut handles = Vec::new();
        for i in 0..16 {
            let allocator = allocator.clone();
            handles.push(tokio::spawn(async move {
                let count = (i % 3) + 1;
                // Callers resubmit when the coordinator gives up.
                loop {
                    match allocator.allocate_batch(scope, count).await {
                        Ok(range) => return range,
                        Err(err) if err.is_retryable() => tokio::task::yield_now().await,
                        Err(err) => panic!("unexpected allocation error: {err}"),
                    }
                }
            }));
        }

        let mut seen = BTreeSet::new();
        for handle in handles {
            let range = handle.await.unwrap();
            for seq in range.iter() {
                assert!(seen.insert(seq), "seq {seq} handed out twice");
            }
        }

        let current = allocator.current(scope).await.unwrap();
        let expected: BTreeSet<i64> = (SEQ_FLOOR + 1..=current).collect();
        assert_eq!(seen, expected);
    }
}
