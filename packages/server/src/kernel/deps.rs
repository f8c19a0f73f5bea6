//! Server dependencies shared by every domain operation.
//!
//! Storage and notification go through the kernel traits so the same
//! domain code runs against Postgres in production and [`MemoryStorage`]
//! in tests.
//!
//! [`MemoryStorage`]: super::memory::MemoryStorage

use std::sync::Arc;

use session_protocol::{AccountId, UpdateEnvelope};

use super::stream_hub::StreamHub;
use super::traits::{BaseSessionStore, BaseUpdateNotifier};
use super::transaction::{AfterCommit, RetryPolicy, TransactionCoordinator};

pub struct ServerDeps<S: BaseSessionStore> {
    pub storage: Arc<S>,
    pub coordinator: TransactionCoordinator<S>,
    /// In-process pub/sub hub feeding the SSE endpoints
    pub stream_hub: StreamHub,
    notifiers: Vec<Arc<dyn BaseUpdateNotifier>>,
}

impl<S: BaseSessionStore> Clone for ServerDeps<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            coordinator: self.coordinator.clone(),
            stream_hub: self.stream_hub.clone(),
            notifiers: self.notifiers.clone(),
        }
    }
}

impl<S: BaseSessionStore> ServerDeps<S> {
    /// The hub is always registered as the first notifier.
    pub fn new(storage: Arc<S>, policy: RetryPolicy, stream_hub: StreamHub) -> Self {
        let coordinator = TransactionCoordinator::new(storage.clone(), policy);
        let hub_notifier: Arc<dyn BaseUpdateNotifier> = Arc::new(stream_hub.clone());
        Self {
            storage,
            coordinator,
            stream_hub,
            notifiers: vec![hub_notifier],
        }
    }

    /// Adds another post-commit notifier (push gateway, audit sink, ...).
    pub fn with_notifier(mut self, notifier: Arc<dyn BaseUpdateNotifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    /// Schedules delivery of `updates` to every notifier once the current
    /// transaction commits. Each notifier is its own effect, so one failing
    /// subscriber does not starve the others.
    pub fn stage_updates(
        &self,
        after_commit: &mut AfterCommit,
        account_id: AccountId,
        updates: Vec<UpdateEnvelope>,
    ) {
        if updates.is_empty() {
            return;
        }
        let updates = Arc::new(updates);
        for notifier in &self.notifiers {
            let notifier = notifier.clone();
            let updates = updates.clone();
            after_commit.push("notify-update", move || async move {
                for update in updates.iter() {
                    notifier.notify(account_id, update).await?;
                }
                Ok(())
            });
        }
    }
}
