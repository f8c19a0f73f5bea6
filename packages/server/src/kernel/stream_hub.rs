//! In-process pub/sub hub for committed updates.
//!
//! Every update is published twice: on its account topic (`account:<id>`)
//! and on its session topic (`session:<id>`). SSE endpoints subscribe to one
//! of those.
//!
//! # Usage
//!
//! Producers (post-commit effects):
//!   hub.notify(account_id, &envelope).await?;
//!
//! Consumers (SSE endpoints):
//!   let rx = hub.subscribe(&StreamHub::session_topic(session_id)).await;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use session_protocol::{AccountId, SessionId, UpdateEnvelope};
use tokio::sync::{broadcast, RwLock};

use super::traits::BaseUpdateNotifier;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Topic-keyed broadcast of [`UpdateEnvelope`]s.
///
/// Thread-safe, cloneable. A slow subscriber that falls more than
/// `capacity` updates behind sees a lag error and must resync by paging.
#[derive(Clone)]
pub struct StreamHub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<UpdateEnvelope>>>>,
    capacity: usize,
}

impl StreamHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    pub fn account_topic(account_id: AccountId) -> String {
        format!("account:{}", account_id)
    }

    pub fn session_topic(session_id: SessionId) -> String {
        format!("session:{}", session_id)
    }

    /// Publish to a topic. No-op if no subscribers.
    pub async fn publish(&self, topic: &str, update: UpdateEnvelope) {
        let channels = self.channels.read().await;
        if let Some(tx) = channels.get(topic) {
            // No active receivers is fine
            let _ = tx.send(update);
        }
    }

    /// Subscribe to a topic. Creates the channel if it doesn't exist.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<UpdateEnvelope> {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        tx.subscribe()
    }

    /// Remove channels with zero subscribers (housekeeping).
    pub async fn cleanup(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseUpdateNotifier for StreamHub {
    async fn notify(&self, account_id: AccountId, update: &UpdateEnvelope) -> anyhow::Result<()> {
        self.publish(&Self::account_topic(account_id), update.clone())
            .await;
        self.publish(&Self::session_topic(update.body.session_id()), update.clone())
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use session_protocol::{UpdateBody, UpdateId};
    use std::collections::BTreeSet;

    fn metadata_update(session_id: SessionId, seq: i64) -> UpdateEnvelope {
        UpdateEnvelope {
            id: UpdateId::new(),
            seq,
            body: UpdateBody::UpdateMetadata {
                session_id,
                metadata_version: 1,
                discarded_committed_message_local_ids: BTreeSet::new(),
            },
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_notify_reaches_account_and_session_topics() {
        let hub = StreamHub::new();
        let account = AccountId::new();
        let session = SessionId::new();
        let mut account_rx = hub.subscribe(&StreamHub::account_topic(account)).await;
        let mut session_rx = hub.subscribe(&StreamHub::session_topic(session)).await;

        let update = metadata_update(session, 1);
        hub.notify(account, &update).await.unwrap();

        assert_eq!(account_rx.recv().await.unwrap(), update);
        assert_eq!(session_rx.recv().await.unwrap(), update);
    }

    #[tokio::test]
    async fn test_other_sessions_do_not_see_the_update() {
        let hub = StreamHub::new();
        let mut other_rx = hub.subscribe(&StreamHub::session_topic(SessionId::new())).await;

        hub.notify(AccountId::new(), &metadata_update(SessionId::new(), 1))
            .await
            .unwrap();

        assert!(matches!(
            other_rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_publish_no_subscribers_is_noop() {
        let hub = StreamHub::new();
        hub.publish("nobody:listening", metadata_update(SessionId::new(), 1))
            .await;
    }

    #[tokio::test]
    async fn test_cleanup_removes_empty_channels() {
        let hub = StreamHub::new();
        let rx = hub.subscribe("ephemeral:topic").await;

        assert_eq!(hub.channels.read().await.len(), 1);

        drop(rx);
        hub.cleanup().await;

        assert_eq!(hub.channels.read().await.len(), 0);
    }
}
