// Audit log - immutable record of everything the engine did, plus live fan-out.
//
// Appending never fails from the caller's point of view: the entry is broadcast
// first, then persisted. If the store is down the entry waits in a bounded
// pending buffer until `flush_pending` gets it through. Log channel and webhook
// delivery run in their own task and never hold up the caller.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

use super::moderation_models::{
    DetectionLogEntry, GuildModerationConfig, ModerationEvent, TrustSnapshot,
};
use super::moderation_store::{DetectionLogStore, StoreError};

/// Live subscribers that fall further behind than this lose the oldest events.
pub const EVENT_BACKLOG: usize = 256;
const MAX_PENDING_ENTRIES: usize = 10_000;
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Outbound notifications for audit entries.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Post a human-readable summary to the guild's log channel.
    async fn post_summary(&self, channel_id: u64, entry: &DetectionLogEntry)
        -> Result<(), NotifyError>;

    /// Push the entry to an external webhook.
    async fn notify_webhook(&self, url: &str, entry: &DetectionLogEntry)
        -> Result<(), NotifyError>;
}

/// Where notifications for one entry should go.
#[derive(Debug, Clone, Default)]
pub struct NotifyRoute {
    pub log_channel_id: Option<u64>,
    pub webhook_url: Option<String>,
    /// Webhooks only fire for actions configured with `notify`.
    pub notify: bool,
}

impl NotifyRoute {
    pub fn from_config(config: &GuildModerationConfig) -> Self {
        Self {
            log_channel_id: config.log_channel_id,
            webhook_url: config.notify_webhook_url.clone(),
            notify: false,
        }
    }

    pub fn with_notify(mut self, notify: bool) -> Self {
        self.notify = notify;
        self
    }
}

pub struct AuditLog<S: DetectionLogStore, N: Notifier> {
    store: Arc<S>,
    notifier: Arc<N>,
    events: broadcast::Sender<ModerationEvent>,
    pending: Mutex<VecDeque<DetectionLogEntry>>,
    sequence: AtomicU64,
}

impl<S: DetectionLogStore, N: Notifier> AuditLog<S, N> {
    pub fn new(store: Arc<S>, notifier: Arc<N>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BACKLOG);
        Self {
            store,
            notifier,
            events,
            pending: Mutex::new(VecDeque::new()),
            sequence: AtomicU64::new(0),
        }
    }

    fn next_id(&self, at: DateTime<Utc>) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        format!("{}-{:06}", at.timestamp_millis(), seq)
    }

    /// Record an entry. Returns it with its assigned id.
    pub async fn append(&self, mut entry: DetectionLogEntry, route: &NotifyRoute) -> DetectionLogEntry {
        if entry.id.is_empty() {
            entry.id = self.next_id(entry.timestamp);
        }

        // No receivers is fine; nobody is watching the dashboard.
        let _ = self.events.send(ModerationEvent::Log(entry.clone()));

        if let Err(e) = self.store.append_logs(std::slice::from_ref(&entry)).await {
            tracing::warn!(
                guild_id = entry.guild_id,
                entry_id = %entry.id,
                error = %e,
                "Audit write failed, buffering entry"
            );
            let mut pending = self.pending.lock().await;
            if pending.len() >= MAX_PENDING_ENTRIES {
                pending.pop_front();
                tracing::error!("Audit pending buffer full, dropping oldest entry");
            }
            pending.push_back(entry.clone());
        }

        if route.log_channel_id.is_some() || (route.notify && route.webhook_url.is_some()) {
            tokio::spawn(deliver(
                Arc::clone(&self.notifier),
                entry.clone(),
                route.clone(),
            ));
        }
        entry
    }

    pub fn publish_trust(&self, snapshot: TrustSnapshot) {
        let _ = self.events.send(ModerationEvent::Trust(snapshot));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModerationEvent> {
        self.events.subscribe()
    }

    /// Retry buffered entries. Returns how many were written.
    pub async fn flush_pending(&self) -> Result<usize, StoreError> {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            return Ok(0);
        }

        let batch: Vec<DetectionLogEntry> = pending.iter().cloned().collect();
        self.store.append_logs(&batch).await?;
        pending.clear();
        tracing::info!(count = batch.len(), "Flushed buffered audit entries");
        Ok(batch.len())
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Newest-first entries for a guild, including any still waiting in the buffer.
    pub async fn list(
        &self,
        guild_id: u64,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<DetectionLogEntry>, StoreError> {
        let mut entries = self.store.list_logs(guild_id, limit, before).await?;

        let pending = self.pending.lock().await;
        let buffered: Vec<DetectionLogEntry> = pending
            .iter()
            .filter(|e| e.guild_id == guild_id && before.map_or(true, |b| e.timestamp < b))
            .filter(|e| !entries.iter().any(|stored| stored.id == e.id))
            .cloned()
            .collect();
        drop(pending);

        if !buffered.is_empty() {
            entries.extend(buffered);
            entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
            entries.truncate(limit);
        }
        Ok(entries)
    }

    pub async fn prune(&self, retention: ChronoDuration, max_per_guild: usize) -> Result<u64, StoreError> {
        let removed = self
            .store
            .prune_logs(Utc::now() - retention, max_per_guild)
            .await?;
        if removed > 0 {
            tracing::info!(removed, "Pruned old audit entries");
        }
        Ok(removed)
    }
}

/// Post the log-channel summary and, for notify actions, the webhook.
async fn deliver<N: Notifier>(notifier: Arc<N>, entry: DetectionLogEntry, route: NotifyRoute) {
    if let Some(channel_id) = route.log_channel_id {
        match tokio::time::timeout(NOTIFY_TIMEOUT, notifier.post_summary(channel_id, &entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(channel_id, error = %e, "Failed to post log summary"),
            Err(_) => tracing::warn!(channel_id, "Timed out posting log summary"),
        }
    }

    if route.notify {
        if let Some(url) = &route.webhook_url {
            match tokio::time::timeout(NOTIFY_TIMEOUT, notifier.notify_webhook(url, &entry)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Webhook notification failed"),
                Err(_) => tracing::warn!("Webhook notification timed out"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::LogKind;
    use crate::core::moderation::test_support::RecordingNotifier;
    use crate::infra::moderation::InMemoryModerationStore;

    fn audit() -> (
        AuditLog<InMemoryModerationStore, RecordingNotifier>,
        Arc<InMemoryModerationStore>,
        Arc<RecordingNotifier>,
    ) {
        let store = Arc::new(InMemoryModerationStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        (
            AuditLog::new(Arc::clone(&store), Arc::clone(&notifier)),
            store,
            notifier,
        )
    }

    #[tokio::test]
    async fn append_broadcasts_and_persists() {
        let (audit, _, _) = audit();
        let mut rx = audit.subscribe();

        let entry = audit
            .append(
                DetectionLogEntry::new(1, 2, LogKind::Detection, "spam"),
                &NotifyRoute::default(),
            )
            .await;
        assert!(!entry.id.is_empty());

        match rx.recv().await.unwrap() {
            ModerationEvent::Log(received) => assert_eq!(received.id, entry.id),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(audit.list(1, 10, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_outage_buffers_until_flush() {
        let (audit, store, _) = audit();
        store.set_log_writes_failing(true);

        audit
            .append(
                DetectionLogEntry::new(1, 2, LogKind::Detection, "spam"),
                &NotifyRoute::default(),
            )
            .await;
        assert_eq!(audit.pending_len().await, 1);
        // Still visible while buffered.
        assert_eq!(audit.list(1, 10, None).await.unwrap().len(), 1);
        assert!(audit.flush_pending().await.is_err());

        store.set_log_writes_failing(false);
        assert_eq!(audit.flush_pending().await.unwrap(), 1);
        assert_eq!(audit.pending_len().await, 0);
        assert_eq!(audit.list(1, 10, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn webhook_only_for_notify_actions() {
        let (audit, _, notifier) = audit();
        let route = NotifyRoute {
            log_channel_id: Some(77),
            webhook_url: Some("https://hooks.example/x".to_string()),
            notify: false,
        };

        audit
            .append(DetectionLogEntry::new(1, 2, LogKind::Detection, "a"), &route)
            .await;
        audit
            .append(
                DetectionLogEntry::new(1, 2, LogKind::Punishment, "b"),
                &route.clone().with_notify(true),
            )
            .await;

        notifier.wait_for(2, 1).await;
        assert_eq!(notifier.summaries(), 2);
        assert_eq!(notifier.webhooks(), 1);
    }

    #[tokio::test]
    async fn slow_notifier_does_not_hold_up_append() {
        let store = Arc::new(InMemoryModerationStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.set_delay(Duration::from_secs(3));
        let audit = AuditLog::new(Arc::clone(&store), Arc::clone(&notifier));
        let route = NotifyRoute {
            log_channel_id: Some(77),
            webhook_url: Some("https://hooks.example/x".to_string()),
            notify: true,
        };

        let appended = tokio::time::timeout(
            Duration::from_millis(500),
            audit.append(DetectionLogEntry::new(1, 2, LogKind::Punishment, "b"), &route),
        )
        .await;
        assert!(appended.is_ok());
        assert_eq!(audit.list(1, 10, None).await.unwrap().len(), 1);
        assert_eq!(notifier.summaries(), 0);
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_events() {
        let (audit, _, _) = audit();
        let mut rx = audit.subscribe();

        for i in 0..(EVENT_BACKLOG + 10) {
            audit
                .append(
                    DetectionLogEntry::new(1, 2, LogKind::Detection, format!("hit {}", i)),
                    &NotifyRoute::default(),
                )
                .await;
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(10))
        ));
        assert!(rx.recv().await.is_ok());
    }
}
