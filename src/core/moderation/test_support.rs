// Test doubles shared by the moderation tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::audit_log::{Notifier, NotifyError};
use super::moderation_models::DetectionLogEntry;
use super::platform::{PlatformActions, PlatformError};

/// Platform that records calls, tracks timeouts and fails on demand.
#[derive(Default)]
pub struct MockPlatform {
    calls: DashMap<&'static str, usize>,
    failures: DashMap<&'static str, VecDeque<PlatformError>>,
    timed_out: DashMap<(u64, u64), bool>,
    delay: Mutex<Option<Duration>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `kind` fail with `error`.
    pub fn fail_next(&self, kind: &'static str, times: usize, error: PlatformError) {
        let mut queue = self.failures.entry(kind).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self, kind: &str) -> usize {
        self.calls.get(kind).map(|c| *c).unwrap_or(0)
    }

    pub fn is_user_timed_out(&self, guild_id: u64, user_id: u64) -> bool {
        self.timed_out
            .get(&(guild_id, user_id))
            .map(|t| *t)
            .unwrap_or(false)
    }

    async fn record(&self, kind: &'static str) -> Result<(), PlatformError> {
        *self.calls.entry(kind).or_insert(0) += 1;
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self
            .failures
            .get_mut(kind)
            .and_then(|mut queue| queue.pop_front());
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PlatformActions for MockPlatform {
    async fn timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        _duration: Duration,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        self.record("timeout").await?;
        self.timed_out.insert((guild_id, user_id), true);
        Ok(())
    }

    async fn remove_timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        self.record("remove_timeout").await?;
        self.timed_out.insert((guild_id, user_id), false);
        Ok(())
    }

    async fn kick(&self, _guild_id: u64, _user_id: u64, _reason: &str) -> Result<(), PlatformError> {
        self.record("kick").await
    }

    async fn ban(
        &self,
        _guild_id: u64,
        _user_id: u64,
        _duration: Option<Duration>,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        self.record("ban").await
    }

    async fn purge_messages(
        &self,
        _guild_id: u64,
        _user_id: u64,
        _channel_id: u64,
        _since: DateTime<Utc>,
    ) -> Result<u64, PlatformError> {
        self.record("purge").await?;
        Ok(1)
    }

    async fn is_timed_out(&self, guild_id: u64, user_id: u64) -> Result<bool, PlatformError> {
        self.record("is_timed_out").await?;
        Ok(self.is_user_timed_out(guild_id, user_id))
    }
}

/// Notifier that counts deliveries, optionally after a delay.
#[derive(Default)]
pub struct RecordingNotifier {
    summaries: AtomicUsize,
    webhooks: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl RecordingNotifier {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn summaries(&self) -> usize {
        self.summaries.load(Ordering::SeqCst)
    }

    pub fn webhooks(&self) -> usize {
        self.webhooks.load(Ordering::SeqCst)
    }

    /// Deliveries happen on a spawned task; wait until the counts are reached.
    pub async fn wait_for(&self, summaries: usize, webhooks: usize) {
        let reached = async {
            while self.summaries() < summaries || self.webhooks() < webhooks {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), reached)
            .await
            .expect("notifications were not delivered in time");
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn post_summary(
        &self,
        _channel_id: u64,
        _entry: &DetectionLogEntry,
    ) -> Result<(), NotifyError> {
        self.pause().await;
        self.summaries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn notify_webhook(
        &self,
        _url: &str,
        _entry: &DetectionLogEntry,
    ) -> Result<(), NotifyError> {
        self.pause().await;
        self.webhooks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
