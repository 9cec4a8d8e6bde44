// In-memory implementation of the moderation storage ports.
//
// Used by tests and for dry runs without a database. Same contract as the
// SQLite store: the core can't tell the difference.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::moderation::{
    ConfigStore, CooldownKey, CooldownState, CooldownStore, DetectionLogEntry, DetectionLogStore,
    GuildModerationConfig, StoreError, TrustRecordStore, UserTrustRecord,
};

/// DashMap-backed store. Every map is keyed the same way as the SQLite tables.
#[derive(Default)]
pub struct InMemoryModerationStore {
    configs: DashMap<u64, GuildModerationConfig>,
    records: DashMap<(u64, u64), UserTrustRecord>,
    cooldowns: DashMap<CooldownKey, CooldownState>,
    /// Per guild, in append order.
    logs: DashMap<u64, Vec<DetectionLogEntry>>,
    fail_log_writes: AtomicBool,
}

impl InMemoryModerationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an audit-store outage.
    pub fn set_log_writes_failing(&self, failing: bool) {
        self.fail_log_writes.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConfigStore for InMemoryModerationStore {
    async fn get_config(
        &self,
        guild_id: u64,
    ) -> Result<Option<GuildModerationConfig>, StoreError> {
        Ok(self.configs.get(&guild_id).map(|c| c.clone()))
    }

    async fn save_config(
        &self,
        guild_id: u64,
        config: &GuildModerationConfig,
    ) -> Result<(), StoreError> {
        self.configs.insert(guild_id, config.clone());
        Ok(())
    }

    async fn list_guilds(&self) -> Result<Vec<u64>, StoreError> {
        let mut guilds: Vec<u64> = self.configs.iter().map(|e| *e.key()).collect();
        guilds.sort_unstable();
        Ok(guilds)
    }
}

#[async_trait]
impl TrustRecordStore for InMemoryModerationStore {
    async fn get_record(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<Option<UserTrustRecord>, StoreError> {
        Ok(self.records.get(&(guild_id, user_id)).map(|r| r.clone()))
    }

    async fn put_record(&self, record: &UserTrustRecord) -> Result<(), StoreError> {
        self.records
            .insert((record.guild_id, record.user_id), record.clone());
        Ok(())
    }

    async fn list_records(&self, guild_id: u64) -> Result<Vec<UserTrustRecord>, StoreError> {
        let mut records: Vec<UserTrustRecord> = self
            .records
            .iter()
            .filter(|e| e.key().0 == guild_id)
            .map(|e| e.value().clone())
            .collect();
        records.sort_by(|a, b| b.score.cmp(&a.score).then(a.user_id.cmp(&b.user_id)));
        Ok(records)
    }
}

#[async_trait]
impl CooldownStore for InMemoryModerationStore {
    async fn get_cooldown(&self, key: &CooldownKey) -> Result<Option<CooldownState>, StoreError> {
        Ok(self.cooldowns.get(key).map(|s| s.clone()))
    }

    async fn put_cooldown(
        &self,
        key: &CooldownKey,
        state: &CooldownState,
    ) -> Result<(), StoreError> {
        self.cooldowns.insert(key.clone(), state.clone());
        Ok(())
    }
}

#[async_trait]
impl DetectionLogStore for InMemoryModerationStore {
    async fn append_logs(&self, entries: &[DetectionLogEntry]) -> Result<(), StoreError> {
        if self.fail_log_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("log store offline".to_string()));
        }
        for entry in entries {
            let mut guild_logs = self.logs.entry(entry.guild_id).or_default();
            // Replays from the pending buffer must not duplicate entries.
            if !guild_logs.iter().any(|e| e.id == entry.id) {
                guild_logs.push(entry.clone());
            }
        }
        Ok(())
    }

    async fn list_logs(
        &self,
        guild_id: u64,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<DetectionLogEntry>, StoreError> {
        let Some(guild_logs) = self.logs.get(&guild_id) else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<DetectionLogEntry> = guild_logs
            .iter()
            .filter(|e| before.map_or(true, |b| e.timestamp < b))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn prune_logs(
        &self,
        older_than: DateTime<Utc>,
        max_per_guild: usize,
    ) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        for mut guild_logs in self.logs.iter_mut() {
            let before = guild_logs.len();
            guild_logs.retain(|e| e.timestamp >= older_than);
            guild_logs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            if guild_logs.len() > max_per_guild {
                let excess = guild_logs.len() - max_per_guild;
                guild_logs.drain(..excess);
            }
            removed += (before - guild_logs.len()) as u64;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::LogKind;
    use chrono::Duration;

    fn entry(id: &str, guild_id: u64, at: DateTime<Utc>) -> DetectionLogEntry {
        let mut entry = DetectionLogEntry::new(guild_id, 1, LogKind::Detection, "hit");
        entry.id = id.to_string();
        entry.timestamp = at;
        entry
    }

    #[tokio::test]
    async fn logs_are_newest_first_and_paged_by_time() {
        let store = InMemoryModerationStore::new();
        let t0 = Utc::now();
        store
            .append_logs(&[
                entry("a", 1, t0),
                entry("b", 1, t0 + Duration::seconds(1)),
                entry("c", 1, t0 + Duration::seconds(2)),
                entry("x", 2, t0),
            ])
            .await
            .unwrap();

        let page = store.list_logs(1, 2, None).await.unwrap();
        assert_eq!(page.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["c", "b"]);

        let older = store
            .list_logs(1, 10, Some(page[1].timestamp))
            .await
            .unwrap();
        assert_eq!(older.len(), 1);
        assert_eq!(older[0].id, "a");
    }

    #[tokio::test]
    async fn prune_applies_age_and_count() {
        let store = InMemoryModerationStore::new();
        let now = Utc::now();
        store
            .append_logs(&[
                entry("old", 1, now - Duration::days(40)),
                entry("a", 1, now - Duration::seconds(3)),
                entry("b", 1, now - Duration::seconds(2)),
                entry("c", 1, now - Duration::seconds(1)),
            ])
            .await
            .unwrap();

        let removed = store
            .prune_logs(now - Duration::days(30), 2)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        let left = store.list_logs(1, 10, None).await.unwrap();
        assert_eq!(left.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["c", "b"]);
    }

    #[tokio::test]
    async fn trust_records_sorted_by_score() {
        let store = InMemoryModerationStore::new();
        let now = Utc::now();
        for (user, score) in [(1, 3), (2, 9), (3, 0)] {
            let mut record = UserTrustRecord::new(5, user, now);
            record.score = score;
            store.put_record(&record).await.unwrap();
        }
        let users: Vec<u64> = store
            .list_records(5)
            .await
            .unwrap()
            .iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(users, vec![2, 1, 3]);
    }
}
