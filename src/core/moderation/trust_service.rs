// Trust service - owns every read-modify-write of a user's trust record.
//
// All mutations go through `update`, which holds the (guild, user) lock for the
// whole load/mutate/persist cycle. Different users never contend.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::keyed_locks::KeyedLocks;
use super::moderation_models::{TrustHistoryEntry, TrustSnapshot, UserTrustRecord};
use super::moderation_store::{StoreError, TrustRecordStore};

pub struct TrustService<S: TrustRecordStore> {
    store: Arc<S>,
    locks: KeyedLocks<(u64, u64)>,
}

impl<S: TrustRecordStore> TrustService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    /// Run `f` against the user's record under its lock. The record is persisted only
    /// when `f` returns `Some`, so read-only checks don't cost a write.
    pub async fn update<R, F>(
        &self,
        guild_id: u64,
        user_id: u64,
        now: DateTime<Utc>,
        f: F,
    ) -> Result<Option<R>, StoreError>
    where
        F: FnOnce(&mut UserTrustRecord) -> Option<R> + Send,
        R: Send,
    {
        let _guard = self.locks.lock((guild_id, user_id)).await;

        let mut record = self
            .store
            .get_record(guild_id, user_id)
            .await?
            .unwrap_or_else(|| UserTrustRecord::new(guild_id, user_id, now));

        let result = f(&mut record);
        if result.is_some() {
            self.store.put_record(&record).await?;
        }
        Ok(result)
    }

    /// Add `delta` to the score and record why. Returns the new score and the history entry.
    pub async fn apply_delta(
        &self,
        guild_id: u64,
        user_id: u64,
        delta: i64,
        reason: &str,
        detector: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(i64, TrustHistoryEntry), StoreError> {
        let entry = TrustHistoryEntry {
            delta,
            reason: reason.to_string(),
            detector: detector.map(str::to_string),
            timestamp: now,
        };

        let applied = self
            .update(guild_id, user_id, now, |record| {
                record.score += delta;
                record.last_updated = now;
                record.push_history(entry.clone());
                Some(record.score)
            })
            .await?;

        Ok((applied.unwrap_or_default(), entry))
    }

    /// Current record, or an empty one for users never scored.
    pub async fn get_record(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<UserTrustRecord, StoreError> {
        Ok(self
            .store
            .get_record(guild_id, user_id)
            .await?
            .unwrap_or_else(|| UserTrustRecord::new(guild_id, user_id, Utc::now())))
    }

    /// Zero the score and forget history and fired thresholds.
    pub async fn reset(
        &self,
        guild_id: u64,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> Result<TrustSnapshot, StoreError> {
        let snapshot = self
            .update(guild_id, user_id, now, |record| {
                record.clear(now);
                Some(record.snapshot())
            })
            .await?;

        Ok(snapshot.unwrap_or_else(|| UserTrustRecord::new(guild_id, user_id, now).snapshot()))
    }

    pub async fn list_records(&self, guild_id: u64) -> Result<Vec<TrustSnapshot>, StoreError> {
        let records = self.store.list_records(guild_id).await?;
        Ok(records.iter().map(UserTrustRecord::snapshot).collect())
    }

    /// Lower every positive score in the guild by `amount` (floor 0).
    ///
    /// Thresholds now above the score are re-armed so a user who offends again after
    /// cooling off is punished again. Returns snapshots of the records that changed.
    pub async fn decay(
        &self,
        guild_id: u64,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrustSnapshot>, StoreError> {
        let candidates: Vec<u64> = self
            .store
            .list_records(guild_id)
            .await?
            .into_iter()
            .filter(|record| record.score > 0)
            .map(|record| record.user_id)
            .collect();

        let mut changed = Vec::new();
        for user_id in candidates {
            // Re-check under the lock; the score may have moved since the listing.
            let snapshot = self
                .update(guild_id, user_id, now, |record| {
                    if record.score <= 0 {
                        return None;
                    }
                    let applied = amount.min(record.score);
                    record.score -= applied;
                    let score = record.score;
                    record.fired_thresholds.retain(|t| *t <= score);
                    record.last_updated = now;
                    record.push_history(TrustHistoryEntry {
                        delta: -applied,
                        reason: "Trust decay".to_string(),
                        detector: None,
                        timestamp: now,
                    });
                    Some(record.snapshot())
                })
                .await?;
            changed.extend(snapshot);
        }
        Ok(changed)
    }
}
