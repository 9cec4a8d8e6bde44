// Cooldown and daily-cap tracking per (guild, user, rule).
//
// A score-affecting hit is admitted only if the rule's cooldown has elapsed
// and today's count is still under the cap. Admission updates the state under
// the key's lock, so two concurrent hits can't both squeeze under the cap.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

use super::keyed_locks::KeyedLocks;
use super::moderation_models::{CooldownKey, CooldownState, RuleLimits};
use super::moderation_store::{CooldownStore, StoreError};

pub struct CooldownTracker<S: CooldownStore> {
    store: Arc<S>,
    locks: KeyedLocks<CooldownKey>,
}

impl<S: CooldownStore> CooldownTracker<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }

    /// Returns `true` if the hit may affect the score. Rules without limits are always
    /// admitted and leave no state behind.
    pub async fn admit(
        &self,
        guild_id: u64,
        user_id: u64,
        rule: &str,
        limits: RuleLimits,
        now: DateTime<Utc>,
        tz: Tz,
    ) -> Result<bool, StoreError> {
        if limits.is_unlimited() {
            return Ok(true);
        }

        let key = CooldownKey::new(guild_id, user_id, rule);
        let _guard = self.locks.lock(key.clone()).await;

        let today = now.with_timezone(&tz).date_naive();
        let previous = self.store.get_cooldown(&key).await?;

        let count_today = match &previous {
            Some(state) => {
                if let Some(cooldown) = limits.cooldown_seconds {
                    // Out-of-range cooldowns never elapse.
                    let elapsed = i64::try_from(cooldown)
                        .ok()
                        .and_then(Duration::try_seconds)
                        .map_or(false, |cooldown| now - state.last_fired_at >= cooldown);
                    if !elapsed {
                        tracing::debug!(
                            guild_id,
                            user_id,
                            rule,
                            "Hit rejected: rule still cooling down"
                        );
                        return Ok(false);
                    }
                }
                if state.day_bucket == today {
                    state.count_today
                } else {
                    0
                }
            }
            None => 0,
        };

        if let Some(max) = limits.max_per_day {
            if count_today >= max {
                tracing::debug!(guild_id, user_id, rule, max, "Hit rejected: daily cap reached");
                return Ok(false);
            }
        }

        let state = CooldownState {
            last_fired_at: now,
            count_today: count_today + 1,
            day_bucket: today,
        };
        self.store.put_cooldown(&key, &state).await?;
        Ok(true)
    }
}
