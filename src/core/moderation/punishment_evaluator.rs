// Punishment evaluator - turns a score into at most one set of actions.
//
// The highest crossed threshold that hasn't fired yet wins. Lower crossed
// thresholds are marked fired with it so a jump straight past them doesn't
// replay the whole ladder later.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::moderation_models::{GuildModerationConfig, PunishmentDecision, PunishmentThreshold};
use super::moderation_store::{StoreError, TrustRecordStore};
use super::trust_service::TrustService;

/// Pick the threshold to act on. Returns it with the lower unfired thresholds it subsumes.
pub fn select_threshold<'a>(
    punishments: &'a [PunishmentThreshold],
    score: i64,
    fired: &BTreeSet<i64>,
) -> Option<(&'a PunishmentThreshold, Vec<i64>)> {
    let mut crossed: Vec<&PunishmentThreshold> = punishments
        .iter()
        .filter(|p| p.threshold <= score && !fired.contains(&p.threshold))
        .collect();
    crossed.sort_by_key(|p| p.threshold);

    let chosen = crossed.pop()?;
    let subsumed = crossed.iter().map(|p| p.threshold).collect();
    Some((chosen, subsumed))
}

pub struct PunishmentEvaluator<S: TrustRecordStore> {
    trust: Arc<TrustService<S>>,
}

impl<S: TrustRecordStore> PunishmentEvaluator<S> {
    pub fn new(trust: Arc<TrustService<S>>) -> Self {
        Self { trust }
    }

    /// Check the user's current score and claim a threshold if one is due.
    ///
    /// Selection and marking happen under the record's lock, so of two concurrent
    /// callers only one gets the decision.
    pub async fn evaluate(
        &self,
        config: &GuildModerationConfig,
        guild_id: u64,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<PunishmentDecision>, StoreError> {
        if config.punishments.is_empty() {
            return Ok(None);
        }

        self.trust
            .update(guild_id, user_id, now, |record| {
                let (chosen, subsumed) =
                    select_threshold(&config.punishments, record.score, &record.fired_thresholds)?;

                record.fired_thresholds.insert(chosen.threshold);
                record.fired_thresholds.extend(subsumed.iter().copied());
                record.last_updated = now;

                Some(PunishmentDecision {
                    threshold: chosen.threshold,
                    subsumed,
                    actions: chosen.actions.clone(),
                    score: record.score,
                })
            })
            .await
    }
}
