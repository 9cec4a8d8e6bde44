// Moderation engine - drives one inbound event from detection to punishment.
//
// Flow per event:
// 1. Snapshot the guild config
// 2. Drop disabled guilds and excluded actors
// 3. Run the detector pipeline
// 4. Admit each hit through its rule's cooldown and daily cap
// 5. Apply admitted deltas to the trust record and log them
// 6. Claim at most one punishment threshold
// 7. Apply the auto-timeout / auto-delete circuit breakers
// 8. Dispatch the punishment and log the outcome
//
// NO Discord dependencies here - the platform and notifier are ports.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::action_dispatcher::{ActionDispatcher, ActionOutcome, DispatchContext, DispatchPolicy};
use super::audit_log::{AuditLog, Notifier, NotifyRoute};
use super::cooldown_tracker::CooldownTracker;
use super::detector_pipeline::{DetectorPipeline, DetectorRegistry};
use super::exclusion::is_excluded;
use super::moderation_errors::ModerationError;
use super::moderation_models::{
    DetectionLogEntry, GuildModerationConfig, InboundEvent, LogKind, ModerationEvent,
    PunishmentAction, PunishmentDecision, PunishmentThreshold, ScoreDelta, TrustSnapshot,
    UserTrustRecord,
};
use super::moderation_store::{ModerationStore, StoreError};
use super::platform::PlatformActions;
use super::punishment_evaluator::PunishmentEvaluator;
use super::revocation_service::{RevocationOutcome, RevocationService};
use super::trust_service::TrustService;

/// What happened to one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Disabled,
    Excluded,
    NoDetections,
    /// Every hit was rejected by cooldowns or daily caps.
    Throttled { rejected: usize },
    Scored {
        score: i64,
        applied: Vec<ScoreDelta>,
        rejected: usize,
        punishment: Option<PunishmentDecision>,
    },
}

/// An audit entry as the dashboard sees it, with live member state attached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogView {
    #[serde(flatten)]
    pub entry: DetectionLogEntry,
    pub is_timed_out: bool,
}

pub struct ModerationEngine<S: ModerationStore, P: PlatformActions, N: Notifier> {
    store: Arc<S>,
    pipeline: DetectorPipeline,
    cooldowns: CooldownTracker<S>,
    trust: Arc<TrustService<S>>,
    evaluator: PunishmentEvaluator<S>,
    dispatcher: Arc<ActionDispatcher<P>>,
    audit: Arc<AuditLog<S, N>>,
    revocation: RevocationService<S, P, N>,
    last_decay: DashMap<u64, DateTime<Utc>>,
}

impl<S: ModerationStore, P: PlatformActions, N: Notifier> ModerationEngine<S, P, N> {
    pub fn new(
        store: Arc<S>,
        platform: Arc<P>,
        notifier: Arc<N>,
        registry: DetectorRegistry,
        policy: DispatchPolicy,
    ) -> Self {
        let trust = Arc::new(TrustService::new(Arc::clone(&store)));
        let dispatcher = Arc::new(ActionDispatcher::new(platform, policy));
        let audit = Arc::new(AuditLog::new(Arc::clone(&store), notifier));

        Self {
            pipeline: DetectorPipeline::new(registry),
            cooldowns: CooldownTracker::new(Arc::clone(&store)),
            evaluator: PunishmentEvaluator::new(Arc::clone(&trust)),
            revocation: RevocationService::new(
                Arc::clone(&trust),
                Arc::clone(&dispatcher),
                Arc::clone(&audit),
            ),
            store,
            trust,
            dispatcher,
            audit,
            last_decay: DashMap::new(),
        }
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.pipeline.registry().names()
    }

    // ========================================================================
    // EVENT PROCESSING
    // ========================================================================

    pub async fn process_event(&self, event: InboundEvent) -> Result<EventOutcome, ModerationError> {
        let (guild_id, user_id) = (event.guild_id, event.user_id);

        // Owned snapshot: a settings write mid-event doesn't affect this event.
        let config = self.get_config(guild_id).await?;
        if !config.enabled {
            return Ok(EventOutcome::Disabled);
        }
        if is_excluded(
            &config.exclusions,
            None,
            &event.roles,
            event.channel_id,
            user_id,
        ) {
            tracing::debug!(guild_id, user_id, "Event from excluded actor, skipping");
            return Ok(EventOutcome::Excluded);
        }

        let event = Arc::new(event);
        let deltas = self.pipeline.evaluate(Arc::clone(&event), &config).await;
        if deltas.is_empty() {
            return Ok(EventOutcome::NoDetections);
        }

        let now = event.timestamp;
        let tz = config.tz();
        let mut applied = Vec::new();
        let mut rejected = 0;
        for delta in deltas {
            let limits = config
                .detectors
                .get(&delta.detector)
                .map(|d| d.limits())
                .unwrap_or_default();
            if self
                .cooldowns
                .admit(guild_id, user_id, &delta.detector, limits, now, tz)
                .await?
            {
                applied.push(delta);
            } else {
                rejected += 1;
            }
        }
        if applied.is_empty() {
            return Ok(EventOutcome::Throttled { rejected });
        }

        let route = NotifyRoute::from_config(&config);
        let mut score = 0;
        for delta in &applied {
            let (after, _) = self
                .trust
                .apply_delta(
                    guild_id,
                    user_id,
                    delta.delta,
                    &delta.reason,
                    Some(&delta.detector),
                    now,
                )
                .await?;
            score = after;

            let entry = DetectionLogEntry::for_event(&event, LogKind::Detection, delta.reason.clone())
                .with_detector(Some(&delta.detector))
                .with_score(delta.delta, Some(after))
                .with_metadata(delta.metadata.clone());
            self.audit.append(entry, &route).await;
        }

        tracing::info!(
            guild_id,
            user_id,
            score,
            hits = applied.len(),
            "Detections applied"
        );

        let punishment = self
            .evaluator
            .evaluate(&config, guild_id, user_id, now)
            .await?;
        self.publish_trust(guild_id, user_id).await;

        self.apply_circuit_breakers(&config, &event, &applied, &route)
            .await;

        if let Some(decision) = &punishment {
            let ctx = DispatchContext {
                threshold: Some(decision.threshold),
                score: decision.score,
                detector: applied.first().map(|d| d.detector.clone()),
            };
            // Per-user lock is not held here; the threshold was claimed above.
            let report = self
                .dispatcher
                .dispatch(guild_id, user_id, &decision.actions, &ctx)
                .await;
            for outcome in &report.outcomes {
                let entry = outcome_entry(
                    DetectionLogEntry::for_event(&event, LogKind::Punishment, outcome.reason.clone()),
                    outcome,
                    json!({
                        "threshold": decision.threshold,
                        "subsumed": decision.subsumed,
                    }),
                )
                .with_detector(ctx.detector.as_deref())
                .with_score(0, Some(decision.score));
                self.audit
                    .append(entry, &route.clone().with_notify(outcome.notify))
                    .await;
            }
        }

        Ok(EventOutcome::Scored {
            score,
            applied,
            rejected,
            punishment,
        })
    }

    async fn apply_circuit_breakers(
        &self,
        config: &GuildModerationConfig,
        event: &InboundEvent,
        applied: &[ScoreDelta],
        route: &NotifyRoute,
    ) {
        let (guild_id, user_id) = (event.guild_id, event.user_id);
        let detectors: Vec<&str> = applied.iter().map(|d| d.detector.as_str()).collect();

        if config.auto_timeout.enabled {
            let duration = Duration::from_secs(config.auto_timeout.duration_seconds);
            let reason = format!("Automatic timeout: {}", detectors.join(", "));
            let outcome = self
                .dispatcher
                .auto_timeout(guild_id, user_id, duration, &reason)
                .await;
            let entry = outcome_entry(
                DetectionLogEntry::for_event(event, LogKind::AutoTimeout, reason),
                &outcome,
                json!({ "durationSeconds": config.auto_timeout.duration_seconds }),
            );
            self.audit.append(entry, route).await;
        }

        if config.auto_delete.enabled {
            let Some(channel_id) = event.channel_id else {
                return;
            };
            let Some(window) = i64::try_from(config.auto_delete.window_seconds)
                .ok()
                .and_then(ChronoDuration::try_seconds)
            else {
                tracing::warn!(guild_id, "Auto-delete window out of range, skipping");
                return;
            };
            let since = event.timestamp - window;
            let entry = match self
                .dispatcher
                .auto_delete(guild_id, user_id, channel_id, since)
                .await
            {
                Ok(deleted) => DetectionLogEntry::for_event(
                    event,
                    LogKind::AutoDelete,
                    format!("Deleted {} recent messages", deleted),
                )
                .with_metadata(json!({
                    "deleted": deleted,
                    "windowSeconds": config.auto_delete.window_seconds,
                })),
                Err(e) => DetectionLogEntry::for_event(
                    event,
                    LogKind::ActionFailed,
                    format!("Auto-delete failed: {}", e),
                )
                .with_metadata(json!({ "action": "purge", "error": e.to_string() })),
            };
            self.audit.append(entry, route).await;
        }
    }

    async fn publish_trust(&self, guild_id: u64, user_id: u64) {
        match self.trust.get_record(guild_id, user_id).await {
            Ok(record) => self.audit.publish_trust(record.snapshot()),
            Err(e) => tracing::warn!(guild_id, user_id, error = %e, "Could not load trust snapshot"),
        }
    }

    /// Staff-issued action from the dashboard or a command. Logged as a manual action,
    /// or as a failure if the platform refuses.
    pub async fn manual_action(
        &self,
        guild_id: u64,
        user_id: u64,
        action: PunishmentAction,
        staff_id: Option<u64>,
    ) -> Result<DetectionLogEntry, ModerationError> {
        // Reuse threshold validation for the action's durations.
        let probe = GuildModerationConfig {
            punishments: vec![PunishmentThreshold {
                threshold: 1,
                actions: vec![action.clone()],
            }],
            ..Default::default()
        };
        probe.validate(&[])?;

        let config = self.get_config(guild_id).await?;
        let record = self.trust.get_record(guild_id, user_id).await?;
        let ctx = DispatchContext {
            threshold: None,
            score: record.score,
            detector: None,
        };

        let report = self
            .dispatcher
            .dispatch(guild_id, user_id, std::slice::from_ref(&action), &ctx)
            .await;
        let route = NotifyRoute::from_config(&config);

        let mut result = Ok(());
        let mut last = None;
        for outcome in &report.outcomes {
            let mut entry = DetectionLogEntry::new(
                guild_id,
                user_id,
                LogKind::ManualAction,
                outcome.reason.clone(),
            );
            entry = outcome_entry(entry, outcome, json!({ "staffId": staff_id }));
            if let Err(e) = &outcome.result {
                result = Err(ModerationError::Platform(e.clone()));
            }
            last = Some(
                self.audit
                    .append(entry, &route.clone().with_notify(outcome.notify))
                    .await,
            );
        }

        result?;
        last.ok_or_else(|| ModerationError::Config("no action given".to_string()))
    }

    // ========================================================================
    // SETTINGS
    // ========================================================================

    /// Stored config, or the defaults, with every known detector listed.
    pub async fn get_config(&self, guild_id: u64) -> Result<GuildModerationConfig, ModerationError> {
        let mut config = self.store.get_config(guild_id).await?.unwrap_or_default();
        config.fill_detectors(self.detector_names());
        Ok(config)
    }

    /// Validate and replace the whole config. Returns it with the bumped version.
    pub async fn save_config(
        &self,
        guild_id: u64,
        mut config: GuildModerationConfig,
    ) -> Result<GuildModerationConfig, ModerationError> {
        config.validate(&self.detector_names())?;

        let current = self
            .store
            .get_config(guild_id)
            .await?
            .map(|c| c.version)
            .unwrap_or(0);
        config.version = current + 1;
        self.store.save_config(guild_id, &config).await?;

        tracing::info!(guild_id, version = config.version, "Moderation settings saved");
        config.fill_detectors(self.detector_names());
        Ok(config)
    }

    pub async fn set_enabled(
        &self,
        guild_id: u64,
        enabled: bool,
    ) -> Result<GuildModerationConfig, ModerationError> {
        let mut config = self.get_config(guild_id).await?;
        config.enabled = enabled;
        self.save_config(guild_id, config).await
    }

    // ========================================================================
    // READ MODELS
    // ========================================================================

    /// Newest-first audit entries with the member's current timeout state.
    pub async fn list_logs(
        &self,
        guild_id: u64,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogView>, ModerationError> {
        let entries = self.audit.list(guild_id, limit, before).await?;

        // One lookup per user per request.
        let mut timed_out: HashMap<u64, bool> = HashMap::new();
        let mut views = Vec::with_capacity(entries.len());
        for entry in entries {
            let is_timed_out = match timed_out.get(&entry.user_id) {
                Some(state) => *state,
                None => {
                    let state = self
                        .dispatcher
                        .platform()
                        .is_timed_out(guild_id, entry.user_id)
                        .await
                        .unwrap_or_else(|e| {
                            tracing::debug!(user_id = entry.user_id, error = %e, "Timeout lookup failed");
                            false
                        });
                    timed_out.insert(entry.user_id, state);
                    state
                }
            };
            views.push(LogView {
                entry,
                is_timed_out,
            });
        }
        Ok(views)
    }

    pub async fn trust_record(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<UserTrustRecord, ModerationError> {
        Ok(self.trust.get_record(guild_id, user_id).await?)
    }

    pub async fn list_trust(&self, guild_id: u64) -> Result<Vec<TrustSnapshot>, ModerationError> {
        Ok(self.trust.list_records(guild_id).await?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModerationEvent> {
        self.audit.subscribe()
    }

    // ========================================================================
    // STAFF OVERRIDES
    // ========================================================================

    pub async fn revoke_timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        reset_trust: bool,
        message_id: Option<u64>,
        staff_id: Option<u64>,
    ) -> Result<RevocationOutcome, ModerationError> {
        let config = self.get_config(guild_id).await?;
        self.revocation
            .revoke_timeout(
                guild_id,
                user_id,
                reset_trust,
                message_id,
                staff_id,
                &NotifyRoute::from_config(&config),
            )
            .await
    }

    pub async fn reset_trust(
        &self,
        guild_id: u64,
        user_id: u64,
        staff_id: Option<u64>,
    ) -> Result<TrustSnapshot, ModerationError> {
        let config = self.get_config(guild_id).await?;
        self.revocation
            .reset_trust(guild_id, user_id, staff_id, &NotifyRoute::from_config(&config))
            .await
    }

    // ========================================================================
    // BACKGROUND JOBS
    // ========================================================================

    pub async fn flush_audit(&self) -> Result<usize, StoreError> {
        self.audit.flush_pending().await
    }

    pub async fn prune_audit(
        &self,
        retention: ChronoDuration,
        max_per_guild: usize,
    ) -> Result<u64, StoreError> {
        self.audit.prune(retention, max_per_guild).await
    }

    /// Apply trust decay for every guild whose decay interval has elapsed.
    /// The first tick for a guild only starts its clock. Returns records changed.
    pub async fn run_decay(&self, now: DateTime<Utc>) -> Result<usize, ModerationError> {
        let mut changed = 0;
        for guild_id in self.store.list_guilds().await? {
            let config = self.get_config(guild_id).await?;
            let Some(decay) = config.decay.filter(|_| config.enabled) else {
                self.last_decay.remove(&guild_id);
                continue;
            };

            let Some(interval) = i64::try_from(decay.interval_seconds)
                .ok()
                .and_then(ChronoDuration::try_seconds)
            else {
                tracing::warn!(
                    guild_id,
                    interval_seconds = decay.interval_seconds,
                    "Decay interval out of range, skipping guild"
                );
                continue;
            };

            let due = match self.last_decay.get(&guild_id).map(|t| *t) {
                None => {
                    self.last_decay.insert(guild_id, now);
                    false
                }
                Some(last) => now - last >= interval,
            };
            if !due {
                continue;
            }
            self.last_decay.insert(guild_id, now);

            let snapshots = self.trust.decay(guild_id, decay.amount, now).await?;
            changed += snapshots.len();
            for snapshot in snapshots {
                self.audit.publish_trust(snapshot);
            }
        }
        if changed > 0 {
            tracing::info!(changed, "Trust decay applied");
        }
        Ok(changed)
    }
}

/// Turn an action outcome into its audit entry: success keeps `entry`'s kind,
/// failure becomes `actionFailed` with the error attached.
fn outcome_entry(
    mut entry: DetectionLogEntry,
    outcome: &ActionOutcome,
    mut metadata: serde_json::Value,
) -> DetectionLogEntry {
    if let Some(map) = metadata.as_object_mut() {
        map.insert("action".to_string(), json!(outcome.kind));
        map.insert("attempts".to_string(), json!(outcome.attempts));
    }

    if let Err(e) = &outcome.result {
        entry.kind = LogKind::ActionFailed;
        entry.reason = format!("{} failed: {}", outcome.kind, e);
        if let Some(map) = metadata.as_object_mut() {
            map.insert("error".to_string(), json!(e.to_string()));
        }
    }
    entry.with_metadata(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::detector_pipeline::{Detector, DetectorError};
    use crate::core::moderation::moderation_models::{
        AutoTimeout, DetectorConfig, DetectorHit, EventKind, EventPayload,
    };
    use crate::core::moderation::platform::PlatformError;
    use crate::core::moderation::test_support::{MockPlatform, RecordingNotifier};
    use crate::infra::moderation::InMemoryModerationStore;
    use async_trait::async_trait;
    use std::collections::BTreeSet;

    /// Every message is worth `score` points.
    struct Points;

    #[async_trait]
    impl Detector for Points {
        fn name(&self) -> &'static str {
            "points"
        }

        fn handles(&self, kind: EventKind) -> bool {
            kind == EventKind::Message
        }

        async fn evaluate(
            &self,
            _event: &InboundEvent,
            config: &DetectorConfig,
        ) -> Result<Option<DetectorHit>, DetectorError> {
            Ok(Some(DetectorHit::new(config.param_i64("score", 1), "points")))
        }
    }

    type TestEngine = ModerationEngine<InMemoryModerationStore, MockPlatform, RecordingNotifier>;

    fn engine() -> (Arc<TestEngine>, Arc<MockPlatform>, Arc<InMemoryModerationStore>) {
        engine_with_notifier(Arc::new(RecordingNotifier::default()))
    }

    fn engine_with_notifier(
        notifier: Arc<RecordingNotifier>,
    ) -> (Arc<TestEngine>, Arc<MockPlatform>, Arc<InMemoryModerationStore>) {
        let store = Arc::new(InMemoryModerationStore::new());
        let platform = Arc::new(MockPlatform::new());
        let engine = ModerationEngine::new(
            Arc::clone(&store),
            Arc::clone(&platform),
            notifier,
            DetectorRegistry::new().with(Arc::new(Points)),
            DispatchPolicy {
                max_attempts: 2,
                base_backoff: Duration::from_millis(1),
                request_timeout: Duration::from_secs(1),
            },
        );
        (Arc::new(engine), platform, store)
    }

    fn config(score: i64) -> GuildModerationConfig {
        let mut config = GuildModerationConfig::default();
        config.detectors.insert(
            "points".to_string(),
            DetectorConfig {
                enabled: true,
                config: json!({ "score": score }).as_object().cloned().unwrap(),
                ..Default::default()
            },
        );
        config.punishments = vec![
            PunishmentThreshold {
                threshold: 5,
                actions: vec![PunishmentAction::Timeout {
                    duration_seconds: 600,
                    reason_template: "Reached {threshold} with {score}".to_string(),
                    notify: false,
                }],
            },
            PunishmentThreshold {
                threshold: 10,
                actions: vec![PunishmentAction::Kick {
                    reason_template: "Reached {threshold}".to_string(),
                    notify: true,
                }],
            },
        ];
        config
    }

    fn message(user_id: u64, roles: Vec<u64>) -> InboundEvent {
        InboundEvent {
            event_id: Some(1),
            guild_id: 100,
            user_id,
            channel_id: Some(7),
            roles,
            payload: EventPayload::Message {
                content: "hey".to_string(),
                mention_count: 0,
                attachment_count: 0,
            },
            timestamp: Utc::now(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_events_dispatch_exactly_once() {
        let (engine, platform, _) = engine();
        engine.save_config(100, config(1)).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            tasks.push(tokio::spawn(async move {
                engine.process_event(message(1, vec![])).await.unwrap()
            }));
        }
        let mut punished = 0;
        for task in tasks {
            if let EventOutcome::Scored {
                punishment: Some(_),
                ..
            } = task.await.unwrap()
            {
                punished += 1;
            }
        }

        assert_eq!(punished, 1);
        assert_eq!(platform.calls("timeout"), 1);
        assert_eq!(engine.trust_record(100, 1).await.unwrap().score, 8);
    }

    #[tokio::test]
    async fn excluded_role_leaves_no_trace() {
        let (engine, _, _) = engine();
        let mut cfg = config(3);
        cfg.exclusions.excluded_roles = BTreeSet::from([55]);
        engine.save_config(100, cfg).await.unwrap();

        let outcome = engine.process_event(message(1, vec![55])).await.unwrap();
        assert_eq!(outcome, EventOutcome::Excluded);
        assert!(engine.list_logs(100, 50, None).await.unwrap().is_empty());
        assert_eq!(engine.trust_record(100, 1).await.unwrap().score, 0);
    }

    #[tokio::test]
    async fn disabled_guild_is_ignored() {
        let (engine, _, _) = engine();
        engine.save_config(100, config(3)).await.unwrap();
        engine.set_enabled(100, false).await.unwrap();

        let outcome = engine.process_event(message(1, vec![])).await.unwrap();
        assert_eq!(outcome, EventOutcome::Disabled);
    }

    #[tokio::test]
    async fn jump_fires_highest_threshold_only() {
        let (engine, platform, _) = engine();
        engine.save_config(100, config(12)).await.unwrap();

        let outcome = engine.process_event(message(1, vec![])).await.unwrap();
        let EventOutcome::Scored {
            punishment: Some(decision),
            ..
        } = outcome
        else {
            panic!("expected a punishment");
        };
        assert_eq!(decision.threshold, 10);
        assert_eq!(decision.subsumed, vec![5]);
        assert_eq!(platform.calls("kick"), 1);
        assert_eq!(platform.calls("timeout"), 0);
    }

    #[tokio::test]
    async fn auto_timeout_applies_and_is_logged() {
        let (engine, platform, _) = engine();
        let mut cfg = config(1);
        cfg.punishments.clear();
        cfg.auto_timeout = AutoTimeout {
            enabled: true,
            duration_seconds: 60,
        };
        engine.save_config(100, cfg).await.unwrap();

        engine.process_event(message(1, vec![])).await.unwrap();
        assert_eq!(platform.calls("timeout"), 1);

        let logs = engine.list_logs(100, 50, None).await.unwrap();
        assert!(logs.iter().any(|l| l.entry.kind == LogKind::AutoTimeout));
        assert!(logs.iter().all(|l| l.is_timed_out));
        // One timeout lookup for the one user.
        assert_eq!(platform.calls("is_timed_out"), 1);
    }

    #[tokio::test]
    async fn failed_action_is_audited() {
        let (engine, platform, _) = engine();
        engine.save_config(100, config(5)).await.unwrap();
        platform.fail_next(
            "timeout",
            1,
            PlatformError::MissingPermissions("moderate members".into()),
        );

        engine.process_event(message(1, vec![])).await.unwrap();

        let logs = engine.list_logs(100, 50, None).await.unwrap();
        let failed = logs
            .iter()
            .find(|l| l.entry.kind == LogKind::ActionFailed)
            .expect("failure entry");
        assert!(failed.entry.reason.contains("timeout failed"));
        // Threshold stays claimed; it isn't retried on the next event.
        assert!(engine
            .trust_record(100, 1)
            .await
            .unwrap()
            .fired_thresholds
            .contains(&5));
    }

    #[tokio::test]
    async fn cooldown_throttles_repeat_hits() {
        let (engine, _, _) = engine();
        let mut cfg = config(1);
        cfg.detectors.get_mut("points").unwrap().cooldown_seconds = Some(60);
        engine.save_config(100, cfg).await.unwrap();

        assert!(matches!(
            engine.process_event(message(1, vec![])).await.unwrap(),
            EventOutcome::Scored { .. }
        ));
        assert_eq!(
            engine.process_event(message(1, vec![])).await.unwrap(),
            EventOutcome::Throttled { rejected: 1 }
        );
    }

    #[tokio::test]
    async fn config_survives_json_round_trip() {
        let original = config(3);
        let json = serde_json::to_string(&original).unwrap();
        let restored: GuildModerationConfig = serde_json::from_str(&json).unwrap();

        let mut scores = Vec::new();
        for cfg in [original, restored] {
            let (engine, platform, _) = engine();
            engine.save_config(100, cfg).await.unwrap();
            for _ in 0..4 {
                engine.process_event(message(1, vec![])).await.unwrap();
            }
            scores.push((
                engine.trust_record(100, 1).await.unwrap().score,
                platform.calls("timeout"),
                platform.calls("kick"),
            ));
        }
        assert_eq!(scores[0], scores[1]);
        assert_eq!(scores[0], (12, 1, 1));
    }

    #[tokio::test]
    async fn save_config_validates_and_bumps_version() {
        let (engine, _, _) = engine();
        let first = engine.save_config(100, config(1)).await.unwrap();
        let second = engine.save_config(100, config(1)).await.unwrap();
        assert_eq!(second.version, first.version + 1);

        let mut bad = config(1);
        bad.detectors.insert("ghost".to_string(), DetectorConfig::default());
        assert!(matches!(
            engine.save_config(100, bad).await,
            Err(ModerationError::Config(_))
        ));
    }

    #[tokio::test]
    async fn manual_action_is_logged() {
        let (engine, platform, _) = engine();
        let entry = engine
            .manual_action(
                100,
                1,
                PunishmentAction::Timeout {
                    duration_seconds: 300,
                    reason_template: "Manual timeout of {user}".to_string(),
                    notify: false,
                },
                Some(9),
            )
            .await
            .unwrap();
        assert_eq!(entry.kind, LogKind::ManualAction);
        assert_eq!(entry.reason, "Manual timeout of <@1>");
        assert_eq!(platform.calls("timeout"), 1);
    }

    #[tokio::test]
    async fn slow_log_channel_does_not_delay_punishment() {
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.set_delay(Duration::from_secs(3));
        let (engine, platform, _) = engine_with_notifier(Arc::clone(&notifier));
        let mut cfg = config(5);
        cfg.log_channel_id = Some(9);
        engine.save_config(100, cfg).await.unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            engine.process_event(message(1, vec![])),
        )
        .await;
        assert!(outcome.is_ok());
        assert_eq!(platform.calls("timeout"), 1);
        assert_eq!(notifier.summaries(), 0);
    }

    #[tokio::test]
    async fn decay_waits_for_interval() {
        let (engine, _, _) = engine();
        let mut cfg = config(4);
        cfg.decay = Some(crate::core::moderation::moderation_models::TrustDecay {
            amount: 1,
            interval_seconds: 60,
        });
        engine.save_config(100, cfg).await.unwrap();
        engine.process_event(message(1, vec![])).await.unwrap();

        let t0 = Utc::now();
        assert_eq!(engine.run_decay(t0).await.unwrap(), 0);
        assert_eq!(engine.run_decay(t0 + ChronoDuration::seconds(30)).await.unwrap(), 0);
        assert_eq!(engine.run_decay(t0 + ChronoDuration::seconds(61)).await.unwrap(), 1);
        assert_eq!(engine.trust_record(100, 1).await.unwrap().score, 3);
    }

    #[tokio::test]
    async fn out_of_range_decay_interval_skips_only_that_guild() {
        use crate::core::moderation::moderation_models::TrustDecay;
        use crate::core::moderation::moderation_store::ConfigStore;

        let (engine, _, store) = engine();
        let mut huge = config(4);
        huge.decay = Some(TrustDecay {
            amount: 1,
            interval_seconds: u64::MAX,
        });
        assert!(engine.save_config(200, huge.clone()).await.is_err());
        // Rows written before the bound existed still load.
        store.save_config(200, &huge).await.unwrap();

        let mut cfg = config(4);
        cfg.decay = Some(TrustDecay {
            amount: 1,
            interval_seconds: 60,
        });
        engine.save_config(100, cfg).await.unwrap();
        engine.process_event(message(1, vec![])).await.unwrap();

        let t0 = Utc::now();
        assert_eq!(engine.run_decay(t0).await.unwrap(), 0);
        assert_eq!(engine.run_decay(t0 + ChronoDuration::seconds(61)).await.unwrap(), 1);
        assert_eq!(engine.trust_record(100, 1).await.unwrap().score, 3);
    }
}
