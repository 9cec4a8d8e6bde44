// Moderation domain models - guild config, trust state, audit entries and inbound events.
//
// These are pure domain types with no Discord dependencies.
// Field names serialize as camelCase because the dashboard reads them directly.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use super::moderation_errors::ModerationError;
use super::snowflake;

/// Newest-first history is capped at this many entries per user.
pub const MAX_HISTORY_ENTRIES: usize = 200;
/// Platform limit for a single timeout (28 days).
pub const MAX_TIMEOUT_SECS: u64 = 28 * 24 * 60 * 60;
/// Bulk message deletion only works on messages younger than 14 days.
pub const MAX_AUTO_DELETE_WINDOW_SECS: u64 = 14 * 24 * 60 * 60;
/// Longest accepted per-rule cooldown (30 days).
pub const MAX_RULE_COOLDOWN_SECS: u64 = 30 * 24 * 60 * 60;
/// Longest sliding window a detector may be configured with (1 day).
pub const MAX_DETECTOR_WINDOW_SECS: u64 = 24 * 60 * 60;
/// Longest accepted decay interval (1 year).
pub const MAX_DECAY_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Roles, channels and users exempt from scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExclusionSet {
    #[serde(default, with = "snowflake::set")]
    pub excluded_roles: BTreeSet<u64>,
    #[serde(default, with = "snowflake::set")]
    pub excluded_channels: BTreeSet<u64>,
    #[serde(default, with = "snowflake::set")]
    pub excluded_users: BTreeSet<u64>,
}

/// Per-detector settings. `config` is opaque to the engine and only read by the detector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectorConfig {
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
    /// Minimum seconds between two score-affecting hits of this rule for one user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<u64>,
    /// Maximum score-affecting hits of this rule per user per day.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_day: Option<u32>,
    /// Layered on top of the guild exclusions (either layer can exclude).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusions: Option<ExclusionSet>,
}

impl DetectorConfig {
    pub fn limits(&self) -> RuleLimits {
        RuleLimits {
            cooldown_seconds: self.cooldown_seconds,
            max_per_day: self.max_per_day,
        }
    }

    pub fn param_u64(&self, key: &str, default: u64) -> u64 {
        self.config
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or(default)
    }

    pub fn param_i64(&self, key: &str, default: i64) -> i64 {
        self.config
            .get(key)
            .and_then(Value::as_i64)
            .unwrap_or(default)
    }

    pub fn param_f64(&self, key: &str, default: f64) -> f64 {
        self.config
            .get(key)
            .and_then(Value::as_f64)
            .unwrap_or(default)
    }

    pub fn param_strings(&self, key: &str) -> Vec<String> {
        self.config
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.to_lowercase())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Cooldown and daily cap for one rule. Both are optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleLimits {
    pub cooldown_seconds: Option<u64>,
    pub max_per_day: Option<u32>,
}

impl RuleLimits {
    pub fn is_unlimited(&self) -> bool {
        self.cooldown_seconds.is_none() && self.max_per_day.is_none()
    }
}

/// One step on the punishment ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PunishmentAction {
    #[serde(rename_all = "camelCase")]
    Timeout {
        duration_seconds: u64,
        reason_template: String,
        #[serde(default)]
        notify: bool,
    },
    #[serde(rename_all = "camelCase")]
    Kick {
        reason_template: String,
        #[serde(default)]
        notify: bool,
    },
    #[serde(rename_all = "camelCase")]
    Ban {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_seconds: Option<u64>,
        reason_template: String,
        #[serde(default)]
        notify: bool,
    },
}

impl PunishmentAction {
    pub fn kind(&self) -> &'static str {
        match self {
            PunishmentAction::Timeout { .. } => "timeout",
            PunishmentAction::Kick { .. } => "kick",
            PunishmentAction::Ban { .. } => "ban",
        }
    }

    pub fn reason_template(&self) -> &str {
        match self {
            PunishmentAction::Timeout {
                reason_template, ..
            }
            | PunishmentAction::Kick {
                reason_template, ..
            }
            | PunishmentAction::Ban {
                reason_template, ..
            } => reason_template,
        }
    }

    pub fn notify(&self) -> bool {
        match self {
            PunishmentAction::Timeout { notify, .. }
            | PunishmentAction::Kick { notify, .. }
            | PunishmentAction::Ban { notify, .. } => *notify,
        }
    }

    /// Repeating a timeout or ban leaves the member in the same state, so those are retried.
    pub fn is_idempotent(&self) -> bool {
        !matches!(self, PunishmentAction::Kick { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PunishmentThreshold {
    pub threshold: i64,
    pub actions: Vec<PunishmentAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoTimeout {
    pub enabled: bool,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoDelete {
    pub enabled: bool,
    pub window_seconds: u64,
}

/// Optional automatic decay: every `interval_seconds`, positive scores drop by `amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustDecay {
    pub amount: i64,
    pub interval_seconds: u64,
}

/// Everything the engine needs to know about one guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildModerationConfig {
    pub enabled: bool,
    #[serde(default)]
    pub detectors: BTreeMap<String, DetectorConfig>,
    #[serde(default)]
    pub punishments: Vec<PunishmentThreshold>,
    #[serde(flatten)]
    pub exclusions: ExclusionSet,
    #[serde(default, with = "snowflake::option")]
    pub log_channel_id: Option<u64>,
    #[serde(default)]
    pub notify_webhook_url: Option<String>,
    #[serde(default)]
    pub auto_timeout: AutoTimeout,
    #[serde(default)]
    pub auto_delete: AutoDelete,
    /// IANA zone used for the daily cap bucket. UTC when unset.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub decay: Option<TrustDecay>,
    #[serde(default)]
    pub version: u64,
}

impl Default for GuildModerationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detectors: BTreeMap::new(),
            punishments: Vec::new(),
            exclusions: ExclusionSet::default(),
            log_channel_id: None,
            notify_webhook_url: None,
            auto_timeout: AutoTimeout {
                enabled: false,
                duration_seconds: 60,
            },
            auto_delete: AutoDelete {
                enabled: false,
                window_seconds: 60,
            },
            timezone: None,
            decay: None,
            version: 0,
        }
    }
}

impl GuildModerationConfig {
    /// Make sure every known detector shows up (disabled) so the dashboard can list it.
    pub fn fill_detectors<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            self.detectors.entry(name.to_string()).or_default();
        }
    }

    /// Timezone for day buckets. Unknown names were rejected by `validate`, so fall back to UTC.
    pub fn tz(&self) -> Tz {
        self.timezone
            .as_deref()
            .and_then(|name| name.parse::<Tz>().ok())
            .unwrap_or(Tz::UTC)
    }

    /// Reject configs the engine can't act on. Runs on every settings write.
    pub fn validate(&self, known_detectors: &[&str]) -> Result<(), ModerationError> {
        let mut seen = HashSet::new();
        for rule in &self.punishments {
            if rule.threshold <= 0 {
                return Err(ModerationError::Config(format!(
                    "threshold {} must be positive",
                    rule.threshold
                )));
            }
            if !seen.insert(rule.threshold) {
                return Err(ModerationError::Config(format!(
                    "duplicate threshold {}",
                    rule.threshold
                )));
            }
            if rule.actions.is_empty() {
                return Err(ModerationError::Config(format!(
                    "threshold {} has no actions",
                    rule.threshold
                )));
            }
            for action in &rule.actions {
                match action {
                    PunishmentAction::Timeout {
                        duration_seconds, ..
                    } => validate_timeout(*duration_seconds)?,
                    PunishmentAction::Ban {
                        duration_seconds: Some(secs),
                        ..
                    } if *secs == 0 || *secs > MAX_TIMEOUT_SECS => {
                        return Err(ModerationError::Config(format!(
                            "ban duration must be between 1 and {} seconds",
                            MAX_TIMEOUT_SECS
                        )));
                    }
                    _ => {}
                }
            }
        }

        for (name, detector) in &self.detectors {
            if !known_detectors.contains(&name.as_str()) {
                return Err(ModerationError::Config(format!(
                    "unknown detector '{}'",
                    name
                )));
            }
            if detector
                .cooldown_seconds
                .map_or(false, |secs| secs > MAX_RULE_COOLDOWN_SECS)
            {
                return Err(ModerationError::Config(format!(
                    "{}: cooldown must be at most {} seconds",
                    name, MAX_RULE_COOLDOWN_SECS
                )));
            }
            if let Some(raw) = detector.config.get("windowSeconds") {
                if !raw
                    .as_u64()
                    .map_or(false, |secs| (1..=MAX_DETECTOR_WINDOW_SECS).contains(&secs))
                {
                    return Err(ModerationError::Config(format!(
                        "{}: windowSeconds must be between 1 and {}",
                        name, MAX_DETECTOR_WINDOW_SECS
                    )));
                }
            }
        }

        if self.auto_timeout.enabled {
            validate_timeout(self.auto_timeout.duration_seconds)?;
        }
        if self.auto_delete.enabled
            && (self.auto_delete.window_seconds == 0
                || self.auto_delete.window_seconds > MAX_AUTO_DELETE_WINDOW_SECS)
        {
            return Err(ModerationError::Config(format!(
                "auto-delete window must be between 1 and {} seconds",
                MAX_AUTO_DELETE_WINDOW_SECS
            )));
        }

        if let Some(name) = &self.timezone {
            if name.parse::<Tz>().is_err() {
                return Err(ModerationError::Config(format!(
                    "unknown timezone '{}'",
                    name
                )));
            }
        }

        if let Some(url) = &self.notify_webhook_url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(ModerationError::Config(
                    "webhook url must be http(s)".to_string(),
                ));
            }
        }

        if let Some(decay) = &self.decay {
            if decay.amount <= 0 || decay.interval_seconds == 0 {
                return Err(ModerationError::Config(
                    "decay amount and interval must be positive".to_string(),
                ));
            }
            if decay.interval_seconds > MAX_DECAY_INTERVAL_SECS {
                return Err(ModerationError::Config(format!(
                    "decay interval must be at most {} seconds",
                    MAX_DECAY_INTERVAL_SECS
                )));
            }
        }

        Ok(())
    }
}

fn validate_timeout(secs: u64) -> Result<(), ModerationError> {
    if secs == 0 || secs > MAX_TIMEOUT_SECS {
        return Err(ModerationError::Config(format!(
            "timeout duration must be between 1 and {} seconds",
            MAX_TIMEOUT_SECS
        )));
    }
    Ok(())
}

// ============================================================================
// TRUST STATE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustHistoryEntry {
    pub delta: i64,
    pub reason: String,
    #[serde(default)]
    pub detector: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Where a user sits in the escalation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrustState {
    Clean,
    Flagged,
    Sanctioned,
}

/// Accumulated badness for one user in one guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTrustRecord {
    pub guild_id: u64,
    pub user_id: u64,
    pub score: i64,
    pub last_updated: DateTime<Utc>,
    /// Newest first, capped at `MAX_HISTORY_ENTRIES`.
    #[serde(default)]
    pub history: VecDeque<TrustHistoryEntry>,
    /// Thresholds already acted on in the current escalation epoch.
    #[serde(default)]
    pub fired_thresholds: BTreeSet<i64>,
}

impl UserTrustRecord {
    pub fn new(guild_id: u64, user_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            guild_id,
            user_id,
            score: 0,
            last_updated: now,
            history: VecDeque::new(),
            fired_thresholds: BTreeSet::new(),
        }
    }

    pub fn push_history(&mut self, entry: TrustHistoryEntry) {
        self.history.push_front(entry);
        self.history.truncate(MAX_HISTORY_ENTRIES);
    }

    /// Start a fresh escalation epoch.
    pub fn clear(&mut self, now: DateTime<Utc>) {
        self.score = 0;
        self.history.clear();
        self.fired_thresholds.clear();
        self.last_updated = now;
    }

    pub fn state(&self) -> TrustState {
        if !self.fired_thresholds.is_empty() {
            TrustState::Sanctioned
        } else if self.score > 0 {
            TrustState::Flagged
        } else {
            TrustState::Clean
        }
    }

    pub fn snapshot(&self) -> TrustSnapshot {
        TrustSnapshot {
            guild_id: self.guild_id,
            user_id: self.user_id,
            score: self.score,
            state: self.state(),
            fired_thresholds: self.fired_thresholds.iter().copied().collect(),
            last_updated: self.last_updated,
        }
    }
}

/// Compact view of a trust record for the trust table and the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustSnapshot {
    pub guild_id: u64,
    pub user_id: u64,
    pub score: i64,
    pub state: TrustState,
    pub fired_thresholds: Vec<i64>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub guild_id: u64,
    pub user_id: u64,
    pub rule: String,
}

impl CooldownKey {
    pub fn new(guild_id: u64, user_id: u64, rule: &str) -> Self {
        Self {
            guild_id,
            user_id,
            rule: rule.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownState {
    pub last_fired_at: DateTime<Utc>,
    pub count_today: u32,
    pub day_bucket: NaiveDate,
}

// ============================================================================
// AUDIT LOG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogKind {
    Detection,
    Punishment,
    AutoTimeout,
    AutoDelete,
    ManualAction,
    ActionFailed,
    Revocation,
    TrustReset,
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogKind::Detection => write!(f, "Detection"),
            LogKind::Punishment => write!(f, "Punishment"),
            LogKind::AutoTimeout => write!(f, "Auto Timeout"),
            LogKind::AutoDelete => write!(f, "Auto Delete"),
            LogKind::ManualAction => write!(f, "Manual Action"),
            LogKind::ActionFailed => write!(f, "Action Failed"),
            LogKind::Revocation => write!(f, "Revocation"),
            LogKind::TrustReset => write!(f, "Trust Reset"),
        }
    }
}

/// One immutable audit record. `isTimedOut` is never stored; it is added when read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionLogEntry {
    pub id: String,
    pub guild_id: u64,
    pub user_id: u64,
    pub kind: LogKind,
    #[serde(default)]
    pub event_id: Option<u64>,
    #[serde(default)]
    pub channel_id: Option<u64>,
    #[serde(default)]
    pub detector: Option<String>,
    pub score_delta: i64,
    #[serde(default)]
    pub score_after: Option<i64>,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

impl DetectionLogEntry {
    pub fn new(guild_id: u64, user_id: u64, kind: LogKind, reason: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            guild_id,
            user_id,
            kind,
            event_id: None,
            channel_id: None,
            detector: None,
            score_delta: 0,
            score_after: None,
            reason: reason.into(),
            timestamp: Utc::now(),
            metadata: Value::Null,
        }
    }

    pub fn for_event(event: &InboundEvent, kind: LogKind, reason: impl Into<String>) -> Self {
        let mut entry = Self::new(event.guild_id, event.user_id, kind, reason);
        entry.event_id = event.event_id;
        entry.channel_id = event.channel_id;
        entry.timestamp = event.timestamp;
        entry
    }

    pub fn with_detector(mut self, detector: Option<&str>) -> Self {
        self.detector = detector.map(str::to_string);
        self
    }

    pub fn with_score(mut self, delta: i64, after: Option<i64>) -> Self {
        self.score_delta = delta;
        self.score_after = after;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Everything pushed to live subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ModerationEvent {
    Log(DetectionLogEntry),
    Trust(TrustSnapshot),
}

impl ModerationEvent {
    pub fn guild_id(&self) -> u64 {
        match self {
            ModerationEvent::Log(entry) => entry.guild_id,
            ModerationEvent::Trust(snapshot) => snapshot.guild_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModerationEvent::Log(_) => "log",
            ModerationEvent::Trust(_) => "trust",
        }
    }
}

// ============================================================================
// INBOUND EVENTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Message,
    Reaction,
    Voice,
    Join,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventPayload {
    #[serde(rename_all = "camelCase")]
    Message {
        content: String,
        mention_count: u32,
        attachment_count: u32,
    },
    #[serde(rename_all = "camelCase")]
    Reaction { message_id: u64, emoji: String },
    #[serde(rename_all = "camelCase")]
    Voice {
        joined_channel: Option<u64>,
        left_channel: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Join {
        account_created_at: Option<DateTime<Utc>>,
    },
}

/// One user action, already stripped of platform types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    #[serde(default)]
    pub event_id: Option<u64>,
    pub guild_id: u64,
    pub user_id: u64,
    #[serde(default)]
    pub channel_id: Option<u64>,
    #[serde(default)]
    pub roles: Vec<u64>,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::Message { .. } => EventKind::Message,
            EventPayload::Reaction { .. } => EventKind::Reaction,
            EventPayload::Voice { .. } => EventKind::Voice,
            EventPayload::Join { .. } => EventKind::Join,
        }
    }
}

// ============================================================================
// PIPELINE RESULTS
// ============================================================================

/// What a single detector reports for one event.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorHit {
    pub delta: i64,
    pub reason: String,
    pub metadata: Value,
}

impl DetectorHit {
    pub fn new(delta: i64, reason: impl Into<String>) -> Self {
        Self {
            delta,
            reason: reason.into(),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A detector hit tagged with the detector that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreDelta {
    pub detector: String,
    pub delta: i64,
    pub reason: String,
    pub metadata: Value,
}

/// Result of crossing one or more thresholds in a single update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PunishmentDecision {
    pub threshold: i64,
    /// Lower thresholds marked fired alongside `threshold` without dispatching their actions.
    pub subsumed: Vec<i64>,
    pub actions: Vec<PunishmentAction>,
    pub score: i64,
}
