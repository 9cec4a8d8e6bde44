// Built-in detectors - deterministic anti-spam and anti-raid rules.
//
// Each detector reads its thresholds from its opaque config map (falling back to
// the defaults below) and reports `score` (default 1) when it fires.
// Sliding-window state lives in the detector itself, keyed by (guild, user).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::detector_pipeline::{Detector, DetectorError, DetectorRegistry};
use super::moderation_models::{
    DetectorConfig, DetectorHit, EventKind, EventPayload, InboundEvent, MAX_DETECTOR_WINDOW_SECS,
};

pub const MESSAGE_FLOOD: &str = "message_flood";
pub const DUPLICATE_CONTENT: &str = "duplicate_content";
pub const MENTION_SPAM: &str = "mention_spam";
pub const CAPS_SPAM: &str = "caps_spam";
pub const LINK_SPAM: &str = "link_spam";
pub const JOIN_RAID: &str = "join_raid";
pub const REACTION_SPAM: &str = "reaction_spam";
pub const VOICE_HOP: &str = "voice_hop";

// Samples kept per key; a window never needs more than its threshold plus one.
const MAX_SAMPLES_PER_KEY: usize = 256;
// Writes between sweeps for keys whose newest sample has left the window.
const SWEEP_EVERY: u64 = 256;

/// Registry with every built-in detector.
pub fn builtin_registry() -> DetectorRegistry {
    DetectorRegistry::new()
        .with(Arc::new(MessageFloodDetector::default()))
        .with(Arc::new(DuplicateContentDetector::default()))
        .with(Arc::new(MentionSpamDetector))
        .with(Arc::new(CapsSpamDetector))
        .with(Arc::new(LinkSpamDetector))
        .with(Arc::new(JoinRaidDetector::default()))
        .with(Arc::new(ReactionSpamDetector::default()))
        .with(Arc::new(VoiceHopDetector::default()))
}

fn score(config: &DetectorConfig) -> i64 {
    config.param_i64("score", 1)
}

/// Timestamped samples per key, pruned to the window on every write.
/// Keys that go quiet are dropped by a periodic sweep.
struct SlidingWindow<T> {
    samples: DashMap<(u64, u64), Samples<T>>,
    writes: AtomicU64,
}

struct Samples<T> {
    window: Duration,
    items: VecDeque<(DateTime<Utc>, T)>,
}

impl<T> Default for Samples<T> {
    fn default() -> Self {
        Self {
            window: Duration::zero(),
            items: VecDeque::new(),
        }
    }
}

impl<T: Clone> SlidingWindow<T> {
    fn new() -> Self {
        Self {
            samples: DashMap::new(),
            writes: AtomicU64::new(0),
        }
    }

    /// Record a sample and count the samples still inside the window that match `pred`.
    fn record_and_count(
        &self,
        key: (u64, u64),
        now: DateTime<Utc>,
        window: Duration,
        value: T,
        pred: impl Fn(&T) -> bool,
    ) -> usize {
        let count = {
            let mut entry = self.samples.entry(key).or_default();
            entry.window = window;
            entry.items.push_back((now, value));

            let cutoff = now - window;
            while entry.items.front().map_or(false, |(at, _)| *at < cutoff) {
                entry.items.pop_front();
            }
            while entry.items.len() > MAX_SAMPLES_PER_KEY {
                entry.items.pop_front();
            }

            entry.items.iter().filter(|(_, v)| pred(v)).count()
        };

        // The entry guard must be gone before retain touches the shard.
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep(now);
        }
        count
    }

    fn sweep(&self, now: DateTime<Utc>) {
        let before = self.samples.len();
        self.samples.retain(|_, samples| {
            samples
                .items
                .back()
                .map_or(false, |(at, _)| *at >= now - samples.window)
        });
        let removed = before.saturating_sub(self.samples.len());
        if removed > 0 {
            tracing::debug!(removed, "Swept idle detector windows");
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.samples.len()
    }
}

fn window(config: &DetectorConfig, default_secs: u64) -> Result<Duration, DetectorError> {
    let secs = config.param_u64("windowSeconds", default_secs);
    if !(1..=MAX_DETECTOR_WINDOW_SECS).contains(&secs) {
        return Err(DetectorError::Misconfigured(format!(
            "windowSeconds must be between 1 and {}",
            MAX_DETECTOR_WINDOW_SECS
        )));
    }
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| DetectorError::Misconfigured(format!("windowSeconds {} out of range", secs)))
}

// ============================================================================
// MESSAGE RULES
// ============================================================================

/// Too many messages too quickly.
pub struct MessageFloodDetector {
    window: SlidingWindow<()>,
}

impl Default for MessageFloodDetector {
    fn default() -> Self {
        Self {
            window: SlidingWindow::new(),
        }
    }
}

#[async_trait]
impl Detector for MessageFloodDetector {
    fn name(&self) -> &'static str {
        MESSAGE_FLOOD
    }

    fn handles(&self, kind: EventKind) -> bool {
        kind == EventKind::Message
    }

    async fn evaluate(
        &self,
        event: &InboundEvent,
        config: &DetectorConfig,
    ) -> Result<Option<DetectorHit>, DetectorError> {
        let max = config.param_u64("maxMessages", 5) as usize;
        let window_secs = config.param_u64("windowSeconds", 5);
        let count = self.window.record_and_count(
            (event.guild_id, event.user_id),
            event.timestamp,
            window(config, 5)?,
            (),
            |_| true,
        );

        if count > max {
            return Ok(Some(
                DetectorHit::new(
                    score(config),
                    format!("Sent {} messages in {} seconds", count, window_secs),
                )
                .with_metadata(json!({ "count": count, "windowSeconds": window_secs })),
            ));
        }
        Ok(None)
    }
}

/// Same message repeated within the window.
pub struct DuplicateContentDetector {
    window: SlidingWindow<u64>,
}

impl Default for DuplicateContentDetector {
    fn default() -> Self {
        Self {
            window: SlidingWindow::new(),
        }
    }
}

impl DuplicateContentDetector {
    /// Hash normalized content so trivial case/whitespace changes still count as duplicates.
    fn hash_content(content: &str) -> u64 {
        let normalized = content.trim().to_lowercase();
        let mut hasher = DefaultHasher::new();
        normalized.hash(&mut hasher);
        hasher.finish()
    }
}

#[async_trait]
impl Detector for DuplicateContentDetector {
    fn name(&self) -> &'static str {
        DUPLICATE_CONTENT
    }

    fn handles(&self, kind: EventKind) -> bool {
        kind == EventKind::Message
    }

    async fn evaluate(
        &self,
        event: &InboundEvent,
        config: &DetectorConfig,
    ) -> Result<Option<DetectorHit>, DetectorError> {
        let EventPayload::Message { content, .. } = &event.payload else {
            return Ok(None);
        };
        if content.trim().is_empty() {
            return Ok(None);
        }

        let max = config.param_u64("maxDuplicates", 3) as usize;
        let hash = Self::hash_content(content);
        let count = self.window.record_and_count(
            (event.guild_id, event.user_id),
            event.timestamp,
            window(config, 30)?,
            hash,
            |h| *h == hash,
        );

        if count > max {
            return Ok(Some(
                DetectorHit::new(
                    score(config),
                    format!("Sent the same message {} times", count),
                )
                .with_metadata(json!({ "count": count })),
            ));
        }
        Ok(None)
    }
}

/// Too many user/role mentions in one message.
pub struct MentionSpamDetector;

#[async_trait]
impl Detector for MentionSpamDetector {
    fn name(&self) -> &'static str {
        MENTION_SPAM
    }

    fn handles(&self, kind: EventKind) -> bool {
        kind == EventKind::Message
    }

    async fn evaluate(
        &self,
        event: &InboundEvent,
        config: &DetectorConfig,
    ) -> Result<Option<DetectorHit>, DetectorError> {
        let EventPayload::Message { mention_count, .. } = &event.payload else {
            return Ok(None);
        };
        let max = config.param_u64("maxMentions", 10);
        if u64::from(*mention_count) > max {
            return Ok(Some(
                DetectorHit::new(
                    score(config),
                    format!("Too many mentions in message ({})", mention_count),
                )
                .with_metadata(json!({ "mentions": mention_count })),
            ));
        }
        Ok(None)
    }
}

/// Mostly-uppercase messages.
pub struct CapsSpamDetector;

#[async_trait]
impl Detector for CapsSpamDetector {
    fn name(&self) -> &'static str {
        CAPS_SPAM
    }

    fn handles(&self, kind: EventKind) -> bool {
        kind == EventKind::Message
    }

    async fn evaluate(
        &self,
        event: &InboundEvent,
        config: &DetectorConfig,
    ) -> Result<Option<DetectorHit>, DetectorError> {
        let EventPayload::Message { content, .. } = &event.payload else {
            return Ok(None);
        };

        let ratio = config.param_f64("ratio", 0.7);
        if !(0.0..=1.0).contains(&ratio) {
            return Err(DetectorError::Misconfigured(format!(
                "caps ratio {} outside 0..1",
                ratio
            )));
        }
        let min_letters = config.param_u64("minLength", 10) as usize;

        let letters: Vec<char> = content.chars().filter(|c| c.is_alphabetic()).collect();
        if letters.len() < min_letters {
            return Ok(None);
        }
        let upper = letters.iter().filter(|c| c.is_uppercase()).count();
        let actual = upper as f64 / letters.len() as f64;

        if actual >= ratio {
            return Ok(Some(
                DetectorHit::new(
                    score(config),
                    format!("Excessive caps ({:.0}%)", actual * 100.0),
                )
                .with_metadata(json!({ "ratio": actual })),
            ));
        }
        Ok(None)
    }
}

/// Too many links, or links outside the allow-list.
pub struct LinkSpamDetector;

impl LinkSpamDetector {
    fn extract_domains(content: &str) -> Vec<String> {
        content
            .split_whitespace()
            .filter_map(|token| {
                let rest = token
                    .strip_prefix("https://")
                    .or_else(|| token.strip_prefix("http://"))?;
                let host = rest
                    .split(|c| c == '/' || c == '?' || c == '#')
                    .next()
                    .unwrap_or_default()
                    .to_lowercase();
                let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
                (!host.is_empty()).then_some(host)
            })
            .collect()
    }

    fn is_allowed(domain: &str, allowed: &[String]) -> bool {
        allowed
            .iter()
            .any(|a| domain == a || domain.ends_with(&format!(".{}", a)))
    }
}

#[async_trait]
impl Detector for LinkSpamDetector {
    fn name(&self) -> &'static str {
        LINK_SPAM
    }

    fn handles(&self, kind: EventKind) -> bool {
        kind == EventKind::Message
    }

    async fn evaluate(
        &self,
        event: &InboundEvent,
        config: &DetectorConfig,
    ) -> Result<Option<DetectorHit>, DetectorError> {
        let EventPayload::Message { content, .. } = &event.payload else {
            return Ok(None);
        };
        let domains = Self::extract_domains(content);
        if domains.is_empty() {
            return Ok(None);
        }

        let allowed = config.param_strings("allowedDomains");
        if !allowed.is_empty() {
            if let Some(bad) = domains.iter().find(|d| !Self::is_allowed(d, &allowed)) {
                return Ok(Some(
                    DetectorHit::new(score(config), format!("Link to unapproved domain {}", bad))
                        .with_metadata(json!({ "domain": bad })),
                ));
            }
        }

        let max = config.param_u64("maxLinks", 2) as usize;
        if domains.len() > max {
            return Ok(Some(
                DetectorHit::new(
                    score(config),
                    format!("Too many links in message ({})", domains.len()),
                )
                .with_metadata(json!({ "links": domains.len() })),
            ));
        }
        Ok(None)
    }
}

// ============================================================================
// ACTIVITY RULES
// ============================================================================

/// Guild-wide join bursts and freshly created accounts.
pub struct JoinRaidDetector {
    window: SlidingWindow<()>,
}

impl Default for JoinRaidDetector {
    fn default() -> Self {
        Self {
            window: SlidingWindow::new(),
        }
    }
}

#[async_trait]
impl Detector for JoinRaidDetector {
    fn name(&self) -> &'static str {
        JOIN_RAID
    }

    fn handles(&self, kind: EventKind) -> bool {
        kind == EventKind::Join
    }

    async fn evaluate(
        &self,
        event: &InboundEvent,
        config: &DetectorConfig,
    ) -> Result<Option<DetectorHit>, DetectorError> {
        let EventPayload::Join { account_created_at } = &event.payload else {
            return Ok(None);
        };

        // Keyed by guild only: a raid is many users joining, not one user joining often.
        let max = config.param_u64("maxJoins", 10) as usize;
        let window_secs = config.param_u64("windowSeconds", 10);
        let joins = self.window.record_and_count(
            (event.guild_id, 0),
            event.timestamp,
            window(config, 10)?,
            (),
            |_| true,
        );
        if joins > max {
            return Ok(Some(
                DetectorHit::new(
                    score(config),
                    format!("Join raid: {} joins in {} seconds", joins, window_secs),
                )
                .with_metadata(json!({ "joins": joins })),
            ));
        }

        let min_age = config.param_u64("minAccountAgeSeconds", 0);
        if min_age > 0 {
            if let Some(created) = account_created_at {
                let age = (event.timestamp - *created).num_seconds().max(0) as u64;
                if age < min_age {
                    return Ok(Some(
                        DetectorHit::new(
                            score(config),
                            format!("Account is only {} seconds old", age),
                        )
                        .with_metadata(json!({ "accountAgeSeconds": age })),
                    ));
                }
            }
        }
        Ok(None)
    }
}

/// Reaction flooding.
pub struct ReactionSpamDetector {
    window: SlidingWindow<()>,
}

impl Default for ReactionSpamDetector {
    fn default() -> Self {
        Self {
            window: SlidingWindow::new(),
        }
    }
}

#[async_trait]
impl Detector for ReactionSpamDetector {
    fn name(&self) -> &'static str {
        REACTION_SPAM
    }

    fn handles(&self, kind: EventKind) -> bool {
        kind == EventKind::Reaction
    }

    async fn evaluate(
        &self,
        event: &InboundEvent,
        config: &DetectorConfig,
    ) -> Result<Option<DetectorHit>, DetectorError> {
        let max = config.param_u64("maxReactions", 8) as usize;
        let count = self.window.record_and_count(
            (event.guild_id, event.user_id),
            event.timestamp,
            window(config, 5)?,
            (),
            |_| true,
        );
        if count > max {
            return Ok(Some(DetectorHit::new(
                score(config),
                format!("Added {} reactions in quick succession", count),
            )));
        }
        Ok(None)
    }
}

/// Rapidly switching voice channels.
pub struct VoiceHopDetector {
    window: SlidingWindow<()>,
}

impl Default for VoiceHopDetector {
    fn default() -> Self {
        Self {
            window: SlidingWindow::new(),
        }
    }
}

#[async_trait]
impl Detector for VoiceHopDetector {
    fn name(&self) -> &'static str {
        VOICE_HOP
    }

    fn handles(&self, kind: EventKind) -> bool {
        kind == EventKind::Voice
    }

    async fn evaluate(
        &self,
        event: &InboundEvent,
        config: &DetectorConfig,
    ) -> Result<Option<DetectorHit>, DetectorError> {
        let EventPayload::Voice { joined_channel, .. } = &event.payload else {
            return Ok(None);
        };
        // Leaving voice entirely isn't a hop.
        if joined_channel.is_none() {
            return Ok(None);
        }

        let max = config.param_u64("maxSwitches", 5) as usize;
        let count = self.window.record_and_count(
            (event.guild_id, event.user_id),
            event.timestamp,
            window(config, 30)?,
            (),
            |_| true,
        );
        if count > max {
            return Ok(Some(DetectorHit::new(
                score(config),
                format!("Switched voice channels {} times", count),
            )));
        }
        Ok(None)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn config(params: Value) -> DetectorConfig {
        DetectorConfig {
            enabled: true,
            config: params.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        }
    }

    fn message_at(content: &str, mentions: u32, at: DateTime<Utc>) -> InboundEvent {
        InboundEvent {
            event_id: None,
            guild_id: 456,
            user_id: 123,
            channel_id: Some(1),
            roles: vec![],
            payload: EventPayload::Message {
                content: content.to_string(),
                mention_count: mentions,
                attachment_count: 0,
            },
            timestamp: at,
        }
    }

    #[tokio::test]
    async fn test_normal_message_not_spam() {
        let event = message_at("Hello world!", 0, Utc::now());
        let cfg = config(json!({}));

        assert!(MentionSpamDetector.evaluate(&event, &cfg).await.unwrap().is_none());
        assert!(CapsSpamDetector.evaluate(&event, &cfg).await.unwrap().is_none());
        assert!(LinkSpamDetector.evaluate(&event, &cfg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mention_spam_detection() {
        // 11 mentions should trigger mention spam (default max is 10)
        let event = message_at("Spamming mentions!", 11, Utc::now());
        let hit = MentionSpamDetector
            .evaluate(&event, &config(json!({ "score": 4 })))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.delta, 4);
    }

    #[tokio::test]
    async fn test_rate_limit_detection() {
        let detector = MessageFloodDetector::default();
        let cfg = config(json!({}));
        let start = Utc::now();

        // Send 5 messages (should be OK)
        for i in 0..5 {
            let event = message_at(&format!("Message {}", i), 0, start);
            assert!(detector.evaluate(&event, &cfg).await.unwrap().is_none());
        }

        // 6th message should trigger rate limit
        let event = message_at("One too many!", 0, start);
        assert!(detector.evaluate(&event, &cfg).await.unwrap().is_some());

        // Outside the window the count starts over
        let later = message_at("calm again", 0, start + Duration::seconds(6));
        assert!(detector.evaluate(&later, &cfg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_window_is_misconfigured() {
        let detector = MessageFloodDetector::default();
        let cfg = config(json!({ "windowSeconds": u64::MAX }));
        let event = message_at("hi", 0, Utc::now());

        assert!(matches!(
            detector.evaluate(&event, &cfg).await,
            Err(DetectorError::Misconfigured(_))
        ));
    }

    #[test]
    fn idle_keys_are_swept() {
        let window: SlidingWindow<()> = SlidingWindow::new();
        let t0 = Utc::now();
        let five = Duration::seconds(5);

        window.record_and_count((1, 1), t0, five, (), |_| true);
        let later = t0 + Duration::hours(1);
        for _ in 0..SWEEP_EVERY {
            window.record_and_count((1, 2), later, five, (), |_| true);
        }

        assert_eq!(window.tracked_keys(), 1);
        assert_eq!(window.record_and_count((1, 2), later, five, (), |_| true), MAX_SAMPLES_PER_KEY);
    }

    #[tokio::test]
    async fn test_duplicate_message_detection() {
        let detector = DuplicateContentDetector::default();
        let cfg = config(json!({}));
        let now = Utc::now();

        // Send same message 3 times (should be OK), casing doesn't matter
        for text in ["Buy my product now!", "buy my product now!", "  BUY MY PRODUCT NOW!"] {
            let event = message_at(text, 0, now);
            assert!(detector.evaluate(&event, &cfg).await.unwrap().is_none());
        }

        // 4th duplicate should trigger spam
        let event = message_at("Buy my product now!", 0, now);
        assert!(detector.evaluate(&event, &cfg).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn caps_needs_minimum_length() {
        let cfg = config(json!({}));
        let short = message_at("OK!", 0, Utc::now());
        assert!(CapsSpamDetector.evaluate(&short, &cfg).await.unwrap().is_none());

        let shouting = message_at("WHY IS NOBODY ANSWERING ME", 0, Utc::now());
        assert!(CapsSpamDetector.evaluate(&shouting, &cfg).await.unwrap().is_some());

        let bad = config(json!({ "ratio": 3.0 }));
        assert!(CapsSpamDetector.evaluate(&shouting, &bad).await.is_err());
    }

    #[tokio::test]
    async fn links_respect_allow_list() {
        let cfg = config(json!({ "allowedDomains": ["rust-lang.org"] }));

        let fine = message_at("see https://doc.rust-lang.org/book/ for more", 0, Utc::now());
        assert!(LinkSpamDetector.evaluate(&fine, &cfg).await.unwrap().is_none());

        let bad = message_at("free nitro http://www.disc0rd-gift.ru/claim", 0, Utc::now());
        let hit = LinkSpamDetector.evaluate(&bad, &cfg).await.unwrap().unwrap();
        assert!(hit.reason.contains("disc0rd-gift.ru"));
    }

    #[tokio::test]
    async fn join_burst_is_guild_wide() {
        let detector = JoinRaidDetector::default();
        let cfg = config(json!({ "maxJoins": 2 }));
        let now = Utc::now();

        let mut hits = 0;
        for user_id in 1..=3 {
            let event = InboundEvent {
                event_id: None,
                guild_id: 9,
                user_id,
                channel_id: None,
                roles: vec![],
                payload: EventPayload::Join {
                    account_created_at: None,
                },
                timestamp: now,
            };
            if detector.evaluate(&event, &cfg).await.unwrap().is_some() {
                hits += 1;
            }
        }
        assert_eq!(hits, 1);
    }

    #[tokio::test]
    async fn young_accounts_are_flagged() {
        let detector = JoinRaidDetector::default();
        let cfg = config(json!({ "minAccountAgeSeconds": 3600 }));
        let now = Utc::now();
        let event = InboundEvent {
            event_id: None,
            guild_id: 9,
            user_id: 1,
            channel_id: None,
            roles: vec![],
            payload: EventPayload::Join {
                account_created_at: Some(now - Duration::minutes(5)),
            },
            timestamp: now,
        };
        assert!(detector.evaluate(&event, &cfg).await.unwrap().is_some());
    }

    #[test]
    fn builtin_registry_has_every_detector() {
        let names = builtin_registry().names();
        for expected in [
            MESSAGE_FLOOD,
            DUPLICATE_CONTENT,
            MENTION_SPAM,
            CAPS_SPAM,
            LINK_SPAM,
            JOIN_RAID,
            REACTION_SPAM,
            VOICE_HOP,
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
    }
}
