// Detector pipeline - runs every enabled detector against one event.
//
// Detectors are independent strategies behind a single trait. Each one runs in its
// own task so they execute concurrently and a panicking detector can't take the
// others down with it. Failures count as "no delta".

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use super::exclusion::is_excluded;
use super::moderation_models::{
    DetectorConfig, DetectorHit, EventKind, GuildModerationConfig, InboundEvent, ScoreDelta,
};

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Detector misconfigured: {0}")]
    Misconfigured(String),

    #[error("Detector failed: {0}")]
    Failed(String),
}

/// A pluggable rule that inspects one event and optionally reports a score delta.
#[async_trait]
pub trait Detector: Send + Sync + 'static {
    /// Key used in `GuildModerationConfig::detectors`.
    fn name(&self) -> &'static str;

    /// Event kinds this detector cares about. Others are skipped without spawning a task.
    fn handles(&self, kind: EventKind) -> bool;

    async fn evaluate(
        &self,
        event: &InboundEvent,
        config: &DetectorConfig,
    ) -> Result<Option<DetectorHit>, DetectorError>;
}

/// Name -> detector, kept in registration order so results are deterministic.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a detector, replacing any existing one with the same name.
    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        if let Some(slot) = self
            .detectors
            .iter_mut()
            .find(|existing| existing.name() == detector.name())
        {
            *slot = detector;
        } else {
            self.detectors.push(detector);
        }
    }

    pub fn with(mut self, detector: Arc<dyn Detector>) -> Self {
        self.register(detector);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Detector>> {
        self.detectors.iter()
    }
}

pub struct DetectorPipeline {
    registry: DetectorRegistry,
}

impl DetectorPipeline {
    pub fn new(registry: DetectorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    /// Run all enabled detectors concurrently and collect their non-zero deltas.
    ///
    /// Each detector sees the union of the guild exclusions and its own overrides.
    pub async fn evaluate(
        &self,
        event: Arc<InboundEvent>,
        config: &GuildModerationConfig,
    ) -> Vec<ScoreDelta> {
        let kind = event.kind();
        let mut running = Vec::new();

        for detector in self.registry.iter() {
            let Some(detector_config) = config.detectors.get(detector.name()) else {
                continue;
            };
            if !detector_config.enabled || !detector.handles(kind) {
                continue;
            }
            if is_excluded(
                &config.exclusions,
                detector_config.exclusions.as_ref(),
                &event.roles,
                event.channel_id,
                event.user_id,
            ) {
                tracing::debug!(
                    detector = detector.name(),
                    user_id = event.user_id,
                    "Detector skipped by exclusion"
                );
                continue;
            }

            let name = detector.name();
            let detector = Arc::clone(detector);
            let event = Arc::clone(&event);
            let detector_config = detector_config.clone();
            running.push((
                name,
                tokio::spawn(async move { detector.evaluate(&event, &detector_config).await }),
            ));
        }

        let mut deltas = Vec::new();
        for (name, handle) in running {
            match handle.await {
                Ok(Ok(Some(hit))) if hit.delta != 0 => deltas.push(ScoreDelta {
                    detector: name.to_string(),
                    delta: hit.delta,
                    reason: hit.reason,
                    metadata: hit.metadata,
                }),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(detector = name, error = %e, "Detector failed, treating as no delta");
                }
                Err(e) if e.is_panic() => {
                    tracing::warn!(detector = name, "Detector panicked, treating as no delta");
                }
                Err(e) => {
                    tracing::warn!(detector = name, error = %e, "Detector task cancelled");
                }
            }
        }
        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::{EventPayload, ExclusionSet};
    use chrono::Utc;

    struct Fixed(&'static str, i64);

    #[async_trait]
    impl Detector for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        fn handles(&self, kind: EventKind) -> bool {
            kind == EventKind::Message
        }

        async fn evaluate(
            &self,
            _event: &InboundEvent,
            _config: &DetectorConfig,
        ) -> Result<Option<DetectorHit>, DetectorError> {
            Ok(Some(DetectorHit::new(self.1, format!("{} hit", self.0))))
        }
    }

    struct Panicky;

    #[async_trait]
    impl Detector for Panicky {
        fn name(&self) -> &'static str {
            "panicky"
        }

        fn handles(&self, _kind: EventKind) -> bool {
            true
        }

        async fn evaluate(
            &self,
            _event: &InboundEvent,
            _config: &DetectorConfig,
        ) -> Result<Option<DetectorHit>, DetectorError> {
            panic!("boom");
        }
    }

    struct Failing;

    #[async_trait]
    impl Detector for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn handles(&self, _kind: EventKind) -> bool {
            true
        }

        async fn evaluate(
            &self,
            _event: &InboundEvent,
            _config: &DetectorConfig,
        ) -> Result<Option<DetectorHit>, DetectorError> {
            Err(DetectorError::Failed("upstream list unavailable".into()))
        }
    }

    fn message() -> Arc<InboundEvent> {
        Arc::new(InboundEvent {
            event_id: Some(1),
            guild_id: 10,
            user_id: 20,
            channel_id: Some(30),
            roles: vec![40],
            payload: EventPayload::Message {
                content: "hello".into(),
                mention_count: 0,
                attachment_count: 0,
            },
            timestamp: Utc::now(),
        })
    }

    fn enable(config: &mut GuildModerationConfig, name: &str) {
        config.detectors.insert(
            name.to_string(),
            DetectorConfig {
                enabled: true,
                ..Default::default()
            },
        );
    }

    #[tokio::test]
    async fn failing_and_panicking_detectors_are_isolated() {
        let registry = DetectorRegistry::new()
            .with(Arc::new(Fixed("first", 2)))
            .with(Arc::new(Panicky))
            .with(Arc::new(Failing))
            .with(Arc::new(Fixed("second", 3)));
        let pipeline = DetectorPipeline::new(registry);

        let mut config = GuildModerationConfig::default();
        for name in ["first", "panicky", "failing", "second"] {
            enable(&mut config, name);
        }

        let deltas = pipeline.evaluate(message(), &config).await;
        let names: Vec<_> = deltas.iter().map(|d| d.detector.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(deltas.iter().map(|d| d.delta).sum::<i64>(), 5);
    }

    #[tokio::test]
    async fn disabled_and_unconfigured_detectors_do_not_run() {
        let registry = DetectorRegistry::new()
            .with(Arc::new(Fixed("on", 1)))
            .with(Arc::new(Fixed("off", 1)))
            .with(Arc::new(Fixed("missing", 1)));
        let pipeline = DetectorPipeline::new(registry);

        let mut config = GuildModerationConfig::default();
        enable(&mut config, "on");
        config
            .detectors
            .insert("off".to_string(), DetectorConfig::default());

        let deltas = pipeline.evaluate(message(), &config).await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].detector, "on");
    }

    #[tokio::test]
    async fn detector_override_excludes_only_that_detector() {
        let registry = DetectorRegistry::new()
            .with(Arc::new(Fixed("a", 1)))
            .with(Arc::new(Fixed("b", 1)));
        let pipeline = DetectorPipeline::new(registry);

        let mut config = GuildModerationConfig::default();
        enable(&mut config, "a");
        enable(&mut config, "b");
        config.detectors.get_mut("b").unwrap().exclusions = Some(ExclusionSet {
            excluded_channels: [30].into_iter().collect(),
            ..Default::default()
        });

        let deltas = pipeline.evaluate(message(), &config).await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].detector, "a");
    }

    #[tokio::test]
    async fn guild_exclusions_apply_inside_the_pipeline() {
        let pipeline = DetectorPipeline::new(DetectorRegistry::new().with(Arc::new(Fixed("a", 1))));

        let mut config = GuildModerationConfig::default();
        enable(&mut config, "a");
        config.detectors.get_mut("a").unwrap().exclusions = Some(ExclusionSet::default());
        config.exclusions.excluded_roles.insert(40);

        assert!(pipeline.evaluate(message(), &config).await.is_empty());
    }

    #[test]
    fn register_replaces_same_name() {
        let registry = DetectorRegistry::new()
            .with(Arc::new(Fixed("x", 1)))
            .with(Arc::new(Fixed("x", 9)));
        assert_eq!(registry.names().len(), 1);
        assert_eq!(registry.names(), vec!["x"]);
    }
}
