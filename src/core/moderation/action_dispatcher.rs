// Action dispatcher - executes punishment actions against the platform.
//
// Every platform call is bounded by a timeout. Actions that leave the member in
// the same state when repeated are retried with exponential backoff; kicks are
// attempted once. Failures are reported back, never raised, so the caller can
// audit them.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::moderation_models::PunishmentAction;
use super::platform::{PlatformActions, PlatformError};

#[derive(Debug, Clone, Copy)]
pub struct DispatchPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Values available to reason templates.
#[derive(Debug, Clone, Default)]
pub struct DispatchContext {
    pub threshold: Option<i64>,
    pub score: i64,
    pub detector: Option<String>,
}

/// Fill `{threshold}`, `{score}`, `{detector}` and `{user}` in a reason template.
pub fn render_reason(template: &str, ctx: &DispatchContext, user_id: u64) -> String {
    template
        .replace(
            "{threshold}",
            &ctx.threshold.map(|t| t.to_string()).unwrap_or_default(),
        )
        .replace("{score}", &ctx.score.to_string())
        .replace("{detector}", ctx.detector.as_deref().unwrap_or("manual"))
        .replace("{user}", &format!("<@{}>", user_id))
}

#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub kind: &'static str,
    pub reason: String,
    pub notify: bool,
    pub attempts: u32,
    pub result: Result<(), PlatformError>,
}

impl ActionOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub outcomes: Vec<ActionOutcome>,
}

impl DispatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(ActionOutcome::succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }
}

pub struct ActionDispatcher<P: PlatformActions> {
    platform: Arc<P>,
    policy: DispatchPolicy,
}

impl<P: PlatformActions> ActionDispatcher<P> {
    pub fn new(platform: Arc<P>, policy: DispatchPolicy) -> Self {
        Self { platform, policy }
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }

    /// Run `actions` in order. A failed action doesn't stop the ones after it.
    pub async fn dispatch(
        &self,
        guild_id: u64,
        user_id: u64,
        actions: &[PunishmentAction],
        ctx: &DispatchContext,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for action in actions {
            let reason = render_reason(action.reason_template(), ctx, user_id);
            let retry = action.is_idempotent();

            let (result, attempts) = match action {
                PunishmentAction::Timeout {
                    duration_seconds, ..
                } => {
                    let duration = Duration::from_secs(*duration_seconds);
                    self.run_with_retry(retry, || {
                        self.platform.timeout(guild_id, user_id, duration, &reason)
                    })
                    .await
                }
                PunishmentAction::Kick { .. } => {
                    self.run_with_retry(retry, || self.platform.kick(guild_id, user_id, &reason))
                        .await
                }
                PunishmentAction::Ban {
                    duration_seconds, ..
                } => {
                    let duration = duration_seconds.map(Duration::from_secs);
                    self.run_with_retry(retry, || {
                        self.platform.ban(guild_id, user_id, duration, &reason)
                    })
                    .await
                }
            };

            match &result {
                Ok(()) => tracing::info!(
                    guild_id,
                    user_id,
                    action = action.kind(),
                    attempts,
                    "Punishment action applied"
                ),
                Err(e) => tracing::warn!(
                    guild_id,
                    user_id,
                    action = action.kind(),
                    attempts,
                    error = %e,
                    "Punishment action failed"
                ),
            }

            report.outcomes.push(ActionOutcome {
                kind: action.kind(),
                reason,
                notify: action.notify(),
                attempts,
                result,
            });
        }

        report
    }

    /// Short circuit-breaker timeout applied on any admitted hit.
    pub async fn auto_timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        duration: Duration,
        reason: &str,
    ) -> ActionOutcome {
        let (result, attempts) = self
            .run_with_retry(true, || {
                self.platform.timeout(guild_id, user_id, duration, reason)
            })
            .await;

        ActionOutcome {
            kind: "timeout",
            reason: reason.to_string(),
            notify: false,
            attempts,
            result,
        }
    }

    /// Remove the user's recent messages in the channel the hit came from.
    pub async fn auto_delete(
        &self,
        guild_id: u64,
        user_id: u64,
        channel_id: u64,
        since: DateTime<Utc>,
    ) -> Result<u64, PlatformError> {
        let (result, _) = self
            .run_with_retry(true, || {
                self.platform
                    .purge_messages(guild_id, user_id, channel_id, since)
            })
            .await;
        result
    }

    pub async fn remove_timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<(), PlatformError> {
        let (result, _) = self
            .run_with_retry(true, || {
                self.platform.remove_timeout(guild_id, user_id, reason)
            })
            .await;
        result
    }

    /// Call `op` until it succeeds, fails permanently, or attempts run out.
    /// Returns the final result with the number of attempts made.
    async fn run_with_retry<T, F, Fut>(&self, retry: bool, mut op: F) -> (Result<T, PlatformError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        let max_attempts = if retry {
            self.policy.max_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.policy.request_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(PlatformError::TimedOut(self.policy.request_timeout)),
            };

            match result {
                Ok(value) => return (Ok(value), attempt),
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    let delay = self.backoff(attempt);
                    tracing::debug!(attempt, ?delay, error = %e, "Platform call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return (Err(e), attempt),
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.policy.base_backoff.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << (attempt - 1).min(10));
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }
}
