// Revocation service - staff undo for automated timeouts.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use super::action_dispatcher::ActionDispatcher;
use super::audit_log::{AuditLog, Notifier, NotifyRoute};
use super::moderation_errors::ModerationError;
use super::moderation_models::{DetectionLogEntry, LogKind, TrustSnapshot};
use super::moderation_store::ModerationStore;
use super::platform::PlatformActions;
use super::trust_service::TrustService;

#[derive(Debug, Clone)]
pub struct RevocationOutcome {
    pub entry: DetectionLogEntry,
    /// Present when trust was reset as part of the revocation.
    pub trust: Option<TrustSnapshot>,
}

pub struct RevocationService<S: ModerationStore, P: PlatformActions, N: Notifier> {
    trust: Arc<TrustService<S>>,
    dispatcher: Arc<ActionDispatcher<P>>,
    audit: Arc<AuditLog<S, N>>,
}

impl<S: ModerationStore, P: PlatformActions, N: Notifier> RevocationService<S, P, N> {
    pub fn new(
        trust: Arc<TrustService<S>>,
        dispatcher: Arc<ActionDispatcher<P>>,
        audit: Arc<AuditLog<S, N>>,
    ) -> Self {
        Self {
            trust,
            dispatcher,
            audit,
        }
    }

    /// Lift the user's timeout, optionally wiping their trust record.
    ///
    /// If the platform refuses, nothing else changes and the error is returned.
    pub async fn revoke_timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        reset_trust: bool,
        message_id: Option<u64>,
        staff_id: Option<u64>,
        route: &NotifyRoute,
    ) -> Result<RevocationOutcome, ModerationError> {
        let reason = match staff_id {
            Some(staff) => format!("Timeout revoked by <@{}>", staff),
            None => "Timeout revoked".to_string(),
        };

        self.dispatcher
            .remove_timeout(guild_id, user_id, &reason)
            .await
            .map_err(|e| ModerationError::Revocation(e.to_string()))?;

        let trust = if reset_trust {
            let snapshot = self.trust.reset(guild_id, user_id, Utc::now()).await?;
            self.audit.publish_trust(snapshot.clone());
            Some(snapshot)
        } else {
            None
        };

        let entry = DetectionLogEntry::new(guild_id, user_id, LogKind::Revocation, reason)
            .with_metadata(json!({
                "resetTrust": reset_trust,
                "messageId": message_id,
                "staffId": staff_id,
            }));
        let entry = self.audit.append(entry, route).await;

        tracing::info!(guild_id, user_id, reset_trust, "Timeout revoked");
        Ok(RevocationOutcome { entry, trust })
    }

    /// Reset trust without touching the member's platform state.
    pub async fn reset_trust(
        &self,
        guild_id: u64,
        user_id: u64,
        staff_id: Option<u64>,
        route: &NotifyRoute,
    ) -> Result<TrustSnapshot, ModerationError> {
        let snapshot = self.trust.reset(guild_id, user_id, Utc::now()).await?;
        self.audit.publish_trust(snapshot.clone());

        let reason = match staff_id {
            Some(staff) => format!("Trust reset by <@{}>", staff),
            None => "Trust reset".to_string(),
        };
        let entry = DetectionLogEntry::new(guild_id, user_id, LogKind::TrustReset, reason)
            .with_metadata(json!({ "staffId": staff_id }));
        self.audit.append(entry, route).await;

        tracing::info!(guild_id, user_id, "Trust reset");
        Ok(snapshot)
    }
}
