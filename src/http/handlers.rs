//! Dashboard handlers. Every guild route checks the staff token's guild list first.

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};

use super::auth::StaffContext;
use super::error::AppResult;
use super::AppState;
use crate::core::moderation::snowflake::{self, de_id};
use crate::core::moderation::{
    DetectionLogEntry, GuildModerationConfig, LogView, ModerationEvent, PunishmentAction,
    TrustSnapshot, UserTrustRecord,
};

const DEFAULT_LOG_LIMIT: usize = 50;
const MAX_LOG_LIMIT: usize = 500;

// ============================================================================
// HEALTH
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: i64,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().timestamp(),
    })
}

// ============================================================================
// SETTINGS
// ============================================================================

pub async fn get_settings(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(guild_id): Path<u64>,
) -> AppResult<Json<GuildModerationConfig>> {
    staff.authorize(guild_id)?;
    Ok(Json(state.engine.get_config(guild_id).await?))
}

/// Replace the guild's settings. Invalid configs are rejected whole.
pub async fn save_settings(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(guild_id): Path<u64>,
    Json(config): Json<GuildModerationConfig>,
) -> AppResult<Json<GuildModerationConfig>> {
    staff.authorize(guild_id)?;
    let saved = state.engine.save_config(guild_id, config).await?;
    tracing::info!(guild_id, staff_id = ?staff.staff_id, version = saved.version, "Settings updated from dashboard");
    Ok(Json(saved))
}

// ============================================================================
// LOGS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
    pub before: Option<DateTime<Utc>>,
}

pub async fn list_logs(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(guild_id): Path<u64>,
    Query(query): Query<LogsQuery>,
) -> AppResult<Json<Vec<LogView>>> {
    staff.authorize(guild_id)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);
    Ok(Json(
        state.engine.list_logs(guild_id, limit, query.before).await?,
    ))
}

// ============================================================================
// TRUST
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustQuery {
    #[serde(default, deserialize_with = "snowflake::option::deserialize")]
    pub user_id: Option<u64>,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum TrustResponse {
    Record(UserTrustRecord),
    List(Vec<TrustSnapshot>),
}

/// One member's full record, or the whole guild's snapshots when no user is given.
pub async fn get_trust(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(guild_id): Path<u64>,
    Query(query): Query<TrustQuery>,
) -> AppResult<Json<TrustResponse>> {
    staff.authorize(guild_id)?;
    let response = match query.user_id {
        Some(user_id) => TrustResponse::Record(state.engine.trust_record(guild_id, user_id).await?),
        None => TrustResponse::List(state.engine.list_trust(guild_id).await?),
    };
    Ok(Json(response))
}

// ============================================================================
// STAFF ACTIONS
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    #[serde(deserialize_with = "de_id")]
    pub user_id: u64,
    pub action: PunishmentAction,
}

pub async fn manual_action(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(guild_id): Path<u64>,
    Json(req): Json<ActionRequest>,
) -> AppResult<Json<DetectionLogEntry>> {
    staff.authorize(guild_id)?;
    let entry = state
        .engine
        .manual_action(guild_id, req.user_id, req.action, staff.staff_id)
        .await?;
    Ok(Json(entry))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    #[serde(deserialize_with = "de_id")]
    pub user_id: u64,
    #[serde(default)]
    pub reset_trust: bool,
    #[serde(default, deserialize_with = "snowflake::option::deserialize")]
    pub message_id: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeResponse {
    pub entry: DetectionLogEntry,
    pub trust: Option<TrustSnapshot>,
}

pub async fn revoke(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(guild_id): Path<u64>,
    Json(req): Json<RevokeRequest>,
) -> AppResult<Json<RevokeResponse>> {
    staff.authorize(guild_id)?;
    let outcome = state
        .engine
        .revoke_timeout(
            guild_id,
            req.user_id,
            req.reset_trust,
            req.message_id,
            staff.staff_id,
        )
        .await?;
    Ok(Json(RevokeResponse {
        entry: outcome.entry,
        trust: outcome.trust,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetTrustRequest {
    #[serde(deserialize_with = "de_id")]
    pub user_id: u64,
}

pub async fn reset_trust(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(guild_id): Path<u64>,
    Json(req): Json<ResetTrustRequest>,
) -> AppResult<Json<TrustSnapshot>> {
    staff.authorize(guild_id)?;
    Ok(Json(
        state
            .engine
            .reset_trust(guild_id, req.user_id, staff.staff_id)
            .await?,
    ))
}

// ============================================================================
// LIVE EVENTS
// ============================================================================

/// Live log and trust updates for one guild as server-sent events.
pub async fn events(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(guild_id): Path<u64>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    staff.authorize(guild_id)?;
    let rx = state.engine.subscribe();
    tracing::debug!(guild_id, staff_id = ?staff.staff_id, "Dashboard subscribed to events");
    Ok(Sse::new(guild_events(rx, guild_id)).keep_alive(KeepAlive::default()))
}

fn guild_events(
    rx: broadcast::Receiver<ModerationEvent>,
    guild_id: u64,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) if event.guild_id() == guild_id => {
                    let sse = Event::default().event(event.name()).json_data(&event);
                    return Some((sse, rx));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(guild_id, skipped, "Event subscriber lagged, dropping oldest");
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::{LogKind, ModerationEvent};
    use futures::StreamExt;

    #[tokio::test]
    async fn event_stream_only_carries_the_requested_guild() {
        let (tx, rx) = broadcast::channel(16);
        let mut events = Box::pin(guild_events(rx, 1));

        tx.send(ModerationEvent::Log(DetectionLogEntry::new(2, 7, LogKind::Detection, "other guild")))
            .unwrap();
        tx.send(ModerationEvent::Log(DetectionLogEntry::new(1, 7, LogKind::Detection, "ours")))
            .unwrap();
        drop(tx);

        assert!(events.next().await.unwrap().is_ok());
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn lagged_subscriber_keeps_streaming() {
        let (tx, rx) = broadcast::channel(2);
        let mut events = Box::pin(guild_events(rx, 1));

        for i in 0..5 {
            tx.send(ModerationEvent::Log(DetectionLogEntry::new(1, i, LogKind::Detection, "hit")))
                .unwrap();
        }
        drop(tx);

        let mut received = 0;
        while let Some(event) = events.next().await {
            assert!(event.is_ok());
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[test]
    fn ids_accept_strings_and_numbers() {
        let req: RevokeRequest =
            serde_json::from_str(r#"{"userId":"1234567890123456789","messageId":5}"#).unwrap();
        assert_eq!(req.user_id, 1234567890123456789);
        assert_eq!(req.message_id, Some(5));
        assert!(!req.reset_trust);

        let req: ResetTrustRequest = serde_json::from_str(r#"{"userId":42}"#).unwrap();
        assert_eq!(req.user_id, 42);

        assert!(serde_json::from_str::<ResetTrustRequest>(r#"{"userId":"abc"}"#).is_err());
    }
}
