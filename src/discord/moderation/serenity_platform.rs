// Platform actions over the Discord HTTP API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

use crate::core::moderation::{PlatformActions, PlatformError};

/// Discord can bulk-delete at most 100 messages per request.
const PURGE_FETCH_LIMIT: u8 = 100;

pub struct SerenityPlatform {
    http: Arc<serenity::Http>,
}

impl SerenityPlatform {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

fn map_error(err: serenity::Error) -> PlatformError {
    if let serenity::Error::Http(http_err) = &err {
        match http_err.status_code().map(|s| s.as_u16()) {
            Some(403) => return PlatformError::MissingPermissions(err.to_string()),
            Some(404) => return PlatformError::NotFound(err.to_string()),
            _ => {}
        }
    }
    PlatformError::Http(err.to_string())
}

fn timestamp_after(duration: Duration) -> Result<serenity::Timestamp, PlatformError> {
    serenity::Timestamp::from_unix_timestamp(Utc::now().timestamp() + duration.as_secs() as i64)
        .map_err(|e| PlatformError::Http(format!("invalid timeout timestamp: {}", e)))
}

#[async_trait]
impl PlatformActions for SerenityPlatform {
    async fn timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        duration: Duration,
        reason: &str,
    ) -> Result<(), PlatformError> {
        let until = timestamp_after(duration)?;
        serenity::GuildId::new(guild_id)
            .edit_member(
                &self.http,
                serenity::UserId::new(user_id),
                serenity::EditMember::new()
                    .disable_communication_until_datetime(until)
                    .audit_log_reason(reason),
            )
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn remove_timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<(), PlatformError> {
        serenity::GuildId::new(guild_id)
            .edit_member(
                &self.http,
                serenity::UserId::new(user_id),
                serenity::EditMember::new()
                    .enable_communication()
                    .audit_log_reason(reason),
            )
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), PlatformError> {
        serenity::GuildId::new(guild_id)
            .kick_with_reason(&self.http, serenity::UserId::new(user_id), reason)
            .await
            .map_err(map_error)
    }

    async fn ban(
        &self,
        guild_id: u64,
        user_id: u64,
        duration: Option<Duration>,
        reason: &str,
    ) -> Result<(), PlatformError> {
        let guild = serenity::GuildId::new(guild_id);
        let user = serenity::UserId::new(user_id);
        guild
            .ban_with_reason(&self.http, user, 0, reason)
            .await
            .map_err(map_error)?;

        // Discord has no temporary bans; lift it ourselves. Lost on restart.
        if let Some(duration) = duration {
            let http = Arc::clone(&self.http);
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                match guild.unban(&http, user).await {
                    Ok(()) => tracing::info!(guild_id, user_id, "Temporary ban lifted"),
                    Err(e) => tracing::warn!(guild_id, user_id, error = %e, "Failed to lift temporary ban"),
                }
            });
        }
        Ok(())
    }

    async fn purge_messages(
        &self,
        _guild_id: u64,
        user_id: u64,
        channel_id: u64,
        since: DateTime<Utc>,
    ) -> Result<u64, PlatformError> {
        let channel = serenity::ChannelId::new(channel_id);
        let messages = channel
            .messages(&self.http, serenity::GetMessages::new().limit(PURGE_FETCH_LIMIT))
            .await
            .map_err(map_error)?;

        let ids: Vec<serenity::MessageId> = messages
            .iter()
            .filter(|m| m.author.id.get() == user_id && *m.timestamp >= since)
            .map(|m| m.id)
            .collect();

        match ids.len() {
            0 => {}
            1 => channel
                .delete_message(&self.http, ids[0])
                .await
                .map_err(map_error)?,
            _ => channel
                .delete_messages(&self.http, &ids)
                .await
                .map_err(map_error)?,
        }
        Ok(ids.len() as u64)
    }

    async fn is_timed_out(&self, guild_id: u64, user_id: u64) -> Result<bool, PlatformError> {
        let member = match serenity::GuildId::new(guild_id)
            .member(&self.http, serenity::UserId::new(user_id))
            .await
        {
            Ok(member) => member,
            // Left the guild: nothing to be timed out from.
            Err(e) => match map_error(e) {
                PlatformError::NotFound(_) => return Ok(false),
                other => return Err(other),
            },
        };

        Ok(member
            .communication_disabled_until
            .map_or(false, |until| *until > Utc::now()))
    }
}
