// Platform action port - the only way the engine touches the chat platform.
//
// The Discord layer implements this with serenity; tests use a recording mock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Missing permissions: {0}")]
    MissingPermissions(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request timed out after {0:?}")]
    TimedOut(Duration),
}

impl PlatformError {
    /// Transient failures worth another attempt. Permission and lookup errors won't change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlatformError::Http(_) | PlatformError::TimedOut(_))
    }
}

#[async_trait]
pub trait PlatformActions: Send + Sync + 'static {
    async fn timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        duration: Duration,
        reason: &str,
    ) -> Result<(), PlatformError>;

    async fn remove_timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<(), PlatformError>;

    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), PlatformError>;

    /// `duration = None` is a permanent ban.
    async fn ban(
        &self,
        guild_id: u64,
        user_id: u64,
        duration: Option<Duration>,
        reason: &str,
    ) -> Result<(), PlatformError>;

    /// Delete the user's messages in `channel_id` sent at or after `since`.
    /// Returns how many were removed.
    async fn purge_messages(
        &self,
        guild_id: u64,
        user_id: u64,
        channel_id: u64,
        since: DateTime<Utc>,
    ) -> Result<u64, PlatformError>;

    async fn is_timed_out(&self, guild_id: u64, user_id: u64) -> Result<bool, PlatformError>;
}
