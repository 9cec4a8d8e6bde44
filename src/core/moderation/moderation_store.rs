// Storage ports for the moderation engine.
//
// The core defines WHAT it needs to persist; infra decides HOW.
// Read-modify-write serialization is done by the services (per-key locks),
// so implementations only need plain get/put semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::moderation_models::{
    CooldownKey, CooldownState, DetectionLogEntry, GuildModerationConfig, UserTrustRecord,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt stored document: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Per-guild configuration documents.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_config(&self, guild_id: u64)
        -> Result<Option<GuildModerationConfig>, StoreError>;

    async fn save_config(
        &self,
        guild_id: u64,
        config: &GuildModerationConfig,
    ) -> Result<(), StoreError>;

    /// Guilds that have a stored config (used by background jobs).
    async fn list_guilds(&self) -> Result<Vec<u64>, StoreError>;
}

/// Per-user trust records.
#[async_trait]
pub trait TrustRecordStore: Send + Sync {
    async fn get_record(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<Option<UserTrustRecord>, StoreError>;

    async fn put_record(&self, record: &UserTrustRecord) -> Result<(), StoreError>;

    /// All records for a guild, highest score first.
    async fn list_records(&self, guild_id: u64) -> Result<Vec<UserTrustRecord>, StoreError>;
}

/// Per-rule cooldown and daily counters.
#[async_trait]
pub trait CooldownStore: Send + Sync {
    async fn get_cooldown(&self, key: &CooldownKey) -> Result<Option<CooldownState>, StoreError>;

    async fn put_cooldown(&self, key: &CooldownKey, state: &CooldownState)
        -> Result<(), StoreError>;
}

/// Append-only audit entries with bounded retention.
#[async_trait]
pub trait DetectionLogStore: Send + Sync {
    async fn append_logs(&self, entries: &[DetectionLogEntry]) -> Result<(), StoreError>;

    /// Newest first, strictly older than `before` when given.
    async fn list_logs(
        &self,
        guild_id: u64,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<DetectionLogEntry>, StoreError>;

    /// Drop entries older than `older_than` and keep at most `max_per_guild` per guild.
    /// Returns how many entries were removed.
    async fn prune_logs(
        &self,
        older_than: DateTime<Utc>,
        max_per_guild: usize,
    ) -> Result<u64, StoreError>;
}

/// Everything the engine persists. Implemented automatically for any type with all four ports.
pub trait ModerationStore:
    ConfigStore + TrustRecordStore + CooldownStore + DetectionLogStore + 'static
{
}

impl<T> ModerationStore for T where
    T: ConfigStore + TrustRecordStore + CooldownStore + DetectionLogStore + 'static
{
}
