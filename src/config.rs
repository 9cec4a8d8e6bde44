// Runtime configuration, read once from the environment at startup.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::core::moderation::DispatchPolicy;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub discord_token: String,
    /// Folder for the SQLite database.
    pub data_dir: String,
    pub http_port: u16,
    /// Dashboard API is disabled without it.
    pub jwt_secret: Option<String>,
    pub audit_retention_days: i64,
    pub audit_max_entries_per_guild: usize,
    pub dispatch_max_attempts: u32,
    pub dispatch_backoff_ms: u64,
    pub platform_timeout_secs: u64,
    pub decay_tick_secs: u64,
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let discord_token = env::var("DISCORD_TOKEN").map_err(|_| {
            anyhow::anyhow!(
                "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token."
            )
        })?;

        Ok(Self {
            discord_token,
            data_dir: env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            http_port: var_or("HTTP_PORT", 8080),
            jwt_secret: env::var("DASHBOARD_JWT_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            audit_retention_days: var_or::<i64>("AUDIT_RETENTION_DAYS", 30).clamp(1, 3650),
            audit_max_entries_per_guild: var_or("AUDIT_MAX_ENTRIES_PER_GUILD", 5000),
            dispatch_max_attempts: var_or::<u32>("DISPATCH_MAX_ATTEMPTS", 3).max(1),
            dispatch_backoff_ms: var_or("DISPATCH_BACKOFF_MS", 500),
            platform_timeout_secs: var_or::<u64>("PLATFORM_TIMEOUT_SECS", 10).max(1),
            decay_tick_secs: var_or::<u64>("DECAY_TICK_SECS", 60).max(1),
        })
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            max_attempts: self.dispatch_max_attempts,
            base_backoff: Duration::from_millis(self.dispatch_backoff_ms),
            request_timeout: Duration::from_secs(self.platform_timeout_secs),
        }
    }

    pub fn database_path(&self) -> String {
        format!("{}/moderation.db", self.data_dir)
    }
}
