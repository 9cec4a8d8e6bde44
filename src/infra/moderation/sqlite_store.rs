// SQLite-backed moderation store.
//
// Tables:
// - moderation_config: Per-guild config document (JSON)
// - trust_records: Per-user score, history and fired thresholds
// - rule_cooldowns: Last hit and daily count per (guild, user, rule)
// - detection_logs: Append-only audit entries (JSON), indexed by guild and time

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::{Pool, Row, Sqlite};

use crate::core::moderation::{
    ConfigStore, CooldownKey, CooldownState, CooldownStore, DetectionLogEntry, DetectionLogStore,
    GuildModerationConfig, StoreError, TrustRecordStore, UserTrustRecord,
};

fn unavailable(err: sqlx::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StoreError::Corrupt(format!("bad timestamp {}", millis)))
}

pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

impl SqliteModerationStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        // Config table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moderation_config (
                guild_id INTEGER PRIMARY KEY,
                config TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        // Trust table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trust_records (
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                score INTEGER NOT NULL DEFAULT 0,
                last_updated INTEGER NOT NULL,
                history TEXT NOT NULL DEFAULT '[]',
                fired_thresholds TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (guild_id, user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_trust_records_score
                ON trust_records(guild_id, score DESC);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        // Cooldown table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rule_cooldowns (
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                rule TEXT NOT NULL,
                last_fired_at INTEGER NOT NULL,
                count_today INTEGER NOT NULL,
                day_bucket TEXT NOT NULL,
                PRIMARY KEY (guild_id, user_id, rule)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        // Audit table
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS detection_logs (
                id TEXT PRIMARY KEY,
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                ts_millis INTEGER NOT NULL,
                entry TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_detection_logs_guild_time
                ON detection_logs(guild_id, ts_millis DESC);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }
}

#[async_trait]
impl ConfigStore for SqliteModerationStore {
    async fn get_config(
        &self,
        guild_id: u64,
    ) -> Result<Option<GuildModerationConfig>, StoreError> {
        let row = sqlx::query("SELECT config FROM moderation_config WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        match row {
            Some(row) => {
                let raw: String = row.get("config");
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn save_config(
        &self,
        guild_id: u64,
        config: &GuildModerationConfig,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(config)?;
        sqlx::query(
            r#"
            INSERT INTO moderation_config (guild_id, config, version, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                config = excluded.config,
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(guild_id as i64)
        .bind(&raw)
        .bind(config.version as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn list_guilds(&self) -> Result<Vec<u64>, StoreError> {
        let rows = sqlx::query("SELECT guild_id FROM moderation_config ORDER BY guild_id")
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(rows
            .iter()
            .map(|row| row.get::<i64, _>("guild_id") as u64)
            .collect())
    }
}

impl SqliteModerationStore {
    fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<UserTrustRecord, StoreError> {
        let history: String = row.get("history");
        let fired: String = row.get("fired_thresholds");
        Ok(UserTrustRecord {
            guild_id: row.get::<i64, _>("guild_id") as u64,
            user_id: row.get::<i64, _>("user_id") as u64,
            score: row.get("score"),
            last_updated: from_millis(row.get("last_updated"))?,
            history: serde_json::from_str(&history)?,
            fired_thresholds: serde_json::from_str(&fired)?,
        })
    }
}

#[async_trait]
impl TrustRecordStore for SqliteModerationStore {
    async fn get_record(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<Option<UserTrustRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM trust_records WHERE guild_id = ? AND user_id = ?")
            .bind(guild_id as i64)
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn put_record(&self, record: &UserTrustRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO trust_records (guild_id, user_id, score, last_updated, history, fired_thresholds)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(guild_id, user_id) DO UPDATE SET
                score = excluded.score,
                last_updated = excluded.last_updated,
                history = excluded.history,
                fired_thresholds = excluded.fired_thresholds
            "#,
        )
        .bind(record.guild_id as i64)
        .bind(record.user_id as i64)
        .bind(record.score)
        .bind(record.last_updated.timestamp_millis())
        .bind(serde_json::to_string(&record.history)?)
        .bind(serde_json::to_string(&record.fired_thresholds)?)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn list_records(&self, guild_id: u64) -> Result<Vec<UserTrustRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM trust_records WHERE guild_id = ? ORDER BY score DESC, user_id ASC",
        )
        .bind(guild_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter().map(Self::record_from_row).collect()
    }
}

#[async_trait]
impl CooldownStore for SqliteModerationStore {
    async fn get_cooldown(&self, key: &CooldownKey) -> Result<Option<CooldownState>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT last_fired_at, count_today, day_bucket FROM rule_cooldowns
            WHERE guild_id = ? AND user_id = ? AND rule = ?
            "#,
        )
        .bind(key.guild_id as i64)
        .bind(key.user_id as i64)
        .bind(&key.rule)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let day: String = row.get("day_bucket");
        Ok(Some(CooldownState {
            last_fired_at: from_millis(row.get("last_fired_at"))?,
            count_today: row.get::<i64, _>("count_today") as u32,
            day_bucket: NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        }))
    }

    async fn put_cooldown(
        &self,
        key: &CooldownKey,
        state: &CooldownState,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO rule_cooldowns (guild_id, user_id, rule, last_fired_at, count_today, day_bucket)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(guild_id, user_id, rule) DO UPDATE SET
                last_fired_at = excluded.last_fired_at,
                count_today = excluded.count_today,
                day_bucket = excluded.day_bucket
            "#,
        )
        .bind(key.guild_id as i64)
        .bind(key.user_id as i64)
        .bind(&key.rule)
        .bind(state.last_fired_at.timestamp_millis())
        .bind(state.count_today as i64)
        .bind(state.day_bucket.format("%Y-%m-%d").to_string())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl DetectionLogStore for SqliteModerationStore {
    async fn append_logs(&self, entries: &[DetectionLogEntry]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        for entry in entries {
            // OR IGNORE: replays from the pending buffer keep the original row.
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO detection_logs (id, guild_id, user_id, kind, ts_millis, entry)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.id)
            .bind(entry.guild_id as i64)
            .bind(entry.user_id as i64)
            .bind(serde_json::to_value(entry.kind)?.as_str().unwrap_or_default().to_string())
            .bind(entry.timestamp.timestamp_millis())
            .bind(serde_json::to_string(entry)?)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }
        tx.commit().await.map_err(unavailable)?;
        Ok(())
    }

    async fn list_logs(
        &self,
        guild_id: u64,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<DetectionLogEntry>, StoreError> {
        let before_millis = before.map(|b| b.timestamp_millis());
        let rows = sqlx::query(
            r#"
            SELECT entry FROM detection_logs
            WHERE guild_id = ? AND (? IS NULL OR ts_millis < ?)
            ORDER BY ts_millis DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(guild_id as i64)
        .bind(before_millis)
        .bind(before_millis)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        rows.iter()
            .map(|row| {
                let raw: String = row.get("entry");
                Ok(serde_json::from_str(&raw)?)
            })
            .collect()
    }

    async fn prune_logs(
        &self,
        older_than: DateTime<Utc>,
        max_per_guild: usize,
    ) -> Result<u64, StoreError> {
        let by_age = sqlx::query("DELETE FROM detection_logs WHERE ts_millis < ?")
            .bind(older_than.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        let by_count = sqlx::query(
            r#"
            DELETE FROM detection_logs WHERE id IN (
                SELECT id FROM (
                    SELECT id, ROW_NUMBER() OVER (
                        PARTITION BY guild_id ORDER BY ts_millis DESC, id DESC
                    ) AS rn
                    FROM detection_logs
                ) WHERE rn > ?
            )
            "#,
        )
        .bind(max_per_guild as i64)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(by_age.rows_affected() + by_count.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::{LogKind, TrustHistoryEntry};
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::NamedTempFile;

    async fn store() -> (SqliteModerationStore, NamedTempFile) {
        let tmp = NamedTempFile::new().unwrap();
        let pool = SqlitePoolOptions::new()
            .connect(&format!("sqlite://{}?mode=rwc", tmp.path().display()))
            .await
            .unwrap();
        let store = SqliteModerationStore::new(pool);
        store.migrate().await.unwrap();
        (store, tmp)
    }

    #[tokio::test]
    async fn config_document_round_trips() {
        let (store, _tmp) = store().await;
        assert!(store.get_config(1).await.unwrap().is_none());

        let mut config = GuildModerationConfig::default();
        config.log_channel_id = Some(42);
        config.timezone = Some("Europe/Oslo".to_string());
        config.version = 3;
        store.save_config(1, &config).await.unwrap();

        assert_eq!(store.get_config(1).await.unwrap(), Some(config));
        assert_eq!(store.list_guilds().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn trust_record_round_trips() {
        let (store, _tmp) = store().await;
        let now = Utc.timestamp_millis_opt(Utc::now().timestamp_millis()).unwrap();
        let mut record = UserTrustRecord::new(1, 2, now);
        record.score = 7;
        record.fired_thresholds.insert(5);
        record.push_history(TrustHistoryEntry {
            delta: 7,
            reason: "mentions".to_string(),
            detector: Some("mention_spam".to_string()),
            timestamp: now,
        });
        store.put_record(&record).await.unwrap();

        assert_eq!(store.get_record(1, 2).await.unwrap(), Some(record));
        assert_eq!(store.list_records(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cooldown_state_round_trips() {
        let (store, _tmp) = store().await;
        let key = CooldownKey::new(1, 2, "caps_spam");
        let now = Utc.timestamp_millis_opt(Utc::now().timestamp_millis()).unwrap();
        let state = CooldownState {
            last_fired_at: now,
            count_today: 2,
            day_bucket: now.date_naive(),
        };
        store.put_cooldown(&key, &state).await.unwrap();
        assert_eq!(store.get_cooldown(&key).await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn logs_append_idempotently_and_prune_by_count() {
        let (store, _tmp) = store().await;
        let now = Utc::now();
        let entries: Vec<DetectionLogEntry> = (0..5)
            .map(|i| {
                let mut e = DetectionLogEntry::new(1, 2, LogKind::Detection, format!("hit {}", i));
                e.id = format!("id-{}", i);
                e.timestamp = now - Duration::seconds(10 - i);
                e
            })
            .collect();
        store.append_logs(&entries).await.unwrap();
        store.append_logs(&entries[..2]).await.unwrap();

        let listed = store.list_logs(1, 10, None).await.unwrap();
        assert_eq!(listed.len(), 5);
        assert_eq!(listed[0].id, "id-4");

        let removed = store
            .prune_logs(now - Duration::days(30), 3)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        let listed = store.list_logs(1, 10, None).await.unwrap();
        assert_eq!(listed.last().unwrap().id, "id-2");
    }
}
