// SQLite-backed attempt store for escalation counters.
//
// Tables:
// - regex_attempts: Per (rule, user) attempt counts with decay metadata
//
// The decayed increment runs inside a transaction so two concurrent
// violations of the same key serialize into two distinct counts.

use crate::core::antiregex::{
    decayed_increment, AttemptRecord, AttemptStore, RegexError, ResetPolicy, RuleId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteAttemptStore {
    pool: Pool<Sqlite>,
}

impl SqliteAttemptStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), RegexError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS regex_attempts (
                rule_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                guild_id INTEGER NOT NULL,
                attempts INTEGER NOT NULL,
                last_attempt TEXT NOT NULL,
                reset TEXT,
                PRIMARY KEY (rule_id, user_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RegexError::Storage(e.to_string()))?;

        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_reset(raw: Option<String>) -> Result<Option<ResetPolicy>, RegexError> {
    raw.map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| RegexError::Storage(e.to_string()))
}

#[async_trait]
impl AttemptStore for SqliteAttemptStore {
    async fn increment_attempts(
        &self,
        rule_id: RuleId,
        user_id: u64,
        guild_id: u64,
        reset: Option<ResetPolicy>,
    ) -> Result<AttemptRecord, RegexError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RegexError::Storage(e.to_string()))?;

        let row = sqlx::query(
            "SELECT attempts, last_attempt, reset FROM regex_attempts WHERE rule_id = ? AND user_id = ?",
        )
        .bind(rule_id as i64)
        .bind(user_id as i64)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RegexError::Storage(e.to_string()))?;

        let now = Utc::now();
        let count = match &row {
            Some(row) => {
                let stored: i64 = row.get("attempts");
                let last_attempt = parse_timestamp(&row.get::<String, _>("last_attempt"));
                // Decay runs under the policy in effect at the last write;
                // the rule's current policy only applies from this write on.
                let stored_reset = parse_reset(row.get("reset"))?;
                decayed_increment(stored as u32, last_attempt, stored_reset, now)
            }
            None => 1,
        };

        let reset_json = reset
            .map(|r| serde_json::to_string(&r))
            .transpose()
            .map_err(|e| RegexError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO regex_attempts (rule_id, user_id, guild_id, attempts, last_attempt, reset)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(rule_id, user_id) DO UPDATE SET
                attempts = excluded.attempts,
                last_attempt = excluded.last_attempt,
                reset = excluded.reset
            "#,
        )
        .bind(rule_id as i64)
        .bind(user_id as i64)
        .bind(guild_id as i64)
        .bind(count as i64)
        .bind(now.to_rfc3339())
        .bind(reset_json)
        .execute(&mut *tx)
        .await
        .map_err(|e| RegexError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RegexError::Storage(e.to_string()))?;

        Ok(AttemptRecord {
            rule_id,
            user_id,
            guild_id,
            count,
            last_attempt: now,
            reset,
        })
    }

    async fn delete_attempts(&self, rule_id: RuleId, user_id: u64) -> Result<(), RegexError> {
        sqlx::query("DELETE FROM regex_attempts WHERE rule_id = ? AND user_id = ?")
            .bind(rule_id as i64)
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| RegexError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete_rule_attempts(&self, rule_id: RuleId) -> Result<(), RegexError> {
        sqlx::query("DELETE FROM regex_attempts WHERE rule_id = ?")
            .bind(rule_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| RegexError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<AttemptRecord>, RegexError> {
        let rows = sqlx::query("SELECT * FROM regex_attempts")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RegexError::Storage(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(AttemptRecord {
                rule_id: row.get::<i64, _>("rule_id") as RuleId,
                user_id: row.get::<i64, _>("user_id") as u64,
                guild_id: row.get::<i64, _>("guild_id") as u64,
                count: row.get::<i64, _>("attempts") as u32,
                last_attempt: parse_timestamp(&row.get::<String, _>("last_attempt")),
                reset: parse_reset(row.get("reset"))?,
            });
        }
        Ok(records)
    }
}
