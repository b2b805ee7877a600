// SQLite-backed rule store for anti-regex configuration.
//
// Tables:
// - regex_rules: Per-guild rule definitions
//
// Scalar policy fields are plain columns; the nested structures (reset
// policy, action, match flags, whitelists) are JSON columns so whitelist
// shape changes don't need migrations.

use crate::core::antiregex::{
    MatchFlags, ModAction, RegexError, ResetPolicy, Rule, RuleId, RuleKind, RuleStore, Whitelist,
};
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteRuleStore {
    pool: Pool<Sqlite>,
}

impl SqliteRuleStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), RegexError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS regex_rules (
                id INTEGER PRIMARY KEY,
                guild_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                pattern TEXT,
                enabled BOOLEAN NOT NULL DEFAULT 1,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                reset TEXT,
                action TEXT,
                match_message TEXT,
                mod_message TEXT,
                match_flags TEXT NOT NULL,
                whitelists TEXT NOT NULL,
                admin_exempt BOOLEAN NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_regex_rules_guild
                ON regex_rules(guild_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RegexError::Storage(e.to_string()))?;

        Ok(())
    }
}

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> Result<Rule, RegexError> {
    let kind: String = row.get("kind");
    let kind = match kind.as_str() {
        "invite" => RuleKind::Invite,
        _ => {
            let pattern: Option<String> = row.get("pattern");
            RuleKind::Pattern(pattern.unwrap_or_default())
        }
    };

    let reset: Option<String> = row.get("reset");
    let reset: Option<ResetPolicy> = reset
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| RegexError::Storage(e.to_string()))?;

    let action: Option<String> = row.get("action");
    let action: Option<ModAction> = action
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|e| RegexError::Storage(e.to_string()))?;

    let match_flags: String = row.get("match_flags");
    let match_flags: MatchFlags =
        serde_json::from_str(&match_flags).map_err(|e| RegexError::Storage(e.to_string()))?;

    let whitelists: String = row.get("whitelists");
    let whitelists: Vec<Whitelist> =
        serde_json::from_str(&whitelists).map_err(|e| RegexError::Storage(e.to_string()))?;

    Ok(Rule {
        id: row.get::<i64, _>("id") as RuleId,
        guild_id: row.get::<i64, _>("guild_id") as u64,
        kind,
        enabled: row.get("enabled"),
        max_attempts: row.get::<i64, _>("max_attempts") as u32,
        reset,
        action,
        match_message: row.get("match_message"),
        mod_message: row.get("mod_message"),
        match_flags,
        whitelists,
        admin_exempt: row.get("admin_exempt"),
    })
}

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn list_rules(&self, guild_id: u64) -> Result<Vec<Rule>, RegexError> {
        let rows = sqlx::query("SELECT * FROM regex_rules WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RegexError::Storage(e.to_string()))?;

        rows.iter().map(row_to_rule).collect()
    }

    async fn get_rule(&self, id: RuleId) -> Result<Option<Rule>, RegexError> {
        let row = sqlx::query("SELECT * FROM regex_rules WHERE id = ?")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RegexError::Storage(e.to_string()))?;

        row.as_ref().map(row_to_rule).transpose()
    }

    async fn upsert_rule(&self, rule: &Rule) -> Result<(), RegexError> {
        let (kind, pattern) = match &rule.kind {
            RuleKind::Invite => ("invite", None),
            RuleKind::Pattern(source) => ("pattern", Some(source.as_str())),
        };

        let reset = rule
            .reset
            .map(|r| serde_json::to_string(&r))
            .transpose()
            .map_err(|e| RegexError::Storage(e.to_string()))?;
        let action = rule
            .action
            .map(|a| serde_json::to_string(&a))
            .transpose()
            .map_err(|e| RegexError::Storage(e.to_string()))?;
        let match_flags = serde_json::to_string(&rule.match_flags)
            .map_err(|e| RegexError::Storage(e.to_string()))?;
        let whitelists = serde_json::to_string(&rule.whitelists)
            .map_err(|e| RegexError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO regex_rules
                (id, guild_id, kind, pattern, enabled, max_attempts, reset,
                 action, match_message, mod_message, match_flags, whitelists,
                 admin_exempt)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                guild_id = excluded.guild_id,
                kind = excluded.kind,
                pattern = excluded.pattern,
                enabled = excluded.enabled,
                max_attempts = excluded.max_attempts,
                reset = excluded.reset,
                action = excluded.action,
                match_message = excluded.match_message,
                mod_message = excluded.mod_message,
                match_flags = excluded.match_flags,
                whitelists = excluded.whitelists,
                admin_exempt = excluded.admin_exempt
            "#,
        )
        .bind(rule.id as i64)
        .bind(rule.guild_id as i64)
        .bind(kind)
        .bind(pattern)
        .bind(rule.enabled)
        .bind(rule.max_attempts as i64)
        .bind(reset)
        .bind(action)
        .bind(&rule.match_message)
        .bind(&rule.mod_message)
        .bind(match_flags)
        .bind(whitelists)
        .bind(rule.admin_exempt)
        .execute(&self.pool)
        .await
        .map_err(|e| RegexError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn delete_rule(&self, id: RuleId) -> Result<bool, RegexError> {
        let result = sqlx::query("DELETE FROM regex_rules WHERE id = ?")
            .bind(id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| RegexError::Storage(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_rules(&self, guild_id: u64) -> Result<usize, RegexError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM regex_rules WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RegexError::Storage(e.to_string()))?;

        Ok(row.get::<i64, _>("n") as usize)
    }
}
