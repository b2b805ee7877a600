// SQLite implementations of the anti-regex storage traits.

pub mod sqlite_attempt_store;
pub mod sqlite_rule_store;

pub use sqlite_attempt_store::SqliteAttemptStore;
pub use sqlite_rule_store::SqliteRuleStore;
