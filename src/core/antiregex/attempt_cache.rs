// Process-wide in-memory attempt cache.
//
// Mirrors the durable attempt store so threshold checks are O(1) lookups.
// Every durable write that changes a count must be mirrored here; reads must
// never diverge from the last committed value for that key. DashMap gives us
// the sharded-lock map the access pattern needs.

use super::regex_models::{AttemptRecord, RuleId};
use dashmap::DashMap;

#[derive(Default)]
pub struct AttemptCache {
    attempts: DashMap<(RuleId, u64), u32>,
}

impl AttemptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns 0 for absent keys; a zero count is equivalent to absence.
    pub fn get(&self, rule_id: RuleId, user_id: u64) -> u32 {
        self.attempts
            .get(&(rule_id, user_id))
            .map(|v| *v)
            .unwrap_or(0)
    }

    /// Upserts the count; zero removes the entry.
    pub fn set(&self, rule_id: RuleId, user_id: u64, count: u32) {
        if count == 0 {
            self.attempts.remove(&(rule_id, user_id));
        } else {
            self.attempts.insert((rule_id, user_id), count);
        }
    }

    /// Idempotent removal.
    pub fn clear(&self, rule_id: RuleId, user_id: u64) {
        self.attempts.remove(&(rule_id, user_id));
    }

    /// Drops every entry for a rule (used when the rule is deleted).
    pub fn clear_rule(&self, rule_id: RuleId) {
        self.attempts.retain(|(rule, _), _| *rule != rule_id);
    }

    /// Bulk-populate from durable storage at process start so a restart does
    /// not reset every user's escalation progress.
    pub fn warm_up(&self, records: impl IntoIterator<Item = AttemptRecord>) -> usize {
        let mut loaded = 0;
        for record in records {
            if record.count > 0 {
                self.attempts
                    .insert((record.rule_id, record.user_id), record.count);
                loaded += 1;
            }
        }
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(rule_id: RuleId, user_id: u64, count: u32) -> AttemptRecord {
        AttemptRecord {
            rule_id,
            user_id,
            guild_id: 1,
            count,
            last_attempt: Utc::now(),
            reset: None,
        }
    }

    #[test]
    fn absent_key_reads_zero() {
        let cache = AttemptCache::new();
        assert_eq!(cache.get(1, 2), 0);
    }

    #[test]
    fn zero_count_removes_entry() {
        let cache = AttemptCache::new();
        cache.set(1, 2, 3);
        assert_eq!(cache.get(1, 2), 3);

        cache.set(1, 2, 0);
        assert_eq!(cache.get(1, 2), 0);
    }

    #[test]
    fn clear_is_idempotent() {
        let cache = AttemptCache::new();
        cache.set(1, 2, 1);
        cache.clear(1, 2);
        cache.clear(1, 2);
        assert_eq!(cache.get(1, 2), 0);
    }

    #[test]
    fn clear_rule_keeps_other_rules() {
        let cache = AttemptCache::new();
        cache.set(1, 2, 1);
        cache.set(1, 3, 2);
        cache.set(9, 2, 4);

        cache.clear_rule(1);
        assert_eq!(cache.get(1, 2), 0);
        assert_eq!(cache.get(1, 3), 0);
        assert_eq!(cache.get(9, 2), 4);
    }

    #[test]
    fn warm_up_skips_zero_counts() {
        let cache = AttemptCache::new();
        let loaded = cache.warm_up(vec![record(1, 2, 2), record(1, 3, 0)]);
        assert_eq!(loaded, 1);
        assert_eq!(cache.get(1, 2), 2);
        assert_eq!(cache.get(1, 3), 0);
    }
}
