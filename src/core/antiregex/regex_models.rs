// Anti-regex domain models - data structures for the rule matching and
// escalation engine.
//
// These are pure domain types with no Discord dependencies. The Discord
// layer converts these to platform-specific actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque rule identifier, rendered as hex in user-facing messages.
pub type RuleId = u64;

/// Hard cap on configured rules per guild, enforced at configuration time.
pub const MAX_RULES_PER_GUILD: usize = 10;

/// Wall-clock budget for a single pattern execution. Guards against
/// pathological operator-supplied patterns on very large inputs.
pub const MATCH_BUDGET_MS: u64 = 2000;

/// Case-insensitive pattern matching platform invite URLs and codes.
/// Group 1 captures the invite code.
pub const INVITE_PATTERN: &str =
    r"(?i)discord(?:(?:(?:app)?\.com|\.co|\.media)/invite|\.gg)/([a-z\-0-9]{2,32})";

pub const DEFAULT_MATCH_MESSAGE: &str = "{user.mention}, you cannot send that content here due to the regex `{regex.id}`{regex.action.exists.then(, you will receive a {regex.action.name} if you continue **({regex.attempts.current}/{regex.attempts.max})**).else()} :no_entry:";

pub const DEFAULT_MOD_MESSAGE: &str = "**{user.tag}** has received a {regex.action.name} for sending a message which matched the regex `{regex.id}` {regex.attempts.max} time{regex.attempts.max.equals(1).then().else(s)} :white_check_mark:";

pub const DEFAULT_INVITE_MATCH_MESSAGE: &str = "{user.mention}, you cannot send discord invites here{regex.action.exists.then(, you will receive a {regex.action.name} if you continue **({regex.attempts.current}/{regex.attempts.max})**).else()} :no_entry:";

pub const DEFAULT_INVITE_MOD_MESSAGE: &str = "**{user.tag}** has received a {regex.action.name} for sending a discord invite {regex.attempts.max} time{regex.attempts.max.equals(1).then().else(s)} :white_check_mark:";

/// What a rule matches against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuleKind {
    /// Operator-supplied regex, stored as source text.
    Pattern(String),
    /// Built-in invite-link detector.
    Invite,
}

impl RuleKind {
    pub fn default_match_message(&self) -> &'static str {
        match self {
            RuleKind::Pattern(_) => DEFAULT_MATCH_MESSAGE,
            RuleKind::Invite => DEFAULT_INVITE_MATCH_MESSAGE,
        }
    }

    pub fn default_mod_message(&self) -> &'static str {
        match self {
            RuleKind::Pattern(_) => DEFAULT_MOD_MESSAGE,
            RuleKind::Invite => DEFAULT_INVITE_MOD_MESSAGE,
        }
    }
}

/// Time-based attempt decay: subtract `amount` for every full `after_secs`
/// elapsed since the last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetPolicy {
    pub amount: u32,
    pub after_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Warn,
    Mute,
    Kick,
    Ban,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Warn => write!(f, "warn"),
            ActionKind::Mute => write!(f, "mute"),
            ActionKind::Kick => write!(f, "kick"),
            ActionKind::Ban => write!(f, "ban"),
        }
    }
}

/// Moderation consequence applied once attempts reach the rule's threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModAction {
    pub kind: ActionKind,
    /// Duration in seconds for timed actions (mute).
    pub duration_secs: Option<u64>,
}

/// What happens to the offending message itself on a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFlags {
    pub delete_message: bool,
    pub send_message: bool,
}

impl Default for MatchFlags {
    fn default() -> Self {
        Self {
            delete_message: true,
            send_message: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhitelistScope {
    Channel(u64),
    Category(u64),
}

/// Capture-group values that do not count as violations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupExemption {
    pub group: usize,
    pub strings: Vec<String>,
}

/// A user or role exempt from the rule within the whitelist's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Holder {
    User(u64),
    Role(u64),
}

/// Scope-specific exemption data for a rule. Absence of an entry for a
/// channel means no exemptions; a channel entry wins over a category entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Whitelist {
    pub scope: WhitelistScope,
    pub groups: Vec<GroupExemption>,
    pub holders: Vec<Holder>,
    /// For invite rules: target guilds that do not count as violations.
    pub allowed_guilds: Vec<u64>,
}

impl Whitelist {
    pub fn for_scope(scope: WhitelistScope) -> Self {
        Self {
            scope,
            groups: Vec::new(),
            holders: Vec::new(),
            allowed_guilds: Vec::new(),
        }
    }
}

/// A configured rule: pattern plus policy, scoped to a guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub guild_id: u64,
    pub kind: RuleKind,
    pub enabled: bool,
    pub max_attempts: u32,
    pub reset: Option<ResetPolicy>,
    pub action: Option<ModAction>,
    pub match_message: Option<String>,
    pub mod_message: Option<String>,
    pub match_flags: MatchFlags,
    pub whitelists: Vec<Whitelist>,
    /// Administrators bypass the rule when set.
    pub admin_exempt: bool,
}

impl Rule {
    pub fn new(id: RuleId, guild_id: u64, kind: RuleKind) -> Self {
        Self {
            id,
            guild_id,
            kind,
            enabled: true,
            max_attempts: 3,
            reset: None,
            action: None,
            match_message: None,
            mod_message: None,
            match_flags: MatchFlags::default(),
            whitelists: Vec::new(),
            admin_exempt: true,
        }
    }

    pub fn match_template(&self) -> &str {
        self.match_message
            .as_deref()
            .unwrap_or_else(|| self.kind.default_match_message())
    }

    pub fn mod_template(&self) -> &str {
        self.mod_message
            .as_deref()
            .unwrap_or_else(|| self.kind.default_mod_message())
    }

    /// The whitelist entry in effect for a channel: the channel's own entry
    /// if present, otherwise the parent category's.
    pub fn whitelist_for(&self, channel_id: u64, category_id: Option<u64>) -> Option<&Whitelist> {
        let channel = self
            .whitelists
            .iter()
            .find(|w| w.scope == WhitelistScope::Channel(channel_id));
        if channel.is_some() {
            return channel;
        }

        category_id.and_then(|category| {
            self.whitelists
                .iter()
                .find(|w| w.scope == WhitelistScope::Category(category))
        })
    }
}

/// Persistent attempt counter for a (rule, user) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub rule_id: RuleId,
    pub user_id: u64,
    pub guild_id: u64,
    pub count: u32,
    pub last_attempt: DateTime<Utc>,
    /// Copy of the reset policy in effect at last write.
    pub reset: Option<ResetPolicy>,
}

/// Everything the engine needs to know about an inbound message.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub guild_id: u64,
    pub channel_id: u64,
    pub category_id: Option<u64>,
    pub message_id: u64,
    pub author_id: u64,
    pub author_name: String,
    pub author_is_bot: bool,
    pub author_is_admin: bool,
    pub author_roles: Vec<u64>,
    pub channel_name: String,
    pub content: String,
}

/// Resolved target of an invite code. `guild_id` can be absent for invites
/// that do not point at a guild; those count as violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InviteTarget {
    pub guild_id: Option<u64>,
}

/// What the Discord layer should do after a rule fired.
#[derive(Debug, Clone)]
pub struct EscalationReport {
    pub rule_id: RuleId,
    /// Delete the offending message (permission allowing).
    pub delete_message: bool,
    /// Rendered match or mod message, already gated on the send flag.
    pub notice: Option<String>,
    /// Set when the moderation action fired.
    pub enforced: Option<ModAction>,
    /// Domain failure from the action executor, to be posted as plain text.
    pub action_failure: Option<String>,
}

/// Apply time decay to a stored count and increment, flooring the result
/// at 1. Decay can never zero a counter on a violating message; only
/// enforcement deletes the record outright.
pub fn decayed_increment(
    count: u32,
    last_attempt: DateTime<Utc>,
    reset: Option<ResetPolicy>,
    now: DateTime<Utc>,
) -> u32 {
    match reset {
        Some(policy) if policy.after_secs > 0 => {
            let elapsed = (now - last_attempt).num_seconds().max(0) as u64;
            let decayed = elapsed / policy.after_secs * policy.amount as u64;
            let base = (count as i64) - (decayed as i64);
            (base + 1).max(1) as u32
        }
        _ => count + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn whitelist_channel_scope_wins_over_category() {
        let mut rule = Rule::new(1, 10, RuleKind::Invite);
        rule.whitelists = vec![
            Whitelist::for_scope(WhitelistScope::Category(50)),
            Whitelist::for_scope(WhitelistScope::Channel(20)),
        ];

        let found = rule.whitelist_for(20, Some(50)).unwrap();
        assert_eq!(found.scope, WhitelistScope::Channel(20));

        let found = rule.whitelist_for(21, Some(50)).unwrap();
        assert_eq!(found.scope, WhitelistScope::Category(50));

        assert!(rule.whitelist_for(21, None).is_none());
    }

    #[test]
    fn decay_subtracts_per_elapsed_window() {
        let policy = ResetPolicy {
            amount: 1,
            after_secs: 60,
        };
        let last = Utc::now();
        let now = last + Duration::seconds(125);

        // 2 windows elapsed: 5 - 2 + 1
        assert_eq!(decayed_increment(5, last, Some(policy), now), 4);
    }

    #[test]
    fn decay_floors_at_one_after_increment() {
        let policy = ResetPolicy {
            amount: 10,
            after_secs: 1,
        };
        let last = Utc::now();
        let now = last + Duration::seconds(3600);

        // Elapsed time alone can never drive a violating message below 1
        assert_eq!(decayed_increment(2, last, Some(policy), now), 1);
    }

    #[test]
    fn no_reset_policy_is_plain_increment() {
        let last = Utc::now();
        assert_eq!(decayed_increment(0, last, None, last), 1);
        assert_eq!(decayed_increment(4, last, None, last), 5);
    }

    #[test]
    fn decay_is_idempotent_without_intervening_writes() {
        let policy = ResetPolicy {
            amount: 2,
            after_secs: 30,
        };
        let last = Utc::now();
        let t1 = last + Duration::seconds(45);
        let t2 = last + Duration::seconds(95);

        // Computing at t1 does not change persisted state, so computing
        // again at t2 equals computing once at t2 directly
        let _ = decayed_increment(9, last, Some(policy), t1);
        let twice = decayed_increment(9, last, Some(policy), t2);
        let once = decayed_increment(9, last, Some(policy), t2);
        assert_eq!(twice, once);
    }

    #[test]
    fn invite_kind_uses_invite_templates() {
        let rule = Rule::new(1, 10, RuleKind::Invite);
        assert_eq!(rule.match_template(), DEFAULT_INVITE_MATCH_MESSAGE);

        let mut rule = Rule::new(2, 10, RuleKind::Pattern("spam".into()));
        assert_eq!(rule.match_template(), DEFAULT_MATCH_MESSAGE);
        rule.match_message = Some("custom".into());
        assert_eq!(rule.match_template(), "custom");
    }
}
