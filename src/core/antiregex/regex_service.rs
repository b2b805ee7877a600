// Anti-regex service - rule matching and escalation engine.
//
// Per inbound message: every active rule in the guild is evaluated
// concurrently (whitelist checks, budgeted pattern execution, invite
// resolution), the first rule to complete with a genuine violation wins, and
// the winner is escalated against the attempt store: warn below the
// threshold, enforce the configured moderation action at it.
//
// NO Discord dependencies here - collaborators are injected as traits.

use super::attempt_cache::AttemptCache;
use super::regex_models::{
    AttemptRecord, EscalationReport, GroupExemption, Holder, InviteTarget, MessageContext,
    ModAction, ResetPolicy, Rule, RuleId, RuleKind, Whitelist, INVITE_PATTERN,
    MATCH_BUDGET_MS, MAX_RULES_PER_GUILD,
};
use crate::core::formatter::{
    ChannelContext, FormatValue, Formatter, FormatterRegistry, UserContext,
};
use async_trait::async_trait;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum RegexError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("This server already has the maximum of {0} rules")]
    QuotaExceeded(usize),

    #[error("No rule with that id exists")]
    NotFound,
}

/// Failure from the moderation action executor. Domain errors (missing
/// permission, target gone) are user-facing; infrastructure errors go to the
/// error sink.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0}")]
    Domain(String),

    #[error("Action failed: {0}")]
    Infrastructure(String),
}

// ============================================================================
// COLLABORATOR TRAITS (PORTS)
// ============================================================================

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_rules(&self, guild_id: u64) -> Result<Vec<Rule>, RegexError>;

    async fn get_rule(&self, id: RuleId) -> Result<Option<Rule>, RegexError>;

    async fn upsert_rule(&self, rule: &Rule) -> Result<(), RegexError>;

    /// Returns whether a rule was actually removed.
    async fn delete_rule(&self, id: RuleId) -> Result<bool, RegexError>;

    async fn count_rules(&self, guild_id: u64) -> Result<usize, RegexError>;
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Atomic read-modify-write: apply time decay to the stored count,
    /// increment, persist with the rule's current reset policy, and return
    /// the committed record. This is the single source of truth for
    /// concurrent escalations of the same (rule, user) key.
    async fn increment_attempts(
        &self,
        rule_id: RuleId,
        user_id: u64,
        guild_id: u64,
        reset: Option<ResetPolicy>,
    ) -> Result<AttemptRecord, RegexError>;

    async fn delete_attempts(&self, rule_id: RuleId, user_id: u64) -> Result<(), RegexError>;

    /// Cascade used when a rule is deleted.
    async fn delete_rule_attempts(&self, rule_id: RuleId) -> Result<(), RegexError>;

    /// Startup warm-up for the in-memory cache.
    async fn load_all(&self) -> Result<Vec<AttemptRecord>, RegexError>;
}

/// Resolves an invite code to its target. `None` covers both unknown codes
/// and resolution failures; neither may crash the pipeline and neither
/// counts as a violation.
#[async_trait]
pub trait InviteResolver: Send + Sync {
    async fn resolve(&self, code: &str) -> Option<InviteTarget>;
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn perform(
        &self,
        action: &ModAction,
        guild_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<(), ActionError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct RegexService<R, A, I, E> {
    rules: R,
    attempts: A,
    resolver: Arc<I>,
    executor: E,
    cache: AttemptCache,
    registry: Arc<FormatterRegistry>,
    match_budget: Duration,
    invite_pattern: Regex,
}

impl<R, A, I, E> RegexService<R, A, I, E>
where
    R: RuleStore,
    A: AttemptStore,
    I: InviteResolver + 'static,
    E: ActionExecutor,
{
    pub fn new(
        rules: R,
        attempts: A,
        resolver: Arc<I>,
        executor: E,
        registry: Arc<FormatterRegistry>,
    ) -> Self {
        Self {
            rules,
            attempts,
            resolver,
            executor,
            cache: AttemptCache::new(),
            registry,
            match_budget: Duration::from_millis(MATCH_BUDGET_MS),
            invite_pattern: Regex::new(INVITE_PATTERN).expect("invite pattern compiles"),
        }
    }

    #[cfg(test)]
    fn with_match_budget(mut self, budget: Duration) -> Self {
        self.match_budget = budget;
        self
    }

    /// Full pipeline for one inbound message: find the winning violated rule
    /// (if any) and escalate it.
    pub async fn handle_message(
        &self,
        ctx: &MessageContext,
    ) -> Result<Option<EscalationReport>, RegexError> {
        let Some(rule) = self.check_message(ctx).await? else {
            return Ok(None);
        };
        Ok(Some(self.escalate(&rule, ctx).await?))
    }

    /// Evaluate every active rule against the message, returning the first
    /// rule to complete with a genuine violation.
    pub async fn check_message(&self, ctx: &MessageContext) -> Result<Option<Rule>, RegexError> {
        if ctx.author_is_bot {
            return Ok(None);
        }

        let rules = self.rules.list_rules(ctx.guild_id).await?;
        if rules.is_empty() {
            return Ok(None);
        }

        let content: Arc<str> = Arc::from(ctx.content.as_str());

        let mut evaluations: JoinSet<Option<Rule>> = JoinSet::new();
        'rules: for rule in rules {
            if !rule.enabled {
                continue;
            }
            if ctx.author_is_admin && rule.admin_exempt {
                continue;
            }

            let whitelist = rule.whitelist_for(ctx.channel_id, ctx.category_id).cloned();
            if let Some(entry) = &whitelist {
                for holder in &entry.holders {
                    match holder {
                        Holder::User(id) if *id == ctx.author_id => continue 'rules,
                        // The guild id doubles as the everyone role, used to
                        // denote a scope-wide allow
                        Holder::Role(id)
                            if *id == ctx.guild_id || ctx.author_roles.contains(id) =>
                        {
                            continue 'rules
                        }
                        _ => {}
                    }
                }
            }

            let evaluation = RuleEvaluation {
                rule,
                whitelist,
                content: Arc::clone(&content),
                guild_id: ctx.guild_id,
                resolver: Arc::clone(&self.resolver),
                invite_pattern: self.invite_pattern.clone(),
                budget: self.match_budget,
            };
            evaluations.spawn(evaluation.run());
        }

        let mut winner = None;
        while let Some(joined) = evaluations.join_next().await {
            if let Ok(Some(rule)) = joined {
                winner = Some(rule);
                break;
            }
        }
        // Sibling evaluations complete harmlessly rather than being aborted
        evaluations.detach_all();

        Ok(winner)
    }

    /// Decide between the warn and enforce paths for a violated rule.
    ///
    /// The durable increment happens first and its return value is the
    /// authoritative attempt count; the in-memory cache is refreshed from it,
    /// never computed independently.
    pub async fn escalate(
        &self,
        rule: &Rule,
        ctx: &MessageContext,
    ) -> Result<EscalationReport, RegexError> {
        let record = self
            .attempts
            .increment_attempts(rule.id, ctx.author_id, ctx.guild_id, rule.reset)
            .await?;
        let effective = record.count;

        let mut report = EscalationReport {
            rule_id: rule.id,
            delete_message: rule.match_flags.delete_message,
            notice: None,
            enforced: None,
            action_failure: None,
        };
        let send = rule.match_flags.send_message;

        let due_action = rule.action.filter(|_| effective >= rule.max_attempts);
        if let Some(action) = due_action {
            let reason = format!(
                "Sent a message which matched regex `{:x}` {} time{}",
                rule.id,
                rule.max_attempts,
                if rule.max_attempts == 1 { "" } else { "s" }
            );

            match self
                .executor
                .perform(&action, ctx.guild_id, ctx.author_id, &reason)
                .await
            {
                Ok(()) => {
                    // Full reset after enforcement
                    self.attempts.delete_attempts(rule.id, ctx.author_id).await?;
                    self.cache.clear(rule.id, ctx.author_id);

                    if send {
                        report.notice =
                            Some(self.render_message(rule.mod_template(), rule, ctx, effective));
                    }
                    report.enforced = Some(action);
                }
                Err(ActionError::Domain(message)) => {
                    self.cache.set(rule.id, ctx.author_id, effective);
                    report.action_failure = Some(message);
                }
                Err(ActionError::Infrastructure(message)) => {
                    self.cache.set(rule.id, ctx.author_id, effective);
                    tracing::error!(
                        rule_id = rule.id,
                        user_id = ctx.author_id,
                        error = %message,
                        "Moderation action failed"
                    );
                }
            }
        } else {
            self.cache.set(rule.id, ctx.author_id, effective);
            if send {
                report.notice =
                    Some(self.render_message(rule.match_template(), rule, ctx, effective));
            }
        }

        Ok(report)
    }

    fn render_message(
        &self,
        template: &str,
        rule: &Rule,
        ctx: &MessageContext,
        current_attempts: u32,
    ) -> String {
        let mut action = HashMap::new();
        action.insert(
            "exists".to_string(),
            FormatValue::Bool(rule.action.is_some()),
        );
        if let Some(configured) = &rule.action {
            action.insert(
                "name".to_string(),
                FormatValue::text(configured.kind.to_string()),
            );
        }

        let mut attempts = HashMap::new();
        attempts.insert(
            "current".to_string(),
            FormatValue::Int(current_attempts as i64),
        );
        attempts.insert("max".to_string(), FormatValue::Int(rule.max_attempts as i64));

        let mut regex = HashMap::new();
        regex.insert("id".to_string(), FormatValue::text(format!("{:x}", rule.id)));
        regex.insert("action".to_string(), FormatValue::Map(action));
        regex.insert("attempts".to_string(), FormatValue::Map(attempts));

        Formatter::new(&self.registry, template)
            .user(UserContext {
                id: ctx.author_id,
                name: ctx.author_name.clone(),
                discriminator: None,
            })
            .channel(ChannelContext {
                id: ctx.channel_id,
                name: ctx.channel_name.clone(),
            })
            .bind("regex", FormatValue::Map(regex))
            .format()
    }

    // ========================================================================
    // CONFIGURATION API (used by the command layer)
    // ========================================================================

    /// Create a rule, validating the pattern and the per-guild quota
    /// synchronously so configuration mistakes surface immediately.
    pub async fn create_rule(&self, guild_id: u64, kind: RuleKind) -> Result<Rule, RegexError> {
        validate_kind(&kind)?;

        let count = self.rules.count_rules(guild_id).await?;
        if count >= MAX_RULES_PER_GUILD {
            return Err(RegexError::QuotaExceeded(MAX_RULES_PER_GUILD));
        }

        let rule = Rule::new(rand::random::<u64>() | 1, guild_id, kind);
        self.rules.upsert_rule(&rule).await?;
        Ok(rule)
    }

    pub async fn get_rule(&self, id: RuleId) -> Result<Option<Rule>, RegexError> {
        self.rules.get_rule(id).await
    }

    pub async fn list_rules(&self, guild_id: u64) -> Result<Vec<Rule>, RegexError> {
        self.rules.list_rules(guild_id).await
    }

    /// Delete a rule, cascading its attempt records and cache entries.
    pub async fn delete_rule(&self, id: RuleId) -> Result<(), RegexError> {
        if !self.rules.delete_rule(id).await? {
            return Err(RegexError::NotFound);
        }
        self.attempts.delete_rule_attempts(id).await?;
        self.cache.clear_rule(id);
        Ok(())
    }

    /// Read-modify-write on a rule; the pattern is revalidated before the
    /// write in case the mutation touched it.
    pub async fn update_rule<F>(&self, id: RuleId, mutate: F) -> Result<Rule, RegexError>
    where
        F: FnOnce(&mut Rule) + Send,
    {
        let mut rule = self.rules.get_rule(id).await?.ok_or(RegexError::NotFound)?;
        mutate(&mut rule);
        validate_kind(&rule.kind)?;
        self.rules.upsert_rule(&rule).await?;
        Ok(rule)
    }

    /// Explicitly zero a user's attempts for a rule.
    pub async fn clear_attempts(&self, rule_id: RuleId, user_id: u64) -> Result<(), RegexError> {
        self.attempts.delete_attempts(rule_id, user_id).await?;
        self.cache.clear(rule_id, user_id);
        Ok(())
    }

    /// Current attempts from the in-memory cache. O(1).
    pub fn attempts_for(&self, rule_id: RuleId, user_id: u64) -> u32 {
        self.cache.get(rule_id, user_id)
    }

    /// Bulk-populate the attempt cache from durable storage.
    pub async fn warm_up(&self) -> Result<usize, RegexError> {
        let records = self.attempts.load_all().await?;
        Ok(self.cache.warm_up(records))
    }
}

fn validate_kind(kind: &RuleKind) -> Result<(), RegexError> {
    if let RuleKind::Pattern(source) = kind {
        Regex::new(source).map_err(|err| RegexError::InvalidPattern(err.to_string()))?;
    }
    Ok(())
}

// ============================================================================
// PER-RULE EVALUATION
// ============================================================================

/// One non-overlapping pattern match with its capture groups.
#[derive(Debug, Clone)]
struct Occurrence {
    groups: Vec<Option<String>>,
}

struct RuleEvaluation<I> {
    rule: Rule,
    whitelist: Option<Whitelist>,
    content: Arc<str>,
    guild_id: u64,
    resolver: Arc<I>,
    invite_pattern: Regex,
    budget: Duration,
}

impl<I: InviteResolver + 'static> RuleEvaluation<I> {
    /// Returns the rule when the message genuinely violates it.
    async fn run(self) -> Option<Rule> {
        let pattern = match &self.rule.kind {
            RuleKind::Pattern(source) => match Regex::new(source) {
                Ok(compiled) => compiled,
                Err(err) => {
                    tracing::debug!(
                        rule_id = self.rule.id,
                        error = %err,
                        "Stored pattern no longer compiles; skipping rule"
                    );
                    return None;
                }
            },
            RuleKind::Invite => self.invite_pattern.clone(),
        };

        let content = Arc::clone(&self.content);
        let occurrences =
            match_with_budget(move || find_occurrences(&pattern, &content), self.budget).await?;

        let exemptions = self
            .whitelist
            .as_ref()
            .map(|entry| entry.groups.as_slice())
            .unwrap_or(&[]);

        let total = occurrences.len();
        let exempt = occurrences
            .iter()
            .filter(|occurrence| is_exempt(occurrence, exemptions))
            .count();

        // Every occurrence whitelisted means no violation; zero occurrences
        // is vacuously "all whitelisted" and never fires
        if exempt == total {
            return None;
        }

        if matches!(self.rule.kind, RuleKind::Invite) && !self.resolve_invites(&occurrences).await {
            return None;
        }

        Some(self.rule)
    }

    /// Race every collected invite code against the resolver; the first
    /// resolution indicating a genuine violation wins. Failures and unknown
    /// codes are non-violating.
    async fn resolve_invites(&self, occurrences: &[Occurrence]) -> bool {
        let codes: HashSet<String> = occurrences
            .iter()
            .filter_map(|occurrence| occurrence.groups.get(1).cloned().flatten())
            .collect();

        let allowed: Vec<u64> = self
            .whitelist
            .as_ref()
            .map(|entry| entry.allowed_guilds.clone())
            .unwrap_or_default();
        let guild_id = self.guild_id;

        let mut resolutions: JoinSet<Option<InviteTarget>> = JoinSet::new();
        for code in codes {
            let resolver = Arc::clone(&self.resolver);
            resolutions.spawn(async move { resolver.resolve(&code).await });
        }

        let mut violating = false;
        while let Some(joined) = resolutions.join_next().await {
            if let Ok(Some(target)) = joined {
                let violates = match target.guild_id {
                    Some(target_guild) => {
                        target_guild != guild_id && !allowed.contains(&target_guild)
                    }
                    // An invite pointing at no guild at all still counts
                    None => true,
                };
                if violates {
                    violating = true;
                    break;
                }
            }
        }
        resolutions.detach_all();

        violating
    }
}

/// Run a pattern execution on a blocking worker under a hard wall-clock
/// budget. Timeout means "no match" - fail open so a runaway pattern skips
/// one rule for one message instead of stalling the pipeline.
async fn match_with_budget<F, T>(work: F, budget: Duration) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(budget, task).await {
        Ok(Ok(result)) => Some(result),
        Ok(Err(err)) => {
            tracing::error!(error = %err, "Pattern execution task failed");
            None
        }
        Err(_) => {
            tracing::debug!("Pattern execution exceeded budget; skipping rule");
            None
        }
    }
}

fn find_occurrences(pattern: &Regex, content: &str) -> Vec<Occurrence> {
    pattern
        .captures_iter(content)
        .map(|captures| Occurrence {
            groups: captures
                .iter()
                .map(|group| group.map(|m| m.as_str().to_string()))
                .collect(),
        })
        .collect()
}

/// An occurrence is exempt when any configured capture group's value is in
/// that group's allowed set.
fn is_exempt(occurrence: &Occurrence, exemptions: &[GroupExemption]) -> bool {
    exemptions.iter().any(|exemption| {
        occurrence
            .groups
            .get(exemption.group)
            .and_then(|value| value.as_ref())
            .map(|value| exemption.strings.contains(value))
            .unwrap_or(false)
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::antiregex::regex_models::{decayed_increment, MatchFlags, WhitelistScope};
    use crate::core::antiregex::regex_models::ActionKind;
    use chrono::Utc;
    use dashmap::DashMap;
    use std::sync::Mutex;

    struct MockRuleStore {
        rules: DashMap<RuleId, Rule>,
    }

    impl MockRuleStore {
        fn new() -> Self {
            Self {
                rules: DashMap::new(),
            }
        }

        fn with_rules(rules: Vec<Rule>) -> Self {
            let store = Self::new();
            for rule in rules {
                store.rules.insert(rule.id, rule);
            }
            store
        }
    }

    #[async_trait]
    impl RuleStore for MockRuleStore {
        async fn list_rules(&self, guild_id: u64) -> Result<Vec<Rule>, RegexError> {
            Ok(self
                .rules
                .iter()
                .filter(|entry| entry.guild_id == guild_id)
                .map(|entry| entry.clone())
                .collect())
        }

        async fn get_rule(&self, id: RuleId) -> Result<Option<Rule>, RegexError> {
            Ok(self.rules.get(&id).map(|entry| entry.clone()))
        }

        async fn upsert_rule(&self, rule: &Rule) -> Result<(), RegexError> {
            self.rules.insert(rule.id, rule.clone());
            Ok(())
        }

        async fn delete_rule(&self, id: RuleId) -> Result<bool, RegexError> {
            Ok(self.rules.remove(&id).is_some())
        }

        async fn count_rules(&self, guild_id: u64) -> Result<usize, RegexError> {
            Ok(self
                .rules
                .iter()
                .filter(|entry| entry.guild_id == guild_id)
                .count())
        }
    }

    struct MockAttemptStore {
        records: DashMap<(RuleId, u64), AttemptRecord>,
    }

    impl MockAttemptStore {
        fn new() -> Self {
            Self {
                records: DashMap::new(),
            }
        }

        fn stored_count(&self, rule_id: RuleId, user_id: u64) -> u32 {
            self.records
                .get(&(rule_id, user_id))
                .map(|record| record.count)
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl AttemptStore for MockAttemptStore {
        async fn increment_attempts(
            &self,
            rule_id: RuleId,
            user_id: u64,
            guild_id: u64,
            reset: Option<ResetPolicy>,
        ) -> Result<AttemptRecord, RegexError> {
            let now = Utc::now();
            let mut entry = self
                .records
                .entry((rule_id, user_id))
                .or_insert_with(|| AttemptRecord {
                    rule_id,
                    user_id,
                    guild_id,
                    count: 0,
                    last_attempt: now,
                    reset,
                });
            entry.count = decayed_increment(entry.count, entry.last_attempt, entry.reset, now);
            entry.last_attempt = now;
            entry.reset = reset;
            Ok(entry.clone())
        }

        async fn delete_attempts(&self, rule_id: RuleId, user_id: u64) -> Result<(), RegexError> {
            self.records.remove(&(rule_id, user_id));
            Ok(())
        }

        async fn delete_rule_attempts(&self, rule_id: RuleId) -> Result<(), RegexError> {
            self.records.retain(|(rule, _), _| *rule != rule_id);
            Ok(())
        }

        async fn load_all(&self) -> Result<Vec<AttemptRecord>, RegexError> {
            Ok(self.records.iter().map(|entry| entry.clone()).collect())
        }
    }

    struct MockResolver {
        targets: HashMap<String, Option<InviteTarget>>,
    }

    #[async_trait]
    impl InviteResolver for MockResolver {
        async fn resolve(&self, code: &str) -> Option<InviteTarget> {
            self.targets.get(code).copied().flatten()
        }
    }

    #[derive(Default)]
    struct MockExecutor {
        performed: Mutex<Vec<(ModAction, u64, String)>>,
        fail_with: Mutex<Option<ActionError>>,
    }

    #[async_trait]
    impl ActionExecutor for MockExecutor {
        async fn perform(
            &self,
            action: &ModAction,
            _guild_id: u64,
            user_id: u64,
            reason: &str,
        ) -> Result<(), ActionError> {
            if let Some(err) = self.fail_with.lock().unwrap().take() {
                return Err(err);
            }
            self.performed
                .lock()
                .unwrap()
                .push((*action, user_id, reason.to_string()));
            Ok(())
        }
    }

    type MockService = RegexService<MockRuleStore, MockAttemptStore, MockResolver, MockExecutor>;

    fn service(rules: Vec<Rule>) -> MockService {
        service_with_resolver(rules, HashMap::new())
    }

    fn service_with_resolver(
        rules: Vec<Rule>,
        targets: HashMap<String, Option<InviteTarget>>,
    ) -> MockService {
        RegexService::new(
            MockRuleStore::with_rules(rules),
            MockAttemptStore::new(),
            Arc::new(MockResolver { targets }),
            MockExecutor::default(),
            Arc::new(FormatterRegistry::standard()),
        )
    }

    fn message(content: &str) -> MessageContext {
        MessageContext {
            guild_id: 100,
            channel_id: 200,
            category_id: Some(300),
            message_id: 400,
            author_id: 500,
            author_name: "offender".into(),
            author_is_bot: false,
            author_is_admin: false,
            author_roles: vec![600],
            channel_name: "general".into(),
            content: content.into(),
        }
    }

    fn pattern_rule(id: RuleId, pattern: &str) -> Rule {
        Rule::new(id, 100, RuleKind::Pattern(pattern.into()))
    }

    #[tokio::test]
    async fn clean_message_matches_no_rule() {
        let service = service(vec![pattern_rule(1, "free nitro")]);
        let winner = service.check_message(&message("hello world")).await.unwrap();
        assert!(winner.is_none());
    }

    #[tokio::test]
    async fn matching_message_wins() {
        let service = service(vec![pattern_rule(1, "free nitro")]);
        let winner = service
            .check_message(&message("get your free nitro now"))
            .await
            .unwrap();
        assert_eq!(winner.unwrap().id, 1);
    }

    #[tokio::test]
    async fn disabled_rule_is_skipped() {
        let mut rule = pattern_rule(1, "free nitro");
        rule.enabled = false;
        let service = service(vec![rule]);
        let winner = service.check_message(&message("free nitro")).await.unwrap();
        assert!(winner.is_none());
    }

    #[tokio::test]
    async fn admin_is_exempt_when_flag_set() {
        let exempting = service(vec![pattern_rule(1, "free nitro")]);
        let mut ctx = message("free nitro");
        ctx.author_is_admin = true;
        assert!(exempting.check_message(&ctx).await.unwrap().is_none());

        // With the exemption disabled the rule applies to admins too
        let mut rule = pattern_rule(1, "free nitro");
        rule.admin_exempt = false;
        let applying = service(vec![rule]);
        assert!(applying.check_message(&ctx).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn bot_author_is_always_skipped() {
        let service = service(vec![pattern_rule(1, "free nitro")]);
        let mut ctx = message("free nitro");
        ctx.author_is_bot = true;
        assert!(service.check_message(&ctx).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn whitelisted_holders_skip_the_rule() {
        let holder_rule = |holder: Holder, scope: WhitelistScope| {
            let mut rule = pattern_rule(1, "free nitro");
            let mut whitelist = Whitelist::for_scope(scope);
            whitelist.holders = vec![holder];
            rule.whitelists = vec![whitelist];
            rule
        };

        let cases = vec![
            // Explicit user
            holder_rule(Holder::User(500), WhitelistScope::Channel(200)),
            // Held role
            holder_rule(Holder::Role(600), WhitelistScope::Channel(200)),
            // Guild id as the everyone role denotes a scope-wide allow
            holder_rule(Holder::Role(100), WhitelistScope::Category(300)),
        ];

        for rule in cases {
            let skipped = service(vec![rule]);
            assert!(skipped
                .check_message(&message("free nitro"))
                .await
                .unwrap()
                .is_none());
        }
    }

    #[tokio::test]
    async fn channel_whitelist_wins_over_category() {
        // Category exempts the author, but the more specific channel entry
        // does not - the channel entry is the one in effect
        let mut rule = pattern_rule(1, "free nitro");
        let mut category = Whitelist::for_scope(WhitelistScope::Category(300));
        category.holders = vec![Holder::User(500)];
        let channel = Whitelist::for_scope(WhitelistScope::Channel(200));
        rule.whitelists = vec![category, channel];
        let service = service(vec![rule]);
        assert!(service
            .check_message(&message("free nitro"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn fully_exempt_capture_groups_do_not_fire() {
        let mut rule = pattern_rule(1, r"buy (\w+)");
        let mut whitelist = Whitelist::for_scope(WhitelistScope::Channel(200));
        whitelist.groups = vec![GroupExemption {
            group: 1,
            strings: vec!["merch".into()],
        }];
        rule.whitelists = vec![whitelist];
        let service = service(vec![rule]);

        // Every occurrence exempt: no violation
        assert!(service
            .check_message(&message("buy merch and buy merch"))
            .await
            .unwrap()
            .is_none());

        // One non-exempt occurrence: violation
        assert!(service
            .check_message(&message("buy merch and buy gold"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn zero_matches_is_not_a_violation() {
        // "no matches" is vacuously "all occurrences whitelisted" and must
        // never fire - easy to invert accidentally
        let mut rule = pattern_rule(1, r"buy (\w+)");
        let mut whitelist = Whitelist::for_scope(WhitelistScope::Channel(200));
        whitelist.groups = vec![GroupExemption {
            group: 1,
            strings: vec!["merch".into()],
        }];
        rule.whitelists = vec![whitelist];
        let service = service(vec![rule]);
        assert!(service
            .check_message(&message("nothing relevant here"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn adding_whitelist_entries_never_flags_more() {
        // Monotonicity: the same message flagged without a whitelist is not
        // flagged once the author is whitelisted
        let bare = service(vec![pattern_rule(1, "free nitro")]);
        assert!(bare
            .check_message(&message("free nitro"))
            .await
            .unwrap()
            .is_some());

        let mut rule = pattern_rule(1, "free nitro");
        let mut whitelist = Whitelist::for_scope(WhitelistScope::Channel(200));
        whitelist.holders = vec![Holder::User(500)];
        rule.whitelists = vec![whitelist];
        let whitelisted = service(vec![rule]);
        assert!(whitelisted
            .check_message(&message("free nitro"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn invite_to_own_guild_does_not_fire() {
        let targets = HashMap::from([(
            "abcdef".to_string(),
            Some(InviteTarget {
                guild_id: Some(100),
            }),
        )]);
        let service = service_with_resolver(vec![Rule::new(1, 100, RuleKind::Invite)], targets);
        assert!(service
            .check_message(&message("join discord.gg/abcdef"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn invite_to_allowed_guild_does_not_fire() {
        let targets = HashMap::from([(
            "abcdef".to_string(),
            Some(InviteTarget {
                guild_id: Some(777),
            }),
        )]);
        let mut rule = Rule::new(1, 100, RuleKind::Invite);
        let mut whitelist = Whitelist::for_scope(WhitelistScope::Channel(200));
        whitelist.allowed_guilds = vec![777];
        rule.whitelists = vec![whitelist];
        let service = service_with_resolver(vec![rule], targets);
        assert!(service
            .check_message(&message("join discord.gg/abcdef"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn invite_to_foreign_guild_fires() {
        let targets = HashMap::from([(
            "abcdef".to_string(),
            Some(InviteTarget {
                guild_id: Some(999),
            }),
        )]);
        let service = service_with_resolver(vec![Rule::new(1, 100, RuleKind::Invite)], targets);
        assert!(service
            .check_message(&message("join discord.gg/abcdef"))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn unresolvable_and_own_guild_invites_together_do_not_fire() {
        // Code A is unknown, code B resolves to the current guild: every
        // resolution is non-violating so the rule stays quiet
        let targets = HashMap::from([
            ("aaaaaa".to_string(), None),
            (
                "bbbbbb".to_string(),
                Some(InviteTarget {
                    guild_id: Some(100),
                }),
            ),
        ]);
        let service = service_with_resolver(vec![Rule::new(1, 100, RuleKind::Invite)], targets);
        assert!(service
            .check_message(&message("discord.gg/aaaaaa discord.gg/bbbbbb"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn pattern_budget_overrun_fails_open() {
        let result = match_with_budget(
            || {
                std::thread::sleep(Duration::from_millis(200));
                vec![1]
            },
            Duration::from_millis(10),
        )
        .await;
        assert!(result.is_none());

        // A fast match is unaffected by the budget
        let result = match_with_budget(|| vec![1], Duration::from_millis(500)).await;
        assert_eq!(result, Some(vec![1]));
    }

    #[tokio::test]
    async fn slow_rule_is_skipped_without_error() {
        // Capturing every character of a very long message takes far longer
        // than the budget, so the rule is skipped instead of winning
        let starved =
            service(vec![pattern_rule(1, "(a)")]).with_match_budget(Duration::from_millis(1));
        let flood = "a".repeat(500_000);
        let winner = starved.check_message(&message(&flood)).await.unwrap();
        assert!(winner.is_none());

        // The same rule still fires when the content is small enough to
        // match inside the budget
        let unhurried =
            service(vec![pattern_rule(1, "(a)")]).with_match_budget(Duration::from_secs(2));
        let winner = unhurried.check_message(&message("aaa")).await.unwrap();
        assert!(winner.is_some());
    }

    #[tokio::test]
    async fn warn_path_persists_attempts_and_sends_match_message() {
        let mut rule = pattern_rule(1, "free nitro");
        rule.action = Some(ModAction {
            kind: ActionKind::Mute,
            duration_secs: Some(600),
        });
        rule.max_attempts = 3;
        let service = service(vec![rule.clone()]);

        let report = service
            .handle_message(&message("free nitro"))
            .await
            .unwrap()
            .unwrap();

        assert!(report.enforced.is_none());
        assert!(report.delete_message);
        let notice = report.notice.unwrap();
        assert!(notice.contains("(1/3)"), "notice was: {notice}");
        assert!(notice.contains("mute"), "notice was: {notice}");
        assert_eq!(service.attempts_for(1, 500), 1);
        assert_eq!(service.attempts.stored_count(1, 500), 1);
    }

    #[tokio::test]
    async fn third_violation_enforces_and_resets() {
        let mut rule = pattern_rule(1, "free nitro");
        rule.action = Some(ModAction {
            kind: ActionKind::Mute,
            duration_secs: Some(600),
        });
        rule.max_attempts = 3;
        let service = service(vec![rule]);
        let ctx = message("free nitro");

        for expected in 1..=2u32 {
            let report = service.handle_message(&ctx).await.unwrap().unwrap();
            assert!(report.enforced.is_none());
            assert_eq!(service.attempts_for(1, 500), expected);
        }

        let report = service.handle_message(&ctx).await.unwrap().unwrap();
        let enforced = report.enforced.unwrap();
        assert_eq!(enforced.kind, ActionKind::Mute);

        let notice = report.notice.unwrap();
        assert!(notice.contains("3 times"), "notice was: {notice}");

        // Full reset after enforcement
        assert_eq!(service.attempts_for(1, 500), 0);
        assert_eq!(service.attempts.stored_count(1, 500), 0);

        let performed = service.executor.performed.lock().unwrap();
        assert_eq!(performed.len(), 1);
        assert!(performed[0].2.contains("`1` 3 times"));
    }

    #[tokio::test]
    async fn no_action_configured_never_enforces() {
        let mut rule = pattern_rule(1, "free nitro");
        rule.max_attempts = 2;
        let service = service(vec![rule]);
        let ctx = message("free nitro");

        for expected in 1..=4u32 {
            let report = service.handle_message(&ctx).await.unwrap().unwrap();
            assert!(report.enforced.is_none());
            assert_eq!(service.attempts_for(1, 500), expected);
        }
        assert!(service.executor.performed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn domain_action_failure_is_reported_not_propagated() {
        let mut rule = pattern_rule(1, "free nitro");
        rule.action = Some(ModAction {
            kind: ActionKind::Kick,
            duration_secs: None,
        });
        rule.max_attempts = 1;
        let service = service(vec![rule]);
        *service.executor.fail_with.lock().unwrap() =
            Some(ActionError::Domain("I am missing the Kick Members permission".into()));

        let report = service
            .handle_message(&message("free nitro"))
            .await
            .unwrap()
            .unwrap();

        assert!(report.enforced.is_none());
        assert!(report.action_failure.unwrap().contains("Kick Members"));
        // The attempt survives the failed enforcement
        assert_eq!(service.attempts_for(1, 500), 1);
    }

    #[tokio::test]
    async fn send_flag_disabled_suppresses_notice() {
        let mut rule = pattern_rule(1, "free nitro");
        rule.match_flags = MatchFlags {
            delete_message: false,
            send_message: false,
        };
        let service = service(vec![rule]);

        let report = service
            .handle_message(&message("free nitro"))
            .await
            .unwrap()
            .unwrap();
        assert!(report.notice.is_none());
        assert!(!report.delete_message);
    }

    #[tokio::test]
    async fn create_rule_validates_pattern_and_quota() {
        let service = service(vec![]);

        let err = service
            .create_rule(100, RuleKind::Pattern("(unclosed".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, RegexError::InvalidPattern(_)));

        for _ in 0..MAX_RULES_PER_GUILD {
            service
                .create_rule(100, RuleKind::Pattern("ok".into()))
                .await
                .unwrap();
        }
        let err = service
            .create_rule(100, RuleKind::Pattern("ok".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, RegexError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn delete_rule_cascades_attempts() {
        let rule = pattern_rule(1, "free nitro");
        let service = service(vec![rule]);
        service.handle_message(&message("free nitro")).await.unwrap();
        assert_eq!(service.attempts_for(1, 500), 1);

        service.delete_rule(1).await.unwrap();
        assert_eq!(service.attempts_for(1, 500), 0);
        assert_eq!(service.attempts.stored_count(1, 500), 0);
        assert!(matches!(
            service.delete_rule(1).await.unwrap_err(),
            RegexError::NotFound
        ));
    }

    #[tokio::test]
    async fn warm_up_restores_escalation_progress() {
        let rule = pattern_rule(1, "free nitro");
        let store = MockAttemptStore::new();
        store
            .increment_attempts(1, 500, 100, None)
            .await
            .unwrap();
        store
            .increment_attempts(1, 500, 100, None)
            .await
            .unwrap();

        let service = RegexService::new(
            MockRuleStore::with_rules(vec![rule]),
            store,
            Arc::new(MockResolver {
                targets: HashMap::new(),
            }),
            MockExecutor::default(),
            Arc::new(FormatterRegistry::standard()),
        );

        assert_eq!(service.attempts_for(1, 500), 0);
        let loaded = service.warm_up().await.unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(service.attempts_for(1, 500), 2);
    }
}
