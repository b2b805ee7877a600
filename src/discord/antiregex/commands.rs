// Anti-regex slash commands - thin adapters over the core service.
//
// Validation happens synchronously inside the service before any reply, so
// a bad pattern or an exceeded quota comes back as the command response.

use crate::core::antiregex::{
    ActionKind, GroupExemption, Holder, ModAction, RegexError, ResetPolicy, Rule, RuleId, RuleKind,
    Whitelist, WhitelistScope,
};
use crate::core::paged::{PagedManager, PagedResult};
use crate::discord::antiregex::executor::{SerenityActionExecutor, SerenityInviteResolver};
use crate::discord::paged::SerenityPagedTransport;
use crate::infra::antiregex::{SqliteAttemptStore, SqliteRuleStore};
use poise::serenity_prelude as serenity;

/// Manage regex-based message filters for this server.
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "MANAGE_GUILD",
    subcommands(
        "add", "invites", "remove", "list", "toggle", "threshold", "action", "reset", "clear",
        "whitelist"
    )
)]
pub async fn antiregex(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Filter messages matching a regular expression.
#[poise::command(slash_command, guild_only)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "Regular expression to match against messages"] pattern: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?;

    match ctx
        .data()
        .antiregex
        .create_rule(guild_id.get(), RuleKind::Pattern(pattern))
        .await
    {
        Ok(rule) => {
            ctx.say(format!(
                "✅ Rule `{:x}` created, messages matching it will now be removed",
                rule.id
            ))
            .await?;
        }
        Err(err @ (RegexError::InvalidPattern(_) | RegexError::QuotaExceeded(_))) => {
            ctx.say(format!("❌ {err}")).await?;
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

/// Filter invite links to other servers.
#[poise::command(slash_command, guild_only)]
pub async fn invites(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?;

    match ctx
        .data()
        .antiregex
        .create_rule(guild_id.get(), RuleKind::Invite)
        .await
    {
        Ok(rule) => {
            ctx.say(format!(
                "✅ Rule `{:x}` created, invites to other servers will now be removed",
                rule.id
            ))
            .await?;
        }
        Err(err @ RegexError::QuotaExceeded(_)) => {
            ctx.say(format!("❌ {err}")).await?;
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

/// Remove a rule and all of its escalation state.
#[poise::command(slash_command, guild_only)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Rule id, as shown in /antiregex list"] id: String,
) -> Result<(), Error> {
    let id = parse_rule_id(&id)?;
    require_rule_in_guild(&ctx, id).await?;

    ctx.data().antiregex.delete_rule(id).await?;
    ctx.say(format!("✅ Rule `{id:x}` removed")).await?;
    Ok(())
}

/// List this server's rules.
#[poise::command(slash_command, guild_only)]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?;

    let rules = ctx.data().antiregex.list_rules(guild_id.get()).await?;
    if rules.is_empty() {
        ctx.say("There are no anti-regex rules in this server").await?;
        return Ok(());
    }

    ctx.say(format!("📋 {} rule(s) configured:", rules.len()))
        .await?;

    let paged = PagedResult::new(rules, display_rule).per_page(10);
    ctx.data()
        .paged
        .execute(ctx.author().id.get(), ctx.channel_id().get(), paged)
        .await?;
    Ok(())
}

/// Enable or disable a rule without deleting it.
#[poise::command(slash_command, guild_only)]
pub async fn toggle(
    ctx: Context<'_>,
    #[description = "Rule id, as shown in /antiregex list"] id: String,
) -> Result<(), Error> {
    let id = parse_rule_id(&id)?;
    require_rule_in_guild(&ctx, id).await?;

    let rule = ctx
        .data()
        .antiregex
        .update_rule(id, |rule| rule.enabled = !rule.enabled)
        .await?;

    let state = if rule.enabled { "enabled" } else { "disabled" };
    ctx.say(format!("✅ Rule `{id:x}` is now {state}")).await?;
    Ok(())
}

/// Set how many matches it takes before the action fires.
#[poise::command(slash_command, guild_only)]
pub async fn threshold(
    ctx: Context<'_>,
    #[description = "Rule id, as shown in /antiregex list"] id: String,
    #[description = "Matches before the action fires"]
    #[min = 1]
    #[max = 100]
    attempts: u32,
) -> Result<(), Error> {
    let id = parse_rule_id(&id)?;
    require_rule_in_guild(&ctx, id).await?;

    ctx.data()
        .antiregex
        .update_rule(id, |rule| rule.max_attempts = attempts)
        .await?;

    ctx.say(format!(
        "✅ Rule `{id:x}` now escalates after {attempts} match{}",
        if attempts == 1 { "" } else { "es" }
    ))
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum ActionChoice {
    Warn,
    Mute,
    Kick,
    Ban,
    #[name = "None (count matches only)"]
    None,
}

/// Set the moderation action applied at the threshold.
#[poise::command(slash_command, guild_only)]
pub async fn action(
    ctx: Context<'_>,
    #[description = "Rule id, as shown in /antiregex list"] id: String,
    #[description = "Action to apply"] choice: ActionChoice,
    #[description = "Mute duration in minutes (mute only)"]
    #[min = 1]
    duration_minutes: Option<u32>,
) -> Result<(), Error> {
    let id = parse_rule_id(&id)?;
    require_rule_in_guild(&ctx, id).await?;

    let action = match choice {
        ActionChoice::Warn => Some(ModAction {
            kind: ActionKind::Warn,
            duration_secs: None,
        }),
        ActionChoice::Mute => Some(ModAction {
            kind: ActionKind::Mute,
            duration_secs: Some(duration_minutes.unwrap_or(10) as u64 * 60),
        }),
        ActionChoice::Kick => Some(ModAction {
            kind: ActionKind::Kick,
            duration_secs: None,
        }),
        ActionChoice::Ban => Some(ModAction {
            kind: ActionKind::Ban,
            duration_secs: None,
        }),
        ActionChoice::None => None,
    };

    ctx.data()
        .antiregex
        .update_rule(id, |rule| rule.action = action)
        .await?;

    let described = match action {
        Some(action) => action.kind.to_string(),
        None => "nothing, matches will only be counted".to_string(),
    };
    ctx.say(format!("✅ Rule `{id:x}` will now apply: {described}"))
        .await?;
    Ok(())
}

/// Let attempts decay over time instead of only resetting on enforcement.
#[poise::command(slash_command, guild_only)]
pub async fn reset(
    ctx: Context<'_>,
    #[description = "Rule id, as shown in /antiregex list"] id: String,
    #[description = "Attempts forgiven per interval (0 disables decay)"]
    #[max = 100]
    amount: u32,
    #[description = "Interval in seconds"]
    #[min = 1]
    interval_secs: Option<u32>,
) -> Result<(), Error> {
    let id = parse_rule_id(&id)?;
    require_rule_in_guild(&ctx, id).await?;

    let policy = match (amount, interval_secs) {
        (0, _) => None,
        (amount, Some(interval)) => Some(ResetPolicy {
            amount,
            after_secs: interval as u64,
        }),
        (_, None) => {
            ctx.say("❌ An interval is required when the amount is not 0")
                .await?;
            return Ok(());
        }
    };

    ctx.data()
        .antiregex
        .update_rule(id, |rule| rule.reset = policy)
        .await?;

    let described = match policy {
        Some(policy) => format!(
            "✅ Rule `{id:x}` now forgives {} attempt(s) every {} second(s)",
            policy.amount, policy.after_secs
        ),
        None => format!("✅ Rule `{id:x}` attempts no longer decay"),
    };
    ctx.say(described).await?;
    Ok(())
}

/// Zero a user's attempt counter for a rule.
#[poise::command(slash_command, guild_only)]
pub async fn clear(
    ctx: Context<'_>,
    #[description = "Rule id, as shown in /antiregex list"] id: String,
    #[description = "User whose attempts to clear"] user: serenity::User,
) -> Result<(), Error> {
    let id = parse_rule_id(&id)?;
    require_rule_in_guild(&ctx, id).await?;

    ctx.data()
        .antiregex
        .clear_attempts(id, user.id.get())
        .await?;

    ctx.say(format!(
        "✅ Attempts for {} on rule `{id:x}` have been cleared",
        user.name
    ))
    .await?;
    Ok(())
}

/// Exempt members, roles, matched values, or invite targets from a rule.
#[poise::command(
    slash_command,
    guild_only,
    subcommands("member", "role", "group", "server")
)]
pub async fn whitelist(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Toggle a member exemption for a rule.
#[poise::command(slash_command, guild_only)]
pub async fn member(
    ctx: Context<'_>,
    #[description = "Rule id, as shown in /antiregex list"] id: String,
    #[description = "Member to exempt"] user: serenity::User,
    #[description = "Channel or category, defaults to the current channel"] channel: Option<
        serenity::GuildChannel,
    >,
) -> Result<(), Error> {
    let id = parse_rule_id(&id)?;
    require_rule_in_guild(&ctx, id).await?;

    let scope = whitelist_scope(&ctx, channel);
    let holder = Holder::User(user.id.get());
    let rule = ctx
        .data()
        .antiregex
        .update_rule(id, |rule| toggle_holder(rule, scope, holder))
        .await?;

    let state = if holds(&rule, scope, holder) {
        "is now exempt from"
    } else {
        "is no longer exempt from"
    };
    ctx.say(format!("✅ {} {state} rule `{id:x}` there", user.name))
        .await?;
    Ok(())
}

/// Toggle a role exemption for a rule.
#[poise::command(slash_command, guild_only)]
pub async fn role(
    ctx: Context<'_>,
    #[description = "Rule id, as shown in /antiregex list"] id: String,
    #[description = "Role whose holders are exempt"] role: serenity::Role,
    #[description = "Channel or category, defaults to the current channel"] channel: Option<
        serenity::GuildChannel,
    >,
) -> Result<(), Error> {
    let id = parse_rule_id(&id)?;
    require_rule_in_guild(&ctx, id).await?;

    let scope = whitelist_scope(&ctx, channel);
    let holder = Holder::Role(role.id.get());
    let rule = ctx
        .data()
        .antiregex
        .update_rule(id, |rule| toggle_holder(rule, scope, holder))
        .await?;

    let state = if holds(&rule, scope, holder) {
        "is now exempt from"
    } else {
        "is no longer exempt from"
    };
    ctx.say(format!("✅ {} {state} rule `{id:x}` there", role.name))
        .await?;
    Ok(())
}

/// Toggle an exempted value for one of the pattern's capture groups.
#[poise::command(slash_command, guild_only)]
pub async fn group(
    ctx: Context<'_>,
    #[description = "Rule id, as shown in /antiregex list"] id: String,
    #[description = "Capture group index (0 is the whole match)"]
    #[max = 20]
    group: u32,
    #[description = "Captured value that should not count"] value: String,
    #[description = "Channel or category, defaults to the current channel"] channel: Option<
        serenity::GuildChannel,
    >,
) -> Result<(), Error> {
    let id = parse_rule_id(&id)?;
    require_rule_in_guild(&ctx, id).await?;

    let scope = whitelist_scope(&ctx, channel);
    let group = group as usize;
    let rule = ctx
        .data()
        .antiregex
        .update_rule(id, |rule| toggle_group_value(rule, scope, group, &value))
        .await?;

    let state = if group_exempts(&rule, scope, group, &value) {
        "no longer counts towards"
    } else {
        "counts towards"
    };
    ctx.say(format!("✅ `{value}` in group {group} {state} rule `{id:x}` there"))
        .await?;
    Ok(())
}

/// Toggle an allowed target server for an invite rule.
#[poise::command(slash_command, guild_only)]
pub async fn server(
    ctx: Context<'_>,
    #[description = "Rule id, as shown in /antiregex list"] id: String,
    #[description = "Server id whose invites are allowed"] server_id: String,
    #[description = "Channel or category, defaults to the current channel"] channel: Option<
        serenity::GuildChannel,
    >,
) -> Result<(), Error> {
    let id = parse_rule_id(&id)?;
    let rule = require_rule_in_guild(&ctx, id).await?;
    if rule.kind != RuleKind::Invite {
        ctx.say("❌ Only invite rules keep a server allow list")
            .await?;
        return Ok(());
    }

    let target: u64 = server_id
        .trim()
        .parse()
        .map_err(|_| "That doesn't look like a server id")?;

    let scope = whitelist_scope(&ctx, channel);
    let rule = ctx
        .data()
        .antiregex
        .update_rule(id, |rule| toggle_allowed_guild(rule, scope, target))
        .await?;

    let state = if guild_allowed(&rule, scope, target) {
        "are now allowed by"
    } else {
        "are no longer allowed by"
    };
    ctx.say(format!("✅ Invites to `{target}` {state} rule `{id:x}` there"))
        .await?;
    Ok(())
}

/// Scope for a whitelist mutation: the named channel (categories whitelist
/// everything under them) or where the command was invoked.
fn whitelist_scope(ctx: &Context<'_>, channel: Option<serenity::GuildChannel>) -> WhitelistScope {
    match channel {
        Some(channel) if channel.kind == serenity::ChannelType::Category => {
            WhitelistScope::Category(channel.id.get())
        }
        Some(channel) => WhitelistScope::Channel(channel.id.get()),
        None => WhitelistScope::Channel(ctx.channel_id().get()),
    }
}

fn whitelist_entry(rule: &mut Rule, scope: WhitelistScope) -> &mut Whitelist {
    let pos = match rule.whitelists.iter().position(|w| w.scope == scope) {
        Some(pos) => pos,
        None => {
            rule.whitelists.push(Whitelist::for_scope(scope));
            rule.whitelists.len() - 1
        }
    };
    &mut rule.whitelists[pos]
}

fn toggle_holder(rule: &mut Rule, scope: WhitelistScope, holder: Holder) {
    let entry = whitelist_entry(rule, scope);
    match entry.holders.iter().position(|h| *h == holder) {
        Some(pos) => {
            entry.holders.remove(pos);
        }
        None => entry.holders.push(holder),
    }
}

fn holds(rule: &Rule, scope: WhitelistScope, holder: Holder) -> bool {
    rule.whitelists
        .iter()
        .any(|w| w.scope == scope && w.holders.contains(&holder))
}

fn toggle_group_value(rule: &mut Rule, scope: WhitelistScope, group: usize, value: &str) {
    let entry = whitelist_entry(rule, scope);
    match entry.groups.iter().position(|g| g.group == group) {
        Some(pos) => {
            let strings = &mut entry.groups[pos].strings;
            match strings.iter().position(|s| s == value) {
                Some(at) => {
                    strings.remove(at);
                    // No values left means no exemption for the group
                    if strings.is_empty() {
                        entry.groups.remove(pos);
                    }
                }
                None => strings.push(value.to_string()),
            }
        }
        None => entry.groups.push(GroupExemption {
            group,
            strings: vec![value.to_string()],
        }),
    }
}

fn group_exempts(rule: &Rule, scope: WhitelistScope, group: usize, value: &str) -> bool {
    rule.whitelists.iter().any(|w| {
        w.scope == scope
            && w.groups
                .iter()
                .any(|g| g.group == group && g.strings.iter().any(|s| s == value))
    })
}

fn toggle_allowed_guild(rule: &mut Rule, scope: WhitelistScope, target: u64) {
    let entry = whitelist_entry(rule, scope);
    match entry.allowed_guilds.iter().position(|g| *g == target) {
        Some(pos) => {
            entry.allowed_guilds.remove(pos);
        }
        None => entry.allowed_guilds.push(target),
    }
}

fn guild_allowed(rule: &Rule, scope: WhitelistScope, target: u64) -> bool {
    rule.whitelists
        .iter()
        .any(|w| w.scope == scope && w.allowed_guilds.contains(&target))
}

fn parse_rule_id(input: &str) -> Result<RuleId, Error> {
    RuleId::from_str_radix(input.trim().trim_matches('`'), 16)
        .map_err(|_| "That doesn't look like a rule id".into())
}

/// Commands operate on ids, so make sure the id belongs to the caller's
/// guild before touching it.
async fn require_rule_in_guild(ctx: &Context<'_>, id: RuleId) -> Result<Rule, Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?;

    match ctx.data().antiregex.get_rule(id).await? {
        Some(rule) if rule.guild_id == guild_id.get() => Ok(rule),
        _ => Err(RegexError::NotFound.into()),
    }
}

fn display_rule(rule: &Rule) -> String {
    let kind = match &rule.kind {
        RuleKind::Invite => "invites".to_string(),
        RuleKind::Pattern(pattern) => {
            let mut shown: String = pattern.chars().take(40).collect();
            if pattern.chars().count() > 40 {
                shown.push('…');
            }
            format!("`{shown}`")
        }
    };

    let action = match rule.action {
        Some(action) => format!("{} after {} matches", action.kind, rule.max_attempts),
        None => "count only".to_string(),
    };

    let status = if rule.enabled { "" } else { " _(disabled)_" };
    format!("`{:x}` {kind} - {action}{status}", rule.id)
}

// ============================================================================
// SHARED COMMAND TYPES
// ============================================================================

/// This is what every command receives as its first parameter.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// The fully wired anti-regex service.
pub type BotRegexService = crate::core::antiregex::RegexService<
    SqliteRuleStore,
    SqliteAttemptStore,
    SerenityInviteResolver,
    SerenityActionExecutor,
>;

/// Data that's shared across all commands.
/// This is where we store our services and configuration.
use std::sync::Arc;

pub struct Data {
    pub antiregex: Arc<BotRegexService>,
    pub paged: Arc<PagedManager<SerenityPagedTransport>>,
    /// Bounds how many message checks run concurrently.
    pub message_permits: Arc<tokio::sync::Semaphore>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> Rule {
        Rule::new(1, 10, RuleKind::Pattern("free (\\w+)".into()))
    }

    #[test]
    fn holder_toggle_adds_then_removes() {
        let mut rule = rule();
        let scope = WhitelistScope::Channel(20);
        let holder = Holder::User(7);

        toggle_holder(&mut rule, scope, holder);
        assert!(holds(&rule, scope, holder));
        assert!(!holds(&rule, WhitelistScope::Channel(21), holder));

        toggle_holder(&mut rule, scope, holder);
        assert!(!holds(&rule, scope, holder));
    }

    #[test]
    fn scopes_keep_separate_entries() {
        let mut rule = rule();
        toggle_holder(&mut rule, WhitelistScope::Channel(20), Holder::User(7));
        toggle_holder(&mut rule, WhitelistScope::Category(30), Holder::Role(8));

        assert_eq!(rule.whitelists.len(), 2);
        assert!(holds(&rule, WhitelistScope::Channel(20), Holder::User(7)));
        assert!(holds(&rule, WhitelistScope::Category(30), Holder::Role(8)));
    }

    #[test]
    fn group_values_accumulate_and_empty_out() {
        let mut rule = rule();
        let scope = WhitelistScope::Channel(20);

        toggle_group_value(&mut rule, scope, 1, "merch");
        toggle_group_value(&mut rule, scope, 1, "emotes");
        assert!(group_exempts(&rule, scope, 1, "merch"));
        assert!(group_exempts(&rule, scope, 1, "emotes"));
        assert!(!group_exempts(&rule, scope, 2, "merch"));

        toggle_group_value(&mut rule, scope, 1, "merch");
        toggle_group_value(&mut rule, scope, 1, "emotes");
        assert!(!group_exempts(&rule, scope, 1, "emotes"));
        // The emptied exemption is dropped entirely
        assert!(rule.whitelists[0].groups.is_empty());
    }

    #[test]
    fn allowed_guilds_toggle() {
        let mut rule = Rule::new(1, 10, RuleKind::Invite);
        let scope = WhitelistScope::Channel(20);

        toggle_allowed_guild(&mut rule, scope, 999);
        assert!(guild_allowed(&rule, scope, 999));

        toggle_allowed_guild(&mut rule, scope, 999);
        assert!(!guild_allowed(&rule, scope, 999));
    }
}
