// Discord-specific anti-regex handling - builds the platform-neutral
// message context, runs the engine and applies the resulting report.
//
// Checks run on their own tasks behind a semaphore so a burst of messages
// cannot pile unbounded pattern work onto the runtime.

use crate::core::antiregex::{EscalationReport, MessageContext};
use crate::discord::Data;
use poise::serenity_prelude as serenity;

/// Queue a message (new or edited) for checking. Fire and forget; failures
/// end up in the log, never back on the gateway task.
pub fn dispatch(ctx: &serenity::Context, msg: &serenity::Message, data: &Data) {
    // Quick drops that need no task
    if msg.author.bot || msg.guild_id.is_none() {
        return;
    }

    let service = data.antiregex.clone();
    let permits = data.message_permits.clone();
    let ctx = ctx.clone();
    let msg = msg.clone();

    tokio::spawn(async move {
        let _permit = match permits.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let message_context = match build_context(&ctx, &msg).await {
            Some(context) => context,
            None => return,
        };

        match service.handle_message(&message_context).await {
            Ok(Some(report)) => apply_report(&ctx, &msg, &report).await,
            Ok(None) => {}
            Err(err) => {
                tracing::error!(
                    message_id = msg.id.get(),
                    error = %err,
                    "Anti-regex check failed"
                );
            }
        }
    });
}

/// Collect everything the engine needs about the message. `None` when the
/// channel or member cannot be resolved (e.g. the message just left scope).
async fn build_context(
    ctx: &serenity::Context,
    msg: &serenity::Message,
) -> Option<MessageContext> {
    let guild_id = msg.guild_id?;

    let (channel_name, category_id) = match msg.channel(ctx).await {
        Ok(serenity::Channel::Guild(channel)) => {
            (channel.name.clone(), channel.parent_id.map(|id| id.get()))
        }
        Ok(_) => return None,
        Err(err) => {
            tracing::warn!(
                channel_id = msg.channel_id.get(),
                error = %err,
                "Failed to resolve channel for anti-regex check"
            );
            return None;
        }
    };

    let member = match guild_id.member(ctx, msg.author.id).await {
        Ok(member) => member,
        Err(err) => {
            tracing::warn!(
                user_id = msg.author.id.get(),
                error = %err,
                "Failed to resolve member for anti-regex check"
            );
            return None;
        }
    };

    let author_roles: Vec<u64> = member.roles.iter().map(|role| role.get()).collect();

    // Permissions come from the cached guild; without it we assume the
    // author is not an administrator rather than dropping the message
    let author_is_admin = {
        guild_id
            .to_guild_cached(&ctx.cache)
            .map(|guild| guild.member_permissions(&member).administrator())
            .unwrap_or(false)
    };

    Some(MessageContext {
        guild_id: guild_id.get(),
        channel_id: msg.channel_id.get(),
        category_id,
        message_id: msg.id.get(),
        author_id: msg.author.id.get(),
        author_name: msg.author.name.clone(),
        author_is_bot: msg.author.bot,
        author_is_admin,
        author_roles,
        channel_name,
        content: msg.content.clone(),
    })
}

/// Apply the engine's verdict: delete the message, post the rendered notice
/// and surface any action failure. Each step is best effort.
async fn apply_report(
    ctx: &serenity::Context,
    msg: &serenity::Message,
    report: &EscalationReport,
) {
    if report.delete_message {
        if let Err(err) = msg.delete(&ctx.http).await {
            tracing::warn!(
                message_id = msg.id.get(),
                error = %err,
                "Failed to delete matched message"
            );
        }
    }

    if let Some(notice) = &report.notice {
        if let Err(err) = msg.channel_id.say(&ctx.http, notice).await {
            tracing::warn!(
                channel_id = msg.channel_id.get(),
                error = %err,
                "Failed to send match notice"
            );
        }
    }

    if let Some(failure) = &report.action_failure {
        if let Err(err) = msg.channel_id.say(&ctx.http, failure).await {
            tracing::warn!(
                channel_id = msg.channel_id.get(),
                error = %err,
                "Failed to report action failure"
            );
        }
    }
}
