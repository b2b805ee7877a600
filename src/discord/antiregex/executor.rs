// Discord implementations of the anti-regex side-effect traits: resolving
// invite codes through the API and performing moderation actions.

use crate::core::antiregex::{
    ActionError, ActionExecutor, ActionKind, InviteResolver, InviteTarget, ModAction,
};
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

pub struct SerenityInviteResolver {
    http: Arc<serenity::Http>,
}

impl SerenityInviteResolver {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl InviteResolver for SerenityInviteResolver {
    async fn resolve(&self, code: &str) -> Option<InviteTarget> {
        match self.http.get_invite(code, false, false, None).await {
            Ok(invite) => Some(InviteTarget {
                guild_id: invite.guild.map(|guild| guild.id.get()),
            }),
            // Unknown and unresolvable codes both count as "no target"
            Err(err) => {
                tracing::debug!(code, error = %err, "Invite did not resolve");
                None
            }
        }
    }
}

pub struct SerenityActionExecutor {
    http: Arc<serenity::Http>,
}

impl SerenityActionExecutor {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ActionExecutor for SerenityActionExecutor {
    async fn perform(
        &self,
        action: &ModAction,
        guild_id: u64,
        user_id: u64,
        reason: &str,
    ) -> Result<(), ActionError> {
        let guild = serenity::GuildId::new(guild_id);
        let user = serenity::UserId::new(user_id);

        let result = match action.kind {
            // A warn is just the mod message; nothing to perform
            ActionKind::Warn => Ok(()),

            ActionKind::Mute => {
                let until = action.duration_secs.unwrap_or(600);
                let timestamp = serenity::Timestamp::from_unix_timestamp(
                    chrono::Utc::now().timestamp() + until as i64,
                )
                .map_err(|e| ActionError::Infrastructure(e.to_string()))?;

                guild
                    .edit_member(
                        &self.http,
                        user,
                        serenity::EditMember::new()
                            .disable_communication_until_datetime(timestamp)
                            .audit_log_reason(reason),
                    )
                    .await
                    .map(|_| ())
            }

            ActionKind::Kick => guild.kick_with_reason(&self.http, user, reason).await,

            ActionKind::Ban => guild.ban_with_reason(&self.http, user, 0, reason).await,
        };

        result.map_err(|err| classify(err, action.kind))
    }
}

/// Permission and missing-member failures are the moderators' problem and go
/// back to the channel; everything else is ours and goes to the log.
fn classify(err: serenity::Error, kind: ActionKind) -> ActionError {
    if let serenity::Error::Http(serenity::HttpError::UnsuccessfulRequest(response)) = &err {
        match response.status_code.as_u16() {
            403 => {
                return ActionError::Domain(format!(
                    "I am missing the permissions required to {kind} that user"
                ))
            }
            404 => return ActionError::Domain("That user is no longer in the server".to_string()),
            _ => {}
        }
    }
    ActionError::Infrastructure(err.to_string())
}
