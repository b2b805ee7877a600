// Discord delivery for paged sessions: real messages with navigation
// buttons, plus the routing of button presses back into the manager.

use crate::core::paged::{NavControls, PagePayload, PagedError, PagedEvent, PagedTransport};
use crate::discord::Data;
use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

const PREVIOUS_BUTTON: &str = "paged:previous";
const NEXT_BUTTON: &str = "paged:next";

pub struct SerenityPagedTransport {
    http: Arc<serenity::Http>,
}

impl SerenityPagedTransport {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

fn nav_row(controls: NavControls) -> serenity::CreateActionRow {
    serenity::CreateActionRow::Buttons(vec![
        serenity::CreateButton::new(PREVIOUS_BUTTON)
            .emoji('◀')
            .style(serenity::ButtonStyle::Secondary)
            .disabled(!controls.previous_enabled),
        serenity::CreateButton::new(NEXT_BUTTON)
            .emoji('▶')
            .style(serenity::ButtonStyle::Secondary)
            .disabled(!controls.next_enabled),
    ])
}

#[async_trait]
impl PagedTransport for SerenityPagedTransport {
    async fn send(&self, channel_id: u64, payload: &PagePayload) -> Result<u64, PagedError> {
        let mut builder = serenity::CreateMessage::new().content(&payload.content);
        if let Some(controls) = payload.controls {
            builder = builder.components(vec![nav_row(controls)]);
        }

        let message = serenity::ChannelId::new(channel_id)
            .send_message(&self.http, builder)
            .await
            .map_err(|e| PagedError::Transport(e.to_string()))?;

        Ok(message.id.get())
    }

    async fn edit(
        &self,
        channel_id: u64,
        message_id: u64,
        payload: &PagePayload,
    ) -> Result<(), PagedError> {
        let mut builder = serenity::EditMessage::new().content(&payload.content);
        if let Some(controls) = payload.controls {
            builder = builder.components(vec![nav_row(controls)]);
        }

        serenity::ChannelId::new(channel_id)
            .edit_message(&self.http, serenity::MessageId::new(message_id), builder)
            .await
            .map_err(|e| PagedError::Transport(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, channel_id: u64, message_id: u64) {
        if let Err(err) = serenity::ChannelId::new(channel_id)
            .delete_message(&self.http, serenity::MessageId::new(message_id))
            .await
        {
            tracing::warn!(message_id, error = %err, "Failed to delete paged message");
        }
    }
}

/// Route a component interaction into the paged manager. Interactions on
/// messages we don't own are ignored.
pub async fn handle_interaction(
    ctx: &serenity::Context,
    interaction: &serenity::Interaction,
    data: &Data,
) {
    let serenity::Interaction::Component(component) = interaction else {
        return;
    };

    let message_id = component.message.id.get();
    if !data.paged.is_session(message_id) {
        return;
    }

    let event = match component.data.custom_id.as_str() {
        PREVIOUS_BUTTON => PagedEvent::PreviousPage,
        NEXT_BUTTON => PagedEvent::NextPage,
        _ => return,
    };

    // Ack before dispatching so the button never shows a spinner failure
    if let Err(err) = component
        .create_response(&ctx.http, serenity::CreateInteractionResponse::Acknowledge)
        .await
    {
        tracing::warn!(message_id, error = %err, "Failed to acknowledge paged interaction");
    }

    data.paged
        .dispatch(message_id, component.user.id.get(), event)
        .await;
}
