// This is the entry point of the Discord bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases, APIs)
// - `discord/` = Discord-specific adapters (commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::antiregex::RegexService;
use crate::core::formatter::FormatterRegistry;
use crate::core::paged::PagedManager;
use crate::discord::antiregex::message_handler;
use crate::discord::antiregex::executor::{SerenityActionExecutor, SerenityInviteResolver};
use crate::discord::paged::{ui as paged_ui, SerenityPagedTransport};
use crate::discord::{Data, Error};
use crate::infra::antiregex::{SqliteAttemptStore, SqliteRuleStore};
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Event handler for non-command Discord events.
/// This is where messages are fed into the anti-regex engine.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            message_handler::dispatch(ctx, new_message, data);
        }

        // Edited messages get rechecked with their new content
        serenity::FullEvent::MessageUpdate { new, .. } => {
            if let Some(message) = new {
                message_handler::dispatch(ctx, message, data);
            }
        }

        serenity::FullEvent::InteractionCreate { interaction } => {
            paged_ui::handle_interaction(ctx, interaction, data).await;
        }

        _ => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Get Discord bot token from environment
    let token = std::env::var("DISCORD_TOKEN").expect(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    );

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    let data_dir = "data";
    std::fs::create_dir_all(data_dir).expect("Failed to create data directory for SQLite files");
    let db_path = format!("{}/antiregex.db", data_dir);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Storage is wired up front; the pieces that need the running client's
    // HTTP handle (invite resolution, moderation actions, paged messages)
    // are wired in the framework setup below.

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite://{}?mode=rwc", db_path))
        .await
        .expect("Failed to connect to anti-regex DB");

    let rule_store = SqliteRuleStore::new(pool.clone());
    rule_store
        .migrate()
        .await
        .expect("Failed to migrate rule tables");

    let attempt_store = SqliteAttemptStore::new(pool);
    attempt_store
        .migrate()
        .await
        .expect("Failed to migrate attempt tables");

    let registry = Arc::new(FormatterRegistry::standard());

    let max_concurrent_checks = std::env::var("MAX_CONCURRENT_CHECKS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(64);

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![discord::antiregex::commands::antiregex()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                // Register slash commands globally (can take up to an hour to propagate)
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let resolver = Arc::new(SerenityInviteResolver::new(ctx.http.clone()));
                let executor = SerenityActionExecutor::new(ctx.http.clone());
                let antiregex = Arc::new(RegexService::new(
                    rule_store,
                    attempt_store,
                    resolver,
                    executor,
                    registry,
                ));

                // Restore escalation progress from the last run
                match antiregex.warm_up().await {
                    Ok(count) => tracing::info!(count, "Warmed attempt cache"),
                    Err(err) => tracing::warn!(error = %err, "Failed to warm attempt cache"),
                }

                let transport = Arc::new(SerenityPagedTransport::new(ctx.http.clone()));
                let paged = PagedManager::new(transport);

                tracing::info!("Bot is ready");

                Ok(Data {
                    antiregex,
                    paged,
                    message_permits: Arc::new(tokio::sync::Semaphore::new(max_concurrent_checks)),
                })
            })
        })
        .build();

    // Create the client and start the bot
    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
