// This is the entry point of the automod bot.
//
// **Architecture Overview:**
// - `core/` = Moderation engine (platform-agnostic)
// - `infra/` = Implementations of core store traits (SQLite, in-memory)
// - `discord/` = Discord-specific adapters (events, commands, platform actions)
// - `http/` = Dashboard API (settings, logs, trust, live events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize the engine (dependency injection)
// 3. Start the dashboard API and background jobs
// 4. Set up the Discord framework

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "http/http_layer.rs"]
mod http;
#[path = "infra/infra_layer.rs"]
mod infra;

mod config;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use crate::config::AppConfig;
use crate::core::moderation::{builtin_registry, ModerationEngine};
use crate::discord::moderation::{DiscordNotifier, SerenityPlatform};
use crate::discord::{Data, Error};
use crate::infra::moderation::SqliteModerationStore;
use poise::serenity_prelude as serenity;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The engine as wired for production.
pub type Engine = ModerationEngine<SqliteModerationStore, SerenityPlatform, DiscordNotifier>;

/// Event handler for non-command Discord events.
/// Everything moderation-relevant is handed to the engine off the gateway task.
async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    discord::moderation::event_adapter::dispatch(&data.engine, event);
    Ok(())
}

/// Flush buffered audit entries and prune old ones.
fn spawn_audit_maintenance(engine: Arc<Engine>, config: &AppConfig) {
    let retention = chrono::Duration::days(config.audit_retention_days);
    let max_per_guild = config.audit_max_entries_per_guild;

    tokio::spawn(async move {
        let mut ticks: u64 = 0;
        loop {
            tokio::time::sleep(StdDuration::from_secs(30)).await;
            ticks += 1;

            match engine.flush_audit().await {
                Ok(0) => {}
                Ok(flushed) => tracing::info!(flushed, "Flushed buffered audit entries"),
                Err(e) => tracing::warn!(error = %e, "Audit flush failed, will retry"),
            }

            // Prune roughly hourly.
            if ticks % 120 == 0 {
                match engine.prune_audit(retention, max_per_guild).await {
                    Ok(removed) if removed > 0 => {
                        tracing::info!(removed, "Pruned old audit entries")
                    }
                    Ok(_) => tracing::debug!("Audit prune found nothing to remove"),
                    Err(e) => tracing::warn!(error = %e, "Audit prune failed"),
                }
            }
        }
    });
}

fn spawn_decay_loop(engine: Arc<Engine>, tick: StdDuration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(tick).await;
            match engine.run_decay(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(changed) => tracing::debug!(changed, "Trust decay applied"),
                Err(e) => tracing::warn!(error = %e, "Trust decay tick failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() {
    // Initialize logging so we can see what's happening
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_automod=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let config = AppConfig::from_env().expect("Invalid configuration");

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    std::fs::create_dir_all(&config.data_dir)
        .expect("Failed to create data directory for SQLite files");

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .connect(&format!("sqlite://{}?mode=rwc", config.database_path()))
        .await
        .expect("Failed to connect to moderation DB");
    let store = SqliteModerationStore::new(pool);
    store
        .migrate()
        .await
        .expect("Failed to migrate moderation DB");

    // Platform actions and notifications share one REST client.
    let rest = Arc::new(serenity::Http::new(&config.discord_token));
    let engine: Arc<Engine> = Arc::new(ModerationEngine::new(
        Arc::new(store),
        Arc::new(SerenityPlatform::new(Arc::clone(&rest))),
        Arc::new(DiscordNotifier::new(Arc::clone(&rest))),
        builtin_registry(),
        config.dispatch_policy(),
    ));
    tracing::info!(detectors = ?engine.detector_names(), "Moderation engine ready");

    // ========================================================================
    // BACKGROUND JOBS
    // ========================================================================

    match &config.jwt_secret {
        Some(secret) => {
            let state = http::AppState {
                engine: Arc::clone(&engine),
                jwt_secret: Arc::new(secret.clone()),
            };
            let port = config.http_port;
            tokio::spawn(async move {
                if let Err(e) = http::serve(state, port).await {
                    tracing::error!(error = %e, "Dashboard API stopped");
                }
            });
        }
        None => tracing::warn!("DASHBOARD_JWT_SECRET not set, dashboard API disabled"),
    }

    spawn_audit_maintenance(Arc::clone(&engine), &config);
    spawn_decay_loop(
        Arc::clone(&engine),
        StdDuration::from_secs(config.decay_tick_secs),
    );

    let data = Data {
        engine: Arc::clone(&engine),
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS
        | serenity::GatewayIntents::GUILD_MESSAGE_REACTIONS
        | serenity::GatewayIntents::GUILD_VOICE_STATES;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![discord::moderation::commands::automod()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("🤖 Bot is starting up...");

                // Register slash commands globally (can take up to an hour to propagate)
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                tracing::info!("✅ Commands registered, 🚀 bot is ready!");
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
