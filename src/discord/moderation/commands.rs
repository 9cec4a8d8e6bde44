// Automod slash commands for staff.

use crate::core::moderation::TrustState;
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

/// Automod commands.
///
/// Inspect and override the automated moderation for your server.
#[poise::command(
    slash_command,
    subcommands("status", "enable", "disable", "trust", "revoke", "reset_trust"),
    required_permissions = "MODERATE_MEMBERS",
    guild_only
)]
pub async fn automod(_ctx: Context<'_>) -> Result<(), Error> {
    // Parent command - shows help
    Ok(())
}

/// Show current automod status and punishment ladder.
#[poise::command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let config = ctx
        .data()
        .engine
        .get_config(guild_id.get())
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    let status_emoji = if config.enabled { "✅" } else { "❌" };

    let enabled: Vec<&str> = config
        .detectors
        .iter()
        .filter(|(_, d)| d.enabled)
        .map(|(name, _)| name.as_str())
        .collect();

    let ladder = if config.punishments.is_empty() {
        "No thresholds configured".to_string()
    } else {
        let mut rules = config.punishments.clone();
        rules.sort_by_key(|p| p.threshold);
        rules
            .iter()
            .map(|p| {
                let actions: Vec<&str> = p.actions.iter().map(|a| a.kind()).collect();
                format!("**{}** → {}", p.threshold, actions.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let embed = serenity::CreateEmbed::new()
        .title("🛡️ Automod Status")
        .color(if config.enabled { 0x00FF00 } else { 0xFF0000 })
        .field(
            "Status",
            format!(
                "{} {}",
                status_emoji,
                if config.enabled {
                    "Enabled"
                } else {
                    "Disabled"
                }
            ),
            false,
        )
        .field(
            "Detectors",
            if enabled.is_empty() {
                "None enabled".to_string()
            } else {
                enabled.join(", ")
            },
            false,
        )
        .field("Punishments", ladder, false)
        .field(
            "Circuit Breakers",
            format!(
                "Auto-timeout: {}\nAuto-delete: {}",
                if config.auto_timeout.enabled {
                    format!("{}s", config.auto_timeout.duration_seconds)
                } else {
                    "off".to_string()
                },
                if config.auto_delete.enabled {
                    format!("last {}s", config.auto_delete.window_seconds)
                } else {
                    "off".to_string()
                }
            ),
            false,
        );

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Enable automod.
#[poise::command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn enable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    ctx.data()
        .engine
        .set_enabled(guild_id.get(), true)
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say("✅ Automod has been **enabled**.").await?;
    Ok(())
}

/// Disable automod.
#[poise::command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn disable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    ctx.data()
        .engine
        .set_enabled(guild_id.get(), false)
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.say("❌ Automod has been **disabled**.").await?;
    Ok(())
}

/// Show a member's trust score and recent history.
#[poise::command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn trust(
    ctx: Context<'_>,
    #[description = "Member to inspect"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let record = ctx
        .data()
        .engine
        .trust_record(guild_id.get(), user.id.get())
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    let state = match record.state() {
        TrustState::Clean => "🟢 Clean",
        TrustState::Flagged => "🟡 Flagged",
        TrustState::Sanctioned => "🔴 Sanctioned",
    };

    let history = if record.history.is_empty() {
        "No recorded hits".to_string()
    } else {
        record
            .history
            .iter()
            .take(5)
            .map(|h| {
                format!(
                    "`{:+}` {} (<t:{}:R>)",
                    h.delta,
                    h.reason,
                    h.timestamp.timestamp()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let embed = serenity::CreateEmbed::new()
        .title(format!("Trust for {}", user.name))
        .color(0x5865F2)
        .field("Score", record.score.to_string(), true)
        .field("State", state, true)
        .field("Recent History", history, false);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Lift a member's timeout.
#[poise::command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn revoke(
    ctx: Context<'_>,
    #[description = "Member to un-timeout"] user: serenity::User,
    #[description = "Also reset their trust score"] reset_trust: Option<bool>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let reset = reset_trust.unwrap_or(false);

    let reply = match ctx
        .data()
        .engine
        .revoke_timeout(
            guild_id.get(),
            user.id.get(),
            reset,
            None,
            Some(ctx.author().id.get()),
        )
        .await
    {
        Ok(_) if reset => format!("✅ Timeout lifted for <@{}> and trust reset.", user.id),
        Ok(_) => format!("✅ Timeout lifted for <@{}>.", user.id),
        Err(e) => {
            tracing::warn!(user_id = user.id.get(), error = %e, "Revocation via command failed");
            format!("⚠️ Could not lift the timeout: {}", e)
        }
    };

    ctx.send(poise::CreateReply::default().content(reply).ephemeral(true))
        .await?;
    Ok(())
}

/// Reset a member's trust score.
#[poise::command(slash_command, guild_only, required_permissions = "MODERATE_MEMBERS")]
pub async fn reset_trust(
    ctx: Context<'_>,
    #[description = "Member to reset"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    ctx.data()
        .engine
        .reset_trust(guild_id.get(), user.id.get(), Some(ctx.author().id.get()))
        .await
        .map_err(|e| Error::from(e.to_string()))?;

    ctx.send(
        poise::CreateReply::default()
            .content(format!("🧹 Trust reset for <@{}>.", user.id))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}
