use crate::core::moderation::{DetectionLogEntry, LogKind};
use poise::serenity_prelude::{self as serenity, CreateEmbed, CreateEmbedFooter};

fn color_for(kind: LogKind) -> serenity::Color {
    match kind {
        LogKind::Detection => serenity::Color::from_rgb(255, 165, 0), // Orange
        LogKind::Punishment | LogKind::AutoTimeout => serenity::Color::from_rgb(255, 0, 0), // Red
        LogKind::AutoDelete => serenity::Color::from_rgb(255, 215, 0), // Gold
        LogKind::ManualAction => serenity::Color::BLUE,
        LogKind::ActionFailed => serenity::Color::from_rgb(128, 0, 0), // Dark red
        LogKind::Revocation | LogKind::TrustReset => serenity::Color::from_rgb(0, 255, 0), // Green
    }
}

fn title_for(kind: LogKind) -> String {
    match kind {
        LogKind::Detection => "🛡️ Automod Detection".to_string(),
        LogKind::Punishment => "🔨 Automod Punishment".to_string(),
        LogKind::AutoTimeout => "🔇 Automatic Timeout".to_string(),
        LogKind::AutoDelete => "🧹 Messages Removed".to_string(),
        LogKind::ManualAction => "👮 Staff Action".to_string(),
        LogKind::ActionFailed => "⚠️ Action Failed".to_string(),
        other => format!("✅ {}", other),
    }
}

/// Log channel embed for one audit entry.
pub fn format_log_entry(entry: &DetectionLogEntry) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title(title_for(entry.kind))
        .description(format!("<@{}>: {}", entry.user_id, entry.reason))
        .color(color_for(entry.kind))
        .footer(CreateEmbedFooter::new(format!(
            "Guild ID: {} • Entry {}",
            entry.guild_id, entry.id
        )))
        .timestamp(serenity::Timestamp::now());

    if let Some(detector) = &entry.detector {
        embed = embed.field("Detector", detector, true);
    }
    if entry.score_delta != 0 {
        embed = embed.field("Score Change", format!("{:+}", entry.score_delta), true);
    }
    if let Some(score) = entry.score_after {
        embed = embed.field("Trust Score", score.to_string(), true);
    }
    if let Some(channel_id) = entry.channel_id {
        embed = embed.field("Channel", format!("<#{}>", channel_id), true);
    }
    if let Some(error) = entry.metadata.get("error").and_then(|e| e.as_str()) {
        embed = embed.field("Error", error, false);
    }

    embed
}

/// Plain-text one-liner used for webhook payloads.
pub fn summary_line(entry: &DetectionLogEntry) -> String {
    match &entry.detector {
        Some(detector) => format!(
            "[{}] user {} ({}): {}",
            entry.kind, entry.user_id, detector, entry.reason
        ),
        None => format!("[{}] user {}: {}", entry.kind, entry.user_id, entry.reason),
    }
}
