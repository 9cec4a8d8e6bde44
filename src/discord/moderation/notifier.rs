// Audit notifications: log channel embeds via serenity, webhooks via reqwest.

use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;

use super::formatter::{format_log_entry, summary_line};
use crate::core::moderation::{DetectionLogEntry, Notifier, NotifyError};

#[derive(Serialize)]
struct WebhookPayload<'a> {
    content: String,
    entry: &'a DetectionLogEntry,
}

pub struct DiscordNotifier {
    http: Arc<serenity::Http>,
    client: Client,
}

impl DiscordNotifier {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self {
            http,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn post_summary(
        &self,
        channel_id: u64,
        entry: &DetectionLogEntry,
    ) -> Result<(), NotifyError> {
        serenity::ChannelId::new(channel_id)
            .send_message(
                &self.http,
                serenity::CreateMessage::new().embed(format_log_entry(entry)),
            )
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        Ok(())
    }

    async fn notify_webhook(&self, url: &str, entry: &DetectionLogEntry) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            content: summary_line(entry),
            entry,
        };
        self.client
            .post(url)
            .json(&payload)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        Ok(())
    }
}
