// Discord layer - commands, event handlers and the platform adapters.

#[path = "moderation/mod.rs"]
pub mod moderation;

use std::sync::Arc;

use crate::Engine;

/// Shared state handed to every command and event handler.
pub struct Data {
    pub engine: Arc<Engine>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
