// Discord side of the automod: event translation, platform actions,
// log channel notifications and staff commands.

pub mod commands;
pub mod event_adapter;
pub mod formatter;
pub mod notifier;
pub mod serenity_platform;

pub use notifier::DiscordNotifier;
pub use serenity_platform::SerenityPlatform;
