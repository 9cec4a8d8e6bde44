// Translates gateway events into platform-free inbound events for the engine.

use chrono::Utc;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

use crate::core::moderation::{EventOutcome, EventPayload, InboundEvent};
use crate::Engine;

/// Build an `InboundEvent` from a gateway event, or `None` for events the automod
/// doesn't look at (bots, DMs, unrelated event types).
pub fn to_inbound(event: &serenity::FullEvent) -> Option<InboundEvent> {
    match event {
        serenity::FullEvent::Message { new_message } => from_message(new_message),
        serenity::FullEvent::ReactionAdd { add_reaction } => from_reaction(add_reaction),
        serenity::FullEvent::VoiceStateUpdate { old, new } => from_voice(old.as_ref(), new),
        serenity::FullEvent::GuildMemberAddition { new_member } => from_join(new_member),
        _ => None,
    }
}

fn role_ids(roles: &[serenity::RoleId]) -> Vec<u64> {
    roles.iter().map(|r| r.get()).collect()
}

fn from_message(msg: &serenity::Message) -> Option<InboundEvent> {
    // Skip bots
    if msg.author.bot {
        return None;
    }
    // Only check guild messages
    let guild_id = msg.guild_id?.get();

    // Count mentions (users + roles)
    let mut mention_count = (msg.mentions.len() + msg.mention_roles.len()) as u32;
    if msg.mention_everyone {
        mention_count += 1;
    }

    Some(InboundEvent {
        event_id: Some(msg.id.get()),
        guild_id,
        user_id: msg.author.id.get(),
        channel_id: Some(msg.channel_id.get()),
        roles: msg
            .member
            .as_ref()
            .map(|m| role_ids(&m.roles))
            .unwrap_or_default(),
        payload: EventPayload::Message {
            content: msg.content.clone(),
            mention_count,
            attachment_count: msg.attachments.len() as u32,
        },
        timestamp: *msg.timestamp,
    })
}

fn from_reaction(reaction: &serenity::Reaction) -> Option<InboundEvent> {
    let guild_id = reaction.guild_id?.get();
    let user_id = reaction.user_id?.get();
    if reaction.member.as_ref().map_or(false, |m| m.user.bot) {
        return None;
    }

    Some(InboundEvent {
        event_id: None,
        guild_id,
        user_id,
        channel_id: Some(reaction.channel_id.get()),
        roles: reaction
            .member
            .as_ref()
            .map(|m| role_ids(&m.roles))
            .unwrap_or_default(),
        payload: EventPayload::Reaction {
            message_id: reaction.message_id.get(),
            emoji: reaction.emoji.to_string(),
        },
        timestamp: Utc::now(),
    })
}

fn from_voice(old: Option<&serenity::VoiceState>, new: &serenity::VoiceState) -> Option<InboundEvent> {
    let guild_id = new.guild_id?.get();
    if new.member.as_ref().map_or(false, |m| m.user.bot) {
        return None;
    }

    let left = old.and_then(|o| o.channel_id);
    let joined = new.channel_id;
    // Mute/deafen updates keep the same channel.
    if left == joined {
        return None;
    }

    Some(InboundEvent {
        event_id: None,
        guild_id,
        user_id: new.user_id.get(),
        channel_id: joined.map(|c| c.get()),
        roles: new
            .member
            .as_ref()
            .map(|m| role_ids(&m.roles))
            .unwrap_or_default(),
        payload: EventPayload::Voice {
            joined_channel: joined.map(|c| c.get()),
            left_channel: left.map(|c| c.get()),
        },
        timestamp: Utc::now(),
    })
}

fn from_join(member: &serenity::Member) -> Option<InboundEvent> {
    if member.user.bot {
        return None;
    }

    Some(InboundEvent {
        event_id: None,
        guild_id: member.guild_id.get(),
        user_id: member.user.id.get(),
        channel_id: None,
        roles: role_ids(&member.roles),
        payload: EventPayload::Join {
            account_created_at: Some(*member.user.created_at()),
        },
        timestamp: Utc::now(),
    })
}

/// Hand the event to the engine on its own task so the gateway loop never waits on
/// moderation work. Storage outages are logged and the event dropped.
pub fn dispatch(engine: &Arc<Engine>, event: &serenity::FullEvent) {
    let Some(inbound) = to_inbound(event) else {
        return;
    };

    let engine = Arc::clone(engine);
    tokio::spawn(async move {
        let (guild_id, user_id) = (inbound.guild_id, inbound.user_id);
        match engine.process_event(inbound).await {
            Ok(EventOutcome::Scored {
                score, punishment, ..
            }) => {
                tracing::debug!(
                    guild_id,
                    user_id,
                    score,
                    punished = punishment.is_some(),
                    "Automod scored event"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(guild_id, user_id, error = %e, "Automod failed to process event");
            }
        }
    });
}
