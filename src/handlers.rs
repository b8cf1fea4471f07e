//! Gateway event handler
//!
//! Events are converted to plain view types and handed to the [`Engine`],
//! which queues the real work per guild. Nothing here waits on the platform.

use crate::mentions::MessageEvent;
use crate::model::{Emote, MemberView};
use crate::platform::{member_view, to_utc, user_view};
use crate::reaction_bans::ReactionEvent;
use crate::{Data, EVENT_TARGET, Engine};
use chrono::Utc;
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, Guild, GuildId, GuildMemberUpdateEvent, Member,
    Message, Reaction, ReactionType, Ready, User,
};
use tracing::{debug, info, warn};

pub struct Handler {
    data: Data,
}

impl Handler {
    #[must_use]
    pub fn new(data: Data) -> Self {
        Self { data }
    }

    fn engine(&self) -> Option<&Engine> {
        let engine = self.data.engine();
        if engine.is_none() {
            warn!(target: EVENT_TARGET, "Event received before the engine was installed");
        }
        engine
    }
}

/// The emote of a reaction, if it is one we can store
#[must_use]
pub fn reaction_emote(reaction: &ReactionType) -> Option<Emote> {
    match reaction {
        ReactionType::Unicode(text) => Some(Emote::Unicode(text.clone())),
        ReactionType::Custom { animated, id, name } => Some(Emote::Custom {
            id: *id,
            name: name.clone(),
            animated: *animated,
        }),
        _ => None,
    }
}

/// The author of a guild message, from the partial member attached to it
fn message_author(message: &Message) -> Option<MemberView> {
    let partial = message.member.as_ref()?;
    Some(MemberView {
        user: user_view(&message.author),
        roles: partial.roles.clone(),
        nickname: partial.nick.clone(),
        joined_at: partial.joined_at.and_then(to_utc),
    })
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!(target: EVENT_TARGET, "Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                target: EVENT_TARGET,
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!(target: EVENT_TARGET, "Cache ready! The bot is in {guild_count} guild(s)");
        if let Some(engine) = self.engine() {
            engine.on_ready();
        }
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, is_new: Option<bool>) {
        if let Some(engine) = self.engine() {
            engine.on_guild_create(guild.id, is_new.unwrap_or(false));
        }
    }

    async fn guild_member_addition(&self, _ctx: Context, new_member: Member) {
        debug!(target: EVENT_TARGET, guild_id = %new_member.guild_id, user_id = %new_member.user.id, "Member joined");
        if let Some(engine) = self.engine() {
            engine.on_member_join(new_member.guild_id, user_view(&new_member.user));
        }
    }

    async fn guild_member_update(
        &self,
        _ctx: Context,
        old_if_available: Option<Member>,
        new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        let Some(new) = new else {
            debug!(target: EVENT_TARGET, guild_id = %event.guild_id, user_id = %event.user.id, "Updated member not cached");
            return;
        };
        if let Some(engine) = self.engine() {
            engine.on_member_update(
                new.guild_id,
                old_if_available.as_ref().map(member_view),
                member_view(&new),
            );
        }
    }

    async fn guild_member_removal(
        &self,
        _ctx: Context,
        guild_id: GuildId,
        user: User,
        member_data_if_available: Option<Member>,
    ) {
        if let Some(engine) = self.engine() {
            engine.on_member_remove(
                guild_id,
                user_view(&user),
                member_data_if_available.as_ref().map(member_view),
                Utc::now(),
            );
        }
    }

    async fn guild_ban_addition(&self, _ctx: Context, guild_id: GuildId, banned_user: User) {
        if let Some(engine) = self.engine() {
            engine.on_ban(guild_id, user_view(&banned_user), Utc::now());
        }
    }

    async fn guild_ban_removal(&self, _ctx: Context, guild_id: GuildId, unbanned_user: User) {
        if let Some(engine) = self.engine() {
            engine.on_unban(guild_id, user_view(&unbanned_user), Utc::now());
        }
    }

    async fn reaction_add(&self, ctx: Context, add_reaction: Reaction) {
        let (Some(guild_id), Some(user_id)) = (add_reaction.guild_id, add_reaction.user_id) else {
            return;
        };
        if user_id == ctx.cache.current_user().id {
            return;
        }
        let Some(emote) = reaction_emote(&add_reaction.emoji) else {
            debug!(target: EVENT_TARGET, guild_id = %guild_id, "Unsupported reaction type");
            return;
        };
        if let Some(engine) = self.engine() {
            engine.on_reaction(ReactionEvent {
                guild_id,
                channel_id: add_reaction.channel_id,
                message_id: add_reaction.message_id,
                user_id,
                emote,
            });
        }
    }

    async fn message(&self, _ctx: Context, new_message: Message) {
        let Some(guild_id) = new_message.guild_id else {
            return;
        };
        if new_message.author.bot {
            return;
        }
        let Some(author) = message_author(&new_message) else {
            return;
        };
        if let Some(engine) = self.engine() {
            engine.on_message(MessageEvent {
                guild_id,
                channel_id: new_message.channel_id,
                message_id: new_message.id,
                author,
                mentions_everyone: new_message.mention_everyone,
                mentioned_roles: new_message.mention_roles.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;
    use crate::test_support::database;
    use poise::serenity_prelude::EmojiId;

    #[test]
    fn test_handler_implements_event_handler() {
        // This test verifies at compile time that Handler implements EventHandler
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }

    #[test]
    fn test_handler_without_engine() {
        let handler = Handler::new(Data::new(BotConfig::default(), database()));
        assert!(handler.engine().is_none());
    }

    #[test]
    fn test_reaction_emote() {
        assert_eq!(
            reaction_emote(&ReactionType::Unicode("👍".to_string())),
            Some(Emote::Unicode("👍".to_string()))
        );
        assert_eq!(
            reaction_emote(&ReactionType::Custom {
                animated: true,
                id: EmojiId::new(42),
                name: Some("pog".to_string()),
            }),
            Some(Emote::Custom {
                id: EmojiId::new(42),
                name: Some("pog".to_string()),
                animated: true,
            })
        );
    }
}
