//! Marking members who ping everyone
//!
//! A non-admin who mentions @everyone or @here (or the configured stand-in
//! roles) is given the matching configured role, and the message gets a row
//! of 👌 reactions once the role is in place.

use crate::SYNC_TARGET;
use crate::admin::is_admin;
use crate::error::{EngineError, EngineResult};
use crate::model::{Emote, GuildView, MemberView};
use crate::platform::{Platform, log_remote_failure};
use crate::storage::Database;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, Permissions, RoleId, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

pub const OK_HANDS: [&str; 6] = ["👌", "👌🏻", "👌🏼", "👌🏽", "👌🏾", "👌🏿"];

/// A message posted in a guild
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub author: MemberView,
    /// Set for both @everyone and @here
    pub mentions_everyone: bool,
    pub mentioned_roles: Vec<RoleId>,
}

#[derive(Clone)]
pub struct FakeMentions {
    platform: Arc<dyn Platform>,
    db: Database,
    owners: Arc<HashSet<UserId>>,
}

impl FakeMentions {
    pub fn new(platform: Arc<dyn Platform>, db: Database, owners: Arc<HashSet<UserId>>) -> Self {
        Self {
            platform,
            db,
            owners,
        }
    }

    pub fn on_message(&self, event: MessageEvent) -> EngineResult<()> {
        if event.author.user.bot {
            return Ok(());
        }
        let guild = self
            .platform
            .guild(event.guild_id)
            .ok_or(EngineError::GuildNotCached(event.guild_id))?;
        let settings = self.db.settings(event.guild_id);
        if is_admin(&guild, &settings, &self.owners, &event.author) {
            return Ok(());
        }

        let event = Arc::new(event);
        for role_id in [settings.here_role(), settings.everyone_role()]
            .into_iter()
            .flatten()
        {
            let triggered = event.mentions_everyone || event.mentioned_roles.contains(&role_id);
            if triggered && !event.author.has_role(role_id) {
                self.mark(&guild, role_id, Arc::clone(&event));
            }
        }
        Ok(())
    }

    fn mark(&self, guild: &GuildView, role_id: RoleId, event: Arc<MessageEvent>) {
        let Some(role) = guild.role(role_id) else {
            return;
        };
        if !guild.can_interact_with_role(role) || !guild.has_permission(Permissions::MANAGE_ROLES) {
            debug!(target: SYNC_TARGET, guild_id = %guild.id, role_id = %role_id, "Cannot hand out mention role");
            return;
        }
        let react = guild
            .channel(event.channel_id)
            .is_some_and(|c| c.allows(Permissions::ADD_REACTIONS));

        let platform = Arc::clone(&self.platform);
        tokio::spawn(async move {
            let user_id = event.author.id();
            if let Err(e) = platform.add_role(event.guild_id, user_id, role_id).await {
                log_remote_failure("mention role", &e);
                return;
            }
            if !react {
                return;
            }
            for hand in OK_HANDS {
                let emote = Emote::Unicode(hand.to_string());
                if let Err(e) = platform
                    .add_reaction(event.channel_id, event.message_id, emote)
                    .await
                {
                    log_remote_failure("mention reaction", &e);
                }
            }
        });
    }
}
