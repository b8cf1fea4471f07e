//! Operator actions on stored configuration
//!
//! Every change goes through the tables; changes that affect reconciliation
//! ask the matching sweep for an immediate pass.

use crate::error::{EngineError, EngineResult};
use crate::model::{Emote, GuildView, MemberView};
use crate::platform::Platform;
use crate::reporting::ChannelKind;
use crate::storage::{Database, GlobalBan, GuildSettings, ReactionBan, ReactionBanKey};
use crate::sweep::{SweepHandle, SweepRequest};
use chrono::Utc;
use derive_more::Display;
use poise::serenity_prelude::{ChannelId, GuildId, Permissions, RoleId, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Bot owners, the guild owner, administrators and configured admins
#[must_use]
pub fn is_admin(
    guild: &GuildView,
    settings: &GuildSettings,
    owners: &HashSet<UserId>,
    member: &MemberView,
) -> bool {
    owners.contains(&member.id())
        || member.id() == guild.owner_id
        || guild.member_permissions(member).administrator()
        || settings.is_admin(member)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MentionRole {
    #[display("everyone")]
    Everyone,
    #[display("here")]
    Here,
}

#[derive(Clone)]
pub struct AdminService {
    platform: Arc<dyn Platform>,
    db: Database,
    owners: Arc<HashSet<UserId>>,
    member_role_sweep: SweepHandle,
    global_ban_sweep: SweepHandle,
}

impl AdminService {
    pub fn new(
        platform: Arc<dyn Platform>,
        db: Database,
        owners: Arc<HashSet<UserId>>,
        member_role_sweep: SweepHandle,
        global_ban_sweep: SweepHandle,
    ) -> Self {
        Self {
            platform,
            db,
            owners,
            member_role_sweep,
            global_ban_sweep,
        }
    }

    #[must_use]
    pub fn is_owner(&self, user_id: UserId) -> bool {
        self.owners.contains(&user_id)
    }

    /// Whether the member may change this guild's configuration
    pub fn is_admin(&self, guild_id: GuildId, member: &MemberView) -> EngineResult<bool> {
        let guild = self.guild(guild_id)?;
        Ok(is_admin(
            &guild,
            &self.db.settings(guild_id),
            &self.owners,
            member,
        ))
    }

    #[must_use]
    pub fn settings(&self, guild_id: GuildId) -> GuildSettings {
        self.db.settings(guild_id)
    }

    fn guild(&self, guild_id: GuildId) -> EngineResult<GuildView> {
        self.platform
            .guild(guild_id)
            .ok_or(EngineError::GuildNotCached(guild_id))
    }

    fn update(&self, guild_id: GuildId, mutate: impl FnOnce(&mut GuildSettings)) -> GuildSettings {
        self.db
            .guild_settings
            .find_apply_and_merge(guild_id.get(), mutate)
    }

    pub fn set_global_bans(&self, guild_id: GuildId, enabled: bool) -> EngineResult<()> {
        if enabled {
            let guild = self.guild(guild_id)?;
            if !guild.has_permission(Permissions::BAN_MEMBERS) {
                return Err(EngineError::InvalidConfig(
                    "I need the Ban Members permission to enforce global bans.".to_string(),
                ));
            }
        }

        self.update(guild_id, |s| s.global_bans_enabled = enabled);
        info!(guild_id = %guild_id, enabled, "Global bans toggled");
        if enabled {
            self.global_ban_sweep.request(SweepRequest::Guild(guild_id));
        }
        Ok(())
    }

    /// Set or clear the member role. The bot must be able to hand it out.
    pub fn set_member_role(&self, guild_id: GuildId, role_id: Option<RoleId>) -> EngineResult<()> {
        if let Some(role_id) = role_id {
            let guild = self.guild(guild_id)?;
            let role = guild
                .role(role_id)
                .ok_or_else(|| EngineError::InvalidConfig("That role does not exist.".to_string()))?;
            if role.managed
                || !guild.can_interact_with_role(role)
                || !guild.has_permission(Permissions::MANAGE_ROLES)
            {
                return Err(EngineError::InvalidConfig(format!(
                    "I cannot hand out the role {}. Check Manage Roles and my role position.",
                    role.name
                )));
            }
        }

        self.update(guild_id, |s| s.member_role_id = role_id.map(RoleId::get));
        if role_id.is_some() {
            self.member_role_sweep.request(SweepRequest::Guild(guild_id));
        }
        Ok(())
    }

    pub fn set_channel(
        &self,
        guild_id: GuildId,
        kind: ChannelKind,
        channel_id: Option<ChannelId>,
    ) -> EngineResult<()> {
        if let Some(channel_id) = channel_id {
            let guild = self.guild(guild_id)?;
            if !guild.channel(channel_id).is_some_and(|c| c.can_talk()) {
                return Err(EngineError::InvalidConfig(format!(
                    "I cannot post in that channel, so it cannot be the {kind} channel."
                )));
            }
        }

        let id = channel_id.map(ChannelId::get);
        self.update(guild_id, |s| match kind {
            ChannelKind::Reporting => s.reporting_channel_id = id,
            ChannelKind::Log => s.log_channel_id = id,
        });
        Ok(())
    }

    pub fn set_mention_role(
        &self,
        guild_id: GuildId,
        which: MentionRole,
        role_id: Option<RoleId>,
    ) -> EngineResult<()> {
        if let Some(role_id) = role_id {
            if self.guild(guild_id)?.role(role_id).is_none() {
                return Err(EngineError::InvalidConfig("That role does not exist.".to_string()));
            }
        }

        let id = role_id.map(RoleId::get);
        self.update(guild_id, |s| match which {
            MentionRole::Everyone => s.everyone_role_id = id,
            MentionRole::Here => s.here_role_id = id,
        });
        Ok(())
    }

    /// Returns whether anything changed
    pub fn set_admin_role(&self, guild_id: GuildId, role_id: RoleId, admin: bool) -> bool {
        let mut changed = false;
        self.update(guild_id, |s| {
            changed = toggle(&mut s.admin_role_ids, role_id.get(), admin);
        });
        changed
    }

    pub fn set_admin_user(&self, guild_id: GuildId, user_id: UserId, admin: bool) -> bool {
        let mut changed = false;
        self.update(guild_id, |s| {
            changed = toggle(&mut s.admin_user_ids, user_id.get(), admin);
        });
        changed
    }

    pub fn set_ignored_role(&self, guild_id: GuildId, role_id: RoleId, ignored: bool) -> bool {
        let mut changed = false;
        self.update(guild_id, |s| {
            changed = toggle(&mut s.ignored_role_ids, role_id.get(), ignored);
        });
        changed
    }

    fn require_owner(&self, actor: UserId) -> EngineResult<()> {
        if self.is_owner(actor) {
            Ok(())
        } else {
            Err(EngineError::InvalidConfig(
                "Only bot owners can manage the global ban list.".to_string(),
            ))
        }
    }

    /// Add or update a global ban and start propagating it
    pub fn add_global_ban(&self, actor: UserId, user_id: UserId, reason: &str) -> EngineResult<GlobalBan> {
        self.require_owner(actor)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::InvalidConfig(
                "A global ban needs a reason.".to_string(),
            ));
        }

        let ban = self.db.global_bans.find_apply_and_merge(user_id.get(), |ban| {
            ban.reason = reason.to_string();
            ban.created = Utc::now();
        });
        info!(user_id = %user_id, actor = %actor, "Global ban added");
        self.global_ban_sweep.request(SweepRequest::All);
        Ok(ban)
    }

    /// Global bans are never lifted in guilds; this only stops propagation
    pub fn remove_global_ban(&self, actor: UserId, user_id: UserId) -> EngineResult<bool> {
        self.require_owner(actor)?;
        Ok(self.db.global_bans.delete(&user_id.get()).is_some())
    }

    #[must_use]
    pub fn list_global_bans(&self) -> Vec<GlobalBan> {
        let mut bans = self.db.global_bans.load_all();
        bans.sort_by_key(|ban| ban.created);
        bans
    }

    pub fn add_reaction_ban(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        emote: &Emote,
    ) -> EngineResult<()> {
        if self.guild(guild_id)?.channel(channel_id).is_none() {
            return Err(EngineError::InvalidConfig(
                "That channel is not a text channel of this guild.".to_string(),
            ));
        }
        self.db
            .reaction_bans
            .find_or_create(ReactionBanKey::new(channel_id, emote));
        Ok(())
    }

    pub fn remove_reaction_ban(&self, channel_id: ChannelId, emote: &Emote) -> bool {
        self.db
            .reaction_bans
            .delete(&ReactionBanKey::new(channel_id, emote))
            .is_some()
    }

    /// Reaction bans watching a channel, ordered by emote
    pub fn list_reaction_bans(&self, channel_id: ChannelId) -> Vec<ReactionBan> {
        let mut bans = self.db.reaction_bans_in(channel_id);
        bans.sort_by(|a, b| a.key.emote.cmp(&b.key.emote));
        bans
    }
}

fn toggle(set: &mut HashSet<u64>, id: u64, present: bool) -> bool {
    if present { set.insert(id) } else { set.remove(&id) }
}
