//! Remembering member roles and nicknames, and giving them back on rejoin

use crate::SYNC_TARGET;
use crate::error::{EngineError, EngineResult};
use crate::model::{GuildView, MemberView};
use crate::platform::{Platform, log_remote_failure};
use crate::storage::{Database, GuildSettings, MemberKey, MemberRoles};
use poise::serenity_prelude::{GuildId, Permissions, RoleId, UserId};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct MemberSync {
    platform: Arc<dyn Platform>,
    db: Database,
}

impl MemberSync {
    pub fn new(platform: Arc<dyn Platform>, db: Database) -> Self {
        Self { platform, db }
    }

    /// Overwrite the stored state of a member with what they hold right now
    pub fn capture(&self, guild: &GuildView, member: &MemberView) {
        self.db
            .member_roles
            .find_apply_and_merge(MemberKey::new(guild.id, member.id()), |stored| {
                stored.set(guild, member);
            });
    }

    /// Capture every cached member of a guild
    pub fn capture_guild(&self, guild_id: GuildId) -> EngineResult<usize> {
        let guild = self
            .platform
            .guild(guild_id)
            .ok_or(EngineError::GuildNotCached(guild_id))?;
        let members = self.platform.members(guild_id);
        for member in &members {
            self.capture(&guild, member);
        }
        debug!(target: SYNC_TARGET, guild_id = %guild_id, "Captured {} members", members.len());
        Ok(members.len())
    }

    /// Capture every cached member of every cached guild
    pub fn capture_all(&self) -> usize {
        let mut total = 0;
        for guild_id in self.platform.guild_ids() {
            match self.capture_guild(guild_id) {
                Ok(count) => total += count,
                Err(e) => debug!(target: SYNC_TARGET, guild_id = %guild_id, error = %e, "Skipped capture"),
            }
        }
        info!(target: SYNC_TARGET, "Captured roles of {total} members");
        total
    }

    /// Give a (re)joining member their stored nickname and roles back.
    ///
    /// Role grants run one after another in the background.
    pub fn restore(&self, guild_id: GuildId, user_id: UserId) -> EngineResult<()> {
        let guild = self
            .platform
            .guild(guild_id)
            .ok_or(EngineError::GuildNotCached(guild_id))?;
        let member = self
            .platform
            .member(guild_id, user_id)
            .ok_or(EngineError::MemberNotCached(guild_id, user_id))?;
        let Some(stored) = self.db.member_roles.find(&MemberKey::new(guild_id, user_id)) else {
            return Ok(());
        };

        self.restore_nickname(&guild, &member, &stored);

        let settings = self.db.settings(guild_id);
        let roles: Vec<RoleId> = restorable_roles(&guild, &settings, &stored)
            .into_iter()
            .filter(|role_id| !member.has_role(*role_id))
            .collect();
        if roles.is_empty() {
            return Ok(());
        }
        if !guild.has_permission(Permissions::MANAGE_ROLES) {
            info!(target: SYNC_TARGET, guild_id = %guild_id, user_id = %user_id, "Cannot restore roles without Manage Roles");
            return Ok(());
        }

        let platform = Arc::clone(&self.platform);
        tokio::spawn(grant_one_by_one(platform, guild_id, user_id, roles));
        Ok(())
    }

    fn restore_nickname(&self, guild: &GuildView, member: &MemberView, stored: &MemberRoles) {
        let Some(nickname) = stored.nickname.clone().filter(|n| !n.is_empty()) else {
            return;
        };
        if member.nickname.as_deref() == Some(nickname.as_str()) {
            return;
        }
        if !guild.has_permission(Permissions::MANAGE_NICKNAMES)
            || !guild.can_interact_with_member(member)
        {
            info!(target: SYNC_TARGET, guild_id = %guild.id, user_id = %member.id(), "Cannot restore nickname");
            return;
        }

        let platform = Arc::clone(&self.platform);
        let (guild_id, user_id) = (guild.id, member.id());
        tokio::spawn(async move {
            if let Err(e) = platform.set_nickname(guild_id, user_id, nickname).await {
                log_remote_failure("restore nickname", &e);
            }
        });
    }
}

/// Stored roles that may be given back right now: the role still exists, is
/// not managed, is below the bot and is not ignored in this guild
pub fn restorable_roles(
    guild: &GuildView,
    settings: &GuildSettings,
    stored: &MemberRoles,
) -> Vec<RoleId> {
    stored
        .roles()
        .filter(|role_id| {
            let Some(role) = guild.role(*role_id).filter(|role| !role.managed) else {
                debug!(target: SYNC_TARGET, guild_id = %guild.id, role_id = %role_id, "Role is gone or managed");
                return false;
            };
            if !guild.can_interact_with_role(role) {
                info!(target: SYNC_TARGET, guild_id = %guild.id, role_id = %role_id, "Role is above the bot");
                return false;
            }
            if settings.is_ignored_role(*role_id) {
                info!(target: SYNC_TARGET, guild_id = %guild.id, role_id = %role_id, "Role is ignored");
                return false;
            }
            true
        })
        .collect()
}

/// Grants go out singly so other bots watching for bulk role updates do not
/// race with us
async fn grant_one_by_one(
    platform: Arc<dyn Platform>,
    guild_id: GuildId,
    user_id: UserId,
    roles: Vec<RoleId>,
) {
    for role_id in roles {
        match platform.add_role(guild_id, user_id, role_id).await {
            Ok(()) => debug!(target: SYNC_TARGET, guild_id = %guild_id, user_id = %user_id, role_id = %role_id, "Restored role"),
            Err(e) if e.is_not_found() => {
                log_remote_failure("restore role", &e);
                return;
            }
            Err(e) => log_remote_failure("restore role", &e),
        }
    }
}
