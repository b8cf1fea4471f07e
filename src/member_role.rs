//! Granting the configured member role to eligible humans

use crate::SYNC_TARGET;
use crate::error::{EngineError, EngineResult};
use crate::model::{GuildView, MemberView, RoleView};
use crate::platform::{Platform, log_remote_failure};
use crate::storage::Database;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::{GuildId, Permissions, RoleId, UserId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// On strictly verified guilds, how long a member waits before getting the role
pub const VERIFICATION_GRACE_MINUTES: i64 = 10;

#[derive(Clone)]
pub struct MemberRoleAssigner {
    platform: Arc<dyn Platform>,
    db: Database,
    /// The grant batch of the last sweep, per guild
    sweeps: Arc<DashMap<GuildId, JoinHandle<()>>>,
}

impl MemberRoleAssigner {
    pub fn new(platform: Arc<dyn Platform>, db: Database) -> Self {
        Self {
            platform,
            db,
            sweeps: Arc::new(DashMap::new()),
        }
    }

    /// The configured member role, if the bot can hand it out
    pub fn usable_role(&self, guild: &GuildView) -> Option<RoleView> {
        let role_id = self.db.settings(guild.id).member_role()?;
        let Some(role) = guild.role(role_id) else {
            warn!(target: SYNC_TARGET, guild_id = %guild.id, role_id = %role_id, "Member role does not exist");
            return None;
        };
        if role.managed
            || !guild.can_interact_with_role(role)
            || !guild.has_permission(Permissions::MANAGE_ROLES)
        {
            warn!(target: SYNC_TARGET, guild_id = %guild.id, role_id = %role_id, "Member role cannot be managed by the bot");
            return None;
        }
        Some(role.clone())
    }

    /// Give a freshly joined member the role if they qualify already
    pub fn assign(&self, guild_id: GuildId, user_id: UserId) -> EngineResult<()> {
        let guild = self
            .platform
            .guild(guild_id)
            .ok_or(EngineError::GuildNotCached(guild_id))?;
        let Some(role) = self.usable_role(&guild) else {
            return Ok(());
        };
        let member = self
            .platform
            .member(guild_id, user_id)
            .ok_or(EngineError::MemberNotCached(guild_id, user_id))?;

        if is_eligible(&guild, &member, role.id, Utc::now()) {
            // join grants run detached
            drop(self.spawn_grants(guild_id, role.id, vec![user_id]));
        }
        Ok(())
    }

    /// Give every eligible cached member the role. Returns how many grants
    /// were queued.
    ///
    /// A guild whose previous batch is still running is skipped, so a slow
    /// batch is never doubled up by the next sweep.
    pub fn sweep_guild(&self, guild_id: GuildId) -> EngineResult<usize> {
        if self.sweep_running(guild_id) {
            debug!(target: SYNC_TARGET, guild_id = %guild_id, "Previous member role grants still running");
            return Ok(0);
        }
        let guild = self
            .platform
            .guild(guild_id)
            .ok_or(EngineError::GuildNotCached(guild_id))?;
        let Some(role) = self.usable_role(&guild) else {
            return Ok(0);
        };

        let now = Utc::now();
        let eligible: Vec<UserId> = self
            .platform
            .members(guild_id)
            .iter()
            .filter(|member| is_eligible(&guild, member, role.id, now))
            .map(MemberView::id)
            .collect();

        let queued = eligible.len();
        if queued > 0 {
            debug!(target: SYNC_TARGET, guild_id = %guild_id, "Granting member role to {queued} members");
            let batch = self.spawn_grants(guild_id, role.id, eligible);
            self.sweeps.insert(guild_id, batch);
        }
        Ok(queued)
    }

    fn sweep_running(&self, guild_id: GuildId) -> bool {
        self.sweeps
            .get(&guild_id)
            .is_some_and(|batch| !batch.is_finished())
    }

    fn spawn_grants(&self, guild_id: GuildId, role_id: RoleId, users: Vec<UserId>) -> JoinHandle<()> {
        let platform = Arc::clone(&self.platform);
        tokio::spawn(async move {
            for user_id in users {
                grant(platform.as_ref(), guild_id, user_id, role_id).await;
            }
        })
    }
}

/// Grant the role; a member that no longer exists is dropped from the cache
pub async fn grant(platform: &dyn Platform, guild_id: GuildId, user_id: UserId, role_id: RoleId) {
    match platform.add_role(guild_id, user_id, role_id).await {
        Ok(()) => debug!(target: SYNC_TARGET, guild_id = %guild_id, user_id = %user_id, "Granted member role"),
        Err(e) if e.is_not_found() => {
            debug!(target: SYNC_TARGET, guild_id = %guild_id, user_id = %user_id, "Member is gone, forgetting them");
            platform.forget_member(guild_id, user_id);
        }
        Err(e) => log_remote_failure("grant member role", &e),
    }
}

/// Humans without the role; on strictly verified guilds only after the grace
/// period, and never while the join time is unknown
#[must_use]
pub fn is_eligible(
    guild: &GuildView,
    member: &MemberView,
    role_id: RoleId,
    now: DateTime<Utc>,
) -> bool {
    if member.user.bot || member.has_role(role_id) {
        return false;
    }
    if !guild.has_strict_verification() {
        return true;
    }
    member.joined_at.is_some_and(|joined| {
        now - joined >= chrono::Duration::minutes(VERIFICATION_GRACE_MINUTES)
    })
}
