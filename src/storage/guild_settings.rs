use super::Entity;
use crate::model::MemberView;
use poise::serenity_prelude::{ChannelId, GuildId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Per-guild configuration. A guild without a row behaves like
/// `GuildSettings::with_key(guild_id)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildSettings {
    pub guild_id: u64,
    /// Role handed out to non-admins who mention @everyone
    pub everyone_role_id: Option<u64>,
    /// Role handed out to non-admins who mention @here
    pub here_role_id: Option<u64>,
    /// Role granted to every eligible human member
    pub member_role_id: Option<u64>,
    pub admin_role_ids: HashSet<u64>,
    pub admin_user_ids: HashSet<u64>,
    pub reporting_channel_id: Option<u64>,
    pub log_channel_id: Option<u64>,
    pub global_bans_enabled: bool,
    /// Roles never restored on rejoin
    pub ignored_role_ids: HashSet<u64>,
}

impl Entity for GuildSettings {
    type Key = u64;
    const FILE: &'static str = "guild_settings.yaml";

    fn with_key(guild_id: u64) -> Self {
        Self {
            guild_id,
            ..Default::default()
        }
    }

    fn key(&self) -> u64 {
        self.guild_id
    }
}

impl GuildSettings {
    #[must_use]
    pub fn guild_id(&self) -> GuildId {
        GuildId::new(self.guild_id)
    }

    #[must_use]
    pub fn member_role(&self) -> Option<RoleId> {
        self.member_role_id.map(RoleId::new)
    }

    #[must_use]
    pub fn everyone_role(&self) -> Option<RoleId> {
        self.everyone_role_id.map(RoleId::new)
    }

    #[must_use]
    pub fn here_role(&self) -> Option<RoleId> {
        self.here_role_id.map(RoleId::new)
    }

    #[must_use]
    pub fn reporting_channel(&self) -> Option<ChannelId> {
        self.reporting_channel_id.map(ChannelId::new)
    }

    #[must_use]
    pub fn log_channel(&self) -> Option<ChannelId> {
        self.log_channel_id.map(ChannelId::new)
    }

    #[must_use]
    pub fn is_ignored_role(&self, role_id: RoleId) -> bool {
        self.ignored_role_ids.contains(&role_id.get())
    }

    /// Only true if the role is explicitly listed as admin
    #[must_use]
    pub fn is_admin_role(&self, role_id: RoleId) -> bool {
        self.admin_role_ids.contains(&role_id.get())
    }

    /// Only true if the user is explicitly listed as admin
    #[must_use]
    pub fn is_admin_user(&self, user_id: UserId) -> bool {
        self.admin_user_ids.contains(&user_id.get())
    }

    /// Admin as far as these settings are concerned: holds an admin role or is
    /// listed by id
    #[must_use]
    pub fn is_admin(&self, member: &MemberView) -> bool {
        member.roles.iter().any(|role| self.is_admin_role(*role)) || self.is_admin_user(member.id())
    }
}
