use super::Entity;
use crate::model::{GuildView, MemberView};
use poise::serenity_prelude::{GuildId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Composite key of a membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberKey {
    pub guild_id: u64,
    pub user_id: u64,
}

impl MemberKey {
    #[must_use]
    pub fn new(guild_id: GuildId, user_id: UserId) -> Self {
        Self {
            guild_id: guild_id.get(),
            user_id: user_id.get(),
        }
    }
}

/// Last known roles and nickname of a member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRoles {
    #[serde(flatten)]
    pub key: MemberKey,
    #[serde(default)]
    pub role_ids: BTreeSet<u64>,
    #[serde(default)]
    pub nickname: Option<String>,
}

impl Entity for MemberRoles {
    type Key = MemberKey;
    const FILE: &'static str = "member_roles.yaml";

    fn with_key(key: MemberKey) -> Self {
        Self {
            key,
            role_ids: BTreeSet::new(),
            nickname: None,
        }
    }

    fn key(&self) -> MemberKey {
        self.key
    }
}

impl MemberRoles {
    pub fn roles(&self) -> impl Iterator<Item = RoleId> + '_ {
        self.role_ids.iter().copied().map(RoleId::new)
    }

    /// Overwrite with the member's current state.
    ///
    /// Managed roles and roles unknown to the guild are never recorded.
    pub fn set(&mut self, guild: &GuildView, member: &MemberView) {
        self.role_ids = member
            .roles
            .iter()
            .filter(|id| guild.role(**id).is_some_and(|role| !role.managed))
            .map(|id| id.get())
            .collect();
        self.nickname = member.nickname.clone();
    }
}
