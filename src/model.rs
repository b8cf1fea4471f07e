//! Platform-neutral views of guild state
//!
//! These are the snapshots the engine reasons about. They are produced by a
//! [`Platform`](crate::platform::Platform) from its cache, so the role
//! hierarchy and permission rules below can be evaluated without touching the
//! network.

use chrono::{DateTime, Utc};
use derive_more::Display;
use poise::serenity_prelude::{
    ChannelId, EmojiId, GuildId, Mentionable, Permissions, RoleId, UserId, VerificationLevel,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum length of an audit-log reason accepted by the platform
pub const AUDIT_REASON_LIMIT: usize = 512;

/// Cut a reason down to the audit-log limit, counting characters
#[must_use]
pub fn truncate_reason(reason: &str) -> String {
    reason.chars().take(AUDIT_REASON_LIMIT).collect()
}

/// A platform user, independent of any guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserView {
    pub id: UserId,
    /// Human readable name, e.g. `name` or `name#1234`
    pub tag: String,
    pub bot: bool,
    pub created_at: DateTime<Utc>,
}

impl UserView {
    /// `<@id> (tag)`, the way users are referred to in reports
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} ({})", self.id.mention(), self.tag)
    }
}

/// A user's membership in one guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberView {
    pub user: UserView,
    pub roles: Vec<RoleId>,
    pub nickname: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
}

impl MemberView {
    #[must_use]
    pub fn id(&self) -> UserId {
        self.user.id
    }

    #[must_use]
    pub fn has_role(&self, role_id: RoleId) -> bool {
        self.roles.contains(&role_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleView {
    pub id: RoleId,
    pub name: String,
    pub position: u16,
    /// Owned by an integration; never captured, restored or granted
    pub managed: bool,
    pub permissions: Permissions,
}

/// A text channel together with the bot's effective permissions in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelView {
    pub id: ChannelId,
    pub name: String,
    pub permissions: Permissions,
}

impl ChannelView {
    /// Whether the bot can post in this channel
    #[must_use]
    pub fn can_talk(&self) -> bool {
        self.permissions.administrator()
            || (self.permissions.view_channel() && self.permissions.send_messages())
    }

    #[must_use]
    pub fn allows(&self, permission: Permissions) -> bool {
        self.permissions.administrator() || self.permissions.contains(permission)
    }
}

/// Snapshot of a guild as seen by the bot
#[derive(Debug, Clone)]
pub struct GuildView {
    pub id: GuildId,
    pub name: String,
    pub owner_id: UserId,
    pub verification_level: VerificationLevel,
    pub roles: HashMap<RoleId, RoleView>,
    /// The bot's own membership
    pub me: MemberView,
    pub channels: Vec<ChannelView>,
}

impl GuildView {
    #[must_use]
    pub fn role(&self, role_id: RoleId) -> Option<&RoleView> {
        self.roles.get(&role_id)
    }

    #[must_use]
    pub fn channel(&self, channel_id: ChannelId) -> Option<&ChannelView> {
        self.channels.iter().find(|channel| channel.id == channel_id)
    }

    /// The @everyone role shares its id with the guild
    fn everyone_role(&self) -> Option<&RoleView> {
        self.roles.get(&RoleId::new(self.id.get()))
    }

    /// Position of the highest role the member holds, 0 if none
    #[must_use]
    pub fn top_position(&self, member: &MemberView) -> u16 {
        member
            .roles
            .iter()
            .filter_map(|id| self.roles.get(id))
            .map(|role| role.position)
            .max()
            .unwrap_or(0)
    }

    /// Guild-level permissions of a member, ignoring channel overwrites
    #[must_use]
    pub fn member_permissions(&self, member: &MemberView) -> Permissions {
        if member.id() == self.owner_id {
            return Permissions::all();
        }

        let mut permissions = self
            .everyone_role()
            .map_or_else(Permissions::empty, |role| role.permissions);
        for role in member.roles.iter().filter_map(|id| self.roles.get(id)) {
            permissions |= role.permissions;
        }

        if permissions.administrator() {
            Permissions::all()
        } else {
            permissions
        }
    }

    /// Whether the bot holds a guild-level permission
    #[must_use]
    pub fn has_permission(&self, permission: Permissions) -> bool {
        self.member_permissions(&self.me).contains(permission)
    }

    /// Whether the bot may grant or revoke the role
    #[must_use]
    pub fn can_interact_with_role(&self, role: &RoleView) -> bool {
        self.me.id() == self.owner_id || self.top_position(&self.me) > role.position
    }

    /// Whether the bot may edit the member (nickname, roles)
    #[must_use]
    pub fn can_interact_with_member(&self, member: &MemberView) -> bool {
        if member.id() == self.owner_id {
            return false;
        }
        self.me.id() == self.owner_id || self.top_position(&self.me) > self.top_position(member)
    }

    /// Verification levels at which roled members bypass the platform's
    /// message gating
    #[must_use]
    pub fn has_strict_verification(&self) -> bool {
        matches!(
            self.verification_level,
            VerificationLevel::High | VerificationLevel::Higher
        )
    }

    /// Text channels the bot can post in
    pub fn talkable_channels(&self) -> impl Iterator<Item = &ChannelView> {
        self.channels.iter().filter(|channel| channel.can_talk())
    }
}

/// An emote used in a reaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Emote {
    /// A literal unicode sequence
    Unicode(String),
    /// A guild emote, identified by its platform id
    Custom {
        id: EmojiId,
        name: Option<String>,
        animated: bool,
    },
}

impl Emote {
    /// Storage identifier: the unicode sequence or the custom emote id
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Unicode(text) => text.clone(),
            Self::Custom { id, .. } => id.get().to_string(),
        }
    }

    /// Parse user input: `<:name:id>`, `<a:name:id>`, or anything else as unicode
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        if let Some(inner) = input.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
            let (animated, rest) = match inner.strip_prefix("a:") {
                Some(rest) => (true, rest),
                None => (false, inner.strip_prefix(':')?),
            };
            let (name, id) = rest.rsplit_once(':')?;
            let id = id.parse::<u64>().ok().filter(|id| *id != 0)?;
            return Some(Self::Custom {
                id: EmojiId::new(id),
                name: Some(name.to_string()).filter(|name| !name.is_empty()),
                animated,
            });
        }

        Some(Self::Unicode(input.to_string()))
    }
}

impl std::fmt::Display for Emote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unicode(text) => write!(f, "{text}"),
            Self::Custom {
                id,
                name: Some(name),
                animated,
            } => {
                let prefix = if *animated { "a" } else { "" };
                write!(f, "<{prefix}:{name}:{id}>")
            }
            Self::Custom { id, name: None, .. } => write!(f, "{id}"),
        }
    }
}

/// Moderation actions the audit trail is queried for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum AuditAction {
    #[display("ban")]
    Ban,
    #[display("unban")]
    Unban,
    #[display("kick")]
    Kick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub action: AuditAction,
    /// The user the action was taken against
    pub target_id: Option<UserId>,
    /// The user who took the action
    pub actor_id: UserId,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanEntry {
    pub user: UserView,
    pub reason: Option<String>,
}
