//! Serenity-backed platform
//!
//! Reads come from serenity's in-memory cache, remote operations go through
//! its HTTP client.

use super::Platform;
use crate::error::{PlatformError, PlatformResult};
use crate::model::{
    AuditAction, AuditEntry, BanEntry, ChannelView, Emote, GuildView, MemberView, RoleView,
    UserView,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ::serenity::http::{HttpError, LightMethod, Request, Route, UserPagination};
use ::serenity::model::guild::audit_log::{Action, MemberAction};
use poise::serenity_prelude::{
    Ban, Cache, ChannelId, ChannelType, EditMember, GuildId, Http, Member, MessageId,
    ReactionType, Role, RoleId, Timestamp, User, UserId,
};
use std::sync::Arc;
use tracing::debug;

/// Reason attached to role grants in the audit log
const ROLE_GRANT_REASON: &str = "Restoring member state";

/// Production [`Platform`] over a connected serenity client
pub struct SerenityPlatform {
    http: Arc<Http>,
    cache: Arc<Cache>,
    /// Members dropped from the membership view, with the time they were dropped.
    /// serenity offers no public cache eviction, so stale entries are hidden
    /// until the member joins again.
    forgotten: DashMap<(GuildId, UserId), DateTime<Utc>>,
}

impl SerenityPlatform {
    #[must_use]
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self {
            http,
            cache,
            forgotten: DashMap::new(),
        }
    }

    fn is_forgotten(&self, guild_id: GuildId, member: &MemberView) -> bool {
        self.forgotten
            .get(&(guild_id, member.id()))
            .is_some_and(|forgotten_at| member.joined_at.is_none_or(|joined| joined <= *forgotten_at))
    }
}

/// Convert a platform timestamp, dropping sub-second precision
#[must_use]
pub fn to_utc(timestamp: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0)
}

#[must_use]
pub fn user_view(user: &User) -> UserView {
    UserView {
        id: user.id,
        tag: user.tag(),
        bot: user.bot,
        created_at: to_utc(user.id.created_at()).unwrap_or_default(),
    }
}

#[must_use]
pub fn member_view(member: &Member) -> MemberView {
    MemberView {
        user: user_view(&member.user),
        roles: member.roles.clone(),
        nickname: member.nick.clone(),
        joined_at: member.joined_at.and_then(to_utc),
    }
}

fn role_view(role: &Role) -> RoleView {
    RoleView {
        id: role.id,
        name: role.name.clone(),
        position: role.position,
        managed: role.managed,
        permissions: role.permissions,
    }
}

fn reaction_type(emote: Emote) -> ReactionType {
    match emote {
        Emote::Unicode(text) => ReactionType::Unicode(text),
        Emote::Custom { id, name, animated } => ReactionType::Custom { animated, id, name },
    }
}

fn audit_action(action: AuditAction) -> Action {
    match action {
        AuditAction::Ban => Action::Member(MemberAction::BanAdd),
        AuditAction::Unban => Action::Member(MemberAction::BanRemove),
        AuditAction::Kick => Action::Member(MemberAction::Kick),
    }
}

impl From<::serenity::Error> for PlatformError {
    fn from(error: ::serenity::Error) -> Self {
        let message = error.to_string();
        match &error {
            ::serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
                match response.status_code.as_u16() {
                    401 | 403 => Self::PermissionDenied(message),
                    404 => Self::NotFound(message),
                    429 | 500..=599 => Self::Transient(message),
                    _ => Self::Other(message),
                }
            }
            ::serenity::Error::Http(HttpError::Request(_)) | ::serenity::Error::Io(_) => {
                Self::Transient(message)
            }
            _ => Self::Other(message),
        }
    }
}

#[async_trait::async_trait]
impl Platform for SerenityPlatform {
    fn current_user_id(&self) -> UserId {
        self.cache.current_user().id
    }

    fn guild_ids(&self) -> Vec<GuildId> {
        self.cache.guilds()
    }

    fn guild(&self, guild_id: GuildId) -> Option<GuildView> {
        let me = self.current_user_id();
        let guild = self.cache.guild(guild_id)?;
        let self_member = guild.members.get(&me)?;

        let channels = guild
            .channels
            .values()
            .filter(|channel| matches!(channel.kind, ChannelType::Text | ChannelType::News))
            .map(|channel| ChannelView {
                id: channel.id,
                name: channel.name.clone(),
                permissions: guild.user_permissions_in(channel, self_member),
            })
            .collect();

        Some(GuildView {
            id: guild.id,
            name: guild.name.clone(),
            owner_id: guild.owner_id,
            verification_level: guild.verification_level,
            roles: guild
                .roles
                .iter()
                .map(|(id, role)| (*id, role_view(role)))
                .collect(),
            me: member_view(self_member),
            channels,
        })
    }

    fn members(&self, guild_id: GuildId) -> Vec<MemberView> {
        let Some(guild) = self.cache.guild(guild_id) else {
            return Vec::new();
        };
        guild
            .members
            .values()
            .map(member_view)
            .filter(|member| !self.is_forgotten(guild_id, member))
            .collect()
    }

    fn member(&self, guild_id: GuildId, user_id: UserId) -> Option<MemberView> {
        let guild = self.cache.guild(guild_id)?;
        guild
            .members
            .get(&user_id)
            .map(member_view)
            .filter(|member| !self.is_forgotten(guild_id, member))
    }

    fn forget_member(&self, guild_id: GuildId, user_id: UserId) {
        debug!("Forgetting member {user_id} of guild {guild_id}");
        self.forgotten.insert((guild_id, user_id), Utc::now());
    }

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> PlatformResult<()> {
        self.http
            .add_member_role(guild_id, user_id, role_id, Some(ROLE_GRANT_REASON))
            .await?;
        Ok(())
    }

    async fn set_nickname(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        nickname: String,
    ) -> PlatformResult<()> {
        guild_id
            .edit_member(&*self.http, user_id, EditMember::new().nickname(nickname))
            .await?;
        Ok(())
    }

    async fn ban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        delete_message_days: u8,
        reason: String,
    ) -> PlatformResult<()> {
        guild_id
            .ban_with_reason(&*self.http, user_id, delete_message_days, &reason)
            .await?;
        Ok(())
    }

    async fn bans(&self, guild_id: GuildId) -> PlatformResult<Vec<BanEntry>> {
        // The platform pages ban lists at 1000 entries
        const PAGE_SIZE: usize = 1000;

        let mut entries = Vec::new();
        let mut after = None;
        loop {
            let page = guild_id
                .bans(&*self.http, after.map(UserPagination::After), None)
                .await?;
            let full_page = page.len() >= PAGE_SIZE;
            let last = page.last().map(|ban| ban.user.id);

            entries.extend(page.iter().map(|ban| BanEntry {
                user: user_view(&ban.user),
                reason: ban.reason.clone(),
            }));

            match last {
                Some(last) if full_page => after = Some(last),
                _ => break,
            }
        }
        Ok(entries)
    }

    async fn fetch_ban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> PlatformResult<Option<BanEntry>> {
        let request = Request::new(Route::GuildBan { guild_id, user_id }, LightMethod::Get);
        match self.http.fire::<Ban>(request).await {
            Ok(ban) => Ok(Some(BanEntry {
                user: user_view(&ban.user),
                reason: ban.reason,
            })),
            Err(e) => match PlatformError::from(e) {
                // unknown ban
                e if e.is_not_found() => Ok(None),
                e => Err(e),
            },
        }
    }

    async fn audit_log(
        &self,
        guild_id: GuildId,
        action: AuditAction,
    ) -> PlatformResult<Vec<AuditEntry>> {
        let logs = guild_id
            .audit_logs(&*self.http, Some(audit_action(action)), None, None, None)
            .await?;

        Ok(logs
            .entries
            .iter()
            .map(|entry| AuditEntry {
                action,
                target_id: entry.target_id.map(|id| UserId::new(id.get())),
                actor_id: entry.user_id,
                reason: entry.reason.clone(),
                created_at: to_utc(entry.id.created_at()).unwrap_or_default(),
            })
            .collect())
    }

    async fn send_message(&self, channel_id: ChannelId, content: String) -> PlatformResult<()> {
        channel_id.say(&*self.http, content).await?;
        Ok(())
    }

    async fn open_direct_channel(&self, user_id: UserId) -> PlatformResult<ChannelId> {
        let channel = user_id.create_dm_channel(&*self.http).await?;
        Ok(channel.id)
    }

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emote: Emote,
    ) -> PlatformResult<()> {
        channel_id
            .create_reaction(&*self.http, message_id, reaction_type(emote))
            .await?;
        Ok(())
    }

    async fn remove_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        user_id: UserId,
        emote: Emote,
    ) -> PlatformResult<()> {
        channel_id
            .delete_reaction(&*self.http, message_id, Some(user_id), reaction_type(emote))
            .await?;
        Ok(())
    }
}
