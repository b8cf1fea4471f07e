//! The seam between the engine and the chat platform
//!
//! Every component talks to the platform through [`Platform`]. Cache reads are
//! synchronous snapshots; remote operations are async and fail with a typed
//! [`PlatformError`].

mod discord;

pub use discord::{SerenityPlatform, member_view, to_utc, user_view};

use crate::error::{PlatformError, PlatformResult};
use crate::model::{AuditAction, AuditEntry, BanEntry, Emote, GuildView, MemberView};
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, RoleId, UserId};
use std::future::Future;
use tracing::warn;

/// Cache reads and remote operations consumed by the engine
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Platform: Send + Sync {
    /// The bot's own user id
    fn current_user_id(&self) -> UserId;

    /// Guilds currently present in the cache
    fn guild_ids(&self) -> Vec<GuildId>;

    /// Snapshot of a cached guild
    fn guild(&self, guild_id: GuildId) -> Option<GuildView>;

    /// Cached members of a guild
    fn members(&self, guild_id: GuildId) -> Vec<MemberView>;

    fn member(&self, guild_id: GuildId, user_id: UserId) -> Option<MemberView>;

    /// Drop a member from the local membership cache
    fn forget_member(&self, guild_id: GuildId, user_id: UserId);

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> PlatformResult<()>;

    async fn set_nickname(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        nickname: String,
    ) -> PlatformResult<()>;

    async fn ban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        delete_message_days: u8,
        reason: String,
    ) -> PlatformResult<()>;

    /// The guild's complete ban list
    async fn bans(&self, guild_id: GuildId) -> PlatformResult<Vec<BanEntry>>;

    /// The ban of one user, or `None` if they are not banned
    async fn fetch_ban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> PlatformResult<Option<BanEntry>>;

    /// Recent audit-log entries of one kind, most recent first
    async fn audit_log(
        &self,
        guild_id: GuildId,
        action: AuditAction,
    ) -> PlatformResult<Vec<AuditEntry>>;

    async fn send_message(&self, channel_id: ChannelId, content: String) -> PlatformResult<()>;

    /// Open (or reuse) the direct channel with a user
    async fn open_direct_channel(&self, user_id: UserId) -> PlatformResult<ChannelId>;

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emote: Emote,
    ) -> PlatformResult<()>;

    /// Remove one user's reaction from a message
    async fn remove_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        user_id: UserId,
        emote: Emote,
    ) -> PlatformResult<()>;
}

/// Run a remote call in the background, logging a failure instead of
/// reporting it to the caller
pub fn fire_and_forget<F>(action: &'static str, call: F)
where
    F: Future<Output = PlatformResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = call.await {
            log_remote_failure(action, &e);
        }
    });
}

/// Log a failed remote call at a level matching its kind
pub fn log_remote_failure(action: &'static str, error: &PlatformError) {
    match error {
        PlatformError::Transient(_) => {
            warn!(action, error = %error, "Remote call failed, will be retried by a later cycle");
        }
        _ => warn!(action, error = %error, "Remote call failed"),
    }
}
