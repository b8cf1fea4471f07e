//! In-memory platform and fixtures for unit tests

use crate::error::{PlatformError, PlatformResult};
use crate::model::{
    AuditAction, AuditEntry, BanEntry, ChannelView, Emote, GuildView, MemberView, RoleView,
    UserView,
};
use crate::platform::Platform;
use crate::storage::Database;
use chrono::{DateTime, TimeZone, Utc};
use poise::serenity_prelude::{
    ChannelId, GuildId, MessageId, Permissions, RoleId, UserId, VerificationLevel,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

pub const BOT_ID: u64 = 1000;
/// The bot's only role, at position 10
pub const BOT_ROLE: u64 = 9100;
pub const OWNER_ID: u64 = 999;
/// A writable text channel present in every fixture guild
pub const GENERAL: u64 = 500;

/// Permissions granted to the bot in fixture guilds
pub fn bot_permissions() -> Permissions {
    Permissions::BAN_MEMBERS
        | Permissions::MANAGE_ROLES
        | Permissions::MANAGE_NICKNAMES
        | Permissions::MANAGE_MESSAGES
        | Permissions::VIEW_AUDIT_LOG
        | Permissions::ADD_REACTIONS
        | Permissions::SEND_MESSAGES
        | Permissions::VIEW_CHANNEL
}

pub fn long_ago() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
}

pub fn user(id: u64) -> UserView {
    UserView {
        id: UserId::new(id),
        tag: format!("user{id}"),
        bot: false,
        created_at: long_ago(),
    }
}

pub fn member(id: u64, roles: &[u64]) -> MemberView {
    MemberView {
        user: user(id),
        roles: roles.iter().copied().map(RoleId::new).collect(),
        nickname: None,
        joined_at: Some(long_ago()),
    }
}

pub fn role(id: u64, position: u16, managed: bool) -> RoleView {
    RoleView {
        id: RoleId::new(id),
        name: format!("role{id}"),
        position,
        managed,
        permissions: Permissions::empty(),
    }
}

pub fn guild(id: u64) -> GuildView {
    let mut everyone = role(id, 0, false);
    everyone.permissions = Permissions::SEND_MESSAGES | Permissions::VIEW_CHANNEL;
    let mut bot_role = role(BOT_ROLE, 10, true);
    bot_role.permissions = bot_permissions();

    let mut me = member(BOT_ID, &[BOT_ROLE]);
    me.user.bot = true;

    GuildView {
        id: GuildId::new(id),
        name: format!("guild{id}"),
        owner_id: UserId::new(OWNER_ID),
        verification_level: VerificationLevel::None,
        roles: HashMap::from([(everyone.id, everyone), (bot_role.id, bot_role)]),
        me,
        channels: vec![ChannelView {
            id: ChannelId::new(GENERAL),
            name: "general".to_string(),
            permissions: bot_permissions(),
        }],
    }
}

/// Take a permission away from the bot, guild-wide and in every channel
pub fn revoke(guild: &mut GuildView, permission: Permissions) {
    for role in guild.roles.values_mut() {
        role.permissions.remove(permission);
    }
    for channel in &mut guild.channels {
        channel.permissions.remove(permission);
    }
}

/// Let spawned background work run to completion
pub async fn settle() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

/// A database that is never written to disk
pub fn database() -> Database {
    Database::new(std::env::temp_dir().join("guild_sentinel_unused"))
}

/// A remote operation seen by [`FakePlatform`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddRole(GuildId, UserId, RoleId),
    SetNickname(GuildId, UserId, String),
    Ban(GuildId, UserId, u8, String),
    Bans(GuildId),
    FetchBan(GuildId, UserId),
    AuditLog(GuildId, AuditAction),
    SendMessage(ChannelId, String),
    OpenDirectChannel(UserId),
    AddReaction(ChannelId, MessageId, Emote),
    RemoveReaction(ChannelId, MessageId, UserId, Emote),
    ForgetMember(GuildId, UserId),
}

#[derive(Default)]
pub struct FakeState {
    pub guilds: HashMap<GuildId, GuildView>,
    pub members: HashMap<GuildId, Vec<MemberView>>,
    pub bans: HashMap<GuildId, Vec<BanEntry>>,
    pub audit: HashMap<GuildId, Vec<AuditEntry>>,
    /// Operation name to the error it fails with
    pub failures: HashMap<&'static str, PlatformError>,
    pub calls: Vec<Call>,
    /// When set, role grants wait for a permit before they land
    pub role_gate: Option<Arc<Semaphore>>,
}

/// A platform that lives in memory and remembers every call
#[derive(Default)]
pub struct FakePlatform {
    pub state: Mutex<FakeState>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guild(guild: GuildView) -> Self {
        let platform = Self::new();
        platform.put_guild(guild);
        platform
    }

    pub fn put_guild(&self, guild: GuildView) {
        self.state.lock().unwrap().guilds.insert(guild.id, guild);
    }

    pub fn put_member(&self, guild_id: GuildId, member: MemberView) {
        let mut state = self.state.lock().unwrap();
        let members = state.members.entry(guild_id).or_default();
        members.retain(|m| m.id() != member.id());
        members.push(member);
    }

    pub fn put_ban(&self, guild_id: GuildId, user_id: u64) {
        self.put_ban_with_reason(guild_id, user_id, None);
    }

    pub fn put_ban_with_reason(&self, guild_id: GuildId, user_id: u64, reason: Option<&str>) {
        self.state
            .lock()
            .unwrap()
            .bans
            .entry(guild_id)
            .or_default()
            .push(BanEntry {
                user: user(user_id),
                reason: reason.map(str::to_string),
            });
    }

    pub fn put_audit(&self, guild_id: GuildId, entry: AuditEntry) {
        self.state
            .lock()
            .unwrap()
            .audit
            .entry(guild_id)
            .or_default()
            .push(entry);
    }

    /// Hold role grants until the returned semaphore gets permits
    pub fn hold_role_grants(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state.lock().unwrap().role_gate = Some(Arc::clone(&gate));
        gate
    }

    /// Make every future call of `operation` fail
    pub fn fail(&self, operation: &'static str, error: PlatformError) {
        self.state.lock().unwrap().failures.insert(operation, error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn bans_issued(&self) -> Vec<(GuildId, UserId)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Ban(guild_id, user_id, ..) => Some((guild_id, user_id)),
                _ => None,
            })
            .collect()
    }

    pub fn messages(&self) -> Vec<(ChannelId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::SendMessage(channel_id, content) => Some((channel_id, content)),
                _ => None,
            })
            .collect()
    }

    pub fn banned_ids(&self, guild_id: GuildId) -> Vec<UserId> {
        self.state
            .lock()
            .unwrap()
            .bans
            .get(&guild_id)
            .map(|bans| bans.iter().map(|ban| ban.user.id).collect())
            .unwrap_or_default()
    }

    fn record(&self, operation: &'static str, call: Call) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        match state.failures.get(operation) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Platform for FakePlatform {
    fn current_user_id(&self) -> UserId {
        UserId::new(BOT_ID)
    }

    fn guild_ids(&self) -> Vec<GuildId> {
        let mut ids: Vec<_> = self.state.lock().unwrap().guilds.keys().copied().collect();
        ids.sort();
        ids
    }

    fn guild(&self, guild_id: GuildId) -> Option<GuildView> {
        self.state.lock().unwrap().guilds.get(&guild_id).cloned()
    }

    fn members(&self, guild_id: GuildId) -> Vec<MemberView> {
        self.state
            .lock()
            .unwrap()
            .members
            .get(&guild_id)
            .cloned()
            .unwrap_or_default()
    }

    fn member(&self, guild_id: GuildId, user_id: UserId) -> Option<MemberView> {
        self.members(guild_id)
            .into_iter()
            .find(|member| member.id() == user_id)
    }

    fn forget_member(&self, guild_id: GuildId, user_id: UserId) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ForgetMember(guild_id, user_id));
        if let Some(members) = state.members.get_mut(&guild_id) {
            members.retain(|member| member.id() != user_id);
        }
    }

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> PlatformResult<()> {
        self.record("add_role", Call::AddRole(guild_id, user_id, role_id))?;
        let gate = self.state.lock().unwrap().role_gate.clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        let mut state = self.state.lock().unwrap();
        if let Some(member) = state
            .members
            .get_mut(&guild_id)
            .and_then(|members| members.iter_mut().find(|m| m.id() == user_id))
        {
            member.roles.push(role_id);
        }
        Ok(())
    }

    async fn set_nickname(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        nickname: String,
    ) -> PlatformResult<()> {
        self.record("set_nickname", Call::SetNickname(guild_id, user_id, nickname))
    }

    async fn ban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        delete_message_days: u8,
        reason: String,
    ) -> PlatformResult<()> {
        self.record(
            "ban",
            Call::Ban(guild_id, user_id, delete_message_days, reason.clone()),
        )?;
        let mut state = self.state.lock().unwrap();
        state.bans.entry(guild_id).or_default().push(BanEntry {
            user: user(user_id.get()),
            reason: Some(reason),
        });
        Ok(())
    }

    async fn bans(&self, guild_id: GuildId) -> PlatformResult<Vec<BanEntry>> {
        self.record("bans", Call::Bans(guild_id))?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .bans
            .get(&guild_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_ban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> PlatformResult<Option<BanEntry>> {
        self.record("fetch_ban", Call::FetchBan(guild_id, user_id))?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .bans
            .get(&guild_id)
            .and_then(|bans| bans.iter().find(|ban| ban.user.id == user_id).cloned()))
    }

    async fn audit_log(
        &self,
        guild_id: GuildId,
        action: AuditAction,
    ) -> PlatformResult<Vec<AuditEntry>> {
        self.record("audit_log", Call::AuditLog(guild_id, action))?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .audit
            .get(&guild_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.action == action)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn send_message(&self, channel_id: ChannelId, content: String) -> PlatformResult<()> {
        self.record("send_message", Call::SendMessage(channel_id, content))
    }

    async fn open_direct_channel(&self, user_id: UserId) -> PlatformResult<ChannelId> {
        self.record("open_direct_channel", Call::OpenDirectChannel(user_id))?;
        Ok(ChannelId::new(user_id.get() + 1_000_000))
    }

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emote: Emote,
    ) -> PlatformResult<()> {
        self.record("add_reaction", Call::AddReaction(channel_id, message_id, emote))
    }

    async fn remove_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        user_id: UserId,
        emote: Emote,
    ) -> PlatformResult<()> {
        self.record(
            "remove_reaction",
            Call::RemoveReaction(channel_id, message_id, user_id, emote),
        )
    }
}
