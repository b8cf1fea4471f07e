//! Banning users who react with a registered emote in a registered channel

use crate::SYNC_TARGET;
use crate::error::{EngineError, EngineResult};
use crate::model::{Emote, GuildView, truncate_reason};
use crate::platform::{Platform, log_remote_failure};
use crate::reporting::Reporter;
use crate::storage::{Database, ReactionBanKey};
use poise::serenity_prelude::{ChannelId, GuildId, Mentionable, MessageId, Permissions, UserId};
use std::sync::Arc;
use tracing::{debug, info};

/// A reaction added to a guild message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEvent {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emote: Emote,
}

#[derive(Clone)]
pub struct ReactionBanEnforcer {
    platform: Arc<dyn Platform>,
    db: Database,
    reporter: Reporter,
}

impl ReactionBanEnforcer {
    pub fn new(platform: Arc<dyn Platform>, db: Database, reporter: Reporter) -> Self {
        Self {
            platform,
            db,
            reporter,
        }
    }

    /// Look the reaction up and, on a match, enforce in the background
    pub fn on_reaction(&self, event: ReactionEvent) -> EngineResult<()> {
        if event.user_id == self.platform.current_user_id() {
            return Ok(());
        }
        let key = ReactionBanKey::new(event.channel_id, &event.emote);
        if self.db.reaction_bans.find(&key).is_none() {
            return Ok(());
        }

        let guild = self
            .platform
            .guild(event.guild_id)
            .ok_or(EngineError::GuildNotCached(event.guild_id))?;
        info!(target: SYNC_TARGET, guild_id = %event.guild_id, user_id = %event.user_id, emote = %event.emote, "Banned reaction");

        let enforcer = self.clone();
        tokio::spawn(async move { enforcer.enforce(&guild, &event).await });
        Ok(())
    }

    /// Remove the reaction, then message and ban the reactor, then report.
    ///
    /// Missing message-management permission only skips the removal; missing
    /// ban permission only skips the ban.
    pub async fn enforce(&self, guild: &GuildView, event: &ReactionEvent) {
        self.remove_reaction(guild, event).await;

        if !guild.has_permission(Permissions::BAN_MEMBERS) {
            self.reporter.notify_permission(
                guild,
                "I am missing the ban permission to perform a reaction ban. Please fix the \
                 permission or remove reaction bans for this guild.",
            );
            return;
        }
        if let Some(member) = self.platform.member(guild.id, event.user_id) {
            if !guild.can_interact_with_member(&member) {
                self.reporter.report(
                    guild,
                    format!(
                        "User {} reacted with {} in {} but is above me, so I cannot ban them.",
                        member.user.describe(),
                        event.emote,
                        event.channel_id.mention()
                    ),
                );
                return;
            }
        }

        let channel_name = guild
            .channel(event.channel_id)
            .map_or_else(|| event.channel_id.to_string(), |c| format!("#{}", c.name));

        let notice = format!(
            "You are banned from **{}** for reacting with {} in channel {channel_name}. Better \
             luck next time.",
            guild.name, event.emote
        );
        self.direct_message(event.user_id, notice).await;

        let reason = truncate_reason(&format!(
            "[Reaction Ban] User reacted with {} in channel {channel_name}",
            event.emote
        ));
        let report = match self.platform.ban(guild.id, event.user_id, 0, reason).await {
            Ok(()) => format!(
                "User {}:\nBanned for reacting with {} in channel {}",
                event.user_id.mention(),
                event.emote,
                event.channel_id.mention()
            ),
            Err(e) => {
                log_remote_failure("reaction ban", &e);
                format!(
                    "User {} reacted with {} in channel {} but I failed to ban them: {e}",
                    event.user_id.mention(),
                    event.emote,
                    event.channel_id.mention()
                )
            }
        };
        self.reporter.report(guild, report);
    }

    async fn remove_reaction(&self, guild: &GuildView, event: &ReactionEvent) {
        let can_manage = guild
            .channel(event.channel_id)
            .is_some_and(|c| c.allows(Permissions::MANAGE_MESSAGES));
        if !can_manage {
            self.reporter.notify_permission(
                guild,
                format!(
                    "I am missing the message manage permission in {} to delete a banned \
                     reaction. Please fix the permission or remove reaction bans for this guild.",
                    event.channel_id.mention()
                ),
            );
            return;
        }

        let removed = self
            .platform
            .remove_reaction(
                event.channel_id,
                event.message_id,
                event.user_id,
                event.emote.clone(),
            )
            .await;
        if let Err(e) = removed {
            log_remote_failure("remove banned reaction", &e);
        }
    }

    /// Best effort; the ban goes ahead whatever happens here
    async fn direct_message(&self, user_id: UserId, content: String) {
        let sent = match self.platform.open_direct_channel(user_id).await {
            Ok(channel_id) => self.platform.send_message(channel_id, content).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            debug!(target: SYNC_TARGET, user_id = %user_id, error = %e, "Could not message banned user");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::test_support::{Call, FakePlatform, GENERAL, database, guild, member, role, settle};

    fn setup() -> (Arc<FakePlatform>, ReactionBanEnforcer, Database) {
        let platform = Arc::new(FakePlatform::with_guild(guild(1)));
        let db = database();
        let dyn_platform = Arc::clone(&platform) as Arc<dyn Platform>;
        let reporter = Reporter::new(Arc::clone(&dyn_platform), db.clone());
        let enforcer = ReactionBanEnforcer::new(dyn_platform, db.clone(), reporter);
        (platform, enforcer, db)
    }

    fn hammer() -> Emote {
        Emote::Unicode("🔨".to_string())
    }

    fn event(user_id: u64, emote: Emote) -> ReactionEvent {
        ReactionEvent {
            guild_id: GuildId::new(1),
            channel_id: ChannelId::new(GENERAL),
            message_id: MessageId::new(777),
            user_id: UserId::new(user_id),
            emote,
        }
    }

    fn register(db: &Database, emote: &Emote) {
        db.reaction_bans
            .find_or_create(ReactionBanKey::new(ChannelId::new(GENERAL), emote));
    }

    fn position(calls: &[Call], predicate: impl Fn(&Call) -> bool) -> Option<usize> {
        calls.iter().position(predicate)
    }

    #[tokio::test]
    async fn test_removal_happens_before_ban() {
        let (platform, enforcer, db) = setup();
        register(&db, &hammer());

        enforcer.on_reaction(event(5, hammer())).unwrap();
        settle().await;

        let calls = platform.calls();
        let removed = position(&calls, |c| matches!(c, Call::RemoveReaction(..))).unwrap();
        let banned = position(&calls, |c| matches!(c, Call::Ban(..))).unwrap();
        assert!(removed < banned);

        let dm = position(&calls, |c| matches!(c, Call::OpenDirectChannel(_))).unwrap();
        assert!(dm < banned);
        assert!(calls.contains(&Call::Ban(
            GuildId::new(1),
            UserId::new(5),
            0,
            "[Reaction Ban] User reacted with 🔨 in channel #general".to_string()
        )));
    }

    #[tokio::test]
    async fn test_missing_manage_permission_still_bans() {
        let (platform, enforcer, db) = setup();
        let mut g = guild(1);
        g.channels[0].permissions.remove(Permissions::MANAGE_MESSAGES);
        platform.put_guild(g.clone());
        register(&db, &hammer());

        enforcer.enforce(&g, &event(5, hammer())).await;

        let calls = platform.calls();
        assert!(!calls.iter().any(|c| matches!(c, Call::RemoveReaction(..))));
        assert_eq!(platform.bans_issued(), vec![(GuildId::new(1), UserId::new(5))]);
    }

    #[tokio::test]
    async fn test_failed_direct_message_does_not_stop_ban() {
        let (platform, enforcer, db) = setup();
        register(&db, &hammer());
        platform.fail(
            "open_direct_channel",
            PlatformError::PermissionDenied("dms closed".to_string()),
        );

        enforcer.enforce(&guild(1), &event(5, hammer())).await;
        assert_eq!(platform.bans_issued().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_ban_permission_keeps_removal() {
        let (platform, enforcer, db) = setup();
        let mut g = guild(1);
        g.roles
            .values_mut()
            .for_each(|r| r.permissions.remove(Permissions::BAN_MEMBERS));
        db.guild_settings
            .find_apply_and_merge(1, |s| s.reporting_channel_id = Some(GENERAL));
        register(&db, &hammer());

        enforcer.enforce(&g, &event(5, hammer())).await;
        settle().await;

        let calls = platform.calls();
        assert!(calls.iter().any(|c| matches!(c, Call::RemoveReaction(..))));
        assert!(platform.bans_issued().is_empty());
        assert!(platform.messages()[0].1.contains("missing the ban permission"));
    }

    #[tokio::test]
    async fn test_unregistered_reactions_are_ignored() {
        let (platform, enforcer, db) = setup();
        register(&db, &hammer());

        enforcer
            .on_reaction(event(5, Emote::Unicode("👍".to_string())))
            .unwrap();
        enforcer.on_reaction(event(1000, hammer())).unwrap();
        settle().await;
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_higher_member_is_not_banned() {
        let (platform, enforcer, db) = setup();
        let mut g = guild(1);
        g.roles.insert(poise::serenity_prelude::RoleId::new(60), role(60, 40, false));
        platform.put_guild(g.clone());
        platform.put_member(g.id, member(5, &[60]));
        register(&db, &hammer());

        enforcer.enforce(&g, &event(5, hammer())).await;
        assert!(platform.bans_issued().is_empty());
    }

    #[tokio::test]
    async fn test_report_after_ban() {
        let (platform, enforcer, db) = setup();
        db.guild_settings
            .find_apply_and_merge(1, |s| s.reporting_channel_id = Some(GENERAL));
        let custom = Emote::parse("<:nope:55>").unwrap();
        register(&db, &custom);

        enforcer.enforce(&guild(1), &event(5, custom)).await;
        settle().await;

        let reports: Vec<_> = platform
            .messages()
            .into_iter()
            .filter(|(channel, _)| *channel == ChannelId::new(GENERAL))
            .collect();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].1.contains("Banned for reacting with <:nope:55>"));
    }
}
