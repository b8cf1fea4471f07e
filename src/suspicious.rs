//! Warnings about joining members that look suspicious
//!
//! A member is worth a warning if their account is brand new or if they are
//! banned in other guilds the bot is in. Bans in one guild are also passed on
//! to every other guild the user is a member of.

use crate::SYNC_TARGET;
use crate::audit::AuditCorrelator;
use crate::error::{EngineError, EngineResult};
use crate::model::{AuditAction, UserView};
use crate::platform::Platform;
use crate::reporting::{ChannelKind, Reporter};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{GuildId, Permissions};
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct SuspiciousUsers {
    platform: Arc<dyn Platform>,
    correlator: AuditCorrelator,
    reporter: Reporter,
    min_account_age: chrono::Duration,
    fetch_timeout: Duration,
}

/// A ban of the user found in another guild
#[derive(Debug, Clone, PartialEq, Eq)]
struct ForeignBan {
    guild_name: String,
    reason: Option<String>,
}

impl SuspiciousUsers {
    pub fn new(
        platform: Arc<dyn Platform>,
        correlator: AuditCorrelator,
        reporter: Reporter,
        min_account_age: chrono::Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            correlator,
            reporter,
            min_account_age,
            fetch_timeout,
        }
    }

    /// Report a new member to moderators if anything about them stands out
    pub async fn on_join(&self, guild_id: GuildId, user: &UserView) -> EngineResult<()> {
        let guild = self
            .platform
            .guild(guild_id)
            .ok_or(EngineError::GuildNotCached(guild_id))?;
        if self.reporter.channel(&guild, ChannelKind::Reporting).is_none() {
            return Ok(());
        }

        let bans = self.foreign_bans(guild_id, user).await;
        let mut out = String::new();
        if user.created_at > Utc::now() - self.min_account_age {
            let _ = writeln!(
                out,
                "Account younger than {} minutes",
                self.min_account_age.num_minutes()
            );
        }
        if !bans.is_empty() {
            let _ = writeln!(out, "Banned in {} guilds:\n```", bans.len());
            for ban in &bans {
                let _ = writeln!(
                    out,
                    "{} with reason: {}",
                    ban.guild_name,
                    ban.reason.as_deref().unwrap_or("No reason provided")
                );
            }
            out.push_str("\n```");
        }

        if !out.is_empty() {
            self.reporter.report(
                &guild,
                format!("User {} joined this server:\n{out}", user.describe()),
            );
        }
        Ok(())
    }

    /// Bans of the user in every other guild where the bot may see bans
    async fn foreign_bans(&self, joined: GuildId, user: &UserView) -> Vec<ForeignBan> {
        let mut fetches = JoinSet::new();
        for guild in self
            .platform
            .guild_ids()
            .into_iter()
            .filter(|id| *id != joined)
            .filter_map(|id| self.platform.guild(id))
            .filter(|g| g.has_permission(Permissions::BAN_MEMBERS))
        {
            let platform = Arc::clone(&self.platform);
            let timeout = self.fetch_timeout;
            let user_id = user.id;
            fetches.spawn(async move {
                let fetched = tokio::time::timeout(timeout, platform.fetch_ban(guild.id, user_id)).await;
                let ban = match fetched {
                    Ok(Ok(ban)) => ban,
                    Ok(Err(e)) => {
                        warn!(target: SYNC_TARGET, guild_id = %guild.id, error = %e, "Failed to look up ban");
                        None
                    }
                    Err(_) => {
                        warn!(target: SYNC_TARGET, guild_id = %guild.id, "Ban lookup timed out");
                        None
                    }
                };
                ban.map(|ban| ForeignBan {
                    guild_name: guild.name,
                    reason: ban.reason,
                })
            });
        }

        let mut found = Vec::new();
        while let Some(result) = fetches.join_next().await {
            match result {
                Ok(Some(ban)) => found.push(ban),
                Ok(None) => {}
                Err(e) => debug!(target: SYNC_TARGET, error = %e, "Ban lookup task died"),
            }
        }
        found.sort_by(|a, b| a.guild_name.cmp(&b.guild_name));
        found
    }

    /// Warn every other guild the banned user is still a member of
    pub async fn on_ban(&self, guild_id: GuildId, user: &UserView, at: DateTime<Utc>) -> EngineResult<()> {
        let banned_in = self
            .platform
            .guild(guild_id)
            .ok_or(EngineError::GuildNotCached(guild_id))?;

        let mutual: Vec<_> = self
            .platform
            .guild_ids()
            .into_iter()
            .filter(|id| *id != guild_id)
            .filter(|id| self.platform.member(*id, user.id).is_some())
            .filter_map(|id| self.platform.guild(id))
            .collect();
        if mutual.is_empty() {
            return Ok(());
        }

        let reason = self
            .correlator
            .ban_reason(guild_id, user.id, at)
            .await
            .unwrap_or_else(|| "Reason could not be retrieved".to_string());
        let message = format!(
            "Member {}:\nBanned just now in {} with reason: {reason}",
            user.describe(),
            banned_in.name
        );

        for guild in &mutual {
            self.reporter.report(guild, message.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::model::AuditEntry;
    use crate::storage::Database;
    use crate::test_support::{Call, FakePlatform, GENERAL, database, guild, member, settle, user};
    use poise::serenity_prelude::{ChannelId, UserId};

    fn setup() -> (Arc<FakePlatform>, SuspiciousUsers, Database) {
        let platform = Arc::new(FakePlatform::new());
        platform.put_guild(guild(1));
        platform.put_guild(guild(2));
        platform.put_guild(guild(3));
        let db = database();
        for id in 1..=3 {
            db.guild_settings
                .find_apply_and_merge(id, |s| s.reporting_channel_id = Some(GENERAL));
        }
        let dyn_platform = Arc::clone(&platform) as Arc<dyn Platform>;
        let correlator = AuditCorrelator::new(Arc::clone(&dyn_platform), Duration::from_secs(5));
        let reporter = Reporter::new(Arc::clone(&dyn_platform), db.clone());
        let warner = SuspiciousUsers::new(
            dyn_platform,
            correlator,
            reporter,
            chrono::Duration::minutes(30),
            Duration::from_secs(5),
        );
        (platform, warner, db)
    }

    fn reports(platform: &FakePlatform) -> Vec<String> {
        platform
            .messages()
            .into_iter()
            .filter(|(channel, _)| *channel == ChannelId::new(GENERAL))
            .map(|(_, content)| content)
            .collect()
    }

    #[tokio::test]
    async fn test_unremarkable_member_is_not_reported() {
        let (platform, warner, _db) = setup();
        warner.on_join(GuildId::new(1), &user(5)).await.unwrap();
        settle().await;
        assert!(reports(&platform).is_empty());
    }

    #[tokio::test]
    async fn test_young_account_is_reported() {
        let (platform, warner, _db) = setup();
        let mut fresh = user(5);
        fresh.created_at = Utc::now() - chrono::Duration::minutes(3);

        warner.on_join(GuildId::new(1), &fresh).await.unwrap();
        settle().await;
        assert_eq!(
            reports(&platform),
            vec!["User <@5> (user5) joined this server:\nAccount younger than 30 minutes\n"]
        );
    }

    #[tokio::test]
    async fn test_bans_elsewhere_are_reported() {
        let (platform, warner, _db) = setup();
        platform.put_ban(GuildId::new(2), 5);

        warner.on_join(GuildId::new(1), &user(5)).await.unwrap();
        settle().await;

        let reports = reports(&platform);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].contains("Banned in 1 guilds:"));
        assert!(reports[0].contains("guild2 with reason: No reason provided"));
    }

    #[tokio::test]
    async fn test_unreadable_ban_list_is_skipped() {
        let (platform, warner, _db) = setup();
        platform.put_ban(GuildId::new(2), 5);
        platform.fail("fetch_ban", PlatformError::Transient("502".to_string()));

        warner.on_join(GuildId::new(1), &user(5)).await.unwrap();
        settle().await;
        assert!(reports(&platform).is_empty());
    }

    #[tokio::test]
    async fn test_join_looks_up_one_ban_per_guild() {
        let (platform, warner, _db) = setup();
        platform.put_ban(GuildId::new(3), 5);
        for other in 10..20 {
            platform.put_ban(GuildId::new(2), other);
        }

        warner.on_join(GuildId::new(1), &user(5)).await.unwrap();
        settle().await;

        let mut lookups: Vec<_> = platform
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::FetchBan(..) | Call::Bans(..)))
            .collect();
        lookups.sort_by_key(|call| match call {
            Call::FetchBan(guild_id, _) | Call::Bans(guild_id) => *guild_id,
            _ => GuildId::new(1),
        });
        assert_eq!(
            lookups,
            vec![
                Call::FetchBan(GuildId::new(2), UserId::new(5)),
                Call::FetchBan(GuildId::new(3), UserId::new(5)),
            ]
        );
        assert!(reports(&platform)[0].contains("guild3 with reason: No reason provided"));
    }

    #[tokio::test]
    async fn test_ban_is_passed_to_mutual_guilds() {
        let (platform, warner, _db) = setup();
        let now = Utc::now();
        platform.put_member(GuildId::new(2), member(5, &[]));
        platform.put_audit(
            GuildId::new(1),
            AuditEntry {
                action: AuditAction::Ban,
                target_id: Some(UserId::new(5)),
                actor_id: UserId::new(42),
                reason: Some("raid".to_string()),
                created_at: now,
            },
        );

        warner.on_ban(GuildId::new(1), &user(5), now).await.unwrap();
        settle().await;

        // only guild 2 shares the member
        assert_eq!(
            reports(&platform),
            vec!["Member <@5> (user5):\nBanned just now in guild1 with reason: raid"]
        );
    }
}
