//! Propagation of the global ban list into opted-in guilds
//!
//! Each pass diffs the global list against a guild's actual bans and bans the
//! difference. A ban that fails shows up in the next diff again, so there is
//! no bookkeeping beyond the lists themselves.

use crate::SYNC_TARGET;
use crate::error::{EngineError, EngineResult};
use crate::model::truncate_reason;
use crate::platform::{Platform, log_remote_failure};
use crate::reporting::Reporter;
use crate::storage::{Database, GlobalBan};
use poise::serenity_prelude::{GuildId, Permissions, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub const GLOBAL_BAN_PREFIX: &str = "[Global Ban List] ";
const DELETE_MESSAGE_DAYS: u8 = 1;

#[derive(Clone)]
pub struct GlobalBanSync {
    platform: Arc<dyn Platform>,
    db: Database,
    reporter: Reporter,
    fetch_timeout: Duration,
}

impl GlobalBanSync {
    pub fn new(
        platform: Arc<dyn Platform>,
        db: Database,
        reporter: Reporter,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            db,
            reporter,
            fetch_timeout,
        }
    }

    /// Ban every globally banned user missing from the guild's ban list.
    /// Returns how many bans went through.
    pub async fn sync_guild(&self, guild_id: GuildId) -> EngineResult<usize> {
        let settings = self.db.settings(guild_id);
        if !settings.global_bans_enabled {
            return Ok(0);
        }
        let guild = self
            .platform
            .guild(guild_id)
            .ok_or(EngineError::GuildNotCached(guild_id))?;

        if !guild.has_permission(Permissions::BAN_MEMBERS) {
            warn!(target: SYNC_TARGET, guild_id = %guild_id, "Global bans enabled without ban permission");
            self.reporter.notify_permission(
                &guild,
                "Global bans are enabled in this guild, but I am missing the ban permission to \
                 apply them. Please fix the permission or disable global bans.",
            );
            return Ok(0);
        }

        let global = self.db.global_bans.load_all();
        if global.is_empty() {
            return Ok(0);
        }

        let existing = tokio::time::timeout(self.fetch_timeout, self.platform.bans(guild_id))
            .await
            .map_err(|_| EngineError::Timeout("guild ban list"))??;
        let banned: HashSet<UserId> = existing.iter().map(|ban| ban.user.id).collect();

        let missing = missing_bans(&global, &banned);
        if missing.is_empty() {
            debug!(target: SYNC_TARGET, guild_id = %guild_id, "Ban list up to date");
            return Ok(0);
        }

        let mut bans = JoinSet::new();
        for ban in missing {
            let platform = Arc::clone(&self.platform);
            let user_id = ban.user();
            let reason = ban_reason(ban);
            bans.spawn(async move {
                platform
                    .ban(guild_id, user_id, DELETE_MESSAGE_DAYS, reason)
                    .await
            });
        }

        let mut applied = 0;
        while let Some(result) = bans.join_next().await {
            match result {
                Ok(Ok(())) => applied += 1,
                Ok(Err(e)) => log_remote_failure("global ban", &e),
                Err(e) => warn!(target: SYNC_TARGET, guild_id = %guild_id, error = %e, "Ban task died"),
            }
        }

        info!(target: SYNC_TARGET, guild_id = %guild_id, "Applied {applied} global bans");
        Ok(applied)
    }
}

/// Global bans whose user is not in `banned`
#[must_use]
pub fn missing_bans<'a>(global: &'a [GlobalBan], banned: &HashSet<UserId>) -> Vec<&'a GlobalBan> {
    global
        .iter()
        .filter(|ban| !banned.contains(&ban.user()))
        .collect()
}

/// Audit-log reason of a global ban, cut to the platform limit
#[must_use]
pub fn ban_reason(ban: &GlobalBan) -> String {
    truncate_reason(&format!("{GLOBAL_BAN_PREFIX}{}", ban.reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::model::AUDIT_REASON_LIMIT;
    use crate::storage::Entity;
    use crate::test_support::{Call, FakePlatform, GENERAL, database, guild, revoke, settle};

    fn setup() -> (Arc<FakePlatform>, GlobalBanSync, Database) {
        let platform = Arc::new(FakePlatform::with_guild(guild(1)));
        let db = database();
        let dyn_platform = Arc::clone(&platform) as Arc<dyn Platform>;
        let reporter = Reporter::new(Arc::clone(&dyn_platform), db.clone());
        let sync = GlobalBanSync::new(dyn_platform, db.clone(), reporter, Duration::from_secs(5));
        (platform, sync, db)
    }

    fn add_global(db: &Database, user_id: u64, reason: &str) {
        db.global_bans
            .find_apply_and_merge(user_id, |ban| ban.reason = reason.to_string());
    }

    #[tokio::test]
    async fn test_only_missing_bans_are_issued() {
        let (platform, sync, db) = setup();
        db.guild_settings
            .find_apply_and_merge(1, |s| s.global_bans_enabled = true);
        add_global(&db, 101, "raider");
        add_global(&db, 102, "spammer");
        platform.put_ban(GuildId::new(1), 102);

        assert_eq!(sync.sync_guild(GuildId::new(1)).await.unwrap(), 1);

        assert_eq!(
            platform.bans_issued(),
            vec![(GuildId::new(1), UserId::new(101))]
        );
        let mut banned = platform.banned_ids(GuildId::new(1));
        banned.sort();
        assert_eq!(banned, vec![UserId::new(101), UserId::new(102)]);
        assert!(platform.calls().contains(&Call::Ban(
            GuildId::new(1),
            UserId::new(101),
            DELETE_MESSAGE_DAYS,
            "[Global Ban List] raider".to_string()
        )));
    }

    #[tokio::test]
    async fn test_second_pass_issues_nothing() {
        let (platform, sync, db) = setup();
        db.guild_settings
            .find_apply_and_merge(1, |s| s.global_bans_enabled = true);
        add_global(&db, 101, "raider");
        add_global(&db, 103, "scammer");

        assert_eq!(sync.sync_guild(GuildId::new(1)).await.unwrap(), 2);
        assert_eq!(sync.sync_guild(GuildId::new(1)).await.unwrap(), 0);
        assert_eq!(platform.bans_issued().len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_guild_is_skipped() {
        let (platform, sync, db) = setup();
        add_global(&db, 101, "raider");

        assert_eq!(sync.sync_guild(GuildId::new(1)).await.unwrap(), 0);
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_permission_notifies() {
        let (platform, sync, db) = setup();
        let mut g = guild(1);
        revoke(&mut g, Permissions::BAN_MEMBERS);
        platform.put_guild(g);
        db.guild_settings.find_apply_and_merge(1, |s| {
            s.global_bans_enabled = true;
            s.reporting_channel_id = Some(GENERAL);
        });
        add_global(&db, 101, "raider");

        assert_eq!(sync.sync_guild(GuildId::new(1)).await.unwrap(), 0);
        settle().await;

        assert!(platform.bans_issued().is_empty());
        let messages = platform.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("missing the ban permission"));
    }

    #[tokio::test]
    async fn test_failed_ban_is_retried_next_pass() {
        let (platform, sync, db) = setup();
        db.guild_settings
            .find_apply_and_merge(1, |s| s.global_bans_enabled = true);
        add_global(&db, 101, "raider");
        platform.fail("ban", PlatformError::Transient("429".to_string()));

        assert_eq!(sync.sync_guild(GuildId::new(1)).await.unwrap(), 0);

        platform.state.lock().unwrap().failures.clear();
        assert_eq!(sync.sync_guild(GuildId::new(1)).await.unwrap(), 1);
        assert_eq!(platform.bans_issued().len(), 2);
    }

    #[tokio::test]
    async fn test_ban_list_failure_is_an_error() {
        let (platform, sync, db) = setup();
        db.guild_settings
            .find_apply_and_merge(1, |s| s.global_bans_enabled = true);
        add_global(&db, 101, "raider");
        platform.fail("bans", PlatformError::PermissionDenied("bans".to_string()));

        assert!(matches!(
            sync.sync_guild(GuildId::new(1)).await,
            Err(EngineError::Platform(PlatformError::PermissionDenied(_)))
        ));
        assert!(platform.bans_issued().is_empty());
    }

    #[test]
    fn test_reason_is_truncated() {
        let mut ban = GlobalBan::with_key(1);
        ban.reason = "x".repeat(600);
        let reason = ban_reason(&ban);
        assert_eq!(reason.chars().count(), AUDIT_REASON_LIMIT);
        assert!(reason.starts_with(GLOBAL_BAN_PREFIX));
    }
}
