//! Operator-facing channels of a guild
//!
//! Each guild may configure a reporting channel (warnings meant for
//! moderators) and a log channel (moderation log). Both are resolved the same
//! way: nothing configured means stay silent, a configured channel that is
//! gone or unwritable is announced in the first channel the bot can write to.

use crate::model::GuildView;
use crate::platform::{Platform, fire_and_forget};
use crate::storage::Database;
use derive_more::Display;
use poise::serenity_prelude::{ChannelId, Mentionable};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ChannelKind {
    #[display("reporting")]
    Reporting,
    #[display("log")]
    Log,
}

#[derive(Clone)]
pub struct Reporter {
    platform: Arc<dyn Platform>,
    db: Database,
}

impl Reporter {
    pub fn new(platform: Arc<dyn Platform>, db: Database) -> Self {
        Self { platform, db }
    }

    /// The working channel of `kind`, announcing a broken configuration
    pub fn channel(&self, guild: &GuildView, kind: ChannelKind) -> Option<ChannelId> {
        let settings = self.db.settings(guild.id);
        let configured = match kind {
            ChannelKind::Reporting => settings.reporting_channel(),
            ChannelKind::Log => settings.log_channel(),
        }?;

        if guild.channel(configured).is_some_and(|c| c.can_talk()) {
            return Some(configured);
        }

        match guild.talkable_channels().next() {
            Some(fallback) => {
                let notice = format!(
                    "A {kind} channel {} was configured, but it appears to be deleted or I can't \
                     write there. Please tell an admin of this guild to either fix permissions, \
                     set a new channel, or reset my {kind} channel configuration.",
                    configured.mention()
                );
                self.send("broken channel notice", fallback.id, notice);
            }
            None => warn!(guild_id = %guild.id, %kind, "Guild has a broken channel and nowhere to say so"),
        }
        None
    }

    /// Post to the reporting channel, if it works. Returns whether a message
    /// was sent.
    pub fn report(&self, guild: &GuildView, message: impl Into<String>) -> bool {
        self.post(guild, ChannelKind::Reporting, message.into())
    }

    /// Post to the log channel, if it works
    pub fn log(&self, guild: &GuildView, message: impl Into<String>) -> bool {
        self.post(guild, ChannelKind::Log, message.into())
    }

    fn post(&self, guild: &GuildView, kind: ChannelKind, message: String) -> bool {
        let Some(channel_id) = self.channel(guild, kind) else {
            return false;
        };
        self.send("report", channel_id, message);
        true
    }

    fn send(&self, action: &'static str, channel_id: ChannelId, content: String) {
        let platform = Arc::clone(&self.platform);
        fire_and_forget(action, async move {
            platform.send_message(channel_id, content).await
        });
    }

    /// Tell moderators about a missing permission. Only the configured
    /// reporting channel is used, and only if it exists and is writable.
    pub fn notify_permission(&self, guild: &GuildView, message: impl Into<String>) {
        let settings = self.db.settings(guild.id);
        let target = settings
            .reporting_channel()
            .filter(|id| guild.channel(*id).is_some_and(|c| c.can_talk()));

        match target {
            Some(channel_id) => self.send("permission notice", channel_id, message.into()),
            None => warn!(guild_id = %guild.id, "Missing permission and no reporting channel to say so"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakePlatform, GENERAL, database, guild, settle};
    use crate::model::ChannelView;
    use poise::serenity_prelude::Permissions;

    fn reporter_for(platform: &Arc<FakePlatform>) -> (Reporter, Database) {
        let db = database();
        let platform: Arc<dyn Platform> = Arc::clone(platform) as Arc<dyn Platform>;
        (Reporter::new(platform, db.clone()), db)
    }

    #[tokio::test]
    async fn test_unconfigured_channel_is_silent() {
        let g = guild(1);
        let platform = Arc::new(FakePlatform::with_guild(g.clone()));
        let (reporter, _db) = reporter_for(&platform);

        assert!(!reporter.report(&g, "hello"));
        settle().await;
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_working_channel_receives_report() {
        let g = guild(1);
        let platform = Arc::new(FakePlatform::with_guild(g.clone()));
        let (reporter, db) = reporter_for(&platform);
        db.guild_settings
            .find_apply_and_merge(1, |s| s.log_channel_id = Some(GENERAL));

        assert!(reporter.log(&g, "banned"));
        settle().await;
        assert_eq!(
            platform.messages(),
            vec![(ChannelId::new(GENERAL), "banned".to_string())]
        );
    }

    #[tokio::test]
    async fn test_broken_channel_is_announced() {
        let mut g = guild(1);
        g.channels.push(ChannelView {
            id: ChannelId::new(600),
            name: "read-only".to_string(),
            permissions: Permissions::VIEW_CHANNEL,
        });
        let platform = Arc::new(FakePlatform::with_guild(g.clone()));
        let (reporter, db) = reporter_for(&platform);
        db.guild_settings
            .find_apply_and_merge(1, |s| s.reporting_channel_id = Some(600));

        assert!(!reporter.report(&g, "hello"));
        settle().await;

        let messages = platform.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, ChannelId::new(GENERAL));
        assert!(messages[0].1.contains("reporting channel <#600>"));
    }

    #[tokio::test]
    async fn test_permission_notice_needs_reporting_channel() {
        let g = guild(1);
        let platform = Arc::new(FakePlatform::with_guild(g.clone()));
        let (reporter, db) = reporter_for(&platform);

        reporter.notify_permission(&g, "missing ban");
        settle().await;
        assert!(platform.messages().is_empty());

        db.guild_settings
            .find_apply_and_merge(1, |s| s.reporting_channel_id = Some(GENERAL));
        reporter.notify_permission(&g, "missing ban");
        settle().await;
        assert_eq!(platform.messages().len(), 1);
    }
}
