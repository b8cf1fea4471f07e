//! Moderation log lines for bans, unbans and departures

use crate::audit::AuditCorrelator;
use crate::error::{EngineError, EngineResult};
use crate::model::{AuditAction, UserView};
use crate::platform::Platform;
use crate::reporting::{ChannelKind, Reporter};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{GuildId, Mentionable};
use std::sync::Arc;

#[derive(Clone)]
pub struct ModLog {
    platform: Arc<dyn Platform>,
    correlator: AuditCorrelator,
    reporter: Reporter,
}

impl ModLog {
    pub fn new(platform: Arc<dyn Platform>, correlator: AuditCorrelator, reporter: Reporter) -> Self {
        Self {
            platform,
            correlator,
            reporter,
        }
    }

    pub async fn on_ban(&self, guild_id: GuildId, user: &UserView, at: DateTime<Utc>) -> EngineResult<()> {
        let guild = self
            .platform
            .guild(guild_id)
            .ok_or(EngineError::GuildNotCached(guild_id))?;
        if self.reporter.channel(&guild, ChannelKind::Log).is_none() {
            return Ok(());
        }

        let reason = self
            .correlator
            .ban_reason(guild_id, user.id, at)
            .await
            .unwrap_or_else(|| "Reason could not be retrieved".to_string());
        self.reporter
            .log(&guild, format!("User {} banned:\n{reason}", user.describe()));
        Ok(())
    }

    pub async fn on_unban(&self, guild_id: GuildId, user: &UserView, at: DateTime<Utc>) -> EngineResult<()> {
        let guild = self
            .platform
            .guild(guild_id)
            .ok_or(EngineError::GuildNotCached(guild_id))?;
        if self.reporter.channel(&guild, ChannelKind::Log).is_none() {
            return Ok(());
        }

        let unbanner = self
            .correlator
            .find_entry(guild_id, user.id, AuditAction::Unban, at)
            .await
            .map_or_else(
                || "Unbanner could not be retrieved".to_string(),
                |entry| entry.actor_id.mention().to_string(),
            );
        self.reporter
            .log(&guild, format!("User {} unbanned by {unbanner}", user.describe()));
        Ok(())
    }

    /// A departure is a kick if the audit log says so, otherwise a plain leave
    pub async fn on_leave(&self, guild_id: GuildId, user: &UserView, at: DateTime<Utc>) -> EngineResult<()> {
        let guild = self
            .platform
            .guild(guild_id)
            .ok_or(EngineError::GuildNotCached(guild_id))?;
        if self.reporter.channel(&guild, ChannelKind::Log).is_none() {
            return Ok(());
        }

        let line = match self
            .correlator
            .find_entry(guild_id, user.id, AuditAction::Kick, at)
            .await
        {
            Some(entry) => format!(
                "User {} kicked:\nBy {} for: {}",
                user.describe(),
                entry.actor_id.mention(),
                entry.reason.as_deref().unwrap_or("No reason provided")
            ),
            None => format!("User {} left the server.", user.describe()),
        };
        self.reporter.log(&guild, line);
        Ok(())
    }
}
