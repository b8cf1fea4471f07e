//! Attribution of moderation events to audit-log entries

use crate::SYNC_TARGET;
use crate::model::{AuditAction, AuditEntry};
use crate::platform::{Platform, log_remote_failure};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{GuildId, Permissions, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How far apart an event and its audit entry may be, in either direction
pub const AUDIT_TOLERANCE_MS: i64 = 10_000;

#[derive(Clone)]
pub struct AuditCorrelator {
    platform: Arc<dyn Platform>,
    timeout: Duration,
}

impl AuditCorrelator {
    pub fn new(platform: Arc<dyn Platform>, timeout: Duration) -> Self {
        Self { platform, timeout }
    }

    /// Find the audit entry of `action` against `subject` closest to `at`.
    ///
    /// Returns `None` when the bot cannot read the audit log, when the fetch
    /// fails or times out, and when nothing matches. Callers treat all of
    /// these as "unknown".
    pub async fn find_entry(
        &self,
        guild_id: GuildId,
        subject: UserId,
        action: AuditAction,
        at: DateTime<Utc>,
    ) -> Option<AuditEntry> {
        let guild = self.platform.guild(guild_id)?;
        if !guild.has_permission(Permissions::VIEW_AUDIT_LOG) {
            debug!(target: SYNC_TARGET, guild_id = %guild_id, %action, "No permission to read the audit log");
            return None;
        }

        let entries =
            match tokio::time::timeout(self.timeout, self.platform.audit_log(guild_id, action)).await
            {
                Ok(Ok(entries)) => entries,
                Ok(Err(e)) => {
                    log_remote_failure("audit log", &e);
                    return None;
                }
                Err(_) => {
                    warn!(target: SYNC_TARGET, guild_id = %guild_id, %action, "Audit log fetch timed out");
                    return None;
                }
            };

        // entries come most recent first, so the first hit is the closest
        entries.into_iter().find(|entry| {
            entry.target_id == Some(subject) && within_tolerance(entry.created_at, at)
        })
    }

    /// Why `subject` was banned: the guild's ban entry first, which needs no
    /// audit access and no matching event time, then the audit log.
    pub async fn ban_reason(
        &self,
        guild_id: GuildId,
        subject: UserId,
        at: DateTime<Utc>,
    ) -> Option<String> {
        if let Some(reason) = self.reason_from_ban_list(guild_id, subject).await {
            return Some(reason);
        }
        self.find_entry(guild_id, subject, AuditAction::Ban, at)
            .await
            .and_then(|entry| entry.reason)
    }

    async fn reason_from_ban_list(&self, guild_id: GuildId, subject: UserId) -> Option<String> {
        let guild = self.platform.guild(guild_id)?;
        if !guild.has_permission(Permissions::BAN_MEMBERS) {
            return None;
        }

        match tokio::time::timeout(self.timeout, self.platform.fetch_ban(guild_id, subject)).await {
            Ok(Ok(ban)) => ban.and_then(|ban| ban.reason),
            Ok(Err(e)) => {
                log_remote_failure("ban lookup", &e);
                None
            }
            Err(_) => {
                warn!(target: SYNC_TARGET, guild_id = %guild_id, user_id = %subject, "Ban lookup timed out");
                None
            }
        }
    }
}

#[must_use]
pub fn within_tolerance(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).num_milliseconds().abs() <= AUDIT_TOLERANCE_MS
}
