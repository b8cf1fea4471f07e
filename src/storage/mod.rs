//! Persisted state
//!
//! Four tables, each kept in memory and written to `<data_dir>/<table>.yaml`.
//! Every engine task re-reads what it needs from here; nothing else caches
//! entity state between invocations.

mod global_ban;
mod guild_settings;
mod member_roles;
mod reaction_ban;
mod table;

pub use global_ban::GlobalBan;
pub use guild_settings::GuildSettings;
pub use member_roles::{MemberKey, MemberRoles};
pub use reaction_ban::{ReactionBan, ReactionBanKey};
pub use table::{Entity, Table};

use crate::error::StorageError;
use poise::serenity_prelude::{ChannelId, GuildId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// All tables of the bot
#[derive(Clone)]
pub struct Database(pub Arc<DatabaseInner>);

impl std::ops::Deref for Database {
    type Target = DatabaseInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct DatabaseInner {
    pub dir: PathBuf,
    pub guild_settings: Table<GuildSettings>,
    pub member_roles: Table<MemberRoles>,
    pub global_bans: Table<GlobalBan>,
    pub reaction_bans: Table<ReactionBan>,
}

impl Database {
    /// An empty database rooted at `dir`
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self(Arc::new(DatabaseInner {
            dir: dir.into(),
            guild_settings: Table::new(),
            member_roles: Table::new(),
            global_bans: Table::new(),
            reaction_bans: Table::new(),
        }))
    }

    /// Open the database stored in `dir`, creating the directory if needed
    ///
    /// # Errors
    ///
    /// Returns a `StorageError` if the directory cannot be created or a stored
    /// table cannot be read. A corrupt table stops the load so that the next
    /// save cannot replace it with an empty one.
    pub async fn load(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let db = Self::new(dir);
        tokio::fs::create_dir_all(&db.dir).await?;

        db.guild_settings.load_from(&db.dir).await?;
        db.member_roles.load_from(&db.dir).await?;
        db.global_bans.load_from(&db.dir).await?;
        db.reaction_bans.load_from(&db.dir).await?;

        info!(
            guilds = db.guild_settings.len(),
            members = db.member_roles.len(),
            global_bans = db.global_bans.len(),
            reaction_bans = db.reaction_bans.len(),
            "Database loaded from {}",
            db.dir.display()
        );
        Ok(db)
    }

    /// Write every table that changed since the last save
    ///
    /// # Errors
    ///
    /// Returns the first `StorageError` hit; later tables are still attempted.
    pub async fn save(&self) -> Result<(), StorageError> {
        let dir: &Path = &self.dir;
        let results = [
            self.guild_settings.save_to(dir).await,
            self.member_roles.save_to(dir).await,
            self.global_bans.save_to(dir).await,
            self.reaction_bans.save_to(dir).await,
        ];

        let mut written = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if written > 0 {
            debug!("Saved {written} tables to {}", dir.display());
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Settings of a guild, created with defaults on first access
    #[must_use]
    pub fn settings(&self, guild_id: GuildId) -> GuildSettings {
        self.guild_settings.find_or_create(guild_id.get())
    }

    /// Reaction bans registered in a channel
    #[must_use]
    pub fn reaction_bans_in(&self, channel_id: ChannelId) -> Vec<ReactionBan> {
        self.reaction_bans
            .load_all()
            .into_iter()
            .filter(|ban| ban.channel() == channel_id)
            .collect()
    }
}
