//! The synchronization engine
//!
//! Turns platform events into work on the task sequencer, keyed by guild, and
//! drives the periodic sweeps. Everything here is cheap to call from an event
//! handler: the actual work happens on the guild's worker.

use crate::SYNC_TARGET;
use crate::admin::AdminService;
use crate::audit::AuditCorrelator;
use crate::config::BotConfig;
use crate::error::EngineError;
use crate::global_bans::GlobalBanSync;
use crate::member_role::MemberRoleAssigner;
use crate::member_sync::MemberSync;
use crate::mentions::{FakeMentions, MessageEvent};
use crate::mod_log::ModLog;
use crate::model::{MemberView, UserView};
use crate::platform::Platform;
use crate::reaction_bans::{ReactionBanEnforcer, ReactionEvent};
use crate::reporting::Reporter;
use crate::sequencer::{TaskSequencer, WorkerKey};
use crate::storage::{Database, MemberKey};
use crate::suspicious::SuspiciousUsers;
use crate::sweep::{SweepHandle, SweepReceiver, SweepRequest, spawn_sweep, sweep_channel};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{GuildId, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How often idle guild workers are looked for
const REAPER_PERIOD: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Engine(pub Arc<EngineInner>);

impl std::ops::Deref for Engine {
    type Target = EngineInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct EngineInner {
    pub platform: Arc<dyn Platform>,
    pub db: Database,
    pub config: BotConfig,
    pub sequencer: Arc<TaskSequencer>,
    pub admin: AdminService,
    member_sync: MemberSync,
    member_role: MemberRoleAssigner,
    global_bans: GlobalBanSync,
    reaction_bans: ReactionBanEnforcer,
    mod_log: ModLog,
    suspicious: SuspiciousUsers,
    mentions: FakeMentions,
    member_role_sweep: SweepHandle,
    global_ban_sweep: SweepHandle,
}

/// Receivers of the sweep loops, handed to [`Engine::start`]
pub struct Sweeps {
    member_role: SweepReceiver,
    global_bans: SweepReceiver,
}

impl Engine {
    pub fn new(
        platform: Arc<dyn Platform>,
        db: Database,
        config: BotConfig,
        owners: HashSet<UserId>,
    ) -> (Self, Sweeps) {
        let owners = Arc::new(owners);
        let (member_role_sweep, member_role_rx) = sweep_channel("member role");
        let (global_ban_sweep, global_bans_rx) = sweep_channel("global bans");

        let reporter = Reporter::new(Arc::clone(&platform), db.clone());
        let correlator = AuditCorrelator::new(Arc::clone(&platform), config.fetch_timeout());

        let inner = EngineInner {
            sequencer: Arc::new(TaskSequencer::new(config.worker_idle())),
            admin: AdminService::new(
                Arc::clone(&platform),
                db.clone(),
                Arc::clone(&owners),
                member_role_sweep.clone(),
                global_ban_sweep.clone(),
            ),
            member_sync: MemberSync::new(Arc::clone(&platform), db.clone()),
            member_role: MemberRoleAssigner::new(Arc::clone(&platform), db.clone()),
            global_bans: GlobalBanSync::new(
                Arc::clone(&platform),
                db.clone(),
                reporter.clone(),
                config.fetch_timeout(),
            ),
            reaction_bans: ReactionBanEnforcer::new(
                Arc::clone(&platform),
                db.clone(),
                reporter.clone(),
            ),
            mod_log: ModLog::new(Arc::clone(&platform), correlator.clone(), reporter.clone()),
            suspicious: SuspiciousUsers::new(
                Arc::clone(&platform),
                correlator,
                reporter,
                config.suspicious_account_age(),
                config.fetch_timeout(),
            ),
            mentions: FakeMentions::new(Arc::clone(&platform), db.clone(), owners),
            member_role_sweep,
            global_ban_sweep,
            platform,
            db,
            config,
        };

        let sweeps = Sweeps {
            member_role: member_role_rx,
            global_bans: global_bans_rx,
        };
        (Self(Arc::new(inner)), sweeps)
    }

    /// Start the sweeps and the idle worker reaper
    pub fn start(&self, sweeps: Sweeps) -> Vec<JoinHandle<()>> {
        let engine = self.clone();
        let member_role = spawn_sweep(
            sweeps.member_role,
            self.config.member_role_sweep(),
            move |target| engine.sweep_member_roles(target),
        );

        let engine = self.clone();
        let global_bans = spawn_sweep(
            sweeps.global_bans,
            self.config.global_ban_sweep(),
            move |target| engine.sweep_global_bans(target),
        );

        let reaper = Arc::clone(&self.sequencer).spawn_reaper(REAPER_PERIOD);
        info!(target: SYNC_TARGET, "Engine started");
        vec![member_role, global_bans, reaper]
    }

    /// Stop the sweeps and drop all queued work
    pub fn shutdown(&self) {
        self.member_role_sweep.request(SweepRequest::Shutdown);
        self.global_ban_sweep.request(SweepRequest::Shutdown);
        self.sequencer.shutdown();
        info!(target: SYNC_TARGET, "Engine stopped");
    }

    fn targets(&self, target: Option<GuildId>) -> Vec<GuildId> {
        target.map_or_else(|| self.platform.guild_ids(), |guild_id| vec![guild_id])
    }

    pub fn sweep_member_roles(&self, target: Option<GuildId>) {
        for guild_id in self.targets(target) {
            let assigner = self.member_role.clone();
            self.sequencer.submit(guild_id, "member role sweep", async move {
                assigner.sweep_guild(guild_id).map(|_| ())
            });
        }
    }

    pub fn sweep_global_bans(&self, target: Option<GuildId>) {
        if self.db.global_bans.is_empty() {
            return;
        }
        for guild_id in self.targets(target) {
            let sync = self.global_bans.clone();
            self.sequencer.submit(guild_id, "global ban sync", async move {
                sync.sync_guild(guild_id).await.map(|_| ())
            });
        }
    }

    /// Seed stored member state for everything in the cache
    pub fn on_ready(&self) {
        let sync = self.member_sync.clone();
        self.sequencer.submit(WorkerKey::Default, "capture all members", async move {
            sync.capture_all();
            Ok(())
        });
    }

    pub fn on_guild_create(&self, guild_id: GuildId, is_new: bool) {
        if !is_new {
            return;
        }
        info!(target: SYNC_TARGET, guild_id = %guild_id, "Joined a new guild");
        let sync = self.member_sync.clone();
        self.sequencer.submit(guild_id, "capture guild members", async move {
            sync.capture_guild(guild_id).map(|_| ())
        });
    }

    pub fn on_member_join(&self, guild_id: GuildId, user: UserView) {
        let user_id = user.id;

        let sync = self.member_sync.clone();
        self.sequencer.submit(guild_id, "restore member", async move {
            sync.restore(guild_id, user_id)
        });

        let assigner = self.member_role.clone();
        self.sequencer.submit(guild_id, "assign member role", async move {
            assigner.assign(guild_id, user_id)
        });

        let suspicious = self.suspicious.clone();
        self.sequencer.submit(guild_id, "suspicious member check", async move {
            suspicious.on_join(guild_id, &user).await
        });
    }

    /// Capture the member if anything we store about them changed. Without
    /// the previous state we cannot tell, so capture anyway.
    pub fn on_member_update(&self, guild_id: GuildId, old: Option<MemberView>, new: MemberView) {
        let changed = old.is_none_or(|old| {
            let mut before = old.roles.clone();
            let mut after = new.roles.clone();
            before.sort_unstable();
            after.sort_unstable();
            before != after || old.nickname != new.nickname
        });
        if !changed {
            return;
        }
        self.submit_capture(guild_id, new, "capture member update");
    }

    pub fn on_member_remove(
        &self,
        guild_id: GuildId,
        user: UserView,
        member: Option<MemberView>,
        at: DateTime<Utc>,
    ) {
        match member {
            Some(member) => self.submit_capture(guild_id, member, "capture leaving member"),
            None => debug!(target: SYNC_TARGET, guild_id = %guild_id, user_id = %user.id, "Leaving member was not cached"),
        }

        let mod_log = self.mod_log.clone();
        self.sequencer.submit(guild_id, "leave log", async move {
            mod_log.on_leave(guild_id, &user, at).await
        });
    }

    fn submit_capture(&self, guild_id: GuildId, member: MemberView, action: &'static str) {
        let sync = self.member_sync.clone();
        let platform = Arc::clone(&self.platform);
        self.sequencer.submit(guild_id, action, async move {
            let guild = platform
                .guild(guild_id)
                .ok_or(EngineError::GuildNotCached(guild_id))?;
            sync.capture(&guild, &member);
            Ok(())
        });
    }

    pub fn on_ban(&self, guild_id: GuildId, user: UserView, at: DateTime<Utc>) {
        let mod_log = self.mod_log.clone();
        let banned = user.clone();
        self.sequencer.submit(guild_id, "ban log", async move {
            mod_log.on_ban(guild_id, &banned, at).await
        });

        let suspicious = self.suspicious.clone();
        self.sequencer.submit(guild_id, "ban warning", async move {
            suspicious.on_ban(guild_id, &user, at).await
        });
    }

    pub fn on_unban(&self, guild_id: GuildId, user: UserView, at: DateTime<Utc>) {
        let mod_log = self.mod_log.clone();
        self.sequencer.submit(guild_id, "unban log", async move {
            mod_log.on_unban(guild_id, &user, at).await
        });
    }

    pub fn on_reaction(&self, event: ReactionEvent) {
        let enforcer = self.reaction_bans.clone();
        self.sequencer.submit(event.guild_id, "reaction ban", async move {
            enforcer.on_reaction(event)
        });
    }

    pub fn on_message(&self, event: MessageEvent) {
        let mentions = self.mentions.clone();
        self.sequencer.submit(event.guild_id, "fake mentions", async move {
            mentions.on_message(event)
        });
    }

    /// Stored roles of a member, for status output
    #[must_use]
    pub fn stored_roles(&self, guild_id: GuildId, user_id: UserId) -> Option<Vec<u64>> {
        self.db
            .member_roles
            .find(&MemberKey::new(guild_id, user_id))
            .map(|stored| stored.role_ids.into_iter().collect())
    }
}
