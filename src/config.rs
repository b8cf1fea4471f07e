//! Process configuration
//!
//! Loaded once at startup from a YAML file. Every field has a default, so an
//! absent file or a partial one is fine.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable holding the config file path
pub const CONFIG_ENV: &str = "SENTINEL_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/sentinel.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Where the tables are stored
    pub data_dir: PathBuf,
    /// Users allowed to manage the global ban list, in addition to the
    /// application owner
    pub owner_ids: HashSet<u64>,
    pub worker_idle_secs: u64,
    pub member_role_sweep_secs: u64,
    pub global_ban_sweep_secs: u64,
    /// Upper bound on remote list fetches (ban lists, audit logs)
    pub fetch_timeout_secs: u64,
    pub autosave_secs: u64,
    /// Accounts younger than this are reported on join
    pub suspicious_account_age_mins: i64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            owner_ids: HashSet::new(),
            worker_idle_secs: 3600,
            member_role_sweep_secs: 60,
            global_ban_sweep_secs: 600,
            fetch_timeout_secs: 300,
            autosave_secs: 60,
            suspicious_account_age_mins: 30,
        }
    }
}

impl BotConfig {
    /// Load from the path in `SENTINEL_CONFIG`, or the default path
    pub async fn from_env() -> Self {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(Path::new(&path)).await
    }

    /// Load from a file; a missing or invalid file yields the defaults
    pub async fn load(path: &Path) -> Self {
        let Ok(content) = tokio::fs::read_to_string(path).await else {
            info!("No config at {}, using defaults", path.display());
            return Self::default();
        };

        match serde_yaml::from_str(&content) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Invalid config at {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }

    #[must_use]
    pub fn worker_idle(&self) -> Duration {
        Duration::from_secs(self.worker_idle_secs)
    }

    #[must_use]
    pub fn member_role_sweep(&self) -> Duration {
        Duration::from_secs(self.member_role_sweep_secs)
    }

    #[must_use]
    pub fn global_ban_sweep(&self) -> Duration {
        Duration::from_secs(self.global_ban_sweep_secs)
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub fn autosave(&self) -> Duration {
        Duration::from_secs(self.autosave_secs)
    }

    #[must_use]
    pub fn suspicious_account_age(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.suspicious_account_age_mins)
    }
}
