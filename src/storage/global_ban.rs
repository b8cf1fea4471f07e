use super::Entity;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::UserId;
use serde::{Deserialize, Serialize};

const DEFAULT_REASON: &str = "No reason provided";

/// A ban applied to every guild that opted into global bans
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalBan {
    pub user_id: u64,
    pub reason: String,
    pub created: DateTime<Utc>,
}

impl Entity for GlobalBan {
    type Key = u64;
    const FILE: &'static str = "global_bans.yaml";

    fn with_key(user_id: u64) -> Self {
        Self {
            user_id,
            reason: DEFAULT_REASON.to_string(),
            created: Utc::now(),
        }
    }

    fn key(&self) -> u64 {
        self.user_id
    }
}

impl GlobalBan {
    #[must_use]
    pub fn user(&self) -> UserId {
        UserId::new(self.user_id)
    }
}
