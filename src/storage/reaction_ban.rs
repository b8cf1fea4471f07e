use super::Entity;
use crate::model::Emote;
use poise::serenity_prelude::ChannelId;
use serde::{Deserialize, Serialize};

/// Channel x emote
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReactionBanKey {
    pub channel_id: u64,
    /// Unicode sequence or custom emote id, see [`Emote::key`]
    pub emote: String,
}

impl ReactionBanKey {
    #[must_use]
    pub fn new(channel_id: ChannelId, emote: &Emote) -> Self {
        Self {
            channel_id: channel_id.get(),
            emote: emote.key(),
        }
    }
}

/// Reacting with `emote` in `channel_id` gets the reactor banned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionBan {
    #[serde(flatten)]
    pub key: ReactionBanKey,
}

impl Entity for ReactionBan {
    type Key = ReactionBanKey;
    const FILE: &'static str = "reaction_bans.yaml";

    fn with_key(key: ReactionBanKey) -> Self {
        Self { key }
    }

    fn key(&self) -> ReactionBanKey {
        self.key.clone()
    }
}

impl ReactionBan {
    #[must_use]
    pub fn channel(&self) -> ChannelId {
        ChannelId::new(self.key.channel_id)
    }

    /// The emote as a chat message renders it
    #[must_use]
    pub fn emote_label(&self) -> String {
        match self.key.emote.parse::<u64>() {
            Ok(id) => format!("<:emote:{id}>"),
            Err(_) => self.key.emote.clone(),
        }
    }
}
