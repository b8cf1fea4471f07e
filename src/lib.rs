pub mod admin;
pub mod audit;
pub mod commands;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod global_bans;
pub mod handlers;
pub mod logging;
pub mod member_role;
pub mod member_sync;
pub mod mentions;
pub mod mod_log;
pub mod model;
pub mod platform;
pub mod reaction_bans;
pub mod reporting;
pub mod sequencer;
pub mod storage;
pub mod suspicious;
pub mod sweep;

#[cfg(test)]
mod test_support;

pub const BOT_NAME: &str = "guild_sentinel";
pub const COMMAND_TARGET: &str = "guild_sentinel::command";
pub const ERROR_TARGET: &str = "guild_sentinel::error";
pub const EVENT_TARGET: &str = "guild_sentinel::handlers";
pub const SYNC_TARGET: &str = "guild_sentinel::sync";
pub const CONSOLE_TARGET: &str = "guild_sentinel";

pub use data::{Data, DataInner};
pub use engine::Engine;
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
