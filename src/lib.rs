pub mod commands;
pub mod data;
pub mod guilds;
pub mod handlers;
pub mod logging;
pub mod sweep;

// Log targets used throughout the bot
pub const BOT_NAME: &str = "guild_warden";
pub const COMMAND_TARGET: &str = "guild_warden::command";
pub const ERROR_TARGET: &str = "guild_warden::error";
pub const EVENT_TARGET: &str = "guild_warden::handlers";
pub const SWEEP_TARGET: &str = "guild_warden::sweep";

pub use data::Data;
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
