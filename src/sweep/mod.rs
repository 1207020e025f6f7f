//! Time-driven sweep over guild state.
//!
//! The sweep revokes expired mutes and bans, delivers due reminders and
//! drives the persistence cycle. Remote effects go through the gateway
//! traits so the loop can be tested against mocks.

mod gateway;
mod service;

pub use gateway::{
    DiscordMessenger, DiscordModeration, GatewayError, GatewayResult, MessagingGateway,
    ModerationGateway,
};
pub use service::{
    DEFAULT_SWEEP_INTERVAL_SECONDS, EXPIRY_REASON, GATEWAY_CALL_TIMEOUT, SweepService,
};

/// Control messages for the sweep task
#[derive(Debug, Clone)]
pub enum SweepRequest {
    /// Sweep every resident guild now, regardless of the tick schedule
    SweepAll,
    /// Sweep a single guild now
    SweepGuild { guild_id: u64 },
    /// Finish the in-flight work, persist everything, then stop
    Shutdown,
}
