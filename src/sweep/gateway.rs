//! Remote collaborators the sweep acts through.
//!
//! The sweep never talks to Discord directly; it goes through these traits so
//! the tick logic can be exercised against mocks. The production
//! implementations are thin wrappers over the serenity HTTP client.

use async_trait::async_trait;
use poise::serenity_prelude as serenity;
use serenity::Http;
use serenity::builder::{CreateMessage, EditMember};
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use thiserror::Error;

/// Errors from the remote moderation/messaging APIs
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Discord API error
    #[error("Discord API error: {0}")]
    Discord(#[from] Box<serenity::Error>),
}

impl From<serenity::Error> for GatewayError {
    fn from(error: serenity::Error) -> Self {
        Self::Discord(Box::new(error))
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Remote moderation API: revoke timed restrictions.
///
/// Every call carries an audit-log reason; the sweep always passes a fixed
/// system reason so automatic expiry is distinguishable from manual action.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModerationGateway: Send + Sync {
    /// Lift a member's communication restriction.
    async fn lift_mute(&self, guild_id: u64, member_id: u64, reason: &str) -> GatewayResult<()>;

    /// Lift a member's ban.
    async fn lift_ban(&self, guild_id: u64, member_id: u64, reason: &str) -> GatewayResult<()>;
}

/// Remote messaging API: deliver a notification to a channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Post `text` to the channel, mentioning the author it concerns.
    async fn deliver(&self, channel_id: u64, author_id: u64, text: &str) -> GatewayResult<()>;
}

/// Moderation gateway backed by the Discord REST API.
pub struct DiscordModeration {
    http: Arc<Http>,
}

impl DiscordModeration {
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ModerationGateway for DiscordModeration {
    async fn lift_mute(&self, guild_id: u64, member_id: u64, reason: &str) -> GatewayResult<()> {
        GuildId::new(guild_id)
            .edit_member(
                self.http.as_ref(),
                UserId::new(member_id),
                EditMember::new()
                    .enable_communication()
                    .audit_log_reason(reason),
            )
            .await
            .map_err(GatewayError::from)?;
        Ok(())
    }

    async fn lift_ban(&self, guild_id: u64, member_id: u64, reason: &str) -> GatewayResult<()> {
        self.http
            .remove_ban(GuildId::new(guild_id), UserId::new(member_id), Some(reason))
            .await
            .map_err(GatewayError::from)?;
        Ok(())
    }
}

/// Messaging gateway backed by the Discord REST API.
pub struct DiscordMessenger {
    http: Arc<Http>,
}

impl DiscordMessenger {
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl MessagingGateway for DiscordMessenger {
    async fn deliver(&self, channel_id: u64, author_id: u64, text: &str) -> GatewayResult<()> {
        let content = format!("<@{author_id}> {text}");
        ChannelId::new(channel_id)
            .send_message(self.http.as_ref(), CreateMessage::new().content(content))
            .await
            .map_err(GatewayError::from)?;
        Ok(())
    }
}
