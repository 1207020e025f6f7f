//! Slash commands.
//!
//! Handlers here are thin: they validate context, call the Discord API and
//! record the resulting state through the guild cache. Timed follow-ups
//! (unmute, unban, reminder delivery) are the sweep task's job, not theirs.

use crate::guilds::Reminder;
use crate::{COMMAND_TARGET, Context, Error};
use chrono::{Duration, Utc};
use poise::{command, serenity_prelude as serenity};
use serenity::builder::{EditMember, GetMessages};
use tracing::info;
use uuid::Uuid;

/// Basic ping command
/// This command is used to check if the bot is responsive.
#[command(slash_command, guild_only)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}

/// Show bot name and version.
#[command(slash_command)]
pub async fn about(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say(format!(
        "{} v{}: moderation and reminders, per guild",
        crate::BOT_NAME,
        env!("CARGO_PKG_VERSION")
    ))
    .await?;
    Ok(())
}

/// Temporarily restrict a member from communicating.
#[command(
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS",
    required_bot_permissions = "MODERATE_MEMBERS"
)]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "Member to mute"] user: serenity::User,
    #[description = "Mute duration in minutes"]
    #[min = 1]
    duration_minutes: u32,
    #[description = "Reason for the mute"] reason: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("mute requires a guild context")?;
    let until = Utc::now() + Duration::minutes(i64::from(duration_minutes));

    // Fetching the member first doubles as an existence check
    let mut member = guild_id.member(ctx.http(), user.id).await?;
    member
        .disable_communication_until_datetime(ctx.http(), until.into())
        .await?;

    ctx.data()
        .guilds
        .update_member(guild_id.get(), user.id.get(), |member| {
            member.mute_expires_at = Some(until);
        })
        .await;

    info!(
        target: COMMAND_TARGET,
        guild_id = guild_id.get(),
        member_id = user.id.get(),
        until = %until,
        "Member muted"
    );
    ctx.say(format!(
        "Muted {} until <t:{}:f>: {reason}",
        user.name,
        until.timestamp()
    ))
    .await?;
    Ok(())
}

/// Lift a member's communication restriction early.
#[command(
    slash_command,
    guild_only,
    required_permissions = "MODERATE_MEMBERS",
    required_bot_permissions = "MODERATE_MEMBERS"
)]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "Member to unmute"] user: serenity::User,
    #[description = "Reason for the unmute"] reason: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("unmute requires a guild context")?;

    guild_id
        .edit_member(
            ctx.http(),
            user.id,
            EditMember::new()
                .enable_communication()
                .audit_log_reason(&format!("({}) {reason}", ctx.author().name)),
        )
        .await?;

    ctx.data()
        .guilds
        .update_member(guild_id.get(), user.id.get(), |member| {
            member.mute_expires_at = None;
        })
        .await;

    ctx.say(format!("Unmuted {}: {reason}", user.name)).await?;
    Ok(())
}

/// Ban a member, optionally for a limited time.
#[command(
    slash_command,
    guild_only,
    required_permissions = "BAN_MEMBERS",
    required_bot_permissions = "BAN_MEMBERS"
)]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "Member to ban"] user: serenity::User,
    #[description = "Reason for the ban"] reason: String,
    #[description = "Ban duration in minutes; omit for permanent"]
    #[min = 1]
    duration_minutes: Option<u32>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("ban requires a guild context")?;

    guild_id
        .ban_with_reason(
            ctx.http(),
            user.id,
            0,
            &format!("({}) {reason}", ctx.author().name),
        )
        .await?;

    let until = duration_minutes.map(|minutes| Utc::now() + Duration::minutes(i64::from(minutes)));
    ctx.data()
        .guilds
        .update_member(guild_id.get(), user.id.get(), |member| {
            member.ban_expires_at = until;
        })
        .await;

    info!(
        target: COMMAND_TARGET,
        guild_id = guild_id.get(),
        member_id = user.id.get(),
        until = ?until,
        "Member banned"
    );
    let response = match until {
        Some(until) => format!("Banned {} until <t:{}:f>: {reason}", user.name, until.timestamp()),
        None => format!("Banned {}: {reason}", user.name),
    };
    ctx.say(response).await?;
    Ok(())
}

/// Lift a member's ban early.
#[command(
    slash_command,
    guild_only,
    required_permissions = "BAN_MEMBERS",
    required_bot_permissions = "BAN_MEMBERS"
)]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "User to unban"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("unban requires a guild context")?;

    guild_id.unban(ctx.http(), user.id).await?;

    ctx.data()
        .guilds
        .update_member(guild_id.get(), user.id.get(), |member| {
            member.ban_expires_at = None;
        })
        .await;

    ctx.say(format!("Unbanned {}", user.name)).await?;
    Ok(())
}

/// Kick a member from the guild.
#[command(
    slash_command,
    guild_only,
    required_permissions = "KICK_MEMBERS",
    required_bot_permissions = "KICK_MEMBERS"
)]
pub async fn kick(
    ctx: Context<'_>,
    #[description = "Member to kick"] user: serenity::User,
    #[description = "Reason for the kick"] reason: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("kick requires a guild context")?;

    guild_id
        .kick_with_reason(
            ctx.http(),
            user.id,
            &format!("({}) {reason}", ctx.author().name),
        )
        .await?;

    ctx.say(format!("Kicked {}: {reason}", user.name)).await?;
    Ok(())
}

/// Delete recent messages from the current channel.
#[command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_MESSAGES",
    required_bot_permissions = "MANAGE_MESSAGES"
)]
pub async fn clear(
    ctx: Context<'_>,
    #[description = "How many messages to delete"]
    #[min = 1]
    #[max = 50]
    count: u8,
) -> Result<(), Error> {
    let channel_id = ctx.channel_id();
    let messages = channel_id
        .messages(ctx.http(), GetMessages::new().limit(count))
        .await?;

    for message in &messages {
        message.delete(ctx.http()).await?;
    }

    ctx.say(format!("Deleted {} message(s)", messages.len()))
        .await?;
    Ok(())
}

/// Schedule a reminder in the current channel.
#[command(slash_command, guild_only)]
pub async fn remind(
    ctx: Context<'_>,
    #[description = "Minutes from now"]
    #[min = 1]
    delay_minutes: u32,
    #[description = "What to remind you about"] text: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("remind requires a guild context")?;
    let due_at = Utc::now() + Duration::minutes(i64::from(delay_minutes));

    let reminder = Reminder {
        id: Uuid::new_v4(),
        due_at,
        author_id: ctx.author().id.get(),
        channel_id: ctx.channel_id().get(),
        text: text.clone(),
    };
    ctx.data()
        .guilds
        .update_guild(guild_id.get(), |state| state.reminders.push(reminder))
        .await;

    ctx.say(format!("Okay, I will remind you <t:{}:R>: {text}", due_at.timestamp()))
        .await?;
    Ok(())
}

/// View or change this guild's settings. Call with no options to view.
#[command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD"
)]
pub async fn settings(
    ctx: Context<'_>,
    #[description = "Channel for public moderation feedback"] public_feedback_channel: Option<
        serenity::ChannelId,
    >,
    #[description = "Channel for private moderation logs"] private_feedback_channel: Option<
        serenity::ChannelId,
    >,
    #[description = "Message locale, e.g. en or ru"] locale: Option<String>,
    #[description = "Restore cached roles when a member rejoins"] return_roles_on_rejoin: Option<
        bool,
    >,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("settings requires a guild context")?;
    let guilds = &ctx.data().guilds;

    let nothing_to_change = public_feedback_channel.is_none()
        && private_feedback_channel.is_none()
        && locale.is_none()
        && return_roles_on_rejoin.is_none();
    if nothing_to_change {
        let config = guilds.configuration(guild_id.get()).await;
        let format_channel =
            |id: Option<u64>| id.map_or_else(|| "unset".to_string(), |id| format!("<#{id}>"));
        ctx.say(format!(
            "locale: {}\npublic feedback channel: {}\nprivate feedback channel: {}\nreturn roles on rejoin: {}",
            config.locale,
            format_channel(config.public_feedback_channel_id),
            format_channel(config.private_feedback_channel_id),
            config.return_roles_on_rejoin,
        ))
        .await?;
        return Ok(());
    }

    guilds
        .update_guild(guild_id.get(), |state| {
            if let Some(channel) = public_feedback_channel {
                state.config.public_feedback_channel_id = Some(channel.get());
            }
            if let Some(channel) = private_feedback_channel {
                state.config.private_feedback_channel_id = Some(channel.get());
            }
            if let Some(locale) = locale {
                state.config.locale = locale;
            }
            if let Some(toggle) = return_roles_on_rejoin {
                state.config.return_roles_on_rejoin = toggle;
            }
        })
        .await;

    info!(
        target: COMMAND_TARGET,
        guild_id = guild_id.get(),
        user_id = ctx.author().id.get(),
        "Guild settings updated"
    );
    ctx.say("Settings updated").await?;
    Ok(())
}

/// Every command the bot registers, in registration order.
#[must_use]
pub fn all() -> Vec<poise::Command<crate::Data, Error>> {
    vec![
        ping(),
        about(),
        mute(),
        unmute(),
        ban(),
        unban(),
        kick(),
        clear(),
        remind(),
        settings(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_commands_are_registered() {
        let commands = all();
        let names: Vec<_> = commands.iter().map(|cmd| cmd.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ping", "about", "mute", "unmute", "ban", "unban", "kick", "clear", "remind",
                "settings"
            ]
        );
    }

    #[test]
    fn test_mute_command_definition() {
        let cmd = mute();
        assert_eq!(cmd.name, "mute");
        assert!(cmd.guild_only);
        assert!(
            cmd.required_permissions
                .contains(serenity::Permissions::MODERATE_MEMBERS)
        );
        assert!(cmd.create_as_slash_command().is_some());
    }

    #[test]
    fn test_ban_command_definition() {
        let cmd = ban();
        assert_eq!(cmd.name, "ban");
        assert!(cmd.guild_only);
        assert!(
            cmd.required_permissions
                .contains(serenity::Permissions::BAN_MEMBERS)
        );
        assert!(cmd.create_as_slash_command().is_some());
    }

    #[test]
    fn test_remind_command_definition() {
        let cmd = remind();
        assert_eq!(cmd.name, "remind");
        assert!(cmd.guild_only);
        assert!(cmd.required_permissions.is_empty());
        assert!(cmd.create_as_slash_command().is_some());
    }

    #[test]
    fn test_settings_command_definition() {
        let cmd = settings();
        assert_eq!(cmd.name, "settings");
        assert!(
            cmd.required_permissions
                .contains(serenity::Permissions::MANAGE_GUILD)
        );
        // All parameters are optional so the command can act as a viewer
        assert!(cmd.parameters.iter().all(|param| !param.required));
    }
}
