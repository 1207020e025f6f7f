//! Serenity gateway event handlers.
//!
//! Besides connection logging, these keep the guild cache in step with the
//! platform: new guilds become resident, role changes refresh the member
//! role cache, and rejoining members get their cached roles back when the
//! guild has opted in.

use crate::{Data, EVENT_TARGET};
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, Guild, GuildId, GuildMemberUpdateEvent, Member, Ready,
};
use serenity::model::id::RoleId;
use tracing::{info, warn};

pub struct Handler;

async fn bot_data(ctx: &Context) -> Option<Data> {
    let data = ctx.data.read().await.get::<Data>().cloned();
    if data.is_none() {
        warn!(target: EVENT_TARGET, "Bot data not yet available for event");
    }
    data
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!("Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!("Cache ready! The bot is in {guild_count} guild(s)");
    }

    /// Make the guild resident so the sweep covers it from the start.
    async fn guild_create(&self, ctx: Context, guild: Guild, _is_new: Option<bool>) {
        let Some(data) = bot_data(&ctx).await else {
            return;
        };
        data.guilds.get_or_create(guild.id.get()).await;
    }

    /// Keep the member role cache in step with role changes.
    async fn guild_member_update(
        &self,
        ctx: Context,
        _old_if_available: Option<Member>,
        _new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        let Some(data) = bot_data(&ctx).await else {
            return;
        };
        let roles: Vec<u64> = event.roles.iter().map(|role| role.get()).collect();
        data.guilds
            .update_member(event.guild_id.get(), event.user.id.get(), |member| {
                member.roles = roles;
            })
            .await;
    }

    /// Restore cached roles for a rejoining member when the guild opted in.
    async fn guild_member_addition(&self, ctx: Context, new_member: Member) {
        let Some(data) = bot_data(&ctx).await else {
            return;
        };
        let guild_id = new_member.guild_id.get();
        let member_id = new_member.user.id.get();

        let config = data.guilds.configuration(guild_id).await;
        if !config.return_roles_on_rejoin {
            return;
        }

        let cached = data.guilds.member(guild_id, member_id).await;
        if cached.roles.is_empty() {
            return;
        }
        let mut restored = 0usize;
        for role in cached.roles.iter().map(|role| RoleId::new(*role)) {
            match ctx
                .http
                .add_member_role(
                    new_member.guild_id,
                    new_member.user.id,
                    role,
                    Some("Returning roles on rejoin"),
                )
                .await
            {
                Ok(()) => restored += 1,
                Err(err) => warn!(
                    target: EVENT_TARGET,
                    guild_id,
                    member_id,
                    role_id = role.get(),
                    %err,
                    "Failed to restore role for rejoining member"
                ),
            }
        }
        if restored > 0 {
            info!(
                target: EVENT_TARGET,
                guild_id,
                member_id,
                restored,
                "Restored roles for rejoining member"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Since we can't easily mock Context and the gateway event payloads, we
    // verify at compile time that Handler implements EventHandler.
    #[test]
    fn test_handler_implements_event_handler() {
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }
}
