//! The periodic sweep over resident guild state.
//!
//! One long-lived task polls every resident guild for due work: expired
//! mutes and bans to revoke, reminders to deliver. Polling keeps resource
//! usage flat no matter how many timers exist and folds naturally into the
//! persistence cycle; the cost is a firing latency bounded by the tick
//! interval.

use crate::SWEEP_TARGET;
use crate::guilds::GuildStore;
use crate::sweep::SweepRequest;
use crate::sweep::gateway::{MessagingGateway, ModerationGateway};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// How often the sweep scans resident guilds
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 30;

/// Upper bound on any single remote call made by the sweep
pub const GATEWAY_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Audit-log reason for automatic revocations, distinct from the
/// `(<moderator>) <reason>` headers attached to manual actions
pub const EXPIRY_REASON: &str = "Punishment expired";

/// Scans guild state for due actions and applies their side effects.
#[derive(Clone)]
pub struct SweepService {
    guilds: Arc<GuildStore>,
    moderation: Arc<dyn ModerationGateway>,
    messaging: Arc<dyn MessagingGateway>,
}

impl SweepService {
    #[must_use]
    pub fn new(
        guilds: Arc<GuildStore>,
        moderation: Arc<dyn ModerationGateway>,
        messaging: Arc<dyn MessagingGateway>,
    ) -> Self {
        Self {
            guilds,
            moderation,
            messaging,
        }
    }

    /// Spawn the sweep loop. It ticks at the given interval (the first tick
    /// fires immediately, which catches work that came due while the process
    /// was down) and also serves on-demand [`SweepRequest`]s until a
    /// `Shutdown` arrives or the channel closes.
    pub fn spawn(self, rx: Receiver<SweepRequest>, interval_seconds: u64) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(rx, interval_seconds).await;
        })
    }

    async fn run(self, mut rx: Receiver<SweepRequest>, interval_seconds: u64) {
        info!(target: SWEEP_TARGET, interval_seconds, "Sweep task started");

        let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(SweepRequest::SweepAll) => {
                        info!(target: SWEEP_TARGET, "Sweeping all guilds on request");
                        self.sweep_all().await;
                    }
                    Some(SweepRequest::SweepGuild { guild_id }) => {
                        self.sweep_guild(guild_id).await;
                    }
                    Some(SweepRequest::Shutdown) | None => {
                        // The in-flight sweep (if any) already finished: this
                        // loop handles one event at a time. Flush before exit.
                        self.persist_all().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.sweep_all().await,
            }
        }

        info!(target: SWEEP_TARGET, "Sweep task stopped");
    }

    /// Sweep every resident guild. A failure in one guild never blocks the
    /// rest of the pass.
    pub async fn sweep_all(&self) {
        for guild_id in self.guilds.resident() {
            self.sweep_guild(guild_id).await;
        }
    }

    /// One tick's work for one guild: scan for due entries, act on them,
    /// apply the clears, persist.
    ///
    /// The guild lock is held for the scan and for each apply, but released
    /// around every remote call, so a stalled collaborator delays only this
    /// guild's current pass and command handlers stay responsive.
    pub async fn sweep_guild(&self, guild_id: u64) {
        let handle = self.guilds.get_or_create(guild_id).await;
        let now = Utc::now();

        let (due_mutes, due_bans, due_reminders, notice_channel) = {
            let state = handle.lock().await;
            (
                state.due_mutes(now),
                state.due_bans(now),
                state.due_reminders(now),
                state.config.private_feedback_channel_id,
            )
        };

        for (member_id, observed) in due_mutes {
            let lifted = match tokio::time::timeout(
                GATEWAY_CALL_TIMEOUT,
                self.moderation.lift_mute(guild_id, member_id, EXPIRY_REASON),
            )
            .await
            {
                Ok(Ok(())) => {
                    info!(target: SWEEP_TARGET, guild_id, member_id, "Expired mute revoked");
                    true
                }
                Ok(Err(err)) => {
                    warn!(target: SWEEP_TARGET, guild_id, member_id, %err, "Failed to revoke expired mute");
                    false
                }
                Err(_) => {
                    warn!(target: SWEEP_TARGET, guild_id, member_id, "Revoking expired mute timed out");
                    false
                }
            };

            // Cleared even when the call failed: the platform expires the
            // restriction on its own schedule, and a retry would duplicate a
            // revoke that already implicitly happened.
            {
                let mut state = handle.lock().await;
                state.clear_mute_if_unchanged(member_id, observed);
            }

            if lifted && let Some(channel_id) = notice_channel {
                self.post_notice(channel_id, member_id, "mute expired").await;
            }
        }

        for (member_id, observed) in due_bans {
            let lifted = match tokio::time::timeout(
                GATEWAY_CALL_TIMEOUT,
                self.moderation.lift_ban(guild_id, member_id, EXPIRY_REASON),
            )
            .await
            {
                Ok(Ok(())) => {
                    info!(target: SWEEP_TARGET, guild_id, member_id, "Expired ban lifted");
                    true
                }
                Ok(Err(err)) => {
                    warn!(target: SWEEP_TARGET, guild_id, member_id, %err, "Failed to lift expired ban");
                    false
                }
                Err(_) => {
                    warn!(target: SWEEP_TARGET, guild_id, member_id, "Lifting expired ban timed out");
                    false
                }
            };

            {
                let mut state = handle.lock().await;
                state.clear_ban_if_unchanged(member_id, observed);
            }

            if lifted && let Some(channel_id) = notice_channel {
                self.post_notice(channel_id, member_id, "ban expired").await;
            }
        }

        for reminder in due_reminders {
            match tokio::time::timeout(
                GATEWAY_CALL_TIMEOUT,
                self.messaging
                    .deliver(reminder.channel_id, reminder.author_id, &reminder.text),
            )
            .await
            {
                Ok(Ok(())) => info!(target: SWEEP_TARGET, guild_id, %reminder, "Reminder delivered"),
                Ok(Err(err)) => {
                    warn!(target: SWEEP_TARGET, guild_id, %reminder, %err, "Failed to deliver reminder");
                }
                Err(_) => {
                    warn!(target: SWEEP_TARGET, guild_id, %reminder, "Reminder delivery timed out");
                }
            }

            // At-most-once: the reminder is removed whether or not delivery
            // succeeded, so an unreachable channel cannot grow a retry queue.
            let mut state = handle.lock().await;
            state.remove_reminder(reminder.id);
        }

        if let Err(err) = self.guilds.persist(guild_id).await {
            error!(target: SWEEP_TARGET, guild_id, %err, "Failed to persist guild state; will retry next sweep");
        }
    }

    async fn post_notice(&self, channel_id: u64, member_id: u64, text: &str) {
        match tokio::time::timeout(
            GATEWAY_CALL_TIMEOUT,
            self.messaging.deliver(channel_id, member_id, text),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(target: SWEEP_TARGET, channel_id, %err, "Failed to post expiry notice");
            }
            Err(_) => warn!(target: SWEEP_TARGET, channel_id, "Expiry notice timed out"),
        }
    }

    async fn persist_all(&self) {
        for guild_id in self.guilds.resident() {
            if let Err(err) = self.guilds.persist(guild_id).await {
                error!(target: SWEEP_TARGET, guild_id, %err, "Failed to persist guild state on shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guilds::{GuildStorage, Reminder};
    use crate::sweep::gateway::{GatewayError, MockMessagingGateway, MockModerationGateway};
    use chrono::Duration as ChronoDuration;
    use poise::serenity_prelude as serenity;
    use std::path::PathBuf;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn test_dir() -> PathBuf {
        std::env::temp_dir().join(format!("guild-warden-test-{}", Uuid::new_v4()))
    }

    fn store_at(dir: PathBuf) -> Arc<GuildStore> {
        Arc::new(GuildStore::new(GuildStorage::new(dir)))
    }

    fn service_with(
        store: &Arc<GuildStore>,
        moderation: MockModerationGateway,
        messaging: MockMessagingGateway,
    ) -> SweepService {
        SweepService::new(Arc::clone(store), Arc::new(moderation), Arc::new(messaging))
    }

    fn discord_error() -> GatewayError {
        GatewayError::from(serenity::Error::Other("rejected"))
    }

    #[tokio::test]
    async fn test_expired_mute_is_revoked_and_cleared() {
        let dir = test_dir();
        let store = store_at(dir.clone());
        let observed = Utc::now() - ChronoDuration::seconds(1);
        store
            .update_member(1, 10, |member| member.mute_expires_at = Some(observed))
            .await;

        let mut moderation = MockModerationGateway::new();
        moderation
            .expect_lift_mute()
            .withf(|guild_id, member_id, reason| {
                *guild_id == 1 && *member_id == 10 && reason == EXPIRY_REASON
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service_with(&store, moderation, MockMessagingGateway::new());
        service.sweep_guild(1).await;

        assert!(store.member(1, 10).await.mute_expires_at.is_none());
        let handle = store.get_or_create(1).await;
        assert!(!handle.lock().await.dirty);
        assert!(dir.join("1.yaml").exists());
    }

    #[tokio::test]
    async fn test_revoke_failure_still_clears_mute() {
        let store = store_at(test_dir());
        store
            .update_member(1, 10, |member| {
                member.mute_expires_at = Some(Utc::now() - ChronoDuration::minutes(2));
            })
            .await;

        let mut moderation = MockModerationGateway::new();
        moderation
            .expect_lift_mute()
            .times(1)
            .returning(|_, _, _| Err(discord_error()));

        let service = service_with(&store, moderation, MockMessagingGateway::new());
        service.sweep_guild(1).await;

        assert!(store.member(1, 10).await.mute_expires_at.is_none());
    }

    #[tokio::test]
    async fn test_expired_ban_is_lifted_and_cleared() {
        let store = store_at(test_dir());
        store
            .update_member(2, 20, |member| {
                member.ban_expires_at = Some(Utc::now() - ChronoDuration::seconds(30));
            })
            .await;

        let mut moderation = MockModerationGateway::new();
        moderation
            .expect_lift_ban()
            .withf(|guild_id, member_id, reason| {
                *guild_id == 2 && *member_id == 20 && reason == EXPIRY_REASON
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service_with(&store, moderation, MockMessagingGateway::new());
        service.sweep_guild(2).await;

        assert!(store.member(2, 20).await.ban_expires_at.is_none());
    }

    #[tokio::test]
    async fn test_future_expiries_are_untouched() {
        let store = store_at(test_dir());
        let later = Utc::now() + ChronoDuration::minutes(5);
        store
            .update_member(1, 10, |member| member.mute_expires_at = Some(later))
            .await;
        store.persist(1).await.unwrap();

        // Fresh mocks: any gateway call would panic the test
        let service = service_with(
            &store,
            MockModerationGateway::new(),
            MockMessagingGateway::new(),
        );
        service.sweep_guild(1).await;

        assert_eq!(store.member(1, 10).await.mute_expires_at, Some(later));
    }

    #[tokio::test]
    async fn test_quiet_sweep_leaves_state_identical() {
        let store = store_at(test_dir());
        store
            .update_guild(1, |state| {
                state.member_mut(10).mute_expires_at =
                    Some(Utc::now() + ChronoDuration::minutes(10));
                state.reminders.push(Reminder {
                    id: Uuid::new_v4(),
                    due_at: Utc::now() + ChronoDuration::hours(2),
                    author_id: 10,
                    channel_id: 55,
                    text: "later".to_string(),
                });
            })
            .await;
        store.persist(1).await.unwrap();

        let handle = store.get_or_create(1).await;
        let before = serde_yaml::to_string(&*handle.lock().await).unwrap();

        let service = service_with(
            &store,
            MockModerationGateway::new(),
            MockMessagingGateway::new(),
        );
        service.sweep_guild(1).await;

        let state = handle.lock().await;
        let after = serde_yaml::to_string(&*state).unwrap();
        assert_eq!(before, after);
        assert!(!state.dirty, "a quiet sweep must not dirty the guild");
    }

    #[tokio::test]
    async fn test_due_reminder_is_delivered_once_and_removed() {
        let store = store_at(test_dir());
        let reminder = Reminder {
            id: Uuid::new_v4(),
            due_at: Utc::now() - ChronoDuration::seconds(5),
            author_id: 10,
            channel_id: 77,
            text: "drink water".to_string(),
        };
        store
            .update_guild(1, |state| state.reminders.push(reminder.clone()))
            .await;

        let mut messaging = MockMessagingGateway::new();
        messaging
            .expect_deliver()
            .withf(|channel_id, author_id, text| {
                *channel_id == 77 && *author_id == 10 && text == "drink water"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service_with(&store, MockModerationGateway::new(), messaging);
        service.sweep_guild(1).await;

        let handle = store.get_or_create(1).await;
        assert!(handle.lock().await.reminders.is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_still_removes_reminder() {
        let store = store_at(test_dir());
        store
            .update_guild(1, |state| {
                state.reminders.push(Reminder {
                    id: Uuid::new_v4(),
                    due_at: Utc::now() - ChronoDuration::seconds(5),
                    author_id: 10,
                    channel_id: 77,
                    text: "unreachable".to_string(),
                });
            })
            .await;

        let mut messaging = MockMessagingGateway::new();
        messaging
            .expect_deliver()
            .times(1)
            .returning(|_, _, _| Err(discord_error()));

        let service = service_with(&store, MockModerationGateway::new(), messaging);
        service.sweep_guild(1).await;

        let handle = store.get_or_create(1).await;
        assert!(
            handle.lock().await.reminders.is_empty(),
            "delivery failure must not leave the reminder queued"
        );
    }

    #[tokio::test]
    async fn test_mute_set_during_sweep_is_not_lost() {
        let store = store_at(test_dir());
        let observed = Utc::now() - ChronoDuration::seconds(5);
        store
            .update_member(1, 10, |member| member.mute_expires_at = Some(observed))
            .await;

        let handle = store.get_or_create(1).await;
        let newer = Utc::now() + ChronoDuration::seconds(10);

        let mut moderation = MockModerationGateway::new();
        let during_call = Arc::clone(&handle);
        moderation
            .expect_lift_mute()
            .times(1)
            .returning(move |_, member_id, _| {
                // A command handler re-mutes the member while the sweep is on
                // the wire; the guild lock is free because the sweep releases
                // it around remote calls.
                let mut state = during_call
                    .try_lock()
                    .expect("guild lock must be free during the remote call");
                state.member_mut(member_id).mute_expires_at = Some(newer);
                state.dirty = true;
                Ok(())
            });

        let service = service_with(&store, moderation, MockMessagingGateway::new());
        service.sweep_guild(1).await;

        assert_eq!(
            store.member(1, 10).await.mute_expires_at,
            Some(newer),
            "the sweep must not clear a mute issued after its scan"
        );
    }

    #[tokio::test]
    async fn test_expiry_notice_is_routed_to_feedback_channel() {
        let store = store_at(test_dir());
        store
            .update_guild(1, |state| {
                state.config.private_feedback_channel_id = Some(900);
                state.member_mut(10).mute_expires_at = Some(Utc::now() - ChronoDuration::seconds(1));
            })
            .await;

        let mut moderation = MockModerationGateway::new();
        moderation
            .expect_lift_mute()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut messaging = MockMessagingGateway::new();
        messaging
            .expect_deliver()
            .withf(|channel_id, author_id, _| *channel_id == 900 && *author_id == 10)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service_with(&store, moderation, messaging);
        service.sweep_guild(1).await;
    }

    #[tokio::test]
    async fn test_shutdown_persists_dirty_state() {
        let dir = test_dir();
        let store = store_at(dir.clone());
        store
            .update_member(1, 10, |member| member.roles = vec![5, 6])
            .await;

        let service = service_with(
            &store,
            MockModerationGateway::new(),
            MockMessagingGateway::new(),
        );
        let (tx, rx) = mpsc::channel(4);
        let task = service.spawn(rx, 3600);

        tx.send(SweepRequest::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("sweep task did not stop")
            .expect("sweep task panicked");

        assert!(dir.join("1.yaml").exists(), "dirty state must be flushed before exit");
    }

    #[tokio::test]
    async fn test_sweep_all_request_is_served() {
        let store = store_at(test_dir());
        store
            .update_member(1, 10, |member| {
                member.mute_expires_at = Some(Utc::now() - ChronoDuration::seconds(1));
            })
            .await;

        let mut moderation = MockModerationGateway::new();
        // Exactly one revoke no matter whether the startup tick or the
        // explicit request sweeps first: the expiry is cleared by whichever
        // pass wins.
        moderation
            .expect_lift_mute()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let service = service_with(&store, moderation, MockMessagingGateway::new());
        let (tx, rx) = mpsc::channel(4);
        let task = service.spawn(rx, 3600);

        tx.send(SweepRequest::SweepAll).await.unwrap();
        tx.send(SweepRequest::Shutdown).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("sweep task did not stop")
            .expect("sweep task panicked");

        assert!(store.member(1, 10).await.mute_expires_at.is_none());
    }
}
