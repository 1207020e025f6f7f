//! Per-guild state: configuration, member records and scheduled reminders.
//!
//! One [`GuildState`] is the unit of persistence; it exclusively owns its
//! members and reminders, nothing is shared across guilds.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Moderation settings for a single guild.
///
/// Missing fields deserialize to their defaults and unknown fields are
/// ignored, so records written by newer versions stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildConfig {
    /// Locale used for user-facing messages
    pub locale: String,
    /// Channel for public moderation feedback
    pub public_feedback_channel_id: Option<u64>,
    /// Channel for private moderation logs; the sweep posts expiry notices here
    pub private_feedback_channel_id: Option<u64>,
    /// Whether to restore cached roles when a member rejoins
    pub return_roles_on_rejoin: bool,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            locale: "en".to_string(),
            public_feedback_channel_id: None,
            private_feedback_channel_id: None,
            return_roles_on_rejoin: false,
        }
    }
}

/// Moderation state for one member of one guild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberState {
    pub member_id: u64,
    /// Last-known role ids, refreshed from member-update gateway events
    pub roles: Vec<u64>,
    /// When set, a timed communication restriction is outstanding and must be
    /// revoked once the time passes
    pub mute_expires_at: Option<DateTime<Utc>>,
    /// When set, a temporary ban is outstanding and must be lifted once the
    /// time passes
    pub ban_expires_at: Option<DateTime<Utc>>,
}

impl MemberState {
    #[must_use]
    pub fn new(member_id: u64) -> Self {
        Self {
            member_id,
            ..Default::default()
        }
    }
}

/// A one-shot notification scheduled by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Display)]
#[display("reminder {id} for user {author_id} in channel {channel_id} due {due_at}")]
pub struct Reminder {
    pub id: Uuid,
    pub due_at: DateTime<Utc>,
    pub author_id: u64,
    pub channel_id: u64,
    pub text: String,
}

/// All state the bot keeps for one guild. Created on first access, resident
/// for the process lifetime once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildState {
    pub guild_id: u64,
    #[serde(default)]
    pub config: GuildConfig,
    #[serde(default)]
    pub members: HashMap<u64, MemberState>,
    #[serde(default)]
    pub reminders: Vec<Reminder>,
    /// Unsaved in-memory mutations since the last persist
    #[serde(skip)]
    pub dirty: bool,
}

impl GuildState {
    #[must_use]
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            config: GuildConfig::default(),
            members: HashMap::new(),
            reminders: Vec::new(),
            dirty: false,
        }
    }

    /// Get the member record, creating a default one if absent.
    pub fn member_mut(&mut self, member_id: u64) -> &mut MemberState {
        self.members
            .entry(member_id)
            .or_insert_with(|| MemberState::new(member_id))
    }

    /// Members whose mute has expired as of `now`, with the expiry observed.
    #[must_use]
    pub fn due_mutes(&self, now: DateTime<Utc>) -> Vec<(u64, DateTime<Utc>)> {
        self.members
            .iter()
            .filter_map(|(id, member)| {
                member
                    .mute_expires_at
                    .filter(|at| *at <= now)
                    .map(|at| (*id, at))
            })
            .collect()
    }

    /// Members whose temporary ban has expired as of `now`.
    #[must_use]
    pub fn due_bans(&self, now: DateTime<Utc>) -> Vec<(u64, DateTime<Utc>)> {
        self.members
            .iter()
            .filter_map(|(id, member)| {
                member
                    .ban_expires_at
                    .filter(|at| *at <= now)
                    .map(|at| (*id, at))
            })
            .collect()
    }

    /// Reminders due for delivery as of `now`.
    #[must_use]
    pub fn due_reminders(&self, now: DateTime<Utc>) -> Vec<Reminder> {
        self.reminders
            .iter()
            .filter(|reminder| reminder.due_at <= now)
            .cloned()
            .collect()
    }

    /// Clear a mute expiry, but only if it still equals the value observed
    /// during the scan. A mute issued between scan and apply stays intact.
    pub fn clear_mute_if_unchanged(&mut self, member_id: u64, observed: DateTime<Utc>) -> bool {
        let cleared = self
            .members
            .get_mut(&member_id)
            .filter(|member| member.mute_expires_at == Some(observed))
            .map(|member| member.mute_expires_at = None)
            .is_some();
        if cleared {
            self.dirty = true;
        }
        cleared
    }

    /// Clear a ban expiry under the same unchanged-since-scan condition.
    pub fn clear_ban_if_unchanged(&mut self, member_id: u64, observed: DateTime<Utc>) -> bool {
        let cleared = self
            .members
            .get_mut(&member_id)
            .filter(|member| member.ban_expires_at == Some(observed))
            .map(|member| member.ban_expires_at = None)
            .is_some();
        if cleared {
            self.dirty = true;
        }
        cleared
    }

    /// Remove a reminder by id. Fired reminders are removed whether or not
    /// delivery succeeded.
    pub fn remove_reminder(&mut self, reminder_id: Uuid) -> bool {
        let before = self.reminders.len();
        self.reminders.retain(|reminder| reminder.id != reminder_id);
        let removed = self.reminders.len() != before;
        if removed {
            self.dirty = true;
        }
        removed
    }
}
