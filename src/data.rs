//! Centralized runtime data for the bot.
//!
//! `Data` is the poise user-data type and is also stored in serenity's type
//! map so gateway event handlers can reach the guild cache. It is a cheap
//! clone: everything lives behind one `Arc`.

use crate::guilds::{GuildStorage, GuildStore};
use crate::sweep::{
    DEFAULT_SWEEP_INTERVAL_SECONDS, DiscordMessenger, DiscordModeration, SweepRequest,
    SweepService,
};
use derive_more::Deref;
use poise::serenity_prelude as serenity;
use serenity::Http;
use serenity::prelude::TypeMapKey;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc::{self, Sender};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Where per-guild records are kept on disk
const GUILD_DATA_DIR: &str = "data/guilds";

/// Centralized data structure for the bot
#[derive(Clone, Deref)]
pub struct Data(pub Arc<DataInner>);

// Allow storing Data in serenity's type map for event handlers
impl TypeMapKey for Data {
    type Value = Data;
}

pub struct DataInner {
    /// The guild state cache, single runtime source of truth
    pub guilds: Arc<GuildStore>,
    sweep_tx: OnceLock<Sender<SweepRequest>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Data {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("guilds", &self.guilds)
            .field("sweep_running", &self.sweep_tx.get().is_some())
            .finish()
    }
}

impl Data {
    /// Create a new Data instance over the default data directory
    #[must_use]
    pub fn new() -> Self {
        Self::with_storage(GuildStorage::new(GUILD_DATA_DIR))
    }

    #[must_use]
    pub fn with_storage(storage: GuildStorage) -> Self {
        Self(Arc::new(DataInner {
            guilds: Arc::new(GuildStore::new(storage)),
            sweep_tx: OnceLock::new(),
            sweep_task: Mutex::new(None),
        }))
    }

    /// Create a Data instance and make every stored guild resident, so the
    /// sweep sees outstanding timers from before a restart.
    pub async fn load() -> Self {
        let data = Self::new();
        let count = data.guilds.preload().await;
        info!("Loaded {count} stored guild(s)");
        data
    }

    /// Start the background sweep task against the Discord API.
    pub fn start_sweep(&self, http: Arc<Http>) {
        let moderation = Arc::new(DiscordModeration::new(Arc::clone(&http)));
        let messenger = Arc::new(DiscordMessenger::new(http));
        let service = SweepService::new(Arc::clone(&self.guilds), moderation, messenger);

        let (tx, rx) = mpsc::channel(32);
        let task = service.spawn(rx, DEFAULT_SWEEP_INTERVAL_SECONDS);

        if self.sweep_tx.set(tx).is_err() {
            warn!("Sweep task was already started; ignoring duplicate start");
            task.abort();
            return;
        }
        *self.sweep_task.lock().expect("sweep task lock poisoned") = Some(task);
    }

    /// Get the sweep control channel, if the sweep has been started.
    #[must_use]
    pub fn sweep_sender(&self) -> Option<Sender<SweepRequest>> {
        self.sweep_tx.get().cloned()
    }

    /// Ask the sweep to finish its in-flight work, persist, and stop.
    pub async fn request_sweep_shutdown(&self) {
        if let Some(tx) = self.sweep_tx.get() {
            let _ = tx.send(SweepRequest::Shutdown).await;
        }
    }

    /// Stop the sweep and wait for its final persist pass to complete.
    /// Safe to call when the sweep never started or already stopped.
    pub async fn shutdown_sweep(&self) {
        self.request_sweep_shutdown().await;
        let task = self
            .sweep_task
            .lock()
            .expect("sweep task lock poisoned")
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
