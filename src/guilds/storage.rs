//! Durable storage for guild state.
//!
//! Each guild is one YAML file under the data directory, so a failing save
//! for one guild can never corrupt another's record. Saves go through a
//! temporary file and a rename, so a concurrent load never observes a
//! partially-written record.

use crate::guilds::error::GuildDataResult;
use crate::guilds::state::GuildState;
use std::path::{Path, PathBuf};
use tracing::{error, warn};

/// File-backed store with one record per guild.
#[derive(Debug, Clone)]
pub struct GuildStorage {
    dir: PathBuf,
}

impl GuildStorage {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, guild_id: u64) -> PathBuf {
        self.dir.join(format!("{guild_id}.yaml"))
    }

    /// Load the stored state for a guild.
    ///
    /// Returns `None` when no record exists; callers substitute a default
    /// state. An unreadable or corrupt record is also `None`: the bad file is
    /// renamed aside for inspection instead of being silently overwritten by
    /// the next save.
    pub async fn load(&self, guild_id: u64) -> Option<GuildState> {
        let path = self.record_path(guild_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!("Failed to read guild record {}: {err}", path.display());
                return None;
            }
        };

        match serde_yaml::from_str::<GuildState>(&raw) {
            Ok(mut state) => {
                // The file name is authoritative for the key
                state.guild_id = guild_id;
                state.dirty = false;
                Some(state)
            }
            Err(err) => {
                warn!(
                    "Corrupt guild record {}: {err}; starting from defaults",
                    path.display()
                );
                self.quarantine(&path).await;
                None
            }
        }
    }

    /// Atomically replace the stored record for a guild.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be created, the state
    /// cannot be serialized, or the temporary file cannot be written or
    /// renamed into place.
    pub async fn save(&self, state: &GuildState) -> GuildDataResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let yaml = serde_yaml::to_string(state)?;
        let path = self.record_path(state.guild_id);
        let staging = path.with_extension("yaml.tmp");

        tokio::fs::write(&staging, yaml).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    /// Ids of every guild with a stored record.
    #[must_use]
    pub fn stored_guilds(&self) -> Vec<u64> {
        let pattern = self.dir.join("*.yaml");
        let Some(pattern) = pattern.to_str() else {
            return Vec::new();
        };
        let Ok(paths) = glob::glob(pattern) else {
            return Vec::new();
        };
        paths
            .filter_map(Result::ok)
            .filter_map(|path| path.file_stem()?.to_str()?.parse::<u64>().ok())
            .collect()
    }

    /// Move a corrupt record aside, preserving it for manual inspection.
    async fn quarantine(&self, path: &Path) {
        let aside = path.with_extension("yaml.corrupt");
        match tokio::fs::rename(path, &aside).await {
            Ok(()) => warn!("Preserved corrupt guild record at {}", aside.display()),
            Err(err) => error!(
                "Failed to move corrupt guild record {} aside: {err}",
                path.display()
            ),
        }
    }
}
