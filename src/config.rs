//! Configuration types for the scheduling engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Database filename within the config directory.
const DB_FILENAME: &str = "chime.db";

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Durable store location. `None` → the platform default under the
    /// user config directory.
    pub db_path: Option<PathBuf>,
    /// When `false`, the engine runs memory-only: tasks execute within
    /// this process lifetime but do not survive a restart.
    pub persistence_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            persistence_enabled: true,
        }
    }
}

impl SchedulerConfig {
    /// Effective database path, resolving the platform default.
    pub fn resolved_db_path(&self) -> Option<PathBuf> {
        self.db_path.clone().or_else(default_db_path)
    }
}

/// Default path for the scheduler database
/// (`~/.config/chime/chime.db` on Linux).
pub fn default_db_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("chime").join(DB_FILENAME))
}
