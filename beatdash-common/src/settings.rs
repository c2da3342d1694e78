//! Dashboard runtime settings
//!
//! Persisted as one JSON blob under [`SETTINGS_KEY`]. Missing fields take
//! their defaults so older blobs keep loading.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{KeyValueStore, WriteBehind, SETTINGS_KEY};
use crate::Result;

/// Lower bound for the poll cadence
pub const MIN_POLLING_INTERVAL_MS: u64 = 500;

pub const DEFAULT_HISTORY_FIELDS: [&str; 6] = ["Time", "Deck", "Artist", "Title", "BPM", "Genre"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DashboardSettings {
    /// Poll cadence in milliseconds
    pub polling_interval: u64,
    pub theme: String,
    pub analytics_enabled: bool,
    /// Columns shown in the history table
    pub track_history_fields: Vec<String>,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            polling_interval: MIN_POLLING_INTERVAL_MS,
            theme: "dark".to_string(),
            analytics_enabled: true,
            track_history_fields: DEFAULT_HISTORY_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl DashboardSettings {
    /// Clamp out-of-range values in place
    pub fn normalize(mut self) -> Self {
        if self.polling_interval < MIN_POLLING_INTERVAL_MS {
            self.polling_interval = MIN_POLLING_INTERVAL_MS;
        }
        if self.theme.trim().is_empty() {
            self.theme = Self::default().theme;
        }
        self
    }

    pub fn polling_interval(&self) -> std::time::Duration {
        crate::time::millis_to_duration(self.polling_interval.max(MIN_POLLING_INTERVAL_MS))
    }

    /// Load stored settings; an unreadable blob yields the defaults
    pub async fn load(store: &dyn KeyValueStore) -> Result<Self> {
        let Some(blob) = store.get(SETTINGS_KEY).await? else {
            return Ok(Self::default());
        };
        match serde_json::from_str::<Self>(&blob) {
            Ok(settings) => Ok(settings.normalize()),
            Err(e) => {
                warn!("Failed to parse stored settings, using defaults: {}", e);
                Ok(Self::default())
            }
        }
    }

    /// Queue the settings blob for persistence
    pub fn save(&self, writer: &WriteBehind) -> Result<()> {
        writer.set(SETTINGS_KEY, serde_json::to_string(self)?);
        Ok(())
    }
}
