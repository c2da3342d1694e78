//! Durable key-value persistence
//!
//! The session store and settings persist as JSON blobs under fixed keys
//! through a [`KeyValueStore`]. Writes go through [`WriteBehind`], which
//! coalesces them and handles pruning/retry on failure.

use async_trait::async_trait;

use crate::Result;

mod memory;
mod sqlite;
mod write_behind;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use write_behind::{FlushReport, WriteBehind};

/// Sessions blob (array of Session records)
pub const SESSIONS_KEY: &str = "dj-sessions";
/// Copy of a sessions blob that failed to parse, kept for manual recovery
pub const SESSIONS_BACKUP_KEY: &str = "dj-sessions.corrupt";
/// Pointer to the current session id
pub const CURRENT_SESSION_KEY: &str = "current-session-id";
/// Dashboard settings blob
pub const SETTINGS_KEY: &str = "dj-dashboard-settings";

/// Durable key-value storage with get/set/remove
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Keys that pruning must never remove
pub fn is_protected_key(key: &str) -> bool {
    key.contains("settings") || key.contains("session") || key.contains("user")
}

/// Remove every low-priority key to make room
///
/// Best effort: individual removal failures are skipped. Returns the number
/// of keys removed.
pub async fn prune_low_priority(store: &dyn KeyValueStore) -> usize {
    let keys = match store.keys().await {
        Ok(keys) => keys,
        Err(e) => {
            tracing::warn!("Failed to list keys for pruning: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for key in keys.iter().filter(|k| !is_protected_key(k)) {
        if store.remove(key).await.is_ok() {
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!("Pruned {} low-priority storage keys", removed);
    }
    removed
}
