//! Session store
//!
//! Holds every [`Session`] plus the pointer to the current one. Invariants:
//! the set is never empty and the pointer always names a member. Every
//! mutation recomputes the touched session's stats in the same call and is
//! handed to the write-behind persistence, when one is attached.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::history;
use crate::models::{Session, SessionSummary, TrackEvent};
use crate::storage::{
    KeyValueStore, WriteBehind, CURRENT_SESSION_KEY, SESSIONS_BACKUP_KEY, SESSIONS_KEY,
};
use crate::time::{local_datetime, Clock};
use crate::{Error, Result};

/// Name of the session created on first run
pub const DEFAULT_SESSION_NAME: &str = "My First Session";

pub struct SessionStore {
    sessions: Vec<Session>,
    current: Uuid,
    clock: Arc<dyn Clock>,
    writer: Option<WriteBehind>,
}

impl SessionStore {
    /// Fresh store holding only the default session
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::from_parts(Vec::new(), None, clock)
    }

    /// Build from previously persisted parts
    ///
    /// Each session's log goes through the batch clean and gets fresh stats.
    /// An empty set gets the default session; an unknown pointer falls back
    /// to the first session.
    pub fn from_parts(mut sessions: Vec<Session>, current: Option<Uuid>, clock: Arc<dyn Clock>) -> Self {
        for session in &mut sessions {
            let cleaned = history::clean(session.tracks());
            let removed = session.len() - cleaned.len();
            if removed > 0 {
                warn!(
                    session_id = %session.id,
                    "Removed {} duplicate entries from stored session '{}'",
                    removed,
                    session.name
                );
            }
            session.replace_tracks(cleaned);
        }

        if sessions.is_empty() {
            sessions.push(Session::new(DEFAULT_SESSION_NAME, clock.now_ms()));
        }

        let current = current
            .filter(|id| sessions.iter().any(|s| s.id == *id))
            .unwrap_or(sessions[0].id);

        Self {
            sessions,
            current,
            clock,
            writer: None,
        }
    }

    /// Load the sessions blob and current pointer from `store`
    ///
    /// An unreadable blob is copied to [`SESSIONS_BACKUP_KEY`] and replaced by
    /// a fresh default session rather than failing startup.
    pub async fn load(store: &dyn KeyValueStore, clock: Arc<dyn Clock>) -> Result<Self> {
        let sessions = match store.get(SESSIONS_KEY).await? {
            Some(blob) => match serde_json::from_str::<Vec<Session>>(&blob) {
                Ok(sessions) => sessions,
                Err(e) => {
                    store.set(SESSIONS_BACKUP_KEY, &blob).await?;
                    warn!(
                        "Failed to parse stored sessions, saved a copy under '{}' and starting fresh: {}",
                        SESSIONS_BACKUP_KEY, e
                    );
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        let current = store
            .get(CURRENT_SESSION_KEY)
            .await?
            .and_then(|id| Uuid::parse_str(id.trim()).ok());

        let store = Self::from_parts(sessions, current, clock);
        info!(
            "Loaded {} session(s); current session '{}' with {} track(s)",
            store.sessions.len(),
            store.current().name,
            store.current().len()
        );
        Ok(store)
    }

    /// Attach write-behind persistence and queue the current state
    pub fn with_writer(mut self, writer: WriteBehind) -> Self {
        self.writer = Some(writer);
        self.persist();
        self
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        self.sessions.iter().map(Session::summary).collect()
    }

    pub fn get(&self, id: Uuid) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn current_id(&self) -> Uuid {
        self.current
    }

    pub fn current(&self) -> &Session {
        // The pointer always names a member of a non-empty set
        self.get(self.current).unwrap_or(&self.sessions[0])
    }

    /// Create a session and make it current
    pub fn create_session(&mut self, name: Option<&str>) -> Uuid {
        let now = self.clock.now_ms();
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => format!("Session {}", local_datetime(now).format("%Y-%m-%d")),
        };
        let session = Session::new(name, now);
        let id = session.id;
        info!(session_id = %id, "Created session '{}'", session.name);

        self.sessions.push(session);
        self.current = id;
        self.persist();
        id
    }

    /// Delete a session; the last remaining one cannot be deleted
    ///
    /// Deleting the current session promotes the first remaining one.
    pub fn delete_session(&mut self, id: Uuid) -> Result<()> {
        let index = self.index_of(id)?;
        if self.sessions.len() == 1 {
            return Err(Error::CannotDeleteLastSession);
        }

        let removed = self.sessions.remove(index);
        if self.current == id {
            self.current = self.sessions[0].id;
        }
        info!(session_id = %id, "Deleted session '{}'", removed.name);
        self.persist();
        Ok(())
    }

    pub fn rename_session(&mut self, id: Uuid, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidPayload("session name must not be empty".to_string()));
        }
        let index = self.index_of(id)?;
        self.sessions[index].name = name.to_string();
        self.persist();
        Ok(())
    }

    /// Make `id` current; unknown ids are ignored
    ///
    /// Returns whether the pointer now names `id`.
    pub fn switch_session(&mut self, id: Uuid) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        if self.current != id {
            self.current = id;
            self.persist();
        }
        true
    }

    /// Append an already-admitted event to `session_id`
    ///
    /// Timestamps must strictly increase within a log.
    pub fn append_track(&mut self, session_id: Uuid, event: TrackEvent) -> Result<()> {
        let index = self.index_of(session_id)?;
        let session = &mut self.sessions[index];
        if let Some(last) = session.tracks().last() {
            if event.timestamp <= last.timestamp {
                return Err(Error::InvalidPayload(format!(
                    "timestamp {} does not follow last entry {}",
                    event.timestamp, last.timestamp
                )));
            }
        }
        session.push(event);
        self.persist();
        Ok(())
    }

    /// Full session reset; returns the number of events removed
    pub fn clear_session(&mut self, id: Uuid) -> Result<usize> {
        let index = self.index_of(id)?;
        let removed = self.sessions[index].len();
        self.sessions[index].replace_tracks(Vec::new());
        self.persist();
        Ok(removed)
    }

    /// Batch clean of one session; returns the number of events removed
    pub fn clean_session(&mut self, id: Uuid) -> Result<usize> {
        let index = self.index_of(id)?;
        let session = &mut self.sessions[index];
        let cleaned = history::clean(session.tracks());
        let removed = session.len() - cleaned.len();
        if removed > 0 {
            session.replace_tracks(cleaned);
            self.persist();
        }
        Ok(removed)
    }

    /// Drop the event stamped `timestamp` (rollback of a tentative entry)
    pub fn remove_track(&mut self, id: Uuid, timestamp: i64) -> Result<bool> {
        let index = self.index_of(id)?;
        let session = &mut self.sessions[index];
        let before = session.len();
        let kept: Vec<TrackEvent> = session
            .tracks()
            .iter()
            .filter(|e| e.timestamp != timestamp)
            .cloned()
            .collect();
        let removed = kept.len() != before;
        if removed {
            session.replace_tracks(kept);
            self.persist();
        }
        Ok(removed)
    }

    fn index_of(&self, id: Uuid) -> Result<usize> {
        self.sessions
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| Error::NotFound(format!("session {}", id)))
    }

    fn persist(&self) {
        let Some(writer) = &self.writer else {
            return;
        };
        match serde_json::to_string(&self.sessions) {
            Ok(blob) => {
                writer.set(SESSIONS_KEY, blob);
                writer.set(CURRENT_SESSION_KEY, self.current.to_string());
            }
            Err(e) => warn!("Failed to serialize sessions: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candidate;
    use crate::time::ManualClock;

    fn store() -> SessionStore {
        SessionStore::new(Arc::new(ManualClock::new(1_700_000_000_000)))
    }

    #[test]
    fn test_new_store_has_default_session() {
        let store = store();
        assert_eq!(store.sessions().len(), 1);
        assert_eq!(store.current().name, DEFAULT_SESSION_NAME);
    }

    #[test]
    fn test_create_switches_current() {
        let mut store = store();
        let first = store.current_id();
        let id = store.create_session(Some("  Friday Night Set "));
        assert_eq!(store.current_id(), id);
        assert_eq!(store.current().name, "Friday Night Set");
        assert!(store.switch_session(first));
        assert_eq!(store.current_id(), first);
    }

    #[test]
    fn test_create_without_name_uses_date_label() {
        let mut store = store();
        store.create_session(None);
        assert!(store.current().name.starts_with("Session 2023-11-1"));
    }

    #[test]
    fn test_delete_last_session_refused() {
        let mut store = store();
        let only = store.current_id();
        assert!(matches!(store.delete_session(only), Err(Error::CannotDeleteLastSession)));
        assert_eq!(store.sessions().len(), 1);
        assert_eq!(store.current_id(), only);
    }

    #[test]
    fn test_delete_current_promotes_another() {
        let mut store = store();
        let first = store.current_id();
        let second = store.create_session(Some("Second"));
        store.delete_session(second).unwrap();
        assert_eq!(store.current_id(), first);
        assert!(store.get(second).is_none());
    }

    #[test]
    fn test_switch_unknown_is_noop() {
        let mut store = store();
        let current = store.current_id();
        assert!(!store.switch_session(Uuid::new_v4()));
        assert_eq!(store.current_id(), current);
    }

    #[test]
    fn test_rename_validates() {
        let mut store = store();
        let id = store.current_id();
        store.rename_session(id, "Warmup").unwrap();
        assert_eq!(store.current().name, "Warmup");
        assert!(matches!(store.rename_session(id, "  "), Err(Error::InvalidPayload(_))));
        assert!(matches!(store.rename_session(Uuid::new_v4(), "x"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_append_recomputes_stats_and_rejects_backwards() {
        let mut store = store();
        let id = store.current_id();
        store.append_track(id, Candidate::new(1, "A").with_bpm(Some(120.0)).into_event(1_000)).unwrap();
        store.append_track(id, Candidate::new(2, "B").with_bpm(Some(124.0)).into_event(4_000)).unwrap();
        assert_eq!(store.current().stats().duration, 3_000);
        assert_eq!(store.current().stats().avg_bpm, Some(122.0));

        let backwards = Candidate::new(1, "C").into_event(4_000);
        assert!(store.append_track(id, backwards).is_err());
        assert_eq!(store.current().len(), 2);
    }

    #[test]
    fn test_clear_and_remove_track() {
        let mut store = store();
        let id = store.current_id();
        store.append_track(id, Candidate::new(1, "A").into_event(1)).unwrap();
        store.append_track(id, Candidate::new(1, "B").into_event(2)).unwrap();

        assert!(store.remove_track(id, 2).unwrap());
        assert!(!store.remove_track(id, 2).unwrap());
        assert_eq!(store.current().len(), 1);

        assert_eq!(store.clear_session(id).unwrap(), 1);
        assert!(store.current().is_empty());
        assert_eq!(store.current().stats().duration, 0);
    }

    #[test]
    fn test_from_parts_cleans_and_repairs_pointer() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let mut source = SessionStore::new(clock.clone());
        let id = source.current_id();
        source.append_track(id, Candidate::new(1, "A").into_event(1)).unwrap();
        source.append_track(id, Candidate::new(1, "B").into_event(2)).unwrap();
        source.append_track(id, Candidate::new(1, "A").into_event(60_000)).unwrap();

        let loaded = SessionStore::from_parts(source.sessions().to_vec(), Some(Uuid::new_v4()), clock);
        assert_eq!(loaded.current_id(), id);
        assert_eq!(loaded.current().len(), 2);
    }
}
