//! History data model
//!
//! [`TrackEvent`] is one recorded "track loaded on a deck" occurrence,
//! [`Session`] a named container of them with cached aggregates, and the
//! snapshot types mirror the metadata API's `/params.json` document.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

use crate::{Error, Result};

/// Sentinel for absent text metadata
pub const UNKNOWN: &str = "Unknown";

fn unknown() -> String {
    UNKNOWN.to_string()
}

/// One observed "track loaded on a deck" occurrence
///
/// Field order is the serialized order used by every export format.
/// Absent optional values serialize as `null` so all events share one key set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackEvent {
    /// Epoch milliseconds, strictly increasing within a session log
    pub timestamp: i64,
    #[serde(alias = "player")]
    pub deck: u32,
    #[serde(deserialize_with = "lenient::required_text")]
    pub track_id: String,
    #[serde(default = "unknown", deserialize_with = "lenient::text_or_unknown")]
    pub artist: String,
    #[serde(default = "unknown", deserialize_with = "lenient::text_or_unknown")]
    pub title: String,
    #[serde(default = "unknown", deserialize_with = "lenient::text_or_unknown")]
    pub genre: String,
    #[serde(default = "unknown", deserialize_with = "lenient::text_or_unknown")]
    pub key: String,
    #[serde(default, deserialize_with = "lenient::number")]
    pub bpm: Option<f64>,
    /// Track length in seconds
    #[serde(default, deserialize_with = "lenient::number")]
    pub duration: Option<f64>,
}

impl TrackEvent {
    /// Key used by both dedup policies
    pub fn play_key(&self) -> (u32, &str) {
        (self.deck, self.track_id.as_str())
    }
}

/// A proposed history entry, not yet admitted
///
/// Deserializes from TrackEvent-shaped JSON; `timestamp` is optional and
/// filled from the reconciler's clock when absent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(alias = "player")]
    pub deck: u32,
    #[serde(deserialize_with = "lenient::required_text")]
    pub track_id: String,
    #[serde(default = "unknown", deserialize_with = "lenient::text_or_unknown")]
    pub artist: String,
    #[serde(default = "unknown", deserialize_with = "lenient::text_or_unknown")]
    pub title: String,
    #[serde(default = "unknown", deserialize_with = "lenient::text_or_unknown")]
    pub genre: String,
    #[serde(default = "unknown", deserialize_with = "lenient::text_or_unknown")]
    pub key: String,
    #[serde(default, deserialize_with = "lenient::number")]
    pub bpm: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub duration: Option<f64>,
}

impl Candidate {
    /// Bare candidate with unknown metadata
    pub fn new(deck: u32, track_id: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            deck,
            track_id: track_id.into(),
            artist: unknown(),
            title: unknown(),
            genre: unknown(),
            key: unknown(),
            bpm: None,
            duration: None,
        }
    }

    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = genre.into();
        self
    }

    pub fn with_bpm(mut self, bpm: Option<f64>) -> Self {
        self.bpm = bpm;
        self
    }

    /// Reject candidates that could never be admitted
    pub fn validate(&self) -> Result<()> {
        if self.deck == 0 {
            return Err(Error::InvalidPayload("deck must be a positive integer".to_string()));
        }
        if self.track_id.trim().is_empty() {
            return Err(Error::InvalidPayload("trackId is required".to_string()));
        }
        if matches!(self.bpm, Some(bpm) if !bpm.is_finite() || bpm < 0.0) {
            return Err(Error::InvalidPayload("bpm must be a non-negative number".to_string()));
        }
        Ok(())
    }

    pub fn into_event(self, timestamp: i64) -> TrackEvent {
        TrackEvent {
            timestamp,
            deck: self.deck,
            track_id: self.track_id,
            artist: self.artist,
            title: self.title,
            genre: self.genre,
            key: self.key,
            bpm: self.bpm,
            duration: self.duration,
        }
    }
}

impl From<TrackEvent> for Candidate {
    fn from(event: TrackEvent) -> Self {
        Self {
            timestamp: Some(event.timestamp),
            deck: event.deck,
            track_id: event.track_id,
            artist: event.artist,
            title: event.title,
            genre: event.genre,
            key: event.key,
            bpm: event.bpm,
            duration: event.duration,
        }
    }
}

/// Aggregates derived from a session's tracks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionStats {
    /// Last timestamp minus first timestamp (ms); zero below two tracks
    pub duration: i64,
    /// Mean of present, positive BPM values
    pub avg_bpm: Option<f64>,
    /// Distinct non-empty artist names
    pub unique_artists: usize,
    /// Distinct genres, most frequent first, ties in first-seen order
    pub genres: Vec<String>,
}

impl SessionStats {
    pub fn compute(tracks: &[TrackEvent]) -> Self {
        let duration = match (tracks.first(), tracks.last()) {
            (Some(first), Some(last)) if tracks.len() >= 2 => {
                last.timestamp.saturating_sub(first.timestamp)
            }
            _ => 0,
        };

        let bpms: Vec<f64> = tracks
            .iter()
            .filter_map(|t| t.bpm)
            .filter(|bpm| bpm.is_finite() && *bpm > 0.0)
            .collect();
        let avg_bpm = if bpms.is_empty() {
            None
        } else {
            Some(bpms.iter().sum::<f64>() / bpms.len() as f64)
        };

        let unique_artists = tracks
            .iter()
            .map(|t| t.artist.trim())
            .filter(|a| !a.is_empty())
            .collect::<HashSet<_>>()
            .len();

        let mut order: Vec<&str> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for genre in tracks.iter().map(|t| t.genre.trim()) {
            if genre.is_empty() || genre == UNKNOWN {
                continue;
            }
            let count = counts.entry(genre).or_insert(0);
            if *count == 0 {
                order.push(genre);
            }
            *count += 1;
        }
        // sort_by is stable: equal counts keep first-seen order
        order.sort_by(|a, b| counts[b].cmp(&counts[a]));
        let genres = order.into_iter().map(str::to_string).collect();

        Self {
            duration,
            avg_bpm,
            unique_artists,
            genres,
        }
    }
}

/// A named, timestamped container of TrackEvents
///
/// `tracks` is private: every change goes through methods that recompute
/// the cached stats in the same call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub created_at: i64,
    #[serde(default)]
    tracks: Vec<TrackEvent>,
    #[serde(flatten)]
    stats: SessionStats,
}

impl Session {
    pub fn new(name: impl Into<String>, created_at: i64) -> Self {
        Self {
            id: crate::uuid_utils::generate(),
            name: name.into(),
            created_at,
            tracks: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn tracks(&self) -> &[TrackEvent] {
        &self.tracks
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            name: self.name.clone(),
            created_at: self.created_at,
            track_count: self.tracks.len(),
            stats: self.stats.clone(),
        }
    }

    pub(crate) fn push(&mut self, event: TrackEvent) {
        self.tracks.push(event);
        self.refresh_stats();
    }

    pub(crate) fn replace_tracks(&mut self, tracks: Vec<TrackEvent>) {
        self.tracks = tracks;
        self.refresh_stats();
    }

    pub(crate) fn refresh_stats(&mut self) {
        self.stats = SessionStats::compute(&self.tracks);
    }
}

/// Session listing entry without the track log
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: Uuid,
    pub name: String,
    pub created_at: i64,
    pub track_count: usize,
    #[serde(flatten)]
    pub stats: SessionStats,
}

// ============================================================================
// Poll snapshot (metadata API `/params.json`)
// ============================================================================

/// Deck state document returned by the metadata API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParamsSnapshot {
    #[serde(default)]
    pub players: BTreeMap<String, PlayerState>,
}

/// One deck's state in a snapshot
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PlayerState {
    pub number: u32,
    #[serde(default)]
    pub track: Option<TrackInfo>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub track_bpm: Option<f64>,
    #[serde(default)]
    pub is_playing: Option<bool>,
    #[serde(default)]
    pub is_paused: Option<bool>,
    #[serde(default)]
    pub is_track_loaded: Option<bool>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub time_played: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub beat_within_bar: Option<f64>,
}

/// Metadata of the track loaded on a deck
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackInfo {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub artist: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub bpm: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    pub duration: Option<f64>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub genre: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub key: Option<String>,
}

/// Deserializers that accept the loosely typed values the dashboard and the
/// metadata API produce (ids as numbers, BPM as strings, nulls everywhere).
mod lenient {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn value_text(value: Value) -> Option<String> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<Value>::deserialize(d)?.and_then(value_text))
    }

    pub fn text_or_unknown<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(text(d)?.unwrap_or_else(super::unknown))
    }

    pub fn required_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        text(d)?.ok_or_else(|| D::Error::custom("trackId must be a non-empty string or number"))
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(ts: i64, deck: u32, id: &str, artist: &str, genre: &str, bpm: Option<f64>) -> TrackEvent {
        Candidate::new(deck, id)
            .with_artist(artist)
            .with_genre(genre)
            .with_bpm(bpm)
            .into_event(ts)
    }

    #[test]
    fn test_avg_bpm_excludes_missing_values() {
        let tracks = vec![
            event(0, 1, "a", "A", "House", Some(120.0)),
            event(1, 1, "b", "B", "House", Some(130.0)),
            event(2, 2, "c", "C", "House", None),
            event(3, 2, "d", "D", "House", Some(140.0)),
        ];
        let stats = SessionStats::compute(&tracks);
        assert_eq!(stats.avg_bpm, Some(130.0));
    }

    #[test]
    fn test_avg_bpm_none_without_positive_values() {
        let tracks = vec![event(0, 1, "a", "A", "House", Some(0.0)), event(5, 1, "b", "B", "House", None)];
        assert_eq!(SessionStats::compute(&tracks).avg_bpm, None);
    }

    #[test]
    fn test_duration_needs_two_tracks() {
        assert_eq!(SessionStats::compute(&[event(500, 1, "a", "A", "X", None)]).duration, 0);
        let tracks = vec![event(500, 1, "a", "A", "X", None), event(2_500, 2, "b", "B", "X", None)];
        assert_eq!(SessionStats::compute(&tracks).duration, 2_000);
    }

    #[test]
    fn test_genre_ranking_ties_keep_first_seen_order() {
        let tracks = vec![
            event(0, 1, "a", "A", "Techno", None),
            event(1, 1, "b", "A", "House", None),
            event(2, 1, "c", "B", "Disco", None),
            event(3, 1, "d", "B", "House", None),
            event(4, 1, "e", "", "Unknown", None),
        ];
        let stats = SessionStats::compute(&tracks);
        assert_eq!(stats.genres, vec!["House", "Techno", "Disco"]);
        assert_eq!(stats.unique_artists, 2);
    }

    #[test]
    fn test_track_event_serializes_in_field_order_with_nulls() {
        let json = serde_json::to_string(&Candidate::new(2, "77").into_event(10)).unwrap();
        assert_eq!(
            json,
            r#"{"timestamp":10,"deck":2,"trackId":"77","artist":"Unknown","title":"Unknown","genre":"Unknown","key":"Unknown","bpm":null,"duration":null}"#
        );
    }

    #[test]
    fn test_candidate_accepts_dashboard_shape() {
        let candidate: Candidate = serde_json::from_value(json!({
            "timestamp": 1700000000000i64,
            "player": 1,
            "trackId": 4711,
            "artist": "Someone",
            "bpm": "124.5",
            "genre": null
        }))
        .unwrap();
        assert_eq!(candidate.deck, 1);
        assert_eq!(candidate.track_id, "4711");
        assert_eq!(candidate.bpm, Some(124.5));
        assert_eq!(candidate.genre, UNKNOWN);
        assert!(candidate.validate().is_ok());
    }

    #[test]
    fn test_candidate_requires_track_id() {
        let result: std::result::Result<Candidate, _> = serde_json::from_value(json!({ "deck": 1, "trackId": "" }));
        assert!(result.is_err());
        let result: std::result::Result<Candidate, _> = serde_json::from_value(json!({ "trackId": "x" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_candidate_validate_rejects_deck_zero() {
        assert!(matches!(Candidate::new(0, "x").validate(), Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn test_session_roundtrip_keeps_stats_flat() {
        let mut session = Session::new("Friday", 1);
        session.push(event(10, 1, "a", "A", "House", Some(128.0)));
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["avgBpm"], json!(128.0));
        assert_eq!(value["tracks"].as_array().map(Vec::len), Some(1));

        let back: Session = serde_json::from_value(value).unwrap();
        assert_eq!(back.tracks(), session.tracks());
        assert_eq!(back.stats(), session.stats());
    }

    #[test]
    fn test_snapshot_parses_kebab_case_flags() {
        let snapshot: ParamsSnapshot = serde_json::from_value(json!({
            "players": {
                "1": {
                    "number": 1,
                    "is-playing": true,
                    "track-bpm": 126.0,
                    "track": { "id": 99, "artist": "A", "title": "T" }
                },
                "2": { "number": 2 }
            }
        }))
        .unwrap();
        let deck1 = &snapshot.players["1"];
        assert_eq!(deck1.is_playing, Some(true));
        assert_eq!(deck1.track_bpm, Some(126.0));
        assert_eq!(deck1.track.as_ref().and_then(|t| t.id.clone()), Some("99".to_string()));
        assert!(snapshot.players["2"].track.is_none());
    }
}
