//! Play analytics over a session log
//!
//! Pure functions over `&[TrackEvent]`; callers decide whether they pass the
//! raw log or the cleaned view.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::models::{TrackEvent, UNKNOWN};

pub const DEFAULT_FREQUENT_LIMIT: usize = 10;
pub const DEFAULT_SMOOTHING_WINDOW: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOverview {
    pub total_tracks: usize,
    pub unique_tracks: usize,
    /// Milliseconds between the first and last event
    pub duration: i64,
    /// `duration` in hours, one decimal
    pub duration_hours: f64,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub tracks_per_deck: BTreeMap<u32, usize>,
    pub average_bpm: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequentTrack {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub genre: String,
    pub bpm: Option<f64>,
    pub count: usize,
    pub last_played: i64,
    pub decks: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenreCount {
    pub name: String,
    pub value: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BpmPoint {
    pub index: usize,
    pub timestamp: i64,
    pub bpm: f64,
    pub title: String,
    pub artist: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEnd {
    pub timestamp: i64,
    pub title: String,
    pub artist: String,
    pub bpm: Option<f64>,
    pub genre: String,
}

/// Two consecutive tracks on the same deck
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub deck: u32,
    pub from: TransitionEnd,
    pub to: TransitionEnd,
    /// Missing BPM counts as zero here, matching the on-screen table
    pub bpm_diff: f64,
    pub bpm_diff_percent: f64,
    pub time_between: i64,
    pub time_between_minutes: i64,
    pub same_genre: bool,
}

/// Everything the analytics panel shows, in one document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnalytics {
    pub overview: SessionOverview,
    pub frequent_tracks: Vec<FrequentTrack>,
    pub genres: Vec<GenreCount>,
    pub bpm_progression: Vec<BpmPoint>,
    pub transitions: Vec<Transition>,
}

pub fn analyze(tracks: &[TrackEvent]) -> SessionAnalytics {
    SessionAnalytics {
        overview: session_overview(tracks),
        frequent_tracks: frequent_tracks(tracks, DEFAULT_FREQUENT_LIMIT, 1),
        genres: genre_distribution(tracks),
        bpm_progression: bpm_progression(tracks, Some(DEFAULT_SMOOTHING_WINDOW)),
        transitions: transitions(tracks),
    }
}

fn positive_bpm(event: &TrackEvent) -> Option<f64> {
    event.bpm.filter(|bpm| bpm.is_finite() && *bpm > 0.0)
}

pub fn session_overview(tracks: &[TrackEvent]) -> SessionOverview {
    if tracks.is_empty() {
        return SessionOverview::default();
    }

    let mut tracks_per_deck = BTreeMap::new();
    for event in tracks {
        *tracks_per_deck.entry(event.deck).or_insert(0) += 1;
    }

    let start = tracks.iter().map(|e| e.timestamp).min().unwrap_or_default();
    let end = tracks.iter().map(|e| e.timestamp).max().unwrap_or_default();
    let duration = end.saturating_sub(start);

    let bpms: Vec<f64> = tracks.iter().filter_map(positive_bpm).collect();
    let average_bpm = (!bpms.is_empty()).then(|| bpms.iter().sum::<f64>() / bpms.len() as f64);

    SessionOverview {
        total_tracks: tracks.len(),
        unique_tracks: tracks.iter().map(|e| e.track_id.as_str()).collect::<HashSet<_>>().len(),
        duration,
        duration_hours: (duration as f64 / 360_000.0).round() / 10.0,
        start_time: Some(start),
        end_time: Some(end),
        tracks_per_deck,
        average_bpm,
    }
}

/// Plays grouped by track, most played first
///
/// Tracks with equal counts keep first-played order.
pub fn frequent_tracks(tracks: &[TrackEvent], limit: usize, min_plays: usize) -> Vec<FrequentTrack> {
    let mut order: Vec<(&str, &str, &str)> = Vec::new();
    let mut groups: HashMap<(&str, &str, &str), (FrequentTrack, BTreeSet<u32>)> = HashMap::new();

    for event in tracks {
        let key = (event.track_id.as_str(), event.title.as_str(), event.artist.as_str());
        let (entry, decks) = groups.entry(key).or_insert_with(|| {
            order.push(key);
            (
                FrequentTrack {
                    track_id: event.track_id.clone(),
                    title: event.title.clone(),
                    artist: event.artist.clone(),
                    genre: event.genre.clone(),
                    bpm: event.bpm,
                    count: 0,
                    last_played: event.timestamp,
                    decks: Vec::new(),
                },
                BTreeSet::new(),
            )
        });
        entry.count += 1;
        entry.last_played = entry.last_played.max(event.timestamp);
        decks.insert(event.deck);
    }

    let mut ranked: Vec<FrequentTrack> = order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .map(|(mut track, decks)| {
            track.decks = decks.into_iter().collect();
            track
        })
        .filter(|track| track.count >= min_plays)
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(limit);
    ranked
}

/// Plays per genre, "Unknown" included, most frequent first
pub fn genre_distribution(tracks: &[TrackEvent]) -> Vec<GenreCount> {
    let mut counts: Vec<GenreCount> = Vec::new();
    for event in tracks {
        let genre = match event.genre.trim() {
            "" => UNKNOWN,
            genre => genre,
        };
        match counts.iter_mut().find(|c| c.name == genre) {
            Some(count) => count.value += 1,
            None => counts.push(GenreCount {
                name: genre.to_string(),
                value: 1,
            }),
        }
    }
    counts.sort_by(|a, b| b.value.cmp(&a.value));
    counts
}

/// BPM over time, optionally smoothed with a centered moving average
///
/// Events without a positive BPM are skipped. Smoothing only applies when
/// there are more points than the window size.
pub fn bpm_progression(tracks: &[TrackEvent], smoothing_window: Option<usize>) -> Vec<BpmPoint> {
    let points: Vec<BpmPoint> = tracks
        .iter()
        .filter_map(|e| positive_bpm(e).map(|bpm| (e, bpm)))
        .enumerate()
        .map(|(index, (event, bpm))| BpmPoint {
            index,
            timestamp: event.timestamp,
            bpm,
            title: event.title.clone(),
            artist: event.artist.clone(),
        })
        .collect();

    match smoothing_window {
        Some(window) if window > 0 && points.len() > window => moving_average(points, window),
        _ => points,
    }
}

fn moving_average(points: Vec<BpmPoint>, window: usize) -> Vec<BpmPoint> {
    let half = window / 2;
    let raw: Vec<f64> = points.iter().map(|p| p.bpm).collect();
    points
        .into_iter()
        .enumerate()
        .map(|(i, mut point)| {
            let start = i.saturating_sub(half);
            let end = (i + half).min(raw.len() - 1);
            let slice = &raw[start..=end];
            point.bpm = slice.iter().sum::<f64>() / slice.len() as f64;
            point
        })
        .collect()
}

/// Consecutive track pairs per deck, newest transition first
pub fn transitions(tracks: &[TrackEvent]) -> Vec<Transition> {
    let mut by_deck: BTreeMap<u32, Vec<&TrackEvent>> = BTreeMap::new();
    for event in tracks {
        by_deck.entry(event.deck).or_default().push(event);
    }

    let end = |e: &TrackEvent| TransitionEnd {
        timestamp: e.timestamp,
        title: e.title.clone(),
        artist: e.artist.clone(),
        bpm: e.bpm,
        genre: e.genre.clone(),
    };

    let mut result = Vec::new();
    for (deck, mut events) in by_deck {
        events.sort_by_key(|e| e.timestamp);
        for pair in events.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            let from_bpm = from.bpm.unwrap_or(0.0);
            let bpm_diff = to.bpm.unwrap_or(0.0) - from_bpm;
            let time_between = to.timestamp.saturating_sub(from.timestamp);
            result.push(Transition {
                deck,
                from: end(from),
                to: end(to),
                bpm_diff,
                bpm_diff_percent: if from_bpm != 0.0 { bpm_diff / from_bpm * 100.0 } else { 0.0 },
                time_between,
                time_between_minutes: (time_between as f64 / 60_000.0).round() as i64,
                same_genre: !from.genre.is_empty() && from.genre.eq_ignore_ascii_case(&to.genre),
            });
        }
    }
    result.sort_by(|a, b| b.to.timestamp.cmp(&a.to.timestamp));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candidate;

    fn event(ts: i64, deck: u32, id: &str, genre: &str, bpm: Option<f64>) -> TrackEvent {
        Candidate::new(deck, id)
            .with_title(format!("Title {}", id))
            .with_genre(genre)
            .with_bpm(bpm)
            .into_event(ts)
    }

    fn log() -> Vec<TrackEvent> {
        vec![
            event(0, 1, "a", "House", Some(120.0)),
            event(60_000, 2, "b", "Techno", Some(126.0)),
            event(180_000, 1, "c", "house", Some(132.0)),
            event(3_600_000, 1, "a", "House", None),
        ]
    }

    #[test]
    fn test_overview() {
        let overview = session_overview(&log());
        assert_eq!(overview.total_tracks, 4);
        assert_eq!(overview.unique_tracks, 3);
        assert_eq!(overview.duration, 3_600_000);
        assert_eq!(overview.duration_hours, 1.0);
        assert_eq!(overview.tracks_per_deck.get(&1), Some(&3));
        assert_eq!(overview.average_bpm, Some(126.0));
    }

    #[test]
    fn test_overview_of_empty_log() {
        let overview = session_overview(&[]);
        assert_eq!(overview.total_tracks, 0);
        assert_eq!(overview.start_time, None);
        assert_eq!(overview.average_bpm, None);
    }

    #[test]
    fn test_frequent_tracks_ranked_by_count() {
        let ranked = frequent_tracks(&log(), 10, 1);
        assert_eq!(ranked[0].track_id, "a");
        assert_eq!(ranked[0].count, 2);
        assert_eq!(ranked[0].last_played, 3_600_000);
        assert_eq!(ranked[0].decks, vec![1]);
        assert_eq!(ranked.len(), 3);

        assert_eq!(frequent_tracks(&log(), 10, 2).len(), 1);
        assert_eq!(frequent_tracks(&log(), 1, 1).len(), 1);
    }

    #[test]
    fn test_genre_distribution_counts_unknown() {
        let mut tracks = log();
        tracks.push(event(4_000_000, 2, "d", "Unknown", None));
        let genres = genre_distribution(&tracks);
        assert_eq!(genres[0], GenreCount { name: "House".to_string(), value: 2 });
        assert!(genres.iter().any(|g| g.name == UNKNOWN && g.value == 1));
    }

    #[test]
    fn test_bpm_progression_smoothing() {
        let tracks = vec![
            event(0, 1, "a", "X", Some(120.0)),
            event(1, 1, "b", "X", Some(123.0)),
            event(2, 1, "c", "X", None),
            event(3, 1, "d", "X", Some(126.0)),
            event(4, 1, "e", "X", Some(129.0)),
        ];
        let raw = bpm_progression(&tracks, None);
        assert_eq!(raw.len(), 4);
        assert_eq!(raw[2].timestamp, 3);

        let smooth = bpm_progression(&tracks, Some(3));
        let bpms: Vec<f64> = smooth.iter().map(|p| p.bpm).collect();
        assert_eq!(bpms, vec![121.5, 123.0, 126.0, 127.5]);
    }

    #[test]
    fn test_transitions_per_deck() {
        let result = transitions(&log());
        assert_eq!(result.len(), 2);
        // Newest first
        assert_eq!(result[0].to.timestamp, 3_600_000);
        assert_eq!(result[0].bpm_diff, -132.0);

        let first = &result[1];
        assert_eq!(first.deck, 1);
        assert_eq!(first.bpm_diff, 12.0);
        assert_eq!(first.bpm_diff_percent, 10.0);
        assert_eq!(first.time_between_minutes, 3);
        assert!(first.same_genre);
    }
}
