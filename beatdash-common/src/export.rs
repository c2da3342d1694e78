//! Session export
//!
//! Every format works on the cleaned view of the log (see
//! [`crate::history::clean`]) in chronological order. An empty log produces
//! no file.

use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::str::FromStr;

use crate::history;
use crate::models::TrackEvent;
use crate::time::local_datetime;
use crate::{Error, Result};

/// Column order shared by the CSV header and the JSON field order
const CSV_COLUMNS: [&str; 9] = [
    "timestamp", "deck", "trackId", "artist", "title", "genre", "key", "bpm", "duration",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    Txt,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Txt => "txt",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
            ExportFormat::Txt => "text/plain",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "txt" | "text" => Ok(ExportFormat::Txt),
            other => Err(Error::InvalidPayload(format!("unsupported export format '{}'", other))),
        }
    }
}

/// A rendered export ready to be offered as a download
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub filename: String,
    pub content: String,
    pub mime_type: &'static str,
}

/// Render `tracks` in `format`; `None` when there is nothing to export
pub fn export(
    tracks: &[TrackEvent],
    format: ExportFormat,
    exported_at: DateTime<Local>,
) -> Result<Option<ExportFile>> {
    let cleaned = history::clean(tracks);
    if cleaned.is_empty() {
        return Ok(None);
    }

    let content = match format {
        ExportFormat::Json => serde_json::to_string_pretty(&cleaned)?,
        ExportFormat::Csv => render_csv(&cleaned),
        ExportFormat::Txt => render_txt(&cleaned),
    };

    Ok(Some(ExportFile {
        filename: format!(
            "track_history_{}.{}",
            exported_at.format("%Y-%m-%d"),
            format.extension()
        ),
        content,
        mime_type: format.mime_type(),
    }))
}

/// Parse a JSON export back into events
pub fn import_json(content: &str) -> Result<Vec<TrackEvent>> {
    serde_json::from_str(content)
        .map_err(|e| Error::InvalidPayload(format!("not a track history export: {}", e)))
}

fn render_csv(tracks: &[TrackEvent]) -> String {
    let mut out = CSV_COLUMNS.join(",");
    for event in tracks {
        let row = [
            event.timestamp.to_string(),
            event.deck.to_string(),
            csv_field(&event.track_id),
            csv_field(&event.artist),
            csv_field(&event.title),
            csv_field(&event.genre),
            csv_field(&event.key),
            event.bpm.map(|v| v.to_string()).unwrap_or_default(),
            event.duration.map(|v| v.to_string()).unwrap_or_default(),
        ];
        out.push('\n');
        out.push_str(&row.join(","));
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains(|c| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn render_txt(tracks: &[TrackEvent]) -> String {
    let mut out = String::new();
    for (i, event) in tracks.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let bpm = event.bpm.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string());
        let _ = write!(
            out,
            "{} | Deck {} | {} - {} | BPM: {}",
            local_datetime(event.timestamp).format("%Y-%m-%d %H:%M:%S"),
            event.deck,
            event.artist,
            event.title,
            bpm
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candidate;

    fn log() -> Vec<TrackEvent> {
        vec![
            Candidate::new(1, "A")
                .with_artist("Daft Punk, Thomas")
                .with_title("One More Time")
                .with_bpm(Some(123.0))
                .into_event(1_000),
            Candidate::new(2, "B").with_title("Say \"Hi\"").into_event(2_000),
            Candidate::new(1, "A").into_event(3_000),
        ]
    }

    #[test]
    fn test_empty_log_exports_nothing() {
        assert_eq!(export(&[], ExportFormat::Csv, Local::now()).unwrap(), None);
    }

    #[test]
    fn test_csv_quotes_commas_and_quotes() {
        let file = export(&log(), ExportFormat::Csv, Local::now()).unwrap().unwrap();
        let lines: Vec<&str> = file.content.lines().collect();
        assert_eq!(lines[0], "timestamp,deck,trackId,artist,title,genre,key,bpm,duration");
        assert_eq!(lines[1], "1000,1,A,\"Daft Punk, Thomas\",One More Time,Unknown,Unknown,123,");
        assert_eq!(lines[2], "2000,2,B,Unknown,\"Say \"\"Hi\"\"\",Unknown,Unknown,,");
        // The repeat of (1, A) is removed by the clean pass
        assert_eq!(lines.len(), 3);
        assert_eq!(file.mime_type, "text/csv");
    }

    #[test]
    fn test_json_roundtrip() {
        let file = export(&log(), ExportFormat::Json, Local::now()).unwrap().unwrap();
        let imported = import_json(&file.content).unwrap();
        assert_eq!(imported, history::clean(&log()));
    }

    #[test]
    fn test_txt_lines_use_na_for_missing_bpm() {
        let file = export(&log(), ExportFormat::Txt, Local::now()).unwrap().unwrap();
        let lines: Vec<&str> = file.content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("| Deck 1 | Daft Punk, Thomas - One More Time | BPM: 123"));
        assert!(lines[1].ends_with("| BPM: N/A"));
    }

    #[test]
    fn test_filename_uses_export_date() {
        let at = local_datetime(1_700_000_000_000);
        let file = export(&log(), ExportFormat::Txt, at).unwrap().unwrap();
        assert_eq!(file.filename, format!("track_history_{}.txt", at.format("%Y-%m-%d")));
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("txt".parse::<ExportFormat>().unwrap(), ExportFormat::Txt);
        assert!("xml".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_import_rejects_garbage() {
        assert!(matches!(import_json("{\"not\": \"an array\"}"), Err(Error::InvalidPayload(_))));
    }
}
