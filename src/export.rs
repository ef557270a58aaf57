//! CSV export of the sample history

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::models::HistoryEntry;

pub const CSV_HEADER: [&str; 7] = [
    "Timestamp",
    "Soil Moisture (%)",
    "Air Humidity (%)",
    "Temperature (°C)",
    "pH Level",
    "Water Level (%)",
    "Flow Rate (L/min)",
];

/// A rendered export ready for download
#[derive(Debug, Clone, Serialize)]
pub struct HistoryExport {
    pub filename: String,
    pub content: String,
    pub rows: usize,
}

/// `climaneer_data_YYYY-MM-DD.csv`
pub fn export_filename(now: DateTime<Utc>) -> String {
    format!("climaneer_data_{}.csv", now.format("%Y-%m-%d"))
}

/// Fixed-point rendering with ties rounded away from zero.
///
/// `{:.N}` alone rounds exact ties to even (25.25 -> "25.2"); dashboards
/// and exports expect "25.3".
pub fn fixed(value: f64, places: usize) -> String {
    let scale = 10f64.powi(places as i32);
    let rounded = (value * scale).round() / scale;
    format!("{:.*}", places, rounded)
}

fn csv_row(entry: &HistoryEntry) -> String {
    let s = &entry.sample;
    [
        s.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        fixed(s.soil_moisture, 1),
        fixed(s.air_humidity, 1),
        fixed(s.air_temp, 1),
        fixed(s.ph_level, 2),
        fixed(s.water_level, 0),
        fixed(s.flow_rate, 2),
    ]
    .join(",")
}

/// Render entries (already most-recent-first) as CSV
pub fn render_csv<'a>(entries: impl IntoIterator<Item = &'a HistoryEntry>) -> (String, usize) {
    let mut lines = vec![CSV_HEADER.join(",")];
    lines.extend(entries.into_iter().map(csv_row));
    let rows = lines.len() - 1;
    (lines.join("\n"), rows)
}

pub fn export_history<'a>(entries: impl IntoIterator<Item = &'a HistoryEntry>, now: DateTime<Utc>) -> HistoryExport {
    let (content, rows) = render_csv(entries);
    HistoryExport {
        filename: export_filename(now),
        content,
        rows,
    }
}
