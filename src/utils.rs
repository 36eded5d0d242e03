//! Utility functions for dates, loose JSON scalars, string manipulation, and
//! file system operations.
//!
//! This module provides helper functions used throughout the routes:
//! - Date parsing for the formats the scraped sites print
//! - Scalar extraction from JSON APIs that mix strings and numbers
//! - String truncation for logging and a Markdown table builder for route help
//! - File system validation for output directories

use crate::error::{Error, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

/// Offset of the China-based sites (UTC+8).
pub const CHINA_OFFSET_HOURS: i32 = 8;

/// Offset of the Japan-based sites (UTC+9).
pub const JAPAN_OFFSET_HOURS: i32 = 9;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%d-%H-%M-%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y年%m月%d日", "%B %d, %Y", "%b %d, %Y"];

/// Convert a unix timestamp in seconds.
pub fn from_unix_secs(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}

/// Parse a wall-clock date or date-time printed in a site's local time.
///
/// Accepts `2025-05-06 12:30[:00]`, slash-separated variants, the dashed
/// stamps some sites put in URLs (`2025-05-06-12-30-00`), and date-only
/// forms (`2025-05-06`, `2025年05月06日`, `May 6, 2025`) which resolve to
/// local midnight. Single-digit months and days are accepted.
pub fn parse_local_datetime(text: &str, offset_hours: i32) -> Option<DateTime<Utc>> {
    let text = text.trim();
    let offset = FixedOffset::east_opt(offset_hours * 3600)?;
    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(text, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(text, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an RFC 2822 date as found in RSS `pubDate`.
pub fn parse_rfc2822(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(text.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// A JSON string or number as a string.
pub fn json_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A JSON number or numeric string as `u64`.
pub fn json_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to at most `max` bytes (on a character
/// boundary) with an ellipsis and byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log("a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…(+{} bytes)", &s[..end], s.len() - end)
}

/// Render `(key, label)` pairs as a two-row Markdown table.
///
/// Used in route help to list the values a parameter accepts.
///
/// ```text
/// |today|game|tech|
/// |---|---|---|
/// |推荐|游戏|科技|
/// ```
pub fn md_table_builder(entries: &[(&str, &str)]) -> String {
    let keys: String = entries.iter().map(|(key, _)| format!("{key}|")).collect();
    let labels: String = entries.iter().map(|(_, label)| format!("{label}|")).collect();
    format!("|{keys}\n|{}\n|{labels}\n", "---|".repeat(entries.len()))
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test by
/// creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns [`Error::Io`] if the directory cannot be created or is not
/// writable (permission denied, read-only filesystem, etc.).
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<()> {
    fs::create_dir_all(path).await?;
    // Try a small sync write using std fs (simpler error surface)
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Error::Io(format!("{path} is not writable: {e}"))),
    }
}
