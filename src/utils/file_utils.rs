//! File system and naming utilities

use anyhow::{anyhow, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs;
use std::path::Path;

/// Ensure directory exists
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .map_err(|e| anyhow!("Failed to create directory {}: {}", path.display(), e))?;
    }
    Ok(())
}

/// Get file extension
pub fn get_file_extension(filename: &str) -> Option<&str> {
    Path::new(filename).extension().and_then(|ext| ext.to_str())
}

/// Filename without its final extension
pub fn file_stem(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(0) | None => filename,
        Some(index) => &filename[..index],
    }
}

/// Sanitize filename for filesystem
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// `<playlist base name>-<ISO8601 timestamp>.<extension>`, with the
/// timestamp's ':' and '.' turned into '-'
pub fn archive_file_name(playlist_file_name: &str, at: DateTime<Utc>, extension: &str) -> String {
    let base = sanitize_filename(file_stem(playlist_file_name));
    let base = if base.is_empty() { "playlist".to_string() } else { base };
    let timestamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{}-{}.{}", base, timestamp, extension)
}
