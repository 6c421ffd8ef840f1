//! M3U8 playlist parsing utilities
//!
//! Turns captured playlist text into an ordered list of absolute segment URLs,
//! plus the resolution and total duration metadata when the playlist carries
//! them. The segment-line classification and filename extraction here are
//! shared with the archive stage, which rewrites the same lines.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use url::Url;

use crate::core::models::Resolution;

const STREAM_INF_TAG: &str = "#EXT-X-STREAM-INF:";
const EXTINF_TAG: &str = "#EXTINF:";

/// Result of parsing one playlist
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedPlaylist {
    pub segments: Vec<String>,
    pub resolution: Option<Resolution>,
    pub duration: Option<f64>,
}

fn resolution_regex() -> &'static Regex {
    static RESOLUTION: OnceLock<Regex> = OnceLock::new();
    RESOLUTION.get_or_init(|| {
        Regex::new(r"(?i)RESOLUTION=(\d+)x(\d+)").expect("resolution pattern is valid")
    })
}

/// A line references a segment iff it is non-blank and not a tag/comment.
pub fn is_segment_line(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && !line.starts_with('#')
}

/// Parse playlist content against the URL it was fetched from.
///
/// An unusable base URL yields an empty segment list rather than an error:
/// a capture without segments is treated as "not ready yet" upstream.
pub fn parse_playlist(content: &str, base_url: &str) -> ParsedPlaylist {
    let base = match Url::parse(base_url) {
        Ok(url) if url.has_host() => url,
        Ok(_) | Err(_) => {
            tracing::debug!("Unusable playlist base URL, skipping segments: {}", base_url);
            return ParsedPlaylist::default();
        }
    };

    let mut segments = Vec::new();
    let mut resolution = None;
    let mut total_duration = 0.0f64;
    let mut saw_duration = false;

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        if let Some(attributes) = line.strip_prefix(STREAM_INF_TAG) {
            if resolution.is_none() {
                resolution = parse_resolution(attributes);
            }
        } else if let Some(info) = line.strip_prefix(EXTINF_TAG) {
            let value = info.split(',').next().unwrap_or("").trim();
            match value.parse::<f64>() {
                Ok(duration) if duration.is_finite() => {
                    total_duration += duration;
                    saw_duration = true;
                }
                _ => tracing::debug!("Skipping malformed EXTINF value: {}", line),
            }
        } else if is_segment_line(line) {
            segments.push(resolve_segment_url(&base, line));
        }
    }

    let duration = (saw_duration && total_duration > 0.0).then_some(total_duration);

    ParsedPlaylist {
        segments,
        resolution,
        duration,
    }
}

fn parse_resolution(attributes: &str) -> Option<Resolution> {
    let captures = resolution_regex().captures(attributes)?;
    let width = captures.get(1)?.as_str().parse::<u32>().ok()?;
    let height = captures.get(2)?.as_str().parse::<u32>().ok()?;
    Some(Resolution { width, height })
}

/// Resolve a segment reference against the playlist URL.
///
/// Absolute http(s) references pass through untouched, root-relative ones
/// hang off the origin, everything else off the playlist's directory.
pub fn resolve_segment_url(base: &Url, reference: &str) -> String {
    let lower = reference.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return reference.to_string();
    }

    let origin = base.origin().ascii_serialization();
    if reference.starts_with('/') {
        return format!("{}{}", origin, reference);
    }

    let path = base.path();
    let directory = match path.rfind('/') {
        Some(index) => &path[..=index],
        None => "/",
    };

    format!("{}{}{}", origin, directory, reference)
}

/// Local filename for a playlist or segment reference.
///
/// Takes the last path component with any query string or fragment removed,
/// falling back to the second-to-last component when the last one is empty.
pub fn extract_filename(reference: &str) -> String {
    let without_query = reference.split(['?', '#']).next().unwrap_or("");
    let components: Vec<&str> = without_query.split('/').collect();

    let last = components.last().copied().unwrap_or("");
    if !last.is_empty() {
        return last.to_string();
    }

    if components.len() >= 2 {
        let previous = components[components.len() - 2];
        if !previous.is_empty() {
            return previous.to_string();
        }
    }

    String::new()
}
