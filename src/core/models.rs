//! Core data models for the capture registry and download engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Browser window identifier
pub type WindowId = i64;

/// Sentinel for captures that do not belong to any window
pub const NO_WINDOW: WindowId = -1;

/// Video resolution advertised by a playlist

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,

    pub height: u32,
}

/// Raw capture handed over by the request-interception layer

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureInput {
    pub source_url: String,

    pub raw_content: String,

    #[serde(default = "default_window")]
    pub window_id: WindowId,

    #[serde(default)]
    pub tab_id: Option<i64>,

    /// Best-effort label from the page's video player
    #[serde(default)]
    pub title: Option<String>,
}

fn default_window() -> WindowId {
    NO_WINDOW
}

/// A captured playlist with its derived metadata

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub id: String,

    pub source_url: String,

    pub raw_content: String,

    pub file_name: String,

    /// Absolute segment URLs in playback order
    pub segments: Vec<String>,

    pub title: Option<String>,

    pub resolution: Option<Resolution>,

    pub duration: Option<f64>,

    pub captured_at: DateTime<Utc>,

    pub window_id: WindowId,

    #[serde(default)]
    pub tab_id: Option<i64>,
}

impl Manifest {
    pub fn display_name(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => &self.file_name,
        }
    }

    pub fn summary(&self) -> ManifestSummary {
        ManifestSummary {
            id: self.id.clone(),
            display_name: self.display_name().to_string(),
            file_name: self.file_name.clone(),
            source_url: self.source_url.clone(),
            segment_count: self.segments.len(),
            captured_at: self.captured_at,
            resolution: self.resolution,
            duration: self.duration,
        }
    }
}

/// Listing projection of a manifest; never carries content or segment URLs

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestSummary {
    pub id: String,

    pub display_name: String,

    pub file_name: String,

    pub source_url: String,

    pub segment_count: usize,

    pub captured_at: DateTime<Utc>,

    pub resolution: Option<Resolution>,

    pub duration: Option<f64>,
}

/// Download lifecycle state

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Starting,

    Downloading,

    CreatingArchive,

    Complete,

    Cancelled,

    Failed,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Downloading => "downloading",
            Self::CreatingArchive => "creating_archive",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate progress of one download run

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DownloadProgress {
    /// Segments accounted for, fetched or given up on
    pub downloaded_segments: usize,

    pub failed_segments: usize,

    pub total_segments: usize,

    pub downloaded_bytes: u64,

    pub total_bytes_estimate: Option<u64>,

    /// Bytes per second over the recent window
    pub speed: f64,
}

impl DownloadProgress {
    pub fn succeeded_segments(&self) -> usize {
        self.downloaded_segments.saturating_sub(self.failed_segments)
    }
}

/// One in-flight or finished orchestration run

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadRecord {
    pub download_id: String,

    pub manifest_id: String,

    pub manifest_name: String,

    pub state: DownloadState,

    pub progress: DownloadProgress,

    pub cancel_requested: bool,

    pub error: Option<String>,

    pub archive_name: Option<String>,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,
}

/// Archive handed back to the caller of a completed run

#[derive(Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    pub download_id: String,

    pub manifest_id: String,

    pub archive_name: String,

    #[serde(skip)]
    pub archive: Vec<u8>,

    pub archive_size: u64,

    pub total_segments: usize,

    pub succeeded_segments: usize,

    /// Playback indices of segments that failed every retry
    pub missing_segments: Vec<usize>,

    pub downloaded_bytes: u64,
}

impl DownloadResult {
    pub fn is_partial(&self) -> bool {
        !self.missing_segments.is_empty()
    }
}

impl std::fmt::Debug for DownloadResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadResult")
            .field("download_id", &self.download_id)
            .field("manifest_id", &self.manifest_id)
            .field("archive_name", &self.archive_name)
            .field("archive_size", &self.archive_size)
            .field("total_segments", &self.total_segments)
            .field("succeeded_segments", &self.succeeded_segments)
            .field("missing_segments", &self.missing_segments)
            .field("downloaded_bytes", &self.downloaded_bytes)
            .finish()
    }
}

/// Application error types

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parsing error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("Download not found: {0}")]
    DownloadNotFound(String),

    #[error("Manifest {0} has no segments")]
    NoSegments(String),

    #[error("None of the {total} segments could be fetched")]
    NoSegmentsFetched { total: usize },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Archive assembly failed: {0}")]
    AssemblyFailed(String),

    #[error("System error: {0}")]
    System(String),
}

impl AppError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ManifestNotFound(_) | Self::DownloadNotFound(_))
    }
}

/// Result type alias for application operations

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(title: Option<&str>) -> Manifest {
        Manifest {
            id: "m1".to_string(),
            source_url: "https://example.com/v/index.m3u8".to_string(),
            raw_content: "#EXTM3U\nseg.ts".to_string(),
            file_name: "index.m3u8".to_string(),
            segments: vec!["https://example.com/v/seg.ts".to_string()],
            title: title.map(str::to_string),
            resolution: None,
            duration: Some(4.0),
            captured_at: Utc::now(),
            window_id: 3,
            tab_id: None,
        }
    }

    #[test]
    fn test_display_name_falls_back_to_file_name() {
        assert_eq!(manifest(Some("Talk")).display_name(), "Talk");
        assert_eq!(manifest(Some("  ")).display_name(), "index.m3u8");
        assert_eq!(manifest(None).display_name(), "index.m3u8");
    }

    #[test]
    fn test_summary_omits_content() {
        let summary = manifest(None).summary();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["segment_count"], 1);
        assert!(json.get("raw_content").is_none());
        assert!(json.get("segments").is_none());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&DownloadState::CreatingArchive).unwrap();
        assert_eq!(json, "\"creating_archive\"");
        assert!(DownloadState::Cancelled.is_terminal());
        assert!(!DownloadState::Downloading.is_terminal());
    }

    #[test]
    fn test_capture_input_defaults_to_no_window() {
        let input: CaptureInput = serde_json::from_str(
            r##"{"source_url":"https://a.com/x.m3u8","raw_content":"#EXTM3U"}"##,
        )
        .unwrap();
        assert_eq!(input.window_id, NO_WINDOW);
        assert!(input.title.is_none());
    }
}
