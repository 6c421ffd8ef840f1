//! Progress Reporter
//!
//! Turns orchestrator updates into a throttled broadcast of [`ProgressEvent`]s.
//! State transitions always go out; plain progress ticks are limited to one
//! per `min_interval` per download. Every download ends with exactly one
//! terminal event. [`ProgressReporter::poll`] serves the same state to
//! listeners that cannot hold a subscription.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::debug;

use crate::core::models::{DownloadRecord, DownloadState};

/// Event pushed to listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        download_id: String,
        downloaded_segments: usize,
        total_segments: usize,
        downloaded_bytes: u64,
        total_bytes_estimate: Option<u64>,
        speed: f64,
        status: DownloadState,
    },
    Finished {
        download_id: String,
        status: DownloadState,
        error: Option<String>,
        total_segments: usize,
        succeeded_segments: usize,
        downloaded_bytes: u64,
    },
}

impl ProgressEvent {
    pub fn download_id(&self) -> &str {
        match self {
            Self::Progress { download_id, .. } | Self::Finished { download_id, .. } => download_id,
        }
    }

    pub fn status(&self) -> DownloadState {
        match self {
            Self::Progress { status, .. } | Self::Finished { status, .. } => *status,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }

    fn progress(record: &DownloadRecord) -> Self {
        Self::Progress {
            download_id: record.download_id.clone(),
            downloaded_segments: record.progress.downloaded_segments,
            total_segments: record.progress.total_segments,
            downloaded_bytes: record.progress.downloaded_bytes,
            total_bytes_estimate: record.progress.total_bytes_estimate,
            speed: record.progress.speed,
            status: record.state,
        }
    }

    fn finished(record: &DownloadRecord) -> Self {
        Self::Finished {
            download_id: record.download_id.clone(),
            status: record.state,
            error: record.error.clone(),
            total_segments: record.progress.total_segments,
            succeeded_segments: record.progress.succeeded_segments(),
            downloaded_bytes: record.progress.downloaded_bytes,
        }
    }
}

#[derive(Debug)]
struct ReportedDownload {
    latest: DownloadRecord,
    last_emit: Option<Instant>,
    last_state: DownloadState,
    finished: Option<ProgressEvent>,
}

/// Throttled publisher for download progress
#[derive(Debug)]
pub struct ProgressReporter {
    sender: broadcast::Sender<ProgressEvent>,
    min_interval: Duration,
    downloads: Arc<RwLock<HashMap<String, ReportedDownload>>>,
}

impl ProgressReporter {
    pub fn new(min_interval: Duration, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            min_interval,
            downloads: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a non-terminal update; returns whether an event went out
    pub fn report(&self, record: &DownloadRecord) -> bool {
        self.report_at(record, Instant::now())
    }

    fn report_at(&self, record: &DownloadRecord, now: Instant) -> bool {
        if record.state.is_terminal() {
            return self.finish(record);
        }

        let emit = {
            let mut downloads = self.downloads.write();
            let entry = downloads
                .entry(record.download_id.clone())
                .or_insert_with(|| ReportedDownload {
                    latest: record.clone(),
                    last_emit: None,
                    last_state: record.state,
                    finished: None,
                });

            if entry.finished.is_some() {
                return false;
            }

            let state_changed = entry.last_state != record.state;
            let due = match entry.last_emit {
                None => true,
                Some(at) => now.saturating_duration_since(at) >= self.min_interval,
            };

            entry.latest = record.clone();
            entry.last_state = record.state;
            if state_changed || due {
                entry.last_emit = Some(now);
                true
            } else {
                false
            }
        };

        if emit {
            let _ = self.sender.send(ProgressEvent::progress(record));
        }
        emit
    }

    /// Publish the terminal event for a download, at most once
    pub fn finish(&self, record: &DownloadRecord) -> bool {
        let event = ProgressEvent::finished(record);
        {
            let mut downloads = self.downloads.write();
            let entry = downloads
                .entry(record.download_id.clone())
                .or_insert_with(|| ReportedDownload {
                    latest: record.clone(),
                    last_emit: None,
                    last_state: record.state,
                    finished: None,
                });
            if entry.finished.is_some() {
                return false;
            }
            entry.latest = record.clone();
            entry.last_state = record.state;
            entry.finished = Some(event.clone());
        }

        debug!(
            "Download {} finished with status {}",
            record.download_id, record.state
        );
        let _ = self.sender.send(event);
        true
    }

    /// Latest known state of every download still being reported
    pub fn poll(&self) -> Vec<DownloadRecord> {
        let mut records: Vec<DownloadRecord> = self
            .downloads
            .read()
            .values()
            .map(|d| d.latest.clone())
            .collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        records
    }

    pub fn latest(&self, download_id: &str) -> Option<DownloadRecord> {
        self.downloads
            .read()
            .get(download_id)
            .map(|d| d.latest.clone())
    }

    /// Forget a download once its terminal state has been consumed
    pub fn evict(&self, download_id: &str) {
        self.downloads.write().remove(download_id);
    }

    /// Every event for every download
    pub fn subscribe_all(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// Events for one download, ending after its terminal event
    pub fn subscribe(&self, download_id: &str) -> DownloadSubscription {
        let receiver = self.sender.subscribe();
        let pending_final = self
            .downloads
            .read()
            .get(download_id)
            .and_then(|d| d.finished.clone());

        DownloadSubscription {
            download_id: download_id.to_string(),
            receiver,
            downloads: self.downloads.clone(),
            pending_final,
            done: false,
        }
    }
}

/// Stream of events for a single download
pub struct DownloadSubscription {
    download_id: String,
    receiver: broadcast::Receiver<ProgressEvent>,
    downloads: Arc<RwLock<HashMap<String, ReportedDownload>>>,
    pending_final: Option<ProgressEvent>,
    done: bool,
}

impl DownloadSubscription {
    pub fn download_id(&self) -> &str {
        &self.download_id
    }

    /// Next event, or `None` once the terminal event has been delivered
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.done {
            return None;
        }
        if let Some(event) = self.pending_final.take() {
            self.done = true;
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) if event.download_id() == self.download_id => {
                    if event.is_terminal() {
                        self.done = true;
                    }
                    return Some(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(
                        "Subscription for {} skipped {} events",
                        self.download_id, skipped
                    );
                    // The skipped events may include this download's terminal one
                    let stored = self
                        .downloads
                        .read()
                        .get(&self.download_id)
                        .and_then(|d| d.finished.clone());
                    if let Some(event) = stored {
                        self.done = true;
                        return Some(event);
                    }
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::DownloadProgress;
    use chrono::Utc;

    fn record(id: &str, state: DownloadState, done: usize) -> DownloadRecord {
        DownloadRecord {
            download_id: id.to_string(),
            manifest_id: "m".to_string(),
            manifest_name: "video.m3u8".to_string(),
            state,
            progress: DownloadProgress {
                downloaded_segments: done,
                total_segments: 10,
                downloaded_bytes: done as u64 * 100,
                ..Default::default()
            },
            cancel_requested: false,
            error: None,
            archive_name: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    #[test]
    fn test_progress_ticks_are_throttled() {
        let reporter = ProgressReporter::new(Duration::from_millis(250), 16);
        let start = Instant::now();

        assert!(reporter.report_at(&record("d", DownloadState::Downloading, 1), start));
        assert!(!reporter.report_at(
            &record("d", DownloadState::Downloading, 2),
            start + Duration::from_millis(50)
        ));
        assert!(reporter.report_at(
            &record("d", DownloadState::Downloading, 3),
            start + Duration::from_millis(300)
        ));

        assert_eq!(reporter.latest("d").unwrap().progress.downloaded_segments, 3);
    }

    #[test]
    fn test_state_change_bypasses_throttle() {
        let reporter = ProgressReporter::new(Duration::from_secs(10), 16);
        let start = Instant::now();

        assert!(reporter.report_at(&record("d", DownloadState::Starting, 0), start));
        assert!(reporter.report_at(
            &record("d", DownloadState::Downloading, 0),
            start + Duration::from_millis(1)
        ));
        assert!(reporter.report_at(
            &record("d", DownloadState::CreatingArchive, 10),
            start + Duration::from_millis(2)
        ));
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_event() {
        let reporter = ProgressReporter::new(Duration::from_millis(0), 16);
        let mut all = reporter.subscribe_all();

        let done = record("d", DownloadState::Complete, 10);
        assert!(reporter.finish(&done));
        assert!(!reporter.finish(&done));
        assert!(!reporter.report(&record("d", DownloadState::Downloading, 10)));

        let event = all.recv().await.unwrap();
        assert!(event.is_terminal());
        assert_eq!(event.status(), DownloadState::Complete);
        assert!(matches!(
            all.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_subscription_filters_and_ends() {
        let reporter = ProgressReporter::new(Duration::from_millis(0), 16);
        let mut subscription = reporter.subscribe("a");

        reporter.report(&record("b", DownloadState::Downloading, 1));
        reporter.report(&record("a", DownloadState::Downloading, 1));
        reporter.finish(&record("a", DownloadState::Cancelled, 1));

        let first = subscription.next().await.unwrap();
        assert_eq!(first.download_id(), "a");
        assert!(!first.is_terminal());

        let last = subscription.next().await.unwrap();
        assert_eq!(last.status(), DownloadState::Cancelled);
        assert!(subscription.next().await.is_none());
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_final_event() {
        let reporter = ProgressReporter::new(Duration::from_millis(0), 16);
        reporter.finish(&record("a", DownloadState::Failed, 0));

        let mut subscription = reporter.subscribe("a");
        let event = subscription.next().await.unwrap();
        assert_eq!(event.status(), DownloadState::Failed);
        assert!(subscription.next().await.is_none());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_still_gets_final_event() {
        let reporter = ProgressReporter::new(Duration::ZERO, 1);
        let mut subscription = reporter.subscribe("a");

        reporter.finish(&record("a", DownloadState::Complete, 10));
        reporter.report(&record("b", DownloadState::Downloading, 1));
        reporter.report(&record("b", DownloadState::Downloading, 2));

        let event = tokio::time::timeout(Duration::from_millis(300), subscription.next())
            .await
            .expect("terminal event delivered after lag")
            .unwrap();
        assert_eq!(event.download_id(), "a");
        assert_eq!(event.status(), DownloadState::Complete);
        assert!(subscription.next().await.is_none());
    }

    #[test]
    fn test_poll_and_evict() {
        let reporter = ProgressReporter::new(Duration::from_millis(0), 16);
        reporter.report(&record("a", DownloadState::Downloading, 1));
        reporter.report(&record("b", DownloadState::Downloading, 2));
        assert_eq!(reporter.poll().len(), 2);

        reporter.evict("a");
        let remaining = reporter.poll();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].download_id, "b");
    }

    #[test]
    fn test_event_wire_shape() {
        let event = ProgressEvent::progress(&record("a", DownloadState::Downloading, 2));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["download_id"], "a");
        assert_eq!(json["status"], "downloading");
        assert_eq!(json["downloaded_segments"], 2);
    }
}
