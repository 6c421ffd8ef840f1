//! Progress accounting and speed measurement for segment downloads
//!
//! Speed is measured over a short rolling window of recent byte deltas
//! rather than as a whole-run average, so a stalled tail shows up as a
//! falling rate and a slow start does not drag down later throughput.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::core::models::DownloadProgress;

/// Default rolling window for speed measurement
pub const DEFAULT_SPEED_WINDOW: Duration = Duration::from_secs(3);

/// Byte deltas observed inside a rolling time window
#[derive(Debug, Clone)]
pub struct SpeedWindow {
    window: Duration,
    started: Instant,
    samples: VecDeque<(Instant, u64)>,
}

impl SpeedWindow {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    pub fn starting_at(window: Duration, started: Instant) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            started,
            samples: VecDeque::with_capacity(64),
        }
    }

    pub fn record_at(&mut self, at: Instant, bytes: u64) {
        self.samples.push_back((at, bytes));
        self.prune(at);
    }

    /// Bytes per second over the window ending at `now`
    pub fn speed_at(&mut self, now: Instant) -> f64 {
        self.prune(now);

        let bytes: u64 = self.samples.iter().map(|(_, b)| *b).sum();
        if bytes == 0 {
            return 0.0;
        }

        let span = now.saturating_duration_since(self.started).min(self.window);
        let secs = span.as_secs_f64().max(0.001);
        bytes as f64 / secs
    }

    fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.samples.front() {
            if now.saturating_duration_since(*at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Running totals for one download, updated after each segment settles
#[derive(Debug)]
pub struct SegmentProgressTracker {
    progress: DownloadProgress,
    speed: SpeedWindow,
}

impl SegmentProgressTracker {
    pub fn new(total_segments: usize, speed_window: Duration) -> Self {
        Self {
            progress: DownloadProgress {
                total_segments,
                ..Default::default()
            },
            speed: SpeedWindow::new(speed_window),
        }
    }

    pub fn record_success(&mut self, bytes: u64) -> DownloadProgress {
        self.record_success_at(Instant::now(), bytes)
    }

    pub fn record_success_at(&mut self, at: Instant, bytes: u64) -> DownloadProgress {
        self.progress.downloaded_segments += 1;
        self.progress.downloaded_bytes += bytes;
        self.speed.record_at(at, bytes);
        self.refresh(at)
    }

    /// A segment that exhausted its retries still counts as accounted for
    pub fn record_failure(&mut self) -> DownloadProgress {
        self.progress.downloaded_segments += 1;
        self.progress.failed_segments += 1;
        self.refresh(Instant::now())
    }

    pub fn snapshot(&mut self) -> DownloadProgress {
        self.refresh(Instant::now())
    }

    fn refresh(&mut self, now: Instant) -> DownloadProgress {
        self.progress.speed = self.speed.speed_at(now);
        self.progress.total_bytes_estimate = estimate_total_bytes(&self.progress);
        self.progress.clone()
    }
}

/// Average successful segment size scaled to the segments not known missing
pub fn estimate_total_bytes(progress: &DownloadProgress) -> Option<u64> {
    let succeeded = progress.succeeded_segments();
    if succeeded == 0 {
        return None;
    }

    let average = progress.downloaded_bytes as f64 / succeeded as f64;
    let expected_segments = progress.total_segments.saturating_sub(progress.failed_segments);
    Some((average * expected_segments as f64).round() as u64)
}
