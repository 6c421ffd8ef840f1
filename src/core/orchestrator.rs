//! Download Orchestrator
//!
//! Drives one run per requested download: segments are fetched in fixed-size
//! concurrent batches, each segment with its own retry loop and per-attempt
//! timeout. Segments that exhaust their retries are recorded as missing and
//! the run carries on. Batch output is streamed into the archive session in
//! playback order before the next batch starts.
//!
//! Cancellation is cooperative. The flag is checked at every batch start and
//! wakes the in-flight batch, whose pending requests are dropped.

use bytes::Bytes;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::archive::{ArchiveAssembler, ArchiveSession};
use crate::core::config::DownloadConfig;
use crate::core::downloader::SegmentFetcher;
use crate::core::error_handling::{FetchError, RetryPolicy};
use crate::core::models::{
    AppError, AppResult, DownloadProgress, DownloadRecord, DownloadResult, DownloadState,
    Manifest,
};
use crate::core::progress_tracker::SegmentProgressTracker;
use crate::core::reporter::ProgressReporter;
use crate::utils::file_utils::archive_file_name;

/// Tunables for download runs
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub batch_size: usize,
    pub retry_policy: RetryPolicy,
    pub request_timeout: Duration,
    pub speed_window: Duration,
    pub result_retention: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

impl From<&DownloadConfig> for OrchestratorConfig {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            retry_policy: config.retry_policy(),
            request_timeout: config.request_timeout(),
            speed_window: config.speed_window(),
            result_retention: config.result_retention(),
        }
    }
}

/// Shared state of one run
struct DownloadHandle {
    record: RwLock<DownloadRecord>,
    cancel: watch::Sender<bool>,
    result: Mutex<Option<DownloadResult>>,
}

impl DownloadHandle {
    fn new(record: DownloadRecord) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            record: RwLock::new(record),
            cancel,
            result: Mutex::new(None),
        }
    }

    fn snapshot(&self) -> DownloadRecord {
        self.record.read().clone()
    }

    fn cancel_requested(&self) -> bool {
        self.record.read().cancel_requested
    }

    fn set_state(&self, state: DownloadState) -> DownloadRecord {
        let mut record = self.record.write();
        record.state = state;
        record.clone()
    }

    fn set_progress(&self, progress: DownloadProgress) -> DownloadRecord {
        let mut record = self.record.write();
        record.progress = progress;
        record.clone()
    }

    /// Leave the fetch stage unless a cancel got in first
    fn enter_archive_stage(&self) -> bool {
        let mut record = self.record.write();
        if record.cancel_requested {
            return false;
        }
        record.state = DownloadState::CreatingArchive;
        true
    }

    fn request_cancel(&self) -> bool {
        let accepted = {
            let mut record = self.record.write();
            match record.state {
                DownloadState::Starting | DownloadState::Downloading => {
                    record.cancel_requested = true;
                    true
                }
                _ => false,
            }
        };
        if accepted {
            self.cancel.send_replace(true);
        }
        accepted
    }

    /// Terminal transition; the result is stored before the state becomes visible.
    ///
    /// An accepted cancel wins over any fetch-stage failure that raced it.
    fn finish(&self, outcome: AppResult<DownloadResult>) -> DownloadRecord {
        let mut record = self.record.write();
        record.finished_at = Some(Utc::now());
        match outcome {
            Ok(result) => {
                record.archive_name = Some(result.archive_name.clone());
                *self.result.lock() = Some(result);
                record.state = DownloadState::Complete;
            }
            Err(AppError::Cancelled) => {
                record.state = DownloadState::Cancelled;
            }
            Err(_) if record.cancel_requested => {
                record.state = DownloadState::Cancelled;
            }
            Err(e) => {
                record.state = DownloadState::Failed;
                record.error = Some(e.to_string());
            }
        }
        record.clone()
    }
}

/// Compression is CPU bound, so batch writes stay off the async workers
async fn write_batch(
    mut session: ArchiveSession,
    batch: Vec<(usize, Bytes)>,
) -> AppResult<ArchiveSession> {
    if batch.is_empty() {
        return Ok(session);
    }
    tokio::task::spawn_blocking(move || -> AppResult<ArchiveSession> {
        for (index, data) in &batch {
            session.add_segment(*index, data)?;
        }
        Ok(session)
    })
    .await
    .map_err(|e| AppError::AssemblyFailed(format!("Archive task failed: {}", e)))?
}

/// Resolves once the cancel flag is raised
async fn cancellation(receiver: &mut watch::Receiver<bool>) {
    loop {
        let raised = *receiver.borrow();
        if raised {
            return;
        }
        if receiver.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

struct OrchestratorInner {
    fetcher: Arc<dyn SegmentFetcher>,
    assembler: Arc<ArchiveAssembler>,
    reporter: Arc<ProgressReporter>,
    config: OrchestratorConfig,
    downloads: RwLock<HashMap<String, Arc<DownloadHandle>>>,
}

/// Runs and tracks segment downloads
#[derive(Clone)]
pub struct DownloadOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl DownloadOrchestrator {
    pub fn new(
        fetcher: Arc<dyn SegmentFetcher>,
        assembler: Arc<ArchiveAssembler>,
        reporter: Arc<ProgressReporter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(OrchestratorInner {
                fetcher,
                assembler,
                reporter,
                config,
                downloads: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn reporter(&self) -> &Arc<ProgressReporter> {
        &self.inner.reporter
    }

    /// Start downloading `manifest`; fails before creating a run when it has no segments
    pub fn start(&self, manifest: Manifest) -> AppResult<String> {
        if manifest.segments.is_empty() {
            return Err(AppError::NoSegments(manifest.id.clone()));
        }

        let download_id = Uuid::new_v4().to_string();
        let record = DownloadRecord {
            download_id: download_id.clone(),
            manifest_id: manifest.id.clone(),
            manifest_name: manifest.display_name().to_string(),
            state: DownloadState::Starting,
            progress: DownloadProgress {
                total_segments: manifest.segments.len(),
                ..Default::default()
            },
            cancel_requested: false,
            error: None,
            archive_name: None,
            started_at: Utc::now(),
            finished_at: None,
        };

        let handle = Arc::new(DownloadHandle::new(record.clone()));
        self.inner
            .downloads
            .write()
            .insert(download_id.clone(), handle.clone());
        self.inner.reporter.report(&record);

        info!(
            "Starting download {} for manifest {} ({} segments)",
            download_id,
            manifest.id,
            manifest.segments.len()
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run(handle, manifest).await;
        });

        Ok(download_id)
    }

    /// Request cancellation; false once the run is past the fetch stage
    pub fn cancel(&self, download_id: &str) -> AppResult<bool> {
        let handle = self.inner.handle(download_id)?;
        let accepted = handle.request_cancel();
        if accepted {
            info!("Cancellation requested for download {}", download_id);
            self.inner.reporter.report(&handle.snapshot());
        }
        Ok(accepted)
    }

    pub fn status_of(&self, download_id: &str) -> AppResult<DownloadRecord> {
        Ok(self.inner.handle(download_id)?.snapshot())
    }

    /// Every run not yet evicted, oldest first
    pub fn statuses(&self) -> Vec<DownloadRecord> {
        let mut records: Vec<DownloadRecord> = self
            .inner
            .downloads
            .read()
            .values()
            .map(|h| h.snapshot())
            .collect();
        records.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        records
    }

    /// Hand over the result of a finished run and evict it.
    ///
    /// Returns `None` while the run is still going, and for cancelled or
    /// failed runs (which are evicted all the same).
    pub fn take_result(&self, download_id: &str) -> AppResult<Option<DownloadResult>> {
        let handle = self.inner.handle(download_id)?;
        if !handle.snapshot().state.is_terminal() {
            return Ok(None);
        }
        let result = handle.result.lock().take();
        self.inner.evict(download_id);
        Ok(result)
    }

    /// Evict a finished run without taking its result
    pub fn acknowledge(&self, download_id: &str) -> AppResult<bool> {
        let handle = self.inner.handle(download_id)?;
        if !handle.snapshot().state.is_terminal() {
            return Ok(false);
        }
        self.inner.evict(download_id);
        Ok(true)
    }
}

impl OrchestratorInner {
    fn handle(&self, download_id: &str) -> AppResult<Arc<DownloadHandle>> {
        self.downloads
            .read()
            .get(download_id)
            .cloned()
            .ok_or_else(|| AppError::DownloadNotFound(download_id.to_string()))
    }

    fn evict(&self, download_id: &str) {
        if self.downloads.write().remove(download_id).is_some() {
            debug!("Evicted download {}", download_id);
        }
        self.reporter.evict(download_id);
    }

    async fn run(self: Arc<Self>, handle: Arc<DownloadHandle>, manifest: Manifest) {
        let download_id = handle.record.read().download_id.clone();
        let outcome = self.execute(&handle, &manifest).await;

        match &outcome {
            Ok(result) => {
                info!(
                    "Download {} complete: {}/{} segments, {} bytes, archive {}",
                    result.download_id,
                    result.succeeded_segments,
                    result.total_segments,
                    result.downloaded_bytes,
                    result.archive_name
                );
            }
            Err(AppError::Cancelled) => {
                info!("Download {} cancelled", download_id);
            }
            Err(e) => {
                error!("Download {} failed: {}", download_id, e);
            }
        }

        let record = handle.finish(outcome);

        self.reporter.finish(&record);
        self.schedule_eviction(download_id);
    }

    fn schedule_eviction(self: Arc<Self>, download_id: String) {
        let retention = self.config.result_retention;
        let inner = Arc::downgrade(&self);
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if let Some(inner) = inner.upgrade() {
                inner.evict(&download_id);
            }
        });
    }

    async fn execute(
        &self,
        handle: &DownloadHandle,
        manifest: &Manifest,
    ) -> AppResult<DownloadResult> {
        let total = manifest.segments.len();
        let batch_size = self.config.batch_size.max(1);
        let mut cancel_rx = handle.cancel.subscribe();
        let mut tracker = SegmentProgressTracker::new(total, self.config.speed_window);
        let mut session = self.assembler.begin(manifest)?;
        let mut missing = Vec::new();

        if handle.cancel_requested() {
            return Err(AppError::Cancelled);
        }
        let record = handle.set_state(DownloadState::Downloading);
        self.reporter.report(&record);

        for (batch_index, chunk) in manifest.segments.chunks(batch_size).enumerate() {
            if handle.cancel_requested() {
                return Err(AppError::Cancelled);
            }

            let offset = batch_index * batch_size;
            debug!(
                "Download {}: batch {} (segments {}..{})",
                record.download_id,
                batch_index,
                offset,
                offset + chunk.len()
            );

            let mut pending: FuturesUnordered<_> = chunk
                .iter()
                .enumerate()
                .map(|(i, url)| {
                    let index = offset + i;
                    async move { (index, self.fetch_with_retry(index, url).await) }
                })
                .collect();
            let mut fetched: Vec<Option<Bytes>> = vec![None; chunk.len()];

            loop {
                tokio::select! {
                    biased;
                    _ = cancellation(&mut cancel_rx) => {
                        debug!("Download {}: dropping in-flight batch", record.download_id);
                        return Err(AppError::Cancelled);
                    }
                    settled = pending.next() => {
                        match settled {
                        Some((index, Ok(data))) => {
                            let progress = tracker.record_success(data.len() as u64);
                            fetched[index - offset] = Some(data);
                            self.reporter.report(&handle.set_progress(progress));
                        }
                        Some((index, Err(e))) => {
                            warn!(
                                "Download {}: segment {} missing after retries: {}",
                                record.download_id, index, e
                            );
                            missing.push(index);
                            let progress = tracker.record_failure();
                            self.reporter.report(&handle.set_progress(progress));
                        }
                        None => break,
                        }
                    }
                }
            }

            let batch: Vec<(usize, Bytes)> = fetched
                .into_iter()
                .enumerate()
                .filter_map(|(i, data)| data.map(|data| (offset + i, data)))
                .collect();
            session = write_batch(session, batch).await?;
        }

        if handle.cancel_requested() {
            return Err(AppError::Cancelled);
        }
        let progress = tracker.snapshot();
        if progress.succeeded_segments() == 0 {
            return Err(AppError::NoSegmentsFetched { total });
        }

        if !handle.enter_archive_stage() {
            return Err(AppError::Cancelled);
        }
        self.reporter.report(&handle.set_progress(progress.clone()));

        let archive = tokio::task::spawn_blocking(move || session.finish())
            .await
            .map_err(|e| AppError::AssemblyFailed(format!("Archive task failed: {}", e)))??;

        missing.sort_unstable();
        let archive_name = archive_file_name(
            &manifest.file_name,
            Utc::now(),
            self.assembler.extension(),
        );

        Ok(DownloadResult {
            download_id: record.download_id.clone(),
            manifest_id: manifest.id.clone(),
            archive_name,
            archive_size: archive.len() as u64,
            archive,
            total_segments: total,
            succeeded_segments: progress.succeeded_segments(),
            missing_segments: missing,
            downloaded_bytes: progress.downloaded_bytes,
        })
    }

    /// One segment with retries; each attempt bounded by the request timeout
    async fn fetch_with_retry(&self, index: usize, url: &str) -> Result<Bytes, FetchError> {
        let policy = &self.config.retry_policy;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome =
                match tokio::time::timeout(self.config.request_timeout, self.fetcher.fetch(url))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(FetchError::Timeout),
                };

            match outcome {
                Ok(data) => return Ok(data),
                Err(e) if policy.should_retry(&e, attempt) => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        "Segment {} attempt {} failed ({}), retrying in {:?}",
                        index, attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_in(state: DownloadState) -> DownloadHandle {
        DownloadHandle::new(DownloadRecord {
            download_id: "d".to_string(),
            manifest_id: "m".to_string(),
            manifest_name: "index.m3u8".to_string(),
            state,
            progress: DownloadProgress {
                total_segments: 3,
                ..Default::default()
            },
            cancel_requested: false,
            error: None,
            archive_name: None,
            started_at: Utc::now(),
            finished_at: None,
        })
    }

    #[test]
    fn test_cancel_beats_racing_fetch_failure() {
        let handle = handle_in(DownloadState::Downloading);
        assert!(handle.request_cancel());

        let record = handle.finish(Err(AppError::NoSegmentsFetched { total: 3 }));
        assert_eq!(record.state, DownloadState::Cancelled);
        assert!(record.error.is_none());
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn test_failure_without_cancel_stays_failed() {
        let handle = handle_in(DownloadState::Downloading);
        let record = handle.finish(Err(AppError::NoSegmentsFetched { total: 3 }));
        assert_eq!(record.state, DownloadState::Failed);
        assert!(record.error.unwrap().contains("None of the 3"));
    }

    #[test]
    fn test_cancel_refused_once_archiving() {
        let handle = handle_in(DownloadState::Downloading);
        assert!(handle.enter_archive_stage());
        assert!(!handle.request_cancel());
        assert!(!*handle.cancel.borrow());

        let record = handle.finish(Err(AppError::AssemblyFailed("disk full".to_string())));
        assert_eq!(record.state, DownloadState::Failed);
    }
}
