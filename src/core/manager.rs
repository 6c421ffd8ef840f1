//! Capture Manager - the query/command surface over registry and downloads
//!
//! Wires the manifest registry, download orchestrator and progress reporter
//! together and exposes the operations the UI layer calls.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::core::archive::{ArchiveAssembler, ArchiveBackend, ZipBackend};
use crate::core::config::AppConfig;
use crate::core::downloader::{HttpSegmentFetcher, SegmentFetcher};
use crate::core::models::{
    AppError, AppResult, CaptureInput, DownloadRecord, DownloadResult, Manifest,
    ManifestSummary, WindowId,
};
use crate::core::orchestrator::{DownloadOrchestrator, OrchestratorConfig};
use crate::core::registry::ManifestRegistry;
use crate::core::reporter::{DownloadSubscription, ProgressEvent, ProgressReporter};
use crate::core::storage::{FileStore, ManifestStore, MemoryStore};
use crate::utils::network::build_http_client;

pub struct CaptureManager {
    registry: ManifestRegistry,
    orchestrator: DownloadOrchestrator,
    reporter: Arc<ProgressReporter>,
    http: Option<HttpSegmentFetcher>,
}

impl CaptureManager {
    /// Build with explicit collaborators
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ManifestStore>,
        fetcher: Arc<dyn SegmentFetcher>,
        backend: Arc<dyn ArchiveBackend>,
    ) -> Self {
        let reporter = Arc::new(ProgressReporter::new(
            Duration::from_millis(config.reporter.min_emit_interval_ms),
            config.reporter.channel_capacity,
        ));
        let assembler = Arc::new(ArchiveAssembler::new(
            backend,
            config.archive.collision_policy,
            config.archive.compress_segments,
        ));
        let orchestrator = DownloadOrchestrator::new(
            fetcher,
            assembler,
            reporter.clone(),
            OrchestratorConfig::from(&config.download),
        );

        Self {
            registry: ManifestRegistry::new(store),
            orchestrator,
            reporter,
            http: None,
        }
    }

    /// Build the production stack: on-disk (or in-memory) store, reqwest, zip
    pub fn from_config(config: AppConfig) -> AppResult<Self> {
        let store: Arc<dyn ManifestStore> = if config.storage.persist {
            let dir = config
                .manifest_dir()
                .map_err(|e| AppError::Config(e.to_string()))?;
            info!("Persisting manifests under {:?}", dir);
            Arc::new(FileStore::new(dir)?)
        } else {
            Arc::new(MemoryStore::new())
        };

        let client = build_http_client(&config.download.user_agent, &config.download.headers)?;
        let http = HttpSegmentFetcher::new(client, config.download.request_timeout());
        let backend = Arc::new(ZipBackend::new(
            config.archive.extension.clone(),
            config.archive.compression_level,
        ));

        let mut manager = Self::new(config, store, Arc::new(http.clone()), backend);
        manager.http = Some(http);
        Ok(manager)
    }

    pub fn registry(&self) -> &ManifestRegistry {
        &self.registry
    }

    pub fn reporter(&self) -> &Arc<ProgressReporter> {
        &self.reporter
    }

    /// Capture input arriving from the interception layer
    pub async fn on_capture(&self, input: CaptureInput) -> AppResult<ManifestSummary> {
        let manifest = self.registry.capture(input).await?;
        Ok(manifest.summary())
    }

    /// Fetch a playlist ourselves and capture it as if it had been intercepted
    pub async fn capture_url(
        &self,
        url: &str,
        window_id: WindowId,
        title: Option<String>,
    ) -> AppResult<ManifestSummary> {
        let http = self.http.as_ref().ok_or_else(|| {
            AppError::System("No HTTP client configured for direct captures".to_string())
        })?;
        let raw_content = http.fetch_text(url).await?;

        self.on_capture(CaptureInput {
            source_url: url.to_string(),
            raw_content,
            window_id,
            tab_id: None,
            title,
        })
        .await
    }

    pub async fn get_status(&self, window_id: WindowId) -> Vec<ManifestSummary> {
        self.registry.list(window_id).await
    }

    pub async fn get_manifest_data(&self, window_id: WindowId, id: &str) -> AppResult<Manifest> {
        self.registry.get(window_id, id).await
    }

    pub async fn start_download(&self, window_id: WindowId, manifest_id: &str) -> AppResult<String> {
        let manifest = self.registry.get(window_id, manifest_id).await?;
        self.orchestrator.start(manifest)
    }

    pub fn cancel_download(&self, download_id: &str) -> AppResult<bool> {
        self.orchestrator.cancel(download_id)
    }

    pub fn download_status(&self, download_id: &str) -> AppResult<DownloadRecord> {
        self.orchestrator.status_of(download_id)
    }

    /// Every download not yet evicted
    pub fn get_download_status(&self) -> Vec<DownloadRecord> {
        self.orchestrator.statuses()
    }

    pub async fn clear_manifest(&self, window_id: WindowId, id: Option<&str>) -> usize {
        self.registry.clear(window_id, id).await
    }

    pub fn take_download_result(&self, download_id: &str) -> AppResult<Option<DownloadResult>> {
        self.orchestrator.take_result(download_id)
    }

    pub fn acknowledge_download(&self, download_id: &str) -> AppResult<bool> {
        self.orchestrator.acknowledge(download_id)
    }

    pub fn subscribe(&self, download_id: &str) -> DownloadSubscription {
        self.reporter.subscribe(download_id)
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<ProgressEvent> {
        self.reporter.subscribe_all()
    }

    /// Window-close hook: the window's manifests go, other windows are untouched
    pub async fn on_window_closed(&self, window_id: WindowId) {
        debug!("Window {} closed", window_id);
        self.registry.close_window(window_id).await;
    }
}
