//! Manifest Registry - captured playlists per browser window
//!
//! Captures are appended as they arrive; collapsing repeated captures of the
//! same stream happens when listing, so the stored history stays complete.
//! Each window's set sits behind its own async mutex and windows never share
//! a lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::models::{
    AppError, AppResult, CaptureInput, Manifest, ManifestSummary, WindowId,
};
use crate::core::storage::{storage_key, ManifestStore};
use crate::parsers::m3u8_parser::{extract_filename, parse_playlist};
use crate::utils::validation::is_http_url;

#[derive(Debug, Default)]
struct WindowManifests {
    loaded: bool,
    manifests: Vec<Manifest>,
}

type WindowSlot = Arc<Mutex<WindowManifests>>;

/// Stores captured manifests keyed by window
pub struct ManifestRegistry {
    windows: DashMap<WindowId, WindowSlot>,
    store: Arc<dyn ManifestStore>,
}

impl ManifestRegistry {
    pub fn new(store: Arc<dyn ManifestStore>) -> Self {
        Self {
            windows: DashMap::new(),
            store,
        }
    }

    /// Parse and store a capture, returning the stored manifest
    pub async fn capture(&self, input: CaptureInput) -> AppResult<Manifest> {
        if !is_http_url(&input.source_url) {
            return Err(AppError::Parse(format!(
                "Capture source is not an http(s) URL: {}",
                input.source_url
            )));
        }

        let parsed = parse_playlist(&input.raw_content, &input.source_url);
        let manifest = Manifest {
            id: Uuid::new_v4().to_string(),
            file_name: extract_filename(&input.source_url),
            source_url: input.source_url,
            raw_content: input.raw_content,
            segments: parsed.segments,
            title: input.title.filter(|t| !t.trim().is_empty()),
            resolution: parsed.resolution,
            duration: parsed.duration,
            captured_at: Utc::now(),
            window_id: input.window_id,
            tab_id: input.tab_id,
        };

        debug!(
            "Captured manifest {} ({} segments) for window {}",
            manifest.file_name,
            manifest.segments.len(),
            manifest.window_id
        );

        self.insert(manifest.clone()).await;
        Ok(manifest)
    }

    /// Append an already-built manifest to its window as-is
    pub async fn insert(&self, manifest: Manifest) {
        let window_id = manifest.window_id;
        let slot = self.window_slot(window_id);
        let mut window = slot.lock().await;
        self.ensure_loaded(window_id, &mut window).await;

        window.manifests.push(manifest);
        self.persist(window_id, &window.manifests).await;
    }

    /// Deduplicated summaries for a window, most recent first
    pub async fn list(&self, window_id: WindowId) -> Vec<ManifestSummary> {
        let slot = self.window_slot(window_id);
        let mut window = slot.lock().await;
        self.ensure_loaded(window_id, &mut window).await;

        dedup_manifests(&window.manifests)
            .into_iter()
            .map(Manifest::summary)
            .collect()
    }

    pub async fn get(&self, window_id: WindowId, id: &str) -> AppResult<Manifest> {
        let slot = self.window_slot(window_id);
        let mut window = slot.lock().await;
        self.ensure_loaded(window_id, &mut window).await;

        window
            .manifests
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| AppError::ManifestNotFound(id.to_string()))
    }

    /// Remove one manifest, or all of them when `id` is `None`.
    /// Returns the number of stored manifests removed.
    pub async fn clear(&self, window_id: WindowId, id: Option<&str>) -> usize {
        let slot = self.window_slot(window_id);
        let mut window = slot.lock().await;
        self.ensure_loaded(window_id, &mut window).await;

        let before = window.manifests.len();
        match id {
            Some(id) => window.manifests.retain(|m| m.id != id),
            None => window.manifests.clear(),
        }
        let removed = before - window.manifests.len();

        if removed > 0 {
            self.persist(window_id, &window.manifests).await;
            info!("Cleared {} manifest(s) from window {}", removed, window_id);
        }
        removed
    }

    /// Drop a closed window's manifests from memory and storage
    pub async fn close_window(&self, window_id: WindowId) {
        self.windows.remove(&window_id);
        if let Err(e) = self.store.remove(&storage_key(window_id)).await {
            warn!("Failed to remove stored manifests for window {}: {}", window_id, e);
        }
        info!("Released manifests for closed window {}", window_id);
    }

    /// Number of stored captures for a window, duplicates and empties included
    pub async fn stored_count(&self, window_id: WindowId) -> usize {
        let slot = self.window_slot(window_id);
        let mut window = slot.lock().await;
        self.ensure_loaded(window_id, &mut window).await;
        window.manifests.len()
    }

    fn window_slot(&self, window_id: WindowId) -> WindowSlot {
        self.windows.entry(window_id).or_default().clone()
    }

    async fn ensure_loaded(&self, window_id: WindowId, window: &mut WindowManifests) {
        if window.loaded {
            return;
        }
        window.loaded = true;

        match self.store.read(&storage_key(window_id)).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Vec<Manifest>>(&bytes) {
                Ok(mut stored) => {
                    debug!("Restored {} manifest(s) for window {}", stored.len(), window_id);
                    stored.append(&mut window.manifests);
                    window.manifests = stored;
                }
                Err(e) => warn!("Discarding unreadable manifests for window {}: {}", window_id, e),
            },
            Ok(None) => {}
            Err(e) => warn!("Failed to load manifests for window {}: {}", window_id, e),
        }
    }

    async fn persist(&self, window_id: WindowId, manifests: &[Manifest]) {
        let key = storage_key(window_id);
        let result = match serde_json::to_vec(manifests) {
            Ok(bytes) => self.store.write(&key, bytes).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("Failed to persist manifests for window {}: {}", window_id, e);
        }
    }
}

/// Identity used to collapse repeated captures of the same stream
pub fn dedup_key(manifest: &Manifest) -> String {
    match manifest.title.as_deref() {
        Some(title) if !title.trim().is_empty() => {
            format!("{}|{}", title, manifest.segments.len())
        }
        _ => manifest
            .source_url
            .split('?')
            .next()
            .unwrap_or(&manifest.source_url)
            .to_string(),
    }
}

/// Drop empty manifests, keep the latest capture per dedup key, newest first.
///
/// Ties on `captured_at` go to the later-stored manifest, so the result does
/// not depend on map iteration order.
pub fn dedup_manifests(manifests: &[Manifest]) -> Vec<&Manifest> {
    let mut latest: HashMap<String, (usize, &Manifest)> = HashMap::new();

    for (position, manifest) in manifests.iter().enumerate() {
        if manifest.segments.is_empty() {
            continue;
        }

        let key = dedup_key(manifest);
        let replace = match latest.get(&key) {
            Some((_, kept)) => manifest.captured_at >= kept.captured_at,
            None => true,
        };
        if replace {
            latest.insert(key, (position, manifest));
        }
    }

    let mut kept: Vec<(usize, &Manifest)> = latest.into_values().collect();
    kept.sort_by(|(pos_a, a), (pos_b, b)| {
        newest_first(&a.captured_at, &b.captured_at).then_with(|| pos_b.cmp(pos_a))
    });
    kept.into_iter().map(|(_, manifest)| manifest).collect()
}

fn newest_first(a: &DateTime<Utc>, b: &DateTime<Utc>) -> std::cmp::Ordering {
    b.cmp(a)
}
