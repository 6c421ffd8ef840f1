//! Manifest query and housekeeping commands

use tracing::{debug, info, warn};

use crate::core::manager::CaptureManager;
use crate::core::models::{Manifest, ManifestSummary, WindowId};

/// Deduplicated manifests captured in a window, newest first
pub async fn get_status(manager: &CaptureManager, window_id: WindowId) -> Vec<ManifestSummary> {
    let summaries = manager.get_status(window_id).await;
    debug!("Window {} lists {} manifest(s)", window_id, summaries.len());
    summaries
}

/// Full manifest, including raw content and segment URLs
pub async fn get_manifest_data(
    manager: &CaptureManager,
    window_id: WindowId,
    id: &str,
) -> Result<Manifest, String> {
    manager.get_manifest_data(window_id, id).await.map_err(|e| {
        warn!("Manifest lookup failed: {}", e);
        e.to_string()
    })
}

/// Clear one manifest, or the whole window when `id` is absent
pub async fn clear_manifest(manager: &CaptureManager, window_id: WindowId, id: Option<&str>) -> usize {
    let removed = manager.clear_manifest(window_id, id).await;
    info!(
        "Clear request for window {} ({}) removed {}",
        window_id,
        id.unwrap_or("all"),
        removed
    );
    removed
}
