//! Download control commands

use tracing::{error, info};

use crate::core::manager::CaptureManager;
use crate::core::models::{DownloadRecord, WindowId};

/// Start downloading a manifest, returning the new download id
pub async fn start_download(
    manager: &CaptureManager,
    window_id: WindowId,
    manifest_id: &str,
) -> Result<String, String> {
    match manager.start_download(window_id, manifest_id).await {
        Ok(download_id) => {
            info!("Download {} started for manifest {}", download_id, manifest_id);
            Ok(download_id)
        }
        Err(e) => {
            error!("Failed to start download for manifest {}: {}", manifest_id, e);
            Err(e.to_string())
        }
    }
}

/// Ask a running download to stop; `Ok(false)` when it is already past the fetch stage
pub fn cancel_download(manager: &CaptureManager, download_id: &str) -> Result<bool, String> {
    manager
        .cancel_download(download_id)
        .map_err(|e| e.to_string())
}

pub fn get_download_status(manager: &CaptureManager) -> Vec<DownloadRecord> {
    manager.get_download_status()
}

/// Status of a single download
pub fn get_download(
    manager: &CaptureManager,
    download_id: &str,
) -> Result<DownloadRecord, String> {
    manager
        .download_status(download_id)
        .map_err(|e| e.to_string())
}

/// Evict a finished download once the caller has seen its terminal state
pub fn acknowledge_download(manager: &CaptureManager, download_id: &str) -> Result<bool, String> {
    manager
        .acknowledge_download(download_id)
        .map_err(|e| e.to_string())
}
