//! HLS Archiver - Core Library
//!
//! Captures HLS playlists, keeps them per browser window, and turns a chosen
//! playlist into a single archive holding every segment plus a playlist
//! rewritten to reference them locally.

pub mod commands;
pub mod core;
pub mod parsers;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{
    config::AppConfig,
    manager::CaptureManager,
    models::{
        AppError, AppResult, CaptureInput, DownloadRecord, DownloadResult, DownloadState,
        Manifest, ManifestSummary,
    },
    reporter::ProgressEvent,
    runtime::{spawn_command_runtime, CommandRuntimeHandle},
};

use std::sync::Arc;

/// Application state shared with the embedding host
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CaptureManager>,
    pub config: AppConfig,
    pub runtime: CommandRuntimeHandle,
}

impl AppState {
    /// Load configuration, build the manager and spawn the command router.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> anyhow::Result<Self> {
        let config = Self::load_or_initialize_config();
        Self::with_config(config)
    }

    pub fn with_config(config: AppConfig) -> anyhow::Result<Self> {
        let manager = Arc::new(
            CaptureManager::from_config(config.clone())
                .map_err(|e| anyhow::anyhow!("Failed to create capture manager: {}", e))?,
        );
        let runtime = spawn_command_runtime(manager.clone());

        Ok(Self {
            manager,
            config,
            runtime,
        })
    }

    fn load_or_initialize_config() -> AppConfig {
        match AppConfig::load() {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!(
                    "Failed to load configuration from disk: {:#}. Using defaults",
                    err
                );
                let default_cfg = AppConfig::default();
                if let Err(save_err) = default_cfg.save() {
                    tracing::warn!("Failed to persist default configuration: {}", save_err);
                }
                default_cfg
            }
        }
    }
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize logging with the default level
pub fn init() -> anyhow::Result<()> {
    utils::logging::init_tracing("info");
    tracing::info!("{} v{} initialized", NAME, VERSION);
    Ok(())
}
