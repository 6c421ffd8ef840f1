//! Core business logic module
//!
//! Domain models, the manifest registry, the download pipeline (fetch,
//! retry, progress, archive) and the surface that ties them together.

pub mod archive;
pub mod config;
pub mod downloader;
pub mod error_handling;
pub mod manager;
pub mod models;
pub mod orchestrator;
pub mod progress_tracker;
pub mod registry;
pub mod reporter;
pub mod runtime;
pub mod storage;

#[cfg(test)]
mod test_support;



// Re-export commonly used types
pub use config::AppConfig;
pub use manager::CaptureManager;
pub use orchestrator::DownloadOrchestrator;
pub use registry::ManifestRegistry;
