//! Command handlers
//!
//! The UI layer talks to the backend with JSON messages of the form
//! `{"action": "<name>", ...}`. [`handle_command`] dispatches a parsed
//! [`Command`] to the handlers in the submodules and shapes the reply.

pub mod download;
pub mod manifest;

pub use download::*;
pub use manifest::*;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::manager::CaptureManager;
use crate::core::models::{WindowId, NO_WINDOW};

fn no_window() -> WindowId {
    NO_WINDOW
}

/// Requests understood by the command surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    GetStatus {
        #[serde(default = "no_window")]
        window_id: WindowId,
    },
    GetManifestData {
        #[serde(default = "no_window")]
        window_id: WindowId,
        id: String,
    },
    StartDownload {
        #[serde(default = "no_window")]
        window_id: WindowId,
        manifest_id: String,
    },
    CancelDownload {
        download_id: String,
    },
    GetDownloadStatus,
    GetDownload {
        download_id: String,
    },
    AcknowledgeDownload {
        download_id: String,
    },
    ClearManifest {
        #[serde(default = "no_window")]
        window_id: WindowId,
        #[serde(default)]
        id: Option<String>,
    },
}

fn error_reply(message: impl Into<String>) -> Value {
    json!({ "error": message.into() })
}

fn to_reply<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| error_reply(e.to_string()))
}

/// Run one command and build its JSON reply
pub async fn handle_command(manager: &CaptureManager, command: Command) -> Value {
    match command {
        Command::GetStatus { window_id } => to_reply(get_status(manager, window_id).await),
        Command::GetManifestData { window_id, id } => {
            match get_manifest_data(manager, window_id, &id).await {
                Ok(manifest) => to_reply(manifest),
                Err(e) => error_reply(e),
            }
        }
        Command::StartDownload {
            window_id,
            manifest_id,
        } => match start_download(manager, window_id, &manifest_id).await {
            Ok(download_id) => json!({ "download_id": download_id }),
            Err(e) => error_reply(e),
        },
        Command::CancelDownload { download_id } => match cancel_download(manager, &download_id) {
            Ok(success) => json!({ "success": success }),
            Err(e) => json!({ "success": false, "error": e }),
        },
        Command::GetDownloadStatus => to_reply(get_download_status(manager)),
        Command::GetDownload { download_id } => match get_download(manager, &download_id) {
            Ok(record) => to_reply(record),
            Err(e) => error_reply(e),
        },
        Command::AcknowledgeDownload { download_id } => {
            match acknowledge_download(manager, &download_id) {
                Ok(success) => json!({ "success": success }),
                Err(e) => json!({ "success": false, "error": e }),
            }
        }
        Command::ClearManifest { window_id, id } => {
            let removed = clear_manifest(manager, window_id, id.as_deref()).await;
            json!({ "success": true, "removed": removed })
        }
    }
}

/// Parse a raw JSON message, run it, and serialize the reply
pub async fn handle_message(manager: &CaptureManager, message: &str) -> String {
    let reply = match serde_json::from_str::<Command>(message) {
        Ok(command) => handle_command(manager, command).await,
        Err(e) => error_reply(format!("Invalid command: {}", e)),
    };
    reply.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_parsing() {
        let command: Command =
            serde_json::from_str(r#"{"action":"start_download","window_id":3,"manifest_id":"m"}"#)
                .unwrap();
        assert_eq!(
            command,
            Command::StartDownload {
                window_id: 3,
                manifest_id: "m".to_string()
            }
        );

        let command: Command = serde_json::from_str(r#"{"action":"clear_manifest"}"#).unwrap();
        assert_eq!(
            command,
            Command::ClearManifest {
                window_id: NO_WINDOW,
                id: None
            }
        );

        let command: Command =
            serde_json::from_str(r#"{"action":"get_download_status"}"#).unwrap();
        assert_eq!(command, Command::GetDownloadStatus);

        let command: Command =
            serde_json::from_str(r#"{"action":"get_download","download_id":"d1"}"#).unwrap();
        assert_eq!(
            command,
            Command::GetDownload {
                download_id: "d1".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        assert!(serde_json::from_str::<Command>(r#"{"action":"format_disk"}"#).is_err());
        assert!(serde_json::from_str::<Command>(r#"{"window_id":1}"#).is_err());
    }
}
