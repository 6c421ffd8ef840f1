//! Command runtime router.
//!
//! A thin async command queue that serializes captures and UI commands
//! against one [`CaptureManager`]. Downloads themselves run on their own
//! tasks, so a long download never holds up the queue.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

use crate::commands::{handle_command, Command};
use crate::core::manager::CaptureManager;
use crate::core::models::{AppError, AppResult, CaptureInput, ManifestSummary, WindowId};

/// Queue depth of the router
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Messages understood by the runtime router.
#[derive(Debug)]
pub enum RuntimeCommand {
    Capture {
        input: CaptureInput,
        respond_to: oneshot::Sender<AppResult<ManifestSummary>>,
    },
    Command {
        command: Command,
        respond_to: oneshot::Sender<Value>,
    },
    WindowClosed {
        window_id: WindowId,
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle given to the interception layer and the UI bridge.
#[derive(Clone)]
pub struct CommandRuntimeHandle {
    sender: mpsc::Sender<RuntimeCommand>,
}

impl CommandRuntimeHandle {
    pub fn new(sender: mpsc::Sender<RuntimeCommand>) -> Self {
        Self { sender }
    }

    async fn send_command<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RuntimeCommand,
    ) -> AppResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| AppError::System(format!("Command runtime unavailable: {}", e)))?;
        rx.await
            .map_err(|_| AppError::System("Command runtime dropped response".into()))
    }

    pub async fn capture(&self, input: CaptureInput) -> AppResult<ManifestSummary> {
        self.send_command(|tx| RuntimeCommand::Capture {
            input,
            respond_to: tx,
        })
        .await?
    }

    pub async fn command(&self, command: Command) -> AppResult<Value> {
        self.send_command(|tx| RuntimeCommand::Command {
            command,
            respond_to: tx,
        })
        .await
    }

    /// Parse and run a raw JSON message; malformed input gets an `{error}` reply
    pub async fn message(&self, message: &str) -> AppResult<Value> {
        match serde_json::from_str::<Command>(message) {
            Ok(command) => self.command(command).await,
            Err(e) => Ok(serde_json::json!({ "error": format!("Invalid command: {}", e) })),
        }
    }

    pub async fn window_closed(&self, window_id: WindowId) -> AppResult<()> {
        self.send_command(|tx| RuntimeCommand::WindowClosed {
            window_id,
            respond_to: tx,
        })
        .await
    }
}

/// Spawn the router loop on the current tokio runtime.
pub fn spawn_command_runtime(manager: Arc<CaptureManager>) -> CommandRuntimeHandle {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    tokio::spawn(router_loop(manager, rx));
    info!("[RUNTIME] Command router spawned");
    CommandRuntimeHandle::new(tx)
}

async fn router_loop(manager: Arc<CaptureManager>, mut rx: mpsc::Receiver<RuntimeCommand>) {
    while let Some(cmd) = rx.recv().await {
        dispatch(&manager, cmd).await;
    }
    debug!("Command runtime channel closed, exiting router loop");
}

#[instrument(skip(manager, command), fields(?command))]
async fn dispatch(manager: &CaptureManager, command: RuntimeCommand) {
    match command {
        RuntimeCommand::Capture { input, respond_to } => {
            debug!("[RUNTIME_CMD] Capture from {}", input.source_url);
            let result = manager.on_capture(input).await;
            let _ = respond_to.send(result);
        }
        RuntimeCommand::Command {
            command,
            respond_to,
        } => {
            let reply = handle_command(manager, command).await;
            let _ = respond_to.send(reply);
        }
        RuntimeCommand::WindowClosed {
            window_id,
            respond_to,
        } => {
            manager.on_window_closed(window_id).await;
            let _ = respond_to.send(());
        }
    }
}
