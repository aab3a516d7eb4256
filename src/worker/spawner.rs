//! Sandboxed worker process spawner.
//!
//! Spawns a headless agent process per conversation folder with:
//! - `kill_on_drop(true)` so processes are cleaned up automatically.
//! - `env_clear()` + a safe variable allowlist, so transport credentials and
//!   other host secrets never leak into the worker's environment.
//! - A configurable startup timeout: if the worker does not emit its ready
//!   signal (first stdout line) within the window, the process is killed
//!   and `AppError::Worker("startup timeout")` is returned.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::codec::WorkerCodec;
use super::WorkerEvent;
use crate::{AppError, Result};

/// Environment variables inherited by every spawned worker process.
///
/// Every other variable from the host's environment is stripped via
/// `env_clear()` before the child is launched.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Configuration for spawning one worker process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Host CLI binary (e.g., `claude`, `codex`).
    pub host_cli: String,
    /// Default arguments passed to the host CLI before the turn payload.
    pub host_cli_args: Vec<String>,
    /// Conversation folder slug, injected as `DISPATCHER_FOLDER`.
    pub folder: String,
    /// Conversation folder the worker is rooted in; becomes its working
    /// directory.
    pub folder_root: PathBuf,
    /// Writable IPC directory mounted into the worker's view, injected as
    /// `DISPATCHER_IPC_DIR`.
    pub ipc_dir: PathBuf,
    /// Chat id the worker is answering for, injected as `DISPATCHER_CHAT_ID`.
    pub chat_id: String,
    /// Whether the owning conversation is the operator's main conversation.
    pub is_main: bool,
    /// Capability flags inherited from the conversation record.
    pub capabilities: Vec<String>,
    /// Existing session id to resume, if any.
    pub session_id: Option<String>,
    /// Maximum time to wait for the worker's ready signal.
    pub startup_timeout: Duration,
    /// Optional per-conversation spawn override (extra mounts/env), passed
    /// through untouched.
    pub container_overrides: Option<Value>,
}

/// Active stdio connection to a spawned worker process.
pub struct WorkerConnection {
    /// Conversation folder this worker serves.
    pub folder: String,
    /// Child process handle — kept alive so `kill_on_drop` works.
    pub child: Child,
    /// Worker's stdin for sending turn payloads.
    pub stdin: ChildStdin,
    /// NDJSON-framed reader over the worker's stdout, capped at
    /// [`super::codec::MAX_LINE_BYTES`] per event.
    pub stdout: FramedRead<ChildStdout, WorkerCodec>,
}

/// Spawn a worker process and wait for its ready signal.
///
/// # Errors
///
/// - `AppError::Worker("failed to spawn worker: …")` — OS spawn failure.
/// - `AppError::Worker("startup timeout …")` — no ready line within the window.
/// - `AppError::Worker("worker process exited before ready signal")` — early EOF.
pub async fn spawn_worker(config: &SpawnConfig) -> Result<WorkerConnection> {
    let mut cmd = Command::new(&config.host_cli);

    for arg in &config.host_cli_args {
        cmd.arg(arg);
    }

    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }

    cmd.env("DISPATCHER_FOLDER", &config.folder);
    cmd.env("DISPATCHER_CHAT_ID", &config.chat_id);
    cmd.env("DISPATCHER_IPC_DIR", &config.ipc_dir);
    cmd.env("DISPATCHER_IS_MAIN", if config.is_main { "1" } else { "0" });
    cmd.env("DISPATCHER_CAPABILITIES", config.capabilities.join(","));
    if let Some(session_id) = &config.session_id {
        cmd.env("DISPATCHER_SESSION_ID", session_id);
    }

    cmd.current_dir(&config.folder_root)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Worker(format!("failed to spawn worker: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Worker("failed to capture worker stdin".into()))?;
    let stdout_raw = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Worker("failed to capture worker stdout".into()))?;

    let mut reader = FramedRead::new(stdout_raw, WorkerCodec::new());

    match tokio::time::timeout(config.startup_timeout, reader.next()).await {
        Ok(Some(Ok(line))) => {
            info!(
                folder = %config.folder,
                ready_line = line.trim(),
                "worker emitted ready signal"
            );
        }
        Ok(Some(Err(err))) => {
            return Err(AppError::Worker(format!(
                "failed to read worker ready signal: {err}"
            )));
        }
        Ok(None) => {
            return Err(AppError::Worker(
                "worker process exited before ready signal".into(),
            ));
        }
        Err(_elapsed) => {
            child.kill().await.ok();
            return Err(AppError::Worker(format!(
                "startup timeout: worker did not emit ready signal within {:?}",
                config.startup_timeout
            )));
        }
    }

    Ok(WorkerConnection {
        folder: config.folder.clone(),
        child,
        stdin,
        stdout: reader,
    })
}

/// Spawn a background task that awaits child-process exit and emits
/// [`WorkerEvent::Exited`] into the pool's event loop.
///
/// The task respects `cancel`: when the token is cancelled the task exits
/// without emitting an event, leaving orderly shutdown to the caller.
#[must_use]
pub fn monitor_exit(
    folder: String,
    mut child: Child,
    event_tx: mpsc::Sender<WorkerEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = child.wait() => {
                let (exit_code, reason) = match result {
                    Ok(status) => {
                        let code = status.code();
                        let reason = code.map_or_else(
                            || "process terminated by signal".to_owned(),
                            |c| format!("process exited with code {c}"),
                        );
                        (code, reason)
                    }
                    Err(err) => {
                        warn!(folder, %err, "error waiting for worker child process");
                        (None, format!("wait error: {err}"))
                    }
                };

                if event_tx
                    .send(WorkerEvent::Exited { folder: folder.clone(), exit_code, reason })
                    .await
                    .is_err()
                {
                    warn!(folder, "event_tx closed before Exited could be delivered");
                }
            }
            () = cancel.cancelled() => {
                info!(folder, "monitor_exit: cancellation received, exiting monitor");
            }
        }
    })
}
