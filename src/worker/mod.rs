//! Worker Pool — bounded sandboxed process pool, one worker per live
//! conversation folder, serialized per-folder turn delivery.

pub mod codec;
pub mod spawner;

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdout;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::channel::Channel;
use crate::config::WorkerConfig;
use crate::models::chat_id::ChatId;
use crate::models::session::{Purpose, Session, SessionStatus};
use crate::models::task::ContextMode;
use crate::persistence::session_repo::SessionRepo;
use crate::{AppError, Result};

use codec::WorkerCodec;
use spawner::{monitor_exit, spawn_worker, SpawnConfig};

/// A unit of work handed to the pool: the folder it's scoped to, the chat
/// id results should be delivered back to, and the turn payload.
#[derive(Debug, Clone)]
pub struct Turn {
    /// Chat id the reply is sent back to.
    pub chat_id: ChatId,
    /// Conversation folder the turn is scoped to.
    pub folder: String,
    /// Message text (or task prompt) delivered to the worker.
    pub payload: String,
    /// Whether the owning conversation is the main conversation.
    pub is_main: bool,
    /// Capability flags inherited from the conversation record.
    pub capabilities: Vec<String>,
    /// Isolated turns get a synthetic one-off session key instead of the
    /// folder's persistent session.
    pub context_mode: ContextMode,
    /// Optional per-conversation spawn override.
    pub container_overrides: Option<Value>,
}

/// Events the pool's bookkeeping loop reacts to. Only [`WorkerEvent::Exited`]
/// crosses the spawner/pool boundary as a public type; the rest stay
/// internal to this module.
#[derive(Debug)]
pub enum WorkerEvent {
    /// The child process behind `folder` exited on its own.
    Exited {
        /// Folder whose worker exited.
        folder: String,
        /// Process exit code, if the OS reported one.
        exit_code: Option<i32>,
        /// Human-readable exit reason for logs.
        reason: String,
    },
    /// A turn for `folder` finished draining (success, error, or timeout),
    /// freeing that folder up for idle-reap/eviction consideration again.
    TurnFinished {
        /// Folder whose in-flight turn finished.
        folder: String,
    },
}

enum PoolCommand {
    Enqueue(Turn),
    RunVoice {
        payload: String,
        respond_to: oneshot::Sender<Result<String>>,
    },
    ReapIdle,
    Shutdown,
}

/// Handle to a running Worker Pool. Cheap to clone; every clone shares the
/// same underlying command channel.
#[derive(Clone)]
pub struct WorkerPoolHandle {
    tx: mpsc::Sender<PoolCommand>,
}

impl WorkerPoolHandle {
    /// Enqueue a turn for ordinary (non-voice) delivery.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Worker` if the pool's command loop has shut down.
    pub async fn enqueue(&self, turn: Turn) -> Result<()> {
        self.tx
            .send(PoolCommand::Enqueue(turn))
            .await
            .map_err(|_| AppError::Worker("worker pool command channel closed".into()))
    }

    /// Same as [`Self::enqueue`], named for the Scheduler's call site.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Worker` if the pool's command loop has shut down.
    pub async fn enqueue_scheduled(&self, turn: Turn) -> Result<()> {
        self.enqueue(turn).await
    }

    /// Spawn a single-shot, unregistered worker for the voice path and
    /// await its first result.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Worker` if the pool's command loop has shut down
    /// or the worker never produces a result before its turn timeout.
    pub async fn run_voice(&self, payload: String) -> Result<String> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(PoolCommand::RunVoice { payload, respond_to })
            .await
            .map_err(|_| AppError::Worker("worker pool command channel closed".into()))?;
        rx.await
            .map_err(|_| AppError::Worker("voice worker dropped without responding".into()))?
    }

    /// Request graceful shutdown: stop accepting new turns, drain and kill
    /// every live worker.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(PoolCommand::Shutdown).await;
    }
}

struct FolderSlot {
    turn_tx: mpsc::Sender<Turn>,
    queue_depth: usize,
    cancel: CancellationToken,
    last_activity: Instant,
}

/// Spawn the Worker Pool's bookkeeping task and return a handle to it.
#[must_use]
pub fn spawn_pool(
    config: WorkerConfig,
    ipc_root: PathBuf,
    channels: Vec<Arc<dyn Channel>>,
    session_repo: SessionRepo,
) -> WorkerPoolHandle {
    let (tx, rx) = mpsc::channel(256);
    let handle = WorkerPoolHandle { tx: tx.clone() };

    tokio::spawn(run_pool(config, ipc_root, channels, session_repo, rx));

    let reap_tx = tx;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            if reap_tx.send(PoolCommand::ReapIdle).await.is_err() {
                break;
            }
        }
    });

    handle
}

async fn run_pool(
    config: WorkerConfig,
    ipc_root: PathBuf,
    channels: Vec<Arc<dyn Channel>>,
    session_repo: SessionRepo,
    mut rx: mpsc::Receiver<PoolCommand>,
) {
    let mut folders: HashMap<String, FolderSlot> = HashMap::new();
    let mut lru: VecDeque<String> = VecDeque::new();
    let (event_tx, mut event_rx) = mpsc::channel::<WorkerEvent>(64);

    loop {
        tokio::select! {
            Some(command) = rx.recv() => {
                match command {
                    PoolCommand::Enqueue(turn) => {
                        touch_lru(&mut lru, &turn.folder);
                        if let Err(err) = dispatch_turn(
                            &config, &ipc_root, &channels, &session_repo,
                            &mut folders, &mut lru, &event_tx, turn,
                        ).await {
                            warn!(%err, "failed to dispatch turn");
                        }
                    }
                    PoolCommand::RunVoice { payload, respond_to } => {
                        let config = config.clone();
                        let ipc_root = ipc_root.clone();
                        tokio::spawn(async move {
                            let result = run_voice_turn(&config, &ipc_root, payload).await;
                            let _ = respond_to.send(result);
                        });
                    }
                    PoolCommand::ReapIdle => {
                        reap_idle(&config, &mut folders, &mut lru);
                    }
                    PoolCommand::Shutdown => {
                        for (_, slot) in folders.drain() {
                            slot.cancel.cancel();
                        }
                        break;
                    }
                }
            }
            Some(event) = event_rx.recv() => {
                match event {
                    WorkerEvent::Exited { folder, exit_code, reason } => {
                        info!(%folder, ?exit_code, %reason, "worker exited");
                        folders.remove(&folder);
                        lru.retain(|f| f != &folder);
                    }
                    WorkerEvent::TurnFinished { folder } => {
                        if let Some(slot) = folders.get_mut(&folder) {
                            slot.queue_depth = slot.queue_depth.saturating_sub(1);
                            slot.last_activity = Instant::now();
                        }
                    }
                }
            }
            else => break,
        }
    }
}

fn touch_lru(lru: &mut VecDeque<String>, folder: &str) {
    lru.retain(|f| f != folder);
    lru.push_back(folder.to_owned());
}

fn reap_idle(config: &WorkerConfig, folders: &mut HashMap<String, FolderSlot>, lru: &mut VecDeque<String>) {
    let threshold = Duration::from_secs(config.idle_reap_seconds);
    let now = Instant::now();
    let expired: Vec<String> = folders
        .iter()
        .filter(|(_, slot)| slot.queue_depth == 0 && now.duration_since(slot.last_activity) >= threshold)
        .map(|(folder, _)| folder.clone())
        .collect();

    for folder in expired {
        if let Some(slot) = folders.remove(&folder) {
            slot.cancel.cancel();
        }
        lru.retain(|f| f != &folder);
        info!(%folder, "idle worker reaped");
    }
}

async fn dispatch_turn(
    config: &WorkerConfig,
    ipc_root: &Path,
    channels: &[Arc<dyn Channel>],
    session_repo: &SessionRepo,
    folders: &mut HashMap<String, FolderSlot>,
    lru: &mut VecDeque<String>,
    event_tx: &mpsc::Sender<WorkerEvent>,
    turn: Turn,
) -> Result<()> {
    if let Some(slot) = folders.get_mut(&turn.folder) {
        slot.queue_depth += 1;
        slot.last_activity = Instant::now();
        return slot
            .turn_tx
            .send(turn)
            .await
            .map_err(|_| AppError::Worker("folder worker task closed".into()));
    }

    if folders.len() >= config.pool_size as usize {
        evict_one_idle(folders, lru);
    }

    let slot = spawn_folder_worker(
        config.clone(),
        ipc_root.to_path_buf(),
        channels.to_vec(),
        session_repo.clone(),
        turn.folder.clone(),
        event_tx.clone(),
    );

    let folder = turn.folder.clone();
    let tx = slot.turn_tx.clone();
    folders.insert(folder.clone(), slot);
    touch_lru(lru, &folder);

    tx.send(turn)
        .await
        .map_err(|_| AppError::Worker("folder worker task closed immediately after spawn".into()))
}

fn evict_one_idle(folders: &mut HashMap<String, FolderSlot>, lru: &mut VecDeque<String>) {
    let candidate = lru
        .iter()
        .find(|folder| folders.get(*folder).is_some_and(|s| s.queue_depth == 0))
        .cloned();

    if let Some(folder) = candidate {
        if let Some(slot) = folders.remove(&folder) {
            slot.cancel.cancel();
        }
        lru.retain(|f| f != &folder);
        info!(%folder, "evicted least-recently-used idle worker to make room");
    }
}

fn spawn_folder_worker(
    config: WorkerConfig,
    ipc_root: PathBuf,
    channels: Vec<Arc<dyn Channel>>,
    session_repo: SessionRepo,
    folder: String,
    event_tx: mpsc::Sender<WorkerEvent>,
) -> FolderSlot {
    let (turn_tx, turn_rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();

    let slot = FolderSlot {
        turn_tx,
        queue_depth: 0,
        cancel: cancel.clone(),
        last_activity: Instant::now(),
    };

    tokio::spawn(folder_worker_loop(
        config,
        ipc_root,
        channels,
        session_repo,
        folder,
        turn_rx,
        event_tx,
        cancel,
    ));

    slot
}

#[allow(clippy::too_many_arguments)]
async fn folder_worker_loop(
    config: WorkerConfig,
    ipc_root: PathBuf,
    channels: Vec<Arc<dyn Channel>>,
    session_repo: SessionRepo,
    folder: String,
    mut turn_rx: mpsc::Receiver<Turn>,
    event_tx: mpsc::Sender<WorkerEvent>,
    cancel: CancellationToken,
) {
    let folder_root = ipc_root.join("conversations").join(&folder);
    if let Err(err) = tokio::fs::create_dir_all(&folder_root).await {
        warn!(%folder, %err, "failed to create folder root");
        return;
    }

    loop {
        let turn = tokio::select! {
            turn = turn_rx.recv() => match turn {
                Some(turn) => turn,
                None => break,
            },
            () = cancel.cancelled() => break,
        };

        let session = if matches!(turn.context_mode, ContextMode::Isolated) {
            None
        } else {
            session_for(&session_repo, &folder).await
        };
        // Only ever resumes with an id the worker itself assigned on a
        // prior turn (`session.external_id`) — the host never mints one.
        // Isolated turns keep their synthetic, non-persisted key since a
        // one-shot scheduled turn has nothing to resume into.
        let session_id = match (&session, turn.context_mode) {
            (Some(session), _) => session.external_id.clone(),
            (None, ContextMode::Isolated) => Some(format!("task:{}", uuid::Uuid::new_v4())),
            (None, ContextMode::Inherit) => None,
        };

        let spawn_config = SpawnConfig {
            host_cli: config.host_cli.clone(),
            host_cli_args: config.host_cli_args.clone(),
            folder: folder.clone(),
            folder_root: folder_root.clone(),
            ipc_dir: ipc_root.join("conversations").join(&folder),
            chat_id: turn.chat_id.to_string(),
            is_main: turn.is_main,
            capabilities: turn.capabilities.clone(),
            session_id,
            startup_timeout: Duration::from_secs(config.startup_timeout_seconds),
            container_overrides: turn.container_overrides.clone(),
        };

        let connection = match spawn_worker(&spawn_config).await {
            Ok(connection) => connection,
            Err(err) => {
                warn!(%folder, %err, "failed to spawn worker for turn");
                if let Some(session) = &session {
                    if session.status == SessionStatus::Starting {
                        if let Err(err) = session_repo
                            .update_status(session.id, SessionStatus::Terminated)
                            .await
                        {
                            warn!(%folder, %err, "failed to mark session terminated after failed spawn");
                        }
                    }
                }
                let _ = event_tx
                    .send(WorkerEvent::TurnFinished {
                        folder: folder.clone(),
                    })
                    .await;
                continue;
            }
        };

        if let Some(session) = &session {
            if session.status == SessionStatus::Starting {
                if let Err(err) = session_repo
                    .update_status(session.id, SessionStatus::Active)
                    .await
                {
                    warn!(%folder, %err, "failed to activate session");
                }
            }
        }

        let child = connection.child;
        let mut stdin = connection.stdin;
        let mut stdout = connection.stdout;

        let monitor_cancel = CancellationToken::new();
        let monitor = monitor_exit(folder.clone(), child, event_tx.clone(), monitor_cancel.clone());

        let request = serde_json::json!({
            "prompt": turn.payload,
            "folder": turn.folder,
        })
        .to_string();

        if let Err(err) = stdin.write_all(request.as_bytes()).await {
            warn!(%folder, %err, "failed to write turn to worker stdin");
            monitor_cancel.cancel();
            let _ = monitor.await;
            let _ = event_tx
                .send(WorkerEvent::TurnFinished {
                    folder: folder.clone(),
                })
                .await;
            continue;
        }
        if let Err(err) = stdin.write_all(b"\n").await {
            warn!(%folder, %err, "failed to terminate worker stdin line");
        }

        let turn_timeout = Duration::from_secs(config.turn_timeout_seconds);
        let drain = drain_turn(&mut stdout, &turn, &channels, &session_repo, session.as_ref());
        match tokio::time::timeout(turn_timeout, drain).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%folder, %err, "turn ended with error"),
            Err(_elapsed) => {
                warn!(%folder, "turn exceeded deadline, worker will be dropped");
            }
        }

        monitor_cancel.cancel();
        let _ = monitor.await;

        if let Some(session) = &session {
            if let Err(err) = session_repo.touch(session.id, None).await {
                warn!(%folder, %err, "failed to touch session activity");
            }
        }

        let _ = event_tx
            .send(WorkerEvent::TurnFinished {
                folder: folder.clone(),
            })
            .await;
    }
}

/// Find or persist the chat session backing `folder`'s inherit-mode turns.
/// Isolated-mode turns never call this — they get an ephemeral synthetic
/// id that is never written to the session table.
async fn session_for(session_repo: &SessionRepo, folder: &str) -> Option<Session> {
    match session_repo.find_active(folder, Purpose::Chat).await {
        Ok(Some(session)) => Some(session),
        Ok(None) => {
            let session = Session::new(folder.to_owned(), Purpose::Chat);
            match session_repo.create(&session).await {
                Ok(created) => Some(created),
                Err(err) => {
                    warn!(%folder, %err, "failed to persist new session");
                    None
                }
            }
        }
        Err(err) => {
            warn!(%folder, %err, "failed to look up active session");
            None
        }
    }
}

/// Read NDJSON events from a worker's stdout until it closes. Two event
/// types matter: `session_assigned` (persisted to the session row
/// immediately, before any further event is processed) and `result`
/// (forwarded, with `<internal>...</internal>` markers stripped, to the
/// Channel instance that owns the turn's chat id).
async fn drain_turn(
    stdout: &mut FramedRead<ChildStdout, WorkerCodec>,
    turn: &Turn,
    channels: &[Arc<dyn Channel>],
    session_repo: &SessionRepo,
    session: Option<&Session>,
) -> Result<()> {
    let owner = channels.iter().find(|c| c.owns(&turn.chat_id));

    while let Some(line) = stdout.next().await {
        let line = line?;
        let Ok(event) = serde_json::from_str::<Value>(line.trim_end()) else {
            continue;
        };

        match event.get("type").and_then(Value::as_str) {
            Some("session_assigned") => {
                if let (Some(session), Some(external_id)) =
                    (session, event.get("session_id").and_then(Value::as_str))
                {
                    if let Err(err) = session_repo.record_external_id(session.id, external_id).await {
                        warn!(%err, folder = %turn.folder, "failed to persist worker-assigned session id");
                    }
                }
            }
            Some("result") => {
                let Some(channel) = owner else { continue };
                let text = extract_result_text(&event);
                let stripped = strip_internal_markers(&text);
                if !stripped.is_empty() {
                    channel.send(&turn.chat_id, &stripped).await?;
                }
            }
            Some("turn_complete") => break,
            _ => {}
        }
    }

    Ok(())
}

fn extract_result_text(event: &Value) -> String {
    match event.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Strip text wrapped in literal `<internal>...</internal>` markers.
fn strip_internal_markers(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<internal>") {
        result.push_str(&rest[..start]);
        rest = &rest[start + "<internal>".len()..];
        if let Some(end) = rest.find("</internal>") {
            rest = &rest[end + "</internal>".len()..];
        } else {
            rest = "";
            break;
        }
    }
    result.push_str(rest);
    result.trim().to_owned()
}

async fn run_voice_turn(config: &WorkerConfig, ipc_root: &Path, payload: String) -> Result<String> {
    let folder_root = ipc_root.join("voice");
    tokio::fs::create_dir_all(&folder_root)
        .await
        .map_err(|err| AppError::Io(err.to_string()))?;

    let spawn_config = SpawnConfig {
        host_cli: config.host_cli.clone(),
        host_cli_args: config.host_cli_args.clone(),
        folder: "voice".into(),
        folder_root: folder_root.clone(),
        ipc_dir: folder_root.clone(),
        chat_id: "voice:session".into(),
        is_main: false,
        capabilities: Vec::new(),
        session_id: None,
        startup_timeout: Duration::from_secs(config.startup_timeout_seconds),
        container_overrides: None,
    };

    let connection = spawn_worker(&spawn_config).await?;
    let mut stdin = connection.stdin;
    let mut stdout = connection.stdout;

    let request = serde_json::json!({ "prompt": payload, "folder": "voice" }).to_string();
    stdin
        .write_all(request.as_bytes())
        .await
        .map_err(|err| AppError::Io(err.to_string()))?;
    stdin
        .write_all(b"\n")
        .await
        .map_err(|err| AppError::Io(err.to_string()))?;

    let turn_timeout = Duration::from_secs(config.turn_timeout_seconds);
    let result = tokio::time::timeout(turn_timeout, read_first_result(&mut stdout)).await;

    drop(connection.child);

    match result {
        Ok(inner) => inner,
        Err(_elapsed) => Err(AppError::Worker("voice turn exceeded deadline".into())),
    }
}

async fn read_first_result(stdout: &mut FramedRead<ChildStdout, WorkerCodec>) -> Result<String> {
    while let Some(line) = stdout.next().await {
        let line = line?;
        let Ok(event) = serde_json::from_str::<Value>(line.trim_end()) else {
            continue;
        };

        if event.get("type").and_then(Value::as_str) == Some("result") {
            let text = extract_result_text(&event);
            return Ok(strip_internal_markers(&text));
        }
    }

    Err(AppError::Worker(
        "voice worker closed stdout before a result".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_markers_are_stripped() {
        assert_eq!(
            strip_internal_markers("hello <internal>secret</internal> world"),
            "hello  world"
        );
    }

    #[test]
    fn empty_after_stripping_yields_empty_string() {
        assert_eq!(strip_internal_markers("<internal>only secret</internal>"), "");
    }

    #[test]
    fn text_without_markers_is_unchanged() {
        assert_eq!(strip_internal_markers("plain text"), "plain text");
    }
}
