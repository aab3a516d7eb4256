//! Tool IPC Server — the filesystem-mediated tool-call surface serviced
//! while workers are running.

pub mod atomic_write;
pub mod handlers;
pub mod sweeper;

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;

use crate::channel::Channel;
use crate::config::GlobalConfig;
use crate::persistence::address_book_repo::AddressBookRepo;
use crate::persistence::task_repo::TaskRepo;
use crate::worker::WorkerPoolHandle;

/// Shared context every IPC operation handler needs.
#[derive(Clone)]
pub struct IpcContext {
    /// Root of the filesystem tool-IPC layout.
    pub ipc_root: PathBuf,
    /// The Address Book repository.
    pub address_book: AddressBookRepo,
    /// The scheduled task repository.
    pub tasks: TaskRepo,
    /// Handle to the Worker Pool, for message fan-out and scheduled-turn
    /// enqueuing performed on the caller's behalf.
    pub pool: WorkerPoolHandle,
    /// Live channel instances, for `message` fire-and-forget sends.
    pub channels: Vec<Arc<dyn Channel>>,
    /// IANA timezone used to evaluate cron/once schedule values.
    pub timezone: chrono_tz::Tz,
    /// Shared HTTP client for the bookmark relay.
    pub http: Client,
    /// Bookmark relay base URL, if configured.
    pub bookmark_relay_url: Option<String>,
    /// Reminders bridge subprocess command (binary + leading args), if
    /// configured.
    pub reminders_bridge_cmd: Option<Vec<String>>,
    /// Name of the operator's main conversation folder.
    pub main_folder: String,
}

impl IpcContext {
    /// Build the shared context from global configuration and the
    /// already-constructed repositories/pool/channels.
    #[must_use]
    pub fn new(
        config: &GlobalConfig,
        address_book: AddressBookRepo,
        tasks: TaskRepo,
        pool: WorkerPoolHandle,
        channels: Vec<Arc<dyn Channel>>,
        timezone: chrono_tz::Tz,
    ) -> Self {
        Self {
            ipc_root: config.ipc_root().to_path_buf(),
            address_book,
            tasks,
            pool,
            channels,
            timezone,
            http: Client::new(),
            bookmark_relay_url: config.bookmark.as_ref().map(|b| b.relay_url.clone()),
            reminders_bridge_cmd: config.reminders.as_ref().map(|r| r.bridge_cmd.clone()),
            main_folder: config.main_folder.clone(),
        }
    }

    /// Whether `folder` is the operator's main conversation.
    #[must_use]
    pub fn is_main_folder(&self, folder: &str) -> bool {
        folder == self.main_folder
    }
}
