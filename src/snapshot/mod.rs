//! Snapshots — periodic and post-mutation materialization of read-only
//! JSON views into each conversation's IPC directory.

use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tracing::warn;

use crate::ipc::atomic_write::write_json_atomic;
use crate::models::conversation::Conversation;
use crate::models::task::Task;
use crate::persistence::address_book_repo::AddressBookRepo;
use crate::persistence::task_repo::TaskRepo;
use crate::Result;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn the periodic snapshot writer as a background task.
pub fn spawn_periodic(ipc_root: std::path::PathBuf, address_book: AddressBookRepo, tasks: TaskRepo) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DEFAULT_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = write_all(&ipc_root, &address_book, &tasks).await {
                warn!(%err, "periodic snapshot write failed");
            }
        }
    });
}

/// Materialize `groups.json`, `current_tasks.json`, and
/// `available_groups.json` for every registered conversation, filtered by
/// main-vs-non-main visibility. Call this synchronously right after any
/// Address Book or Task mutation, in addition to the periodic tick.
///
/// # Errors
///
/// Returns `AppError::Io` if any file write fails, `AppError::Db` if the
/// underlying repository reads fail.
pub async fn write_all(ipc_root: &Path, address_book: &AddressBookRepo, tasks: &TaskRepo) -> Result<()> {
    let conversations = address_book.list().await?;
    let all_tasks = tasks.list().await?;

    for conversation in &conversations {
        let dir = ipc_root.join("conversations").join(&conversation.folder);

        write_json_atomic(&dir.join("groups.json"), &groups_json(&conversations))?;
        write_json_atomic(
            &dir.join("available_groups.json"),
            &available_groups_json(&conversations),
        )?;
        write_json_atomic(
            &dir.join("current_tasks.json"),
            &tasks_json(&all_tasks, conversation),
        )?;
    }

    Ok(())
}

fn groups_json(conversations: &[Conversation]) -> serde_json::Value {
    json!(conversations
        .iter()
        .map(|c| json!({
            "chat_id": c.chat_id.as_str(),
            "folder": c.folder,
            "display_name": c.display_name,
            "is_main": c.is_main,
        }))
        .collect::<Vec<_>>())
}

fn available_groups_json(conversations: &[Conversation]) -> serde_json::Value {
    json!(conversations
        .iter()
        .filter(|c| c.is_main || c.auto_registered)
        .map(|c| json!({ "folder": c.folder, "display_name": c.display_name }))
        .collect::<Vec<_>>())
}

/// Materialize `reminders_snapshot.json` for one conversation folder.
/// Invoked after any mutating `reminders.*` tool call, in addition to the
/// periodic tick.
///
/// # Errors
///
/// Returns `AppError::Io` if the write fails.
pub fn write_reminders_snapshot(
    ipc_root: &Path,
    folder: &str,
    reminders: &serde_json::Value,
) -> Result<()> {
    let dir = ipc_root.join("conversations").join(folder);
    write_json_atomic(&dir.join("reminders_snapshot.json"), reminders)?;
    Ok(())
}

fn tasks_json(tasks: &[Task], viewer: &Conversation) -> serde_json::Value {
    let visible = tasks
        .iter()
        .filter(|t| viewer.is_main || t.folder == viewer.folder);

    json!(visible
        .map(|t| json!({
            "id": t.id,
            "folder": t.folder,
            "prompt": t.prompt,
            "schedule_kind": t.schedule.kind(),
            "status": format!("{:?}", t.status).to_lowercase(),
            "next_fire_at": t.next_fire_at,
        }))
        .collect::<Vec<_>>())
}
