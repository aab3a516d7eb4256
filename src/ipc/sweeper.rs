//! The Tool IPC Server's sweep loop: lists each conversation's request
//! subdirectories on a short interval and dispatches every completed file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::models::tool_request::ToolRequest;
use crate::snapshot;
use crate::{AppError, Result};

use super::handlers;
use super::IpcContext;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const REQUEST_SUBDIRS: &[&str] = &["messages", "tasks", "reminders", "bookmarks"];

/// Spawn the sweeper as a background task.
pub fn spawn(ctx: IpcContext) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = sweep_once(&ctx).await {
                warn!(%err, "ipc sweep failed");
            }
        }
    });
}

async fn sweep_once(ctx: &IpcContext) -> Result<()> {
    let conversations_root = ctx.ipc_root.join("conversations");
    let mut folders = match tokio::fs::read_dir(&conversations_root).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(AppError::Io(err.to_string())),
    };

    let mut folder_paths = Vec::new();
    while let Some(entry) = folders
        .next_entry()
        .await
        .map_err(|err| AppError::Io(err.to_string()))?
    {
        if entry
            .file_type()
            .await
            .map_err(|err| AppError::Io(err.to_string()))?
            .is_dir()
        {
            folder_paths.push(entry.path());
        }
    }

    for folder_path in folder_paths {
        for subdir in REQUEST_SUBDIRS {
            sweep_subdir(ctx, &folder_path.join(subdir)).await?;
        }
    }

    Ok(())
}

async fn sweep_subdir(ctx: &IpcContext, dir: &Path) -> Result<()> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(AppError::Io(err.to_string())),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| AppError::Io(err.to_string()))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();

    let folder = dir
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    for file in files {
        process_request_file(ctx, &folder, &file).await;
    }

    Ok(())
}

async fn process_request_file(ctx: &IpcContext, folder: &str, path: &PathBuf) {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to read tool request file");
            return;
        }
    };

    let mut request: ToolRequest = match serde_json::from_str(&raw) {
        Ok(request) => request,
        Err(err) => {
            // IPC corruption: leave the file in place for operator inspection.
            warn!(path = %path.display(), %err, "malformed tool request, left in place");
            return;
        }
    };
    request.folder = folder.to_owned();

    let response_file = request.response_file.clone();
    let response_dir = path.parent().map(Path::to_path_buf);

    let outcome = handlers::dispatch(ctx, request).await;

    if let (Some(name), Some(dir)) = (response_file, response_dir) {
        if let Err(err) = handlers::write_response(&dir, &name, outcome) {
            warn!(%err, "failed to write tool response file");
        }
    } else if let Err(err) = outcome {
        warn!(%err, "fire-and-forget tool request failed");
    }

    if let Err(err) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), %err, "failed to unlink processed tool request");
    }

    let _ = snapshot::write_all(&ctx.ipc_root, &ctx.address_book, &ctx.tasks).await;
}
