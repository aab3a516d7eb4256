//! Per-operation Tool IPC handlers.

pub mod bookmarks;
pub mod groups;
pub mod message;
pub mod reminders;
pub mod schedule;

use std::path::Path;

use crate::ipc::atomic_write::write_json_atomic;
use crate::models::tool_request::{Operation, ToolRequest, ToolResponse};
use crate::Result;

use super::IpcContext;

/// Route a request to its operation handler.
pub async fn dispatch(ctx: &IpcContext, request: ToolRequest) -> Result<Option<serde_json::Value>> {
    match request.operation {
        Operation::Message => message::handle(ctx, request).await,
        Operation::ScheduleCreate => schedule::create(ctx, request).await,
        Operation::SchedulePause => schedule::pause(ctx, request).await,
        Operation::ScheduleResume => schedule::resume(ctx, request).await,
        Operation::ScheduleCancel => schedule::cancel(ctx, request).await,
        Operation::RegisterGroup => groups::register(ctx, request).await,
        Operation::LinkAccount => groups::link(ctx, request).await,
        Operation::RemindersCreate => reminders::create(ctx, request).await,
        Operation::RemindersComplete => reminders::complete(ctx, request).await,
        Operation::RemindersUpdate => reminders::update(ctx, request).await,
        Operation::RemindersSnapshot => reminders::snapshot(ctx, request).await,
        Operation::BookmarksUrl => bookmarks::url(ctx, request).await,
        Operation::BookmarksHealth => bookmarks::health(ctx, request).await,
        Operation::BookmarksRecent => bookmarks::recent(ctx, request).await,
    }
}

/// Write a handler's outcome to its response file, converting any error
/// into the tool response envelope's `isError: true` convention rather
/// than propagating it.
pub fn write_response(
    dir: &Path,
    file_name: &str,
    outcome: Result<Option<serde_json::Value>>,
) -> Result<()> {
    let response = match outcome {
        Ok(Some(data)) => ToolResponse::ok(data),
        Ok(None) => ToolResponse::ok(serde_json::Value::Null),
        Err(err) => ToolResponse::err(err.to_string()),
    };

    let value = serde_json::to_value(response)
        .map_err(|err| crate::AppError::Io(format!("failed to serialize tool response: {err}")))?;
    write_json_atomic(&dir.join(file_name), &value)?;
    Ok(())
}

/// Check that `folder` may act on behalf of `target_folder`: non-main
/// conversations may only target themselves; the main conversation may
/// target any folder.
pub fn authorize_folder_scope(ctx: &IpcContext, folder: &str, target_folder: &str) -> Result<()> {
    if ctx.is_main_folder(folder) || folder == target_folder {
        Ok(())
    } else {
        Err(crate::AppError::Unauthorized(format!(
            "{folder} may not act on behalf of {target_folder}"
        )))
    }
}
