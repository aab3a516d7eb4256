//! `reminders.{create,complete,update,snapshot}` operations, proxied to the
//! external reminders bridge (a line-oriented subprocess: one JSON request
//! on stdin, one JSON response on stdout, then the process exits).

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::ipc::IpcContext;
use crate::models::tool_request::ToolRequest;
use crate::{AppError, Result};

const BRIDGE_TIMEOUT: Duration = Duration::from_secs(15);

async fn call_bridge(ctx: &IpcContext, op: &str, payload: &serde_json::Value) -> Result<serde_json::Value> {
    let cmd = ctx
        .reminders_bridge_cmd
        .as_ref()
        .ok_or_else(|| AppError::BridgeOutage("reminders bridge not configured".into()))?;
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| AppError::BridgeOutage("reminders bridge command is empty".into()))?;

    let request = serde_json::json!({ "op": op, "payload": payload }).to_string();

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| AppError::BridgeOutage(format!("failed to spawn reminders bridge: {err}")))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::BridgeOutage("reminders bridge stdin unavailable".into()))?;
    stdin
        .write_all(request.as_bytes())
        .await
        .map_err(|err| AppError::BridgeOutage(format!("failed to write to reminders bridge: {err}")))?;
    stdin
        .write_all(b"\n")
        .await
        .map_err(|err| AppError::BridgeOutage(format!("failed to write to reminders bridge: {err}")))?;
    drop(stdin);

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::BridgeOutage("reminders bridge stdout unavailable".into()))?;
    let mut raw = String::new();

    let read = tokio::time::timeout(BRIDGE_TIMEOUT, stdout.read_to_string(&mut raw)).await;
    let _ = child.kill().await;

    match read {
        Ok(Ok(_)) => {}
        Ok(Err(err)) => return Err(AppError::BridgeOutage(format!("reminders bridge read failed: {err}"))),
        Err(_elapsed) => return Err(AppError::BridgeOutage("reminders bridge timed out".into())),
    }

    serde_json::from_str(raw.trim())
        .map_err(|err| AppError::BridgeOutage(format!("reminders bridge returned invalid json: {err}")))
}

async fn refresh_snapshot(ctx: &IpcContext, folder: &str) -> Result<()> {
    let snapshot = call_bridge(ctx, "snapshot", &serde_json::json!({ "folder": folder })).await?;
    crate::snapshot::write_reminders_snapshot(&ctx.ipc_root, folder, &snapshot)
}

/// Create a reminder and refresh this folder's reminders snapshot.
///
/// # Errors
///
/// Returns `AppError::BridgeOutage` if the bridge is unreachable or not
/// configured.
pub async fn create(ctx: &IpcContext, request: ToolRequest) -> Result<Option<serde_json::Value>> {
    let result = call_bridge(ctx, "create", &request.payload).await?;
    refresh_snapshot(ctx, &request.folder).await?;
    Ok(Some(result))
}

/// Mark a reminder complete and refresh this folder's reminders snapshot.
///
/// # Errors
///
/// Returns `AppError::BridgeOutage` if the bridge is unreachable or not
/// configured.
pub async fn complete(ctx: &IpcContext, request: ToolRequest) -> Result<Option<serde_json::Value>> {
    let result = call_bridge(ctx, "complete", &request.payload).await?;
    refresh_snapshot(ctx, &request.folder).await?;
    Ok(Some(result))
}

/// Update a reminder's fields and refresh this folder's reminders snapshot.
///
/// # Errors
///
/// Returns `AppError::BridgeOutage` if the bridge is unreachable or not
/// configured.
pub async fn update(ctx: &IpcContext, request: ToolRequest) -> Result<Option<serde_json::Value>> {
    let result = call_bridge(ctx, "update", &request.payload).await?;
    refresh_snapshot(ctx, &request.folder).await?;
    Ok(Some(result))
}

/// Force a reminders snapshot refresh without mutating anything upstream.
///
/// # Errors
///
/// Returns `AppError::BridgeOutage` if the bridge is unreachable or not
/// configured.
pub async fn snapshot(ctx: &IpcContext, request: ToolRequest) -> Result<Option<serde_json::Value>> {
    refresh_snapshot(ctx, &request.folder).await?;
    Ok(None)
}
