//! `message` operation: forward a tool request to another registered
//! conversation's Channel. Fire-and-forget.

use serde::Deserialize;

use crate::ipc::IpcContext;
use crate::models::chat_id::ChatId;
use crate::models::tool_request::ToolRequest;
use crate::{AppError, Result};

#[derive(Debug, Deserialize)]
struct MessagePayload {
    #[serde(rename = "chat-id")]
    chat_id: String,
    text: String,
    #[serde(default)]
    #[allow(dead_code)]
    sender_label: Option<String>,
}

/// Forward `{chat-id, text, optional sender-label}` to the owning
/// Channel's send.
///
/// # Errors
///
/// Returns `AppError::ToolValidation` if the payload or chat id is
/// malformed, `AppError::NotFound` if no channel owns the chat id.
pub async fn handle(ctx: &IpcContext, request: ToolRequest) -> Result<Option<serde_json::Value>> {
    let payload: MessagePayload = serde_json::from_value(request.payload)
        .map_err(|err| AppError::ToolValidation(format!("invalid message payload: {err}")))?;

    let chat_id = ChatId::parse(&payload.chat_id)?;
    let channel = ctx
        .channels
        .iter()
        .find(|c| c.owns(&chat_id))
        .ok_or_else(|| AppError::NotFound(format!("no channel owns {chat_id}")))?;

    channel.send(&chat_id, &payload.text).await?;
    Ok(None)
}
