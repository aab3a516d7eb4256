//! `register_group` / `link_account` operations. Both are restricted to
//! the main conversation.

use serde::Deserialize;

use crate::ipc::IpcContext;
use crate::models::chat_id::ChatId;
use crate::models::conversation::Conversation;
use crate::models::tool_request::ToolRequest;
use crate::{AppError, Result};

fn require_main(ctx: &IpcContext, folder: &str) -> Result<()> {
    if ctx.is_main_folder(folder) {
        Ok(())
    } else {
        Err(AppError::Unauthorized(
            "Only the main group may register or link conversations".into(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    #[serde(rename = "chat-id")]
    chat_id: String,
    folder: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    trigger_token: Option<String>,
    #[serde(default)]
    requires_trigger: bool,
    #[serde(default)]
    capabilities: Vec<String>,
}

/// Register a brand-new conversation folder.
///
/// # Errors
///
/// Returns `AppError::Unauthorized` if the caller is not the main
/// conversation, `AppError::ToolValidation` for a malformed chat id.
pub async fn register(ctx: &IpcContext, request: ToolRequest) -> Result<Option<serde_json::Value>> {
    require_main(ctx, &request.folder)?;

    let payload: RegisterPayload = serde_json::from_value(request.payload)
        .map_err(|err| AppError::ToolValidation(format!("invalid register_group payload: {err}")))?;

    let chat_id = ChatId::parse(&payload.chat_id)?;
    let mut conversation = Conversation::new_auto_registered(chat_id, payload.folder);
    conversation.auto_registered = false;
    conversation.display_name = payload.display_name;
    conversation.trigger_token = payload.trigger_token.unwrap_or_default();
    conversation.requires_trigger = payload.requires_trigger;
    conversation.capabilities = payload.capabilities;

    ctx.address_book.put(&conversation).await?;
    crate::snapshot::write_all(&ctx.ipc_root, &ctx.address_book, &ctx.tasks).await?;

    Ok(Some(serde_json::json!({ "folder": conversation.folder })))
}

#[derive(Debug, Deserialize)]
struct LinkPayload {
    #[serde(rename = "alias-chat-id")]
    alias_chat_id: String,
    #[serde(rename = "target-chat-id")]
    target_chat_id: String,
}

/// Alias a second chat id onto an existing folder's conversation record.
///
/// Per the "target wins" resolution of the source's open question: if
/// both the alias and target chat ids pre-exist, the target's folder and
/// capability/trigger fields are kept, and a warning is logged rather than
/// merging the two records.
///
/// # Errors
///
/// Returns `AppError::Unauthorized` if the caller is not the main
/// conversation, `AppError::NotFound` if the target has no conversation,
/// `AppError::Conflict` if the alias is already linked elsewhere.
pub async fn link(ctx: &IpcContext, request: ToolRequest) -> Result<Option<serde_json::Value>> {
    require_main(ctx, &request.folder)?;

    let payload: LinkPayload = serde_json::from_value(request.payload)
        .map_err(|err| AppError::ToolValidation(format!("invalid link_account payload: {err}")))?;

    let alias = ChatId::parse(&payload.alias_chat_id)?;
    let target = ChatId::parse(&payload.target_chat_id)?;

    if ctx.address_book.get(&alias).await?.is_some() {
        tracing::warn!(
            %alias, %target,
            "link_account: alias already registered; target's settings win"
        );
    }

    let linked = ctx.address_book.link(alias, &target).await?;
    crate::snapshot::write_all(&ctx.ipc_root, &ctx.address_book, &ctx.tasks).await?;

    Ok(Some(serde_json::json!({ "folder": linked.folder })))
}
