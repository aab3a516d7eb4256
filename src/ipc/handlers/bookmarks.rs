//! `bookmark.{url,health,recent}` operations, proxied to the bookmark
//! relay over HTTP with a bounded timeout per call.

use std::time::Duration;

use serde::Deserialize;

use crate::ipc::IpcContext;
use crate::models::tool_request::ToolRequest;
use crate::{AppError, Result};

const URL_TIMEOUT: Duration = Duration::from_secs(90);
const SHORT_TIMEOUT: Duration = Duration::from_secs(15);

fn relay_url(ctx: &IpcContext) -> Result<&str> {
    ctx.bookmark_relay_url
        .as_deref()
        .ok_or_else(|| AppError::BridgeOutage("bookmark relay not configured".into()))
}

#[derive(Debug, Deserialize)]
struct UrlPayload {
    url: String,
}

/// Submit a URL to the bookmark relay for extraction/capture.
///
/// # Errors
///
/// Returns `AppError::ToolValidation` for a malformed payload, or
/// `AppError::BridgeOutage` if the relay is unreachable, times out, or is
/// not configured.
pub async fn url(ctx: &IpcContext, request: ToolRequest) -> Result<Option<serde_json::Value>> {
    let payload: UrlPayload = serde_json::from_value(request.payload)
        .map_err(|err| AppError::ToolValidation(format!("invalid bookmark.url payload: {err}")))?;
    let base = relay_url(ctx)?;

    let response = ctx
        .http
        .post(format!("{base}/bookmarks"))
        .timeout(URL_TIMEOUT)
        .json(&serde_json::json!({ "url": payload.url, "folder": request.folder }))
        .send()
        .await
        .map_err(|err| AppError::BridgeOutage(format!("bookmark relay unreachable: {err}")))?;

    parse_relay_response(response).await
}

/// Check the bookmark relay's reachability.
///
/// # Errors
///
/// Returns `AppError::BridgeOutage` if the relay is unreachable or not
/// configured.
pub async fn health(ctx: &IpcContext, _request: ToolRequest) -> Result<Option<serde_json::Value>> {
    let base = relay_url(ctx)?;

    let response = ctx
        .http
        .get(format!("{base}/health"))
        .timeout(SHORT_TIMEOUT)
        .send()
        .await
        .map_err(|err| AppError::BridgeOutage(format!("bookmark relay unreachable: {err}")))?;

    parse_relay_response(response).await
}

/// List recently captured bookmarks for this folder.
///
/// # Errors
///
/// Returns `AppError::BridgeOutage` if the relay is unreachable or not
/// configured.
pub async fn recent(ctx: &IpcContext, request: ToolRequest) -> Result<Option<serde_json::Value>> {
    let base = relay_url(ctx)?;

    let response = ctx
        .http
        .get(format!("{base}/bookmarks"))
        .query(&[("folder", request.folder.as_str())])
        .timeout(SHORT_TIMEOUT)
        .send()
        .await
        .map_err(|err| AppError::BridgeOutage(format!("bookmark relay unreachable: {err}")))?;

    parse_relay_response(response).await
}

async fn parse_relay_response(response: reqwest::Response) -> Result<Option<serde_json::Value>> {
    if !response.status().is_success() {
        return Err(AppError::BridgeOutage(format!(
            "bookmark relay returned status {}",
            response.status()
        )));
    }

    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|err| AppError::BridgeOutage(format!("bookmark relay returned invalid json: {err}")))?;
    Ok(Some(body))
}
