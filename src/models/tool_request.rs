//! Tool IPC request/response envelope.

use serde::{Deserialize, Serialize};

/// The operation a tool request names. Unrecognized values fail
/// validation before any handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Send a message to another registered conversation.
    Message,
    /// Create a cron/interval/once scheduled task.
    ScheduleCreate,
    /// Pause an active scheduled task.
    SchedulePause,
    /// Resume a paused scheduled task.
    ScheduleResume,
    /// Cancel a scheduled task.
    ScheduleCancel,
    /// Register a new conversation folder.
    RegisterGroup,
    /// Alias a chat id onto an existing folder.
    LinkAccount,
    /// Create a reminder via the external reminders bridge.
    RemindersCreate,
    /// Mark a reminder complete via the external reminders bridge.
    RemindersComplete,
    /// Update a reminder's fields via the external reminders bridge.
    RemindersUpdate,
    /// Force a reminders snapshot refresh without mutating anything.
    RemindersSnapshot,
    /// Submit a URL to the bookmark relay.
    BookmarksUrl,
    /// Check the bookmark relay's reachability.
    BookmarksHealth,
    /// List recently captured bookmarks.
    BookmarksRecent,
}

/// A single file-based tool request, deserialized from the JSON body
/// dropped under `<ipc_root>/<operation-subdir>/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// The operation this request invokes.
    pub operation: Operation,
    /// Folder the request originated from (derived from the subdirectory
    /// path, not trusted from the body).
    #[serde(skip)]
    pub folder: String,
    /// Opaque request id, echoed into the response file name when set.
    pub request_id: String,
    /// Operation-specific payload.
    pub payload: serde_json::Value,
    /// When set, the handler's result is written back to this path
    /// (relative to the request's subdirectory) via the same atomic
    /// temp-file-then-rename primitive used for the request itself.
    #[serde(default)]
    pub response_file: Option<String>,
}

/// A tool request result, written to `response_file` when present.
///
/// Failure is signaled with `isError: true`, matching the worker-facing
/// tool response convention (§7: "returned synchronously in the tool's
/// response envelope with `isError: true` and a human-readable message").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    /// `true` when the operation failed; omitted (absent, not `false`) on
    /// success, since a spec-conforming worker only checks for its
    /// presence.
    #[serde(rename = "isError", default, skip_serializing_if = "is_false")]
    pub is_error: bool,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Human-readable error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ToolResponse {
    /// A successful response carrying `data`.
    #[must_use]
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            is_error: false,
            data: Some(data),
            error: None,
        }
    }

    /// A failed response carrying `message`, with `isError: true`.
    #[must_use]
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            data: None,
            error: Some(message.into()),
        }
    }
}
