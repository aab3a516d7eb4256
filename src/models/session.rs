//! Worker session records.
//!
//! A session tracks the spawned worker process backing one folder for one
//! purpose (an ordinary chat turn queue, or a single-shot voice call). The
//! session id is generated once and reused for every subsequent turn in
//! that folder/purpose pair; it is never logged, and is cleared only on an
//! explicit reset or a worker rejecting a resume.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// What a session's worker process is being used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// An ordinary per-folder chat turn queue.
    Chat,
    /// A single-shot voice call; not kept alive for reuse.
    Voice,
}

/// Lifecycle state of a worker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Spawned, not yet past the ready-signal handshake.
    Starting,
    /// Ready and able to accept turns.
    Active,
    /// No turns queued for longer than the idle-reap threshold; about to
    /// be torn down.
    Idle,
    /// Process has exited or been killed.
    Terminated,
}

impl SessionStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Active)
                | (Self::Starting, Self::Terminated)
                | (Self::Active, Self::Idle)
                | (Self::Active, Self::Terminated)
                | (Self::Idle, Self::Active)
                | (Self::Idle, Self::Terminated)
        )
    }
}

/// A worker session: one live (or recently live) process bound to a
/// folder and purpose.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Internal row id. Host-generated, never sent to a worker — purely a
    /// database primary key.
    pub id: Uuid,
    /// Folder this session's worker is rooted in.
    pub folder: String,
    /// What this session is for.
    pub purpose: Purpose,
    /// Current lifecycle state.
    pub status: SessionStatus,
    /// The opaque continuation token the worker itself assigned on its
    /// first turn (its `session-assigned` stream event), injected back as
    /// `DISPATCHER_SESSION_ID` on every subsequent turn. `None` until the
    /// worker has actually assigned one — the host never fabricates this
    /// value. Never logged.
    pub external_id: Option<String>,
    /// Last tool name the worker invoked, for idle diagnostics.
    pub last_tool: Option<String>,
    /// When this session was first created.
    pub created_at: DateTime<Utc>,
    /// Last time a turn was delivered or an event was received.
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    /// Construct a new session in the `Starting` state, with no
    /// worker-assigned id yet.
    #[must_use]
    pub fn new(folder: String, purpose: Purpose) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            folder,
            purpose,
            status: SessionStatus::Starting,
            external_id: None,
            last_tool: None,
            created_at: now,
            last_activity_at: now,
        }
    }
}
