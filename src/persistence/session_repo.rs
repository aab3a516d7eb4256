//! Session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::models::session::{Purpose, Session, SessionStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for worker session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    folder: String,
    purpose: String,
    status: String,
    external_id: Option<String>,
    last_tool: Option<String>,
    created_at: String,
    last_activity_at: String,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|err| AppError::Db(format!("invalid session id: {err}")))?;
        let purpose = parse_purpose(&self.purpose)?;
        let status = parse_status(&self.status)?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|err| AppError::Db(format!("invalid created_at: {err}")))?
            .with_timezone(&Utc);
        let last_activity_at = chrono::DateTime::parse_from_rfc3339(&self.last_activity_at)
            .map_err(|err| AppError::Db(format!("invalid last_activity_at: {err}")))?
            .with_timezone(&Utc);

        Ok(Session {
            id,
            folder: self.folder,
            purpose,
            status,
            external_id: self.external_id,
            last_tool: self.last_tool,
            created_at,
            last_activity_at,
        })
    }
}

fn parse_purpose(s: &str) -> Result<Purpose> {
    match s {
        "chat" => Ok(Purpose::Chat),
        "voice" => Ok(Purpose::Voice),
        other => Err(AppError::Db(format!("invalid session purpose: {other}"))),
    }
}

const fn purpose_str(p: Purpose) -> &'static str {
    match p {
        Purpose::Chat => "chat",
        Purpose::Voice => "voice",
    }
}

fn parse_status(s: &str) -> Result<SessionStatus> {
    match s {
        "starting" => Ok(SessionStatus::Starting),
        "active" => Ok(SessionStatus::Active),
        "idle" => Ok(SessionStatus::Idle),
        "terminated" => Ok(SessionStatus::Terminated),
        other => Err(AppError::Db(format!("invalid session status: {other}"))),
    }
}

const fn status_str(s: SessionStatus) -> &'static str {
    match s {
        SessionStatus::Starting => "starting",
        SessionStatus::Active => "active",
        SessionStatus::Idle => "idle",
        SessionStatus::Terminated => "terminated",
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, session: &Session) -> Result<Session> {
        sqlx::query(
            "INSERT INTO session (id, folder, purpose, status, external_id, last_tool, created_at,
             last_activity_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(session.id.to_string())
        .bind(&session.folder)
        .bind(purpose_str(session.purpose))
        .bind(status_str(session.status))
        .bind(&session.external_id)
        .bind(&session.last_tool)
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_activity_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        Ok(session.clone())
    }

    /// Retrieve a session by folder and purpose, the key the Worker Pool
    /// uses to decide whether a process already exists for a turn.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find_active(&self, folder: &str, purpose: Purpose) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT * FROM session WHERE folder = ?1 AND purpose = ?2
             AND status != 'terminated' ORDER BY created_at DESC LIMIT 1",
        )
        .bind(folder)
        .bind(purpose_str(purpose))
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Update a session's status, validating the transition first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist, or
    /// `AppError::Db` if the transition is illegal or the update fails.
    pub async fn update_status(&self, id: Uuid, status: SessionStatus) -> Result<Session> {
        let id_s = id.to_string();
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM session WHERE id = ?1")
            .bind(&id_s)
            .fetch_optional(self.db.as_ref())
            .await?;
        let current = row
            .map(SessionRow::into_session)
            .transpose()?
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))?;

        if !current.status.can_transition_to(status) {
            return Err(AppError::Db(format!(
                "invalid session status transition: {:?} -> {:?}",
                current.status, status
            )));
        }

        sqlx::query("UPDATE session SET status = ?1, last_activity_at = ?2 WHERE id = ?3")
            .bind(status_str(status))
            .bind(Utc::now().to_rfc3339())
            .bind(&id_s)
            .execute(self.db.as_ref())
            .await?;

        let mut updated = current;
        updated.status = status;
        Ok(updated)
    }

    /// Persist the worker-assigned continuation token from a
    /// `session-assigned` stream event. Called as soon as the event is
    /// read, before the rest of the turn drains, matching the spec's
    /// "persisted immediately" requirement. Overwrites any prior value —
    /// a worker is free to rotate its own session id on a later turn.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn record_external_id(&self, id: Uuid, external_id: &str) -> Result<()> {
        sqlx::query("UPDATE session SET external_id = ?1 WHERE id = ?2")
            .bind(external_id)
            .bind(id.to_string())
            .execute(self.db.as_ref())
            .await?;

        Ok(())
    }

    /// Touch `last_activity_at` and optionally record the last tool invoked.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn touch(&self, id: Uuid, last_tool: Option<String>) -> Result<()> {
        sqlx::query("UPDATE session SET last_activity_at = ?1, last_tool = ?2 WHERE id = ?3")
            .bind(Utc::now().to_rfc3339())
            .bind(&last_tool)
            .bind(id.to_string())
            .execute(self.db.as_ref())
            .await?;

        Ok(())
    }

    /// List sessions idle longer than `idle_seconds`, candidates for reap.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_idle_since(&self, idle_seconds: i64) -> Result<Vec<Session>> {
        let cutoff = (Utc::now() - chrono::Duration::seconds(idle_seconds)).to_rfc3339();
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM session WHERE status = 'active' AND last_activity_at < ?1",
        )
        .bind(cutoff)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }
}
