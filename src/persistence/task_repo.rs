//! Scheduled task repository.

use std::sync::Arc;

use chrono::Utc;

use crate::models::task::{ContextMode, Schedule, Task, TaskStatus};
use crate::{AppError, Result};

use super::db::Database;

/// Repository wrapper around `SQLite` for scheduled task records.
#[derive(Clone)]
pub struct TaskRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    folder: String,
    prompt: String,
    schedule_kind: String,
    schedule_value: String,
    context_mode: String,
    status: String,
    owner_folder: String,
    next_fire_at: Option<String>,
    last_fire_at: Option<String>,
    created_at: String,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        let schedule = match self.schedule_kind.as_str() {
            "cron" => Schedule::Cron(self.schedule_value),
            "interval" => {
                let period_seconds: i64 = self.schedule_value.parse().map_err(|err| {
                    AppError::Db(format!("invalid interval schedule_value: {err}"))
                })?;
                Schedule::Interval { period_seconds }
            }
            "once" => {
                let at = chrono::DateTime::parse_from_rfc3339(&self.schedule_value)
                    .map_err(|err| AppError::Db(format!("invalid once schedule_value: {err}")))?
                    .with_timezone(&Utc);
                Schedule::Once(at)
            }
            other => return Err(AppError::Db(format!("invalid schedule_kind: {other}"))),
        };

        let context_mode = match self.context_mode.as_str() {
            "inherit" => ContextMode::Inherit,
            "isolated" => ContextMode::Isolated,
            other => return Err(AppError::Db(format!("invalid context_mode: {other}"))),
        };

        let status = match self.status.as_str() {
            "active" => TaskStatus::Active,
            "paused" => TaskStatus::Paused,
            "completed" => TaskStatus::Completed,
            other => return Err(AppError::Db(format!("invalid task status: {other}"))),
        };

        let parse_ts = |s: &str| -> Result<chrono::DateTime<Utc>> {
            Ok(chrono::DateTime::parse_from_rfc3339(s)
                .map_err(|err| AppError::Db(format!("invalid timestamp: {err}")))?
                .with_timezone(&Utc))
        };

        Ok(Task {
            id: self.id,
            folder: self.folder,
            prompt: self.prompt,
            schedule,
            context_mode,
            status,
            owner_folder: self.owner_folder,
            next_fire_at: self.next_fire_at.as_deref().map(parse_ts).transpose()?,
            last_fire_at: self.last_fire_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

fn schedule_columns(schedule: &Schedule) -> (&'static str, String) {
    match schedule {
        Schedule::Cron(expr) => ("cron", expr.clone()),
        Schedule::Interval { period_seconds } => ("interval", period_seconds.to_string()),
        Schedule::Once(at) => ("once", at.to_rfc3339()),
    }
}

const fn context_mode_str(mode: ContextMode) -> &'static str {
    match mode {
        ContextMode::Inherit => "inherit",
        ContextMode::Isolated => "isolated",
    }
}

const fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Active => "active",
        TaskStatus::Paused => "paused",
        TaskStatus::Completed => "completed",
    }
}

impl TaskRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, task: &Task) -> Result<()> {
        let (kind, value) = schedule_columns(&task.schedule);

        sqlx::query(
            "INSERT INTO task (id, folder, prompt, schedule_kind, schedule_value, context_mode,
             status, owner_folder, next_fire_at, last_fire_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&task.id)
        .bind(&task.folder)
        .bind(&task.prompt)
        .bind(kind)
        .bind(value)
        .bind(context_mode_str(task.context_mode))
        .bind(status_str(task.status))
        .bind(&task.owner_folder)
        .bind(task.next_fire_at.map(|dt| dt.to_rfc3339()))
        .bind(task.last_fire_at.map(|dt| dt.to_rfc3339()))
        .bind(task.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Fetch a task by id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get(&self, id: &str) -> Result<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM task WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(TaskRow::into_task).transpose()
    }

    /// Tasks due to fire: `status = 'active' AND next_fire_at <= now`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn due(&self) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM task WHERE status = 'active' AND next_fire_at <= ?1",
        )
        .bind(Utc::now().to_rfc3339())
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// List every task, for snapshot materialization.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list(&self) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM task ORDER BY created_at")
            .fetch_all(self.db.as_ref())
            .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    /// Persist a fire: advance `next_fire_at`, stamp `last_fire_at`, and
    /// mark completed in the same statement when `next` is `None` (the
    /// `once` case). Always commits before the caller enqueues the turn.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn record_fire(&self, id: &str, next: Option<chrono::DateTime<Utc>>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let status = if next.is_some() { "active" } else { "completed" };

        sqlx::query(
            "UPDATE task SET last_fire_at = ?1, next_fire_at = ?2, status = ?3 WHERE id = ?4",
        )
        .bind(&now)
        .bind(next.map(|dt| dt.to_rfc3339()))
        .bind(status)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Pause an active task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn pause(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE task SET status = 'paused' WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Resume a paused task; the caller is responsible for recomputing
    /// `next_fire_at` before calling this (the task may have missed fires
    /// while paused).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn resume(&self, id: &str, next_fire_at: chrono::DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE task SET status = 'active', next_fire_at = ?1 WHERE id = ?2")
            .bind(next_fire_at.to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Cancel a task permanently.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE task SET status = 'completed' WHERE id = ?1")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }
}
