//! Scheduler — a single tick loop over the durable `task` table.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{info, warn};

use crate::models::task::{ContextMode, Schedule, Task};
use crate::persistence::address_book_repo::AddressBookRepo;
use crate::persistence::task_repo::TaskRepo;
use crate::worker::{Turn, WorkerPoolHandle};
use crate::{AppError, Result};

const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the scheduler's tick loop as a background task.
pub fn spawn(
    task_repo: TaskRepo,
    address_book: AddressBookRepo,
    pool: WorkerPoolHandle,
    timezone: Tz,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = tick_once(&task_repo, &address_book, &pool, timezone).await {
                warn!(%err, "scheduler tick failed");
            }
        }
    });
}

async fn tick_once(
    task_repo: &TaskRepo,
    address_book: &AddressBookRepo,
    pool: &WorkerPoolHandle,
    timezone: Tz,
) -> Result<()> {
    let due = task_repo.due().await?;
    for task in due {
        if let Err(err) = fire_task(task_repo, address_book, pool, timezone, &task).await {
            warn!(task_id = %task.id, %err, "failed to fire scheduled task");
        }
    }
    Ok(())
}

async fn fire_task(
    task_repo: &TaskRepo,
    address_book: &AddressBookRepo,
    pool: &WorkerPoolHandle,
    timezone: Tz,
    task: &Task,
) -> Result<()> {
    let next = next_fire_after(task, Utc::now(), timezone)?;

    // Status transitions are persisted before the turn is enqueued: a
    // crash between these two steps just reprocesses on the next tick,
    // since next_fire_at is still <= now until this commits.
    task_repo.record_fire(&task.id, next).await?;

    let conversations = address_book.list().await?;
    let Some(representative) = conversations.into_iter().find(|c| c.folder == task.folder) else {
        warn!(folder = %task.folder, "scheduled task fired for a folder with no registered conversation");
        return Ok(());
    };

    let turn = Turn {
        chat_id: representative.chat_id,
        folder: task.folder.clone(),
        payload: task.prompt.clone(),
        is_main: representative.is_main,
        capabilities: representative.capabilities,
        context_mode: task.context_mode,
        container_overrides: representative.container_overrides,
    };

    pool.enqueue_scheduled(turn).await?;
    info!(task_id = %task.id, folder = %task.folder, "fired scheduled task");
    Ok(())
}

/// Compute the next fire instant after `task` has just fired at `now`.
/// Returns `None` for `once` tasks, which are marked completed.
fn next_fire_after(task: &Task, now: DateTime<Utc>, timezone: Tz) -> Result<Option<DateTime<Utc>>> {
    match &task.schedule {
        Schedule::Once(_) => Ok(None),
        Schedule::Interval { period_seconds } => {
            Ok(Some(now + chrono::Duration::seconds(*period_seconds)))
        }
        Schedule::Cron(expr) => {
            use std::str::FromStr;
            let schedule = cron::Schedule::from_str(expr)
                .map_err(|err| AppError::ToolValidation(format!("invalid cron expression: {err}")))?;
            let local_now = now.with_timezone(&timezone);
            let next_local = schedule
                .after(&local_now)
                .next()
                .ok_or_else(|| AppError::ToolValidation("cron expression has no future occurrence".into()))?;
            Ok(Some(next_local.with_timezone(&Utc)))
        }
    }
}

/// Compute the first fire instant for a freshly created task, used by the
/// `schedule_task` IPC handler.
///
/// # Errors
///
/// Returns `AppError::ToolValidation` if the schedule value is invalid.
pub fn first_fire_at(schedule: &Schedule, created_at: DateTime<Utc>, timezone: Tz) -> Result<DateTime<Utc>> {
    match schedule {
        Schedule::Once(at) => Ok(*at),
        Schedule::Interval { period_seconds } => {
            Ok(created_at + chrono::Duration::seconds(*period_seconds))
        }
        Schedule::Cron(expr) => {
            use std::str::FromStr;
            let parsed = cron::Schedule::from_str(expr)
                .map_err(|err| AppError::ToolValidation(format!("invalid cron expression: {err}")))?;
            let local_now = created_at.with_timezone(&timezone);
            parsed
                .after(&local_now)
                .next()
                .map(|dt| dt.with_timezone(&Utc))
                .ok_or_else(|| AppError::ToolValidation("cron expression has no future occurrence".into()))
        }
    }
}

/// Also exported so [`ContextMode`] is reachable from call sites that only
/// import this module.
pub use crate::models::task::ContextMode as TaskContextMode;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone as _;

    #[test]
    fn interval_schedule_advances_by_period() {
        let task = Task {
            id: "t1".into(),
            folder: "andy".into(),
            prompt: "check in".into(),
            schedule: Schedule::Interval { period_seconds: 3600 },
            context_mode: ContextMode::Inherit,
            status: crate::models::task::TaskStatus::Active,
            owner_folder: "andy".into(),
            next_fire_at: None,
            last_fire_at: None,
            created_at: Utc::now(),
        };
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let next = next_fire_after(&task, now, Tz::UTC).unwrap();
        assert_eq!(next, Some(now + chrono::Duration::seconds(3600)));
    }

    #[test]
    fn once_schedule_has_no_next_fire() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        let task = Task {
            id: "t2".into(),
            folder: "andy".into(),
            prompt: "one shot".into(),
            schedule: Schedule::Once(at),
            context_mode: ContextMode::Isolated,
            status: crate::models::task::TaskStatus::Active,
            owner_folder: "andy".into(),
            next_fire_at: Some(at),
            last_fire_at: None,
            created_at: Utc::now(),
        };
        let next = next_fire_after(&task, at, Tz::UTC).unwrap();
        assert_eq!(next, None);
    }
}
