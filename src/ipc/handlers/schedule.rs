//! `schedule_task` / `pause_task` / `resume_task` / `cancel_task` operations.

use chrono::{TimeZone, Utc};
use serde::Deserialize;

use crate::ipc::IpcContext;
use crate::models::task::{ContextMode, Schedule, Task, TaskStatus};
use crate::models::tool_request::ToolRequest;
use crate::scheduler;
use crate::{AppError, Result};

use super::authorize_folder_scope;

#[derive(Debug, Deserialize)]
struct ScheduleValue {
    kind: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct CreatePayload {
    #[serde(default)]
    folder: Option<String>,
    prompt: String,
    schedule: ScheduleValue,
    #[serde(default)]
    context_mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskIdPayload {
    task_id: String,
}

fn parse_schedule(raw: &ScheduleValue, timezone: chrono_tz::Tz) -> Result<Schedule> {
    match raw.kind.as_str() {
        "cron" => {
            use std::str::FromStr;
            cron::Schedule::from_str(&raw.value)
                .map_err(|err| AppError::ToolValidation(format!("invalid cron expression: {err}")))?;
            Ok(Schedule::Cron(raw.value.clone()))
        }
        "interval" => {
            let period_ms: i64 = raw
                .value
                .parse()
                .map_err(|_| AppError::ToolValidation("interval value must be a positive integer of milliseconds".into()))?;
            if period_ms <= 0 {
                return Err(AppError::ToolValidation(
                    "interval value must be a positive integer of milliseconds".into(),
                ));
            }
            // Round up rather than truncate: a sub-second interval must
            // still advance by at least one second, never collapse to a
            // zero-length interval that would fire on every tick.
            Ok(Schedule::Interval {
                period_seconds: (period_ms + 999) / 1000,
            })
        }
        "once" => {
            if raw.value.ends_with('Z') || raw.value.contains('+') {
                return Err(AppError::ToolValidation(
                    "once value must be a local timestamp without timezone suffix".into(),
                ));
            }
            let naive = chrono::NaiveDateTime::parse_from_str(&raw.value, "%Y-%m-%dT%H:%M:%S")
                .map_err(|err| AppError::ToolValidation(format!("invalid once timestamp: {err}")))?;
            let local = timezone
                .from_local_datetime(&naive)
                .single()
                .ok_or_else(|| {
                    AppError::ToolValidation(
                        "once timestamp is ambiguous or nonexistent in the configured timezone".into(),
                    )
                })?;
            Ok(Schedule::Once(local.with_timezone(&Utc)))
        }
        other => Err(AppError::ToolValidation(format!("unknown schedule kind: {other}"))),
    }
}

/// Create a cron/interval/once scheduled task.
///
/// # Errors
///
/// Returns `AppError::ToolValidation` if the payload or schedule value is
/// malformed, `AppError::Unauthorized` if a non-main folder targets another
/// folder's tasks.
pub async fn create(ctx: &IpcContext, request: ToolRequest) -> Result<Option<serde_json::Value>> {
    let payload: CreatePayload = serde_json::from_value(request.payload)
        .map_err(|err| AppError::ToolValidation(format!("invalid schedule_task payload: {err}")))?;

    let target_folder = payload.folder.clone().unwrap_or_else(|| request.folder.clone());
    authorize_folder_scope(ctx, &request.folder, &target_folder)?;

    let schedule = parse_schedule(&payload.schedule, ctx.timezone)?;
    let context_mode = match payload.context_mode.as_deref() {
        Some("isolated") => ContextMode::Isolated,
        Some("inherit") | None => ContextMode::Inherit,
        Some(other) => {
            return Err(AppError::ToolValidation(format!("unknown context_mode: {other}")))
        }
    };

    let created_at = Utc::now();
    let next_fire_at = scheduler::first_fire_at(&schedule, created_at, ctx.timezone)?;

    let task = Task {
        id: uuid::Uuid::new_v4().to_string(),
        folder: target_folder.clone(),
        prompt: payload.prompt,
        schedule,
        context_mode,
        status: TaskStatus::Active,
        owner_folder: request.folder.clone(),
        next_fire_at: Some(next_fire_at),
        last_fire_at: None,
        created_at,
    };

    ctx.tasks.create(&task).await?;
    crate::snapshot::write_all(&ctx.ipc_root, &ctx.address_book, &ctx.tasks).await?;

    Ok(Some(serde_json::json!({ "task_id": task.id, "next_fire_at": next_fire_at })))
}

async fn load_owned_task(ctx: &IpcContext, request: &ToolRequest, task_id: &str) -> Result<Task> {
    let task = ctx
        .tasks
        .get(task_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no task {task_id}")))?;
    authorize_folder_scope(ctx, &request.folder, &task.owner_folder)?;
    Ok(task)
}

/// Pause an active scheduled task.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the task does not exist, or
/// `AppError::Unauthorized` if the caller does not own it.
pub async fn pause(ctx: &IpcContext, request: ToolRequest) -> Result<Option<serde_json::Value>> {
    let payload: TaskIdPayload = serde_json::from_value(request.payload.clone())
        .map_err(|err| AppError::ToolValidation(format!("invalid pause_task payload: {err}")))?;
    let task = load_owned_task(ctx, &request, &payload.task_id).await?;
    ctx.tasks.pause(&task.id).await?;
    crate::snapshot::write_all(&ctx.ipc_root, &ctx.address_book, &ctx.tasks).await?;
    Ok(None)
}

/// Resume a paused scheduled task, recomputing its next fire time.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the task does not exist, or
/// `AppError::Unauthorized` if the caller does not own it.
pub async fn resume(ctx: &IpcContext, request: ToolRequest) -> Result<Option<serde_json::Value>> {
    let payload: TaskIdPayload = serde_json::from_value(request.payload.clone())
        .map_err(|err| AppError::ToolValidation(format!("invalid resume_task payload: {err}")))?;
    let task = load_owned_task(ctx, &request, &payload.task_id).await?;
    let next_fire_at = scheduler::first_fire_at(&task.schedule, Utc::now(), ctx.timezone)?;
    ctx.tasks.resume(&task.id, next_fire_at).await?;
    crate::snapshot::write_all(&ctx.ipc_root, &ctx.address_book, &ctx.tasks).await?;
    Ok(Some(serde_json::json!({ "next_fire_at": next_fire_at })))
}

/// Cancel a scheduled task permanently.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the task does not exist, or
/// `AppError::Unauthorized` if the caller does not own it.
pub async fn cancel(ctx: &IpcContext, request: ToolRequest) -> Result<Option<serde_json::Value>> {
    let payload: TaskIdPayload = serde_json::from_value(request.payload.clone())
        .map_err(|err| AppError::ToolValidation(format!("invalid cancel_task payload: {err}")))?;
    let task = load_owned_task(ctx, &request, &payload.task_id).await?;
    ctx.tasks.cancel(&task.id).await?;
    crate::snapshot::write_all(&ctx.ipc_root, &ctx.address_book, &ctx.tasks).await?;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn once_with_zone_suffix_is_rejected() {
        let err = parse_schedule(
            &ScheduleValue {
                kind: "once".into(),
                value: "2026-02-01T15:30:00Z".into(),
            },
            chrono_tz::UTC,
        )
        .unwrap_err();
        assert!(err.to_string().contains("without timezone suffix"));
    }

    #[test]
    fn once_without_zone_suffix_is_accepted() {
        let schedule = parse_schedule(
            &ScheduleValue {
                kind: "once".into(),
                value: "2026-02-01T15:30:00".into(),
            },
            chrono_tz::UTC,
        )
        .expect("valid");
        assert!(matches!(schedule, Schedule::Once(_)));
    }

    #[test]
    fn once_timestamp_is_interpreted_in_the_configured_timezone() {
        let schedule = parse_schedule(
            &ScheduleValue {
                kind: "once".into(),
                value: "2026-02-01T15:30:00".into(),
            },
            chrono_tz::US::Eastern,
        )
        .expect("valid");
        let Schedule::Once(at) = schedule else {
            panic!("expected a once schedule");
        };
        // 15:30 US/Eastern in February (EST, UTC-5) is 20:30 UTC.
        assert_eq!(at, Utc.with_ymd_and_hms(2026, 2, 1, 20, 30, 0).unwrap());
    }

    #[test]
    fn interval_must_be_positive() {
        assert!(parse_schedule(
            &ScheduleValue {
                kind: "interval".into(),
                value: "0".into(),
            },
            chrono_tz::UTC,
        )
        .is_err());
    }
}
