use std::sync::Arc;

use chrono::{Duration, Utc};
use dispatcher::models::task::{ContextMode, Schedule, Task, TaskStatus};
use dispatcher::persistence::db;
use dispatcher::persistence::task_repo::TaskRepo;

async fn repo() -> TaskRepo {
    let db = db::connect_memory().await.expect("in-memory db");
    TaskRepo::new(Arc::new(db))
}

fn interval_task(id: &str, next_fire_at: chrono::DateTime<Utc>) -> Task {
    Task {
        id: id.into(),
        folder: "andy".into(),
        prompt: "good morning".into(),
        schedule: Schedule::Interval { period_seconds: 3600 },
        context_mode: ContextMode::Inherit,
        status: TaskStatus::Active,
        owner_folder: "andy".into(),
        next_fire_at: Some(next_fire_at),
        last_fire_at: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn due_only_returns_active_tasks_past_their_fire_time() {
    let repo = repo().await;
    let now = Utc::now();

    let overdue = interval_task("overdue", now - Duration::seconds(5));
    let future = interval_task("future", now + Duration::seconds(3600));
    repo.create(&overdue).await.expect("create overdue");
    repo.create(&future).await.expect("create future");

    let due = repo.due().await.expect("due query");
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, "overdue");
}

#[tokio::test]
async fn record_fire_with_a_next_time_keeps_the_task_active() {
    let repo = repo().await;
    let now = Utc::now();
    let task = interval_task("recurring", now - Duration::seconds(5));
    repo.create(&task).await.expect("create");

    let next = now + Duration::seconds(3600);
    repo.record_fire("recurring", Some(next)).await.expect("record fire");

    let reloaded = repo.get("recurring").await.expect("get").expect("present");
    assert_eq!(reloaded.status, TaskStatus::Active);
    assert!(reloaded.last_fire_at.is_some());
    assert_eq!(reloaded.next_fire_at, Some(next));
}

#[tokio::test]
async fn record_fire_without_a_next_time_completes_a_once_task() {
    let repo = repo().await;
    let now = Utc::now();
    let mut task = interval_task("one-shot", now - Duration::seconds(5));
    task.schedule = Schedule::Once(now - Duration::seconds(5));
    repo.create(&task).await.expect("create");

    repo.record_fire("one-shot", None).await.expect("record fire");

    let reloaded = repo.get("one-shot").await.expect("get").expect("present");
    assert_eq!(reloaded.status, TaskStatus::Completed);
    assert!(reloaded.next_fire_at.is_none());
}

#[tokio::test]
async fn pause_then_resume_round_trips_through_the_repository() {
    let repo = repo().await;
    let now = Utc::now();
    let task = interval_task("pausable", now + Duration::seconds(3600));
    repo.create(&task).await.expect("create");

    repo.pause("pausable").await.expect("pause");
    let paused = repo.get("pausable").await.expect("get").expect("present");
    assert_eq!(paused.status, TaskStatus::Paused);

    let resumed_at = now + Duration::seconds(60);
    repo.resume("pausable", resumed_at).await.expect("resume");
    let resumed = repo.get("pausable").await.expect("get").expect("present");
    assert_eq!(resumed.status, TaskStatus::Active);
    assert_eq!(resumed.next_fire_at, Some(resumed_at));
}

#[tokio::test]
async fn cancel_marks_a_task_completed_permanently() {
    let repo = repo().await;
    let task = interval_task("cancelable", Utc::now());
    repo.create(&task).await.expect("create");

    repo.cancel("cancelable").await.expect("cancel");
    let cancelled = repo.get("cancelable").await.expect("get").expect("present");
    assert_eq!(cancelled.status, TaskStatus::Completed);
}
