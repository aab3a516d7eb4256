use std::sync::Arc;

use dispatcher::ipc::handlers::schedule;
use dispatcher::ipc::IpcContext;
use dispatcher::models::tool_request::{Operation, ToolRequest};
use dispatcher::persistence::address_book_repo::AddressBookRepo;
use dispatcher::persistence::db;
use dispatcher::persistence::session_repo::SessionRepo;
use dispatcher::persistence::task_repo::TaskRepo;
use dispatcher::worker;
use dispatcher::AppError;

/// `host_cli = "true"` spawns and exits immediately without a ready
/// signal; `dispatch_turn` logs and drops the turn rather than panicking,
/// which is all these handler-level tests need from the pool.
async fn ctx(main_folder: &str) -> IpcContext {
    let db = Arc::new(db::connect_memory().await.expect("in-memory db"));
    let address_book = AddressBookRepo::new(Arc::clone(&db));
    let tasks = TaskRepo::new(Arc::clone(&db));
    let sessions = SessionRepo::new(Arc::clone(&db));

    let config = dispatcher::config::WorkerConfig {
        host_cli: "true".into(),
        host_cli_args: Vec::new(),
        pool_size: 1,
        idle_reap_seconds: 60,
        startup_timeout_seconds: 1,
        turn_timeout_seconds: 5,
    };
    let ipc_root = std::env::temp_dir().join(format!("dispatcher-test-{}", uuid::Uuid::new_v4()));
    let pool = worker::spawn_pool(config, ipc_root.clone(), Vec::new(), sessions);

    IpcContext {
        ipc_root,
        address_book,
        tasks,
        pool,
        channels: Vec::new(),
        timezone: chrono_tz::UTC,
        http: reqwest::Client::new(),
        bookmark_relay_url: None,
        reminders_bridge_cmd: None,
        main_folder: main_folder.into(),
    }
}

fn create_request(folder: &str, target_folder: Option<&str>) -> ToolRequest {
    let mut payload = serde_json::json!({
        "prompt": "good morning",
        "schedule": { "kind": "interval", "value": "3600000" },
    });
    if let Some(target) = target_folder {
        payload["folder"] = serde_json::Value::String(target.into());
    }

    ToolRequest {
        operation: Operation::ScheduleCreate,
        folder: folder.into(),
        request_id: "req-1".into(),
        payload,
        response_file: None,
    }
}

#[tokio::test]
async fn a_folder_may_schedule_its_own_tasks() {
    let ctx = ctx("main").await;
    let request = create_request("andy", None);

    let result = schedule::create(&ctx, request).await.expect("create");
    assert!(result.is_some());
}

#[tokio::test]
async fn a_non_main_folder_may_not_schedule_a_task_for_another_folder() {
    let ctx = ctx("main").await;
    let request = create_request("andy", Some("bob"));

    let err = schedule::create(&ctx, request).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));
}

#[tokio::test]
async fn the_main_folder_may_schedule_a_task_for_any_folder() {
    let ctx = ctx("main").await;
    let request = create_request("main", Some("bob"));

    let result = schedule::create(&ctx, request).await.expect("create");
    assert!(result.is_some());
}

#[tokio::test]
async fn a_non_owning_folder_may_not_pause_another_folders_task() {
    let ctx = ctx("main").await;
    let created = schedule::create(&ctx, create_request("andy", None))
        .await
        .expect("create")
        .expect("task id payload");
    let task_id = created["task_id"].as_str().expect("task_id string").to_owned();

    let pause_request = ToolRequest {
        operation: Operation::SchedulePause,
        folder: "bob".into(),
        request_id: "req-2".into(),
        payload: serde_json::json!({ "task_id": task_id }),
        response_file: None,
    };

    let err = schedule::pause(&ctx, pause_request).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));
}

#[tokio::test]
async fn the_main_folder_may_pause_any_folders_task() {
    let ctx = ctx("main").await;
    let created = schedule::create(&ctx, create_request("andy", None))
        .await
        .expect("create")
        .expect("task id payload");
    let task_id = created["task_id"].as_str().expect("task_id string").to_owned();

    let pause_request = ToolRequest {
        operation: Operation::SchedulePause,
        folder: "main".into(),
        request_id: "req-2".into(),
        payload: serde_json::json!({ "task_id": task_id }),
        response_file: None,
    };

    schedule::pause(&ctx, pause_request).await.expect("pause");
}
