#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

mod integration {
    mod address_book_tests;
    mod dispatcher_tests;
    mod offline_queue_tests;
    mod schedule_ipc_tests;
    mod task_repo_tests;
}
