//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` — safe to
//! re-run on every server startup. Produces a convergent result.

use sqlx::SqlitePool;

use crate::Result;

/// Add a column to a table if it does not already exist.
///
/// Uses `PRAGMA table_info` to check column presence before issuing
/// `ALTER TABLE`, making the operation idempotent on repeated startups.
///
/// # Errors
///
/// Returns `AppError::Db` if the PRAGMA query or `ALTER TABLE` fails.
async fn add_column_if_missing(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    alter_sql: &str,
) -> Result<()> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM pragma_table_info('{table}') WHERE name = '{column}'"
    ))
    .fetch_one(pool)
    .await?;

    if count == 0 {
        sqlx::raw_sql(alter_sql).execute(pool).await?;
    }
    Ok(())
}

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS conversation (
    chat_id         TEXT PRIMARY KEY NOT NULL,
    folder          TEXT NOT NULL,
    display_name    TEXT,
    capabilities    TEXT NOT NULL DEFAULT '[]',
    trigger_token   TEXT NOT NULL DEFAULT '',
    requires_trigger INTEGER NOT NULL DEFAULT 0,
    container_overrides TEXT,
    is_main         INTEGER NOT NULL DEFAULT 0,
    auto_registered INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    last_active_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task (
    id              TEXT PRIMARY KEY NOT NULL,
    folder          TEXT NOT NULL,
    prompt          TEXT NOT NULL,
    schedule_kind   TEXT NOT NULL CHECK(schedule_kind IN ('cron','interval','once')),
    schedule_value  TEXT NOT NULL,
    context_mode    TEXT NOT NULL CHECK(context_mode IN ('inherit','isolated')),
    status          TEXT NOT NULL CHECK(status IN ('active','paused','completed')),
    owner_folder    TEXT NOT NULL,
    next_fire_at    TEXT,
    last_fire_at    TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session (
    id              TEXT PRIMARY KEY NOT NULL,
    folder          TEXT NOT NULL,
    purpose         TEXT NOT NULL CHECK(purpose IN ('chat','voice')),
    status          TEXT NOT NULL CHECK(status IN ('starting','active','idle','terminated')),
    last_tool       TEXT,
    created_at      TEXT NOT NULL,
    last_activity_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_conversation_folder ON conversation(folder);
CREATE INDEX IF NOT EXISTS idx_task_folder_status ON task(folder, status);
CREATE INDEX IF NOT EXISTS idx_task_next_fire ON task(status, next_fire_at);
CREATE INDEX IF NOT EXISTS idx_session_folder_purpose ON session(folder, purpose);
";

    sqlx::raw_sql(ddl).execute(pool).await?;

    // Kept as a migration template: new session columns land here behind an
    // idempotent PRAGMA check rather than a breaking ALTER.
    add_column_if_missing(
        pool,
        "session",
        "last_tool",
        "ALTER TABLE session ADD COLUMN last_tool TEXT",
    )
    .await?;
    add_column_if_missing(
        pool,
        "session",
        "external_id",
        "ALTER TABLE session ADD COLUMN external_id TEXT",
    )
    .await?;

    add_column_if_missing(
        pool,
        "conversation",
        "trigger_token",
        "ALTER TABLE conversation ADD COLUMN trigger_token TEXT NOT NULL DEFAULT ''",
    )
    .await?;
    add_column_if_missing(
        pool,
        "conversation",
        "requires_trigger",
        "ALTER TABLE conversation ADD COLUMN requires_trigger INTEGER NOT NULL DEFAULT 0",
    )
    .await?;
    add_column_if_missing(
        pool,
        "conversation",
        "container_overrides",
        "ALTER TABLE conversation ADD COLUMN container_overrides TEXT",
    )
    .await?;

    Ok(())
}
