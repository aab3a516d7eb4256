//! Persistence layer modules.

pub mod address_book_repo;
pub mod db;
pub mod schema;
pub mod session_repo;
pub mod task_repo;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
