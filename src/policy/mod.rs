//! Router trigger and auto-registration policy, hot-reloaded from a single
//! global TOML file.

pub mod watcher;

pub use watcher::PolicyWatcher;
