//! Hot-reload file watcher for the global trigger/auto-register policy.
//!
//! There is one Router, not one per session, so this watches a single
//! policy file rather than the per-workspace layout a multi-tenant
//! variant of this idiom would use — same `notify::recommended_watcher` +
//! `RwLock`-cached-value shape, applied to one file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::TriggerConfig;
use crate::{AppError, Result};

/// Hot-reloadable cache of the current trigger/auto-register policy.
pub struct PolicyWatcher {
    cache: Arc<RwLock<TriggerConfig>>,
    _watcher: Option<RecommendedWatcher>,
}

impl PolicyWatcher {
    /// Load the policy file at `path` and start watching it for changes.
    /// `fallback` is used if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if an existing file cannot be parsed, or
    /// `AppError::Io` if the watcher cannot be created.
    pub fn start(path: &Path, fallback: TriggerConfig) -> Result<Self> {
        let initial = load_policy_file(path)?.unwrap_or(fallback);
        let cache = Arc::new(RwLock::new(initial));

        let watch_cache = Arc::clone(&cache);
        let watch_path = path.to_path_buf();
        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_relevant(&event, &watch_path) => {
                    match load_policy_file(&watch_path) {
                        Ok(Some(policy)) => {
                            let mut guard = watch_cache.blocking_write();
                            *guard = policy;
                            info!(path = %watch_path.display(), "hot-reloaded trigger policy");
                        }
                        Ok(None) => {}
                        Err(err) => warn!(%err, "failed to reload trigger policy"),
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(%err, "policy file watcher error"),
            },
        )
        .map_err(|err| AppError::Io(format!("failed to create policy watcher: {err}")))?;

        let watch_dir = path.parent().unwrap_or_else(|| Path::new("."));
        if watch_dir.exists() {
            watcher
                .watch(watch_dir, RecursiveMode::NonRecursive)
                .map_err(|err| AppError::Io(format!("failed to watch {}: {err}", watch_dir.display())))?;
        }

        Ok(Self {
            cache,
            _watcher: Some(watcher),
        })
    }

    /// A watcher with no backing file — always returns `fallback`.
    #[must_use]
    pub fn static_policy(fallback: TriggerConfig) -> Self {
        Self {
            cache: Arc::new(RwLock::new(fallback)),
            _watcher: None,
        }
    }

    /// The current trigger/auto-register policy.
    pub async fn current(&self) -> TriggerConfig {
        self.cache.read().await.clone()
    }
}

fn load_policy_file(path: &Path) -> Result<Option<TriggerConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|err| AppError::Config(format!("failed to read policy file: {err}")))?;
    let policy: TriggerConfig = toml::from_str(&raw)?;
    Ok(Some(policy))
}

fn is_relevant(event: &Event, path: &PathBuf) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|p| p == path)
}
