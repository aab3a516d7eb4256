//! Global configuration parsing, validation, and credential resolution.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Nested Slack configuration required for Socket Mode connectivity.
///
/// `bot_token` and `app_token` may be left empty in `config.toml`; in that
/// case [`GlobalConfig::load_credentials`] resolves them from the OS
/// credential store before the Slack channel is started.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SlackConfig {
    /// App-level token used for Socket Mode.
    #[serde(default)]
    pub app_token: String,
    /// Bot user token used for posting messages.
    #[serde(default)]
    pub bot_token: String,
    /// Default channel where operator-visible notices are posted.
    pub channel_id: String,
}

/// Local Signal JSON-RPC daemon connection settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SignalConfig {
    /// Unix domain socket path of the signal-cli-style daemon.
    pub socket_path: PathBuf,
    /// Our own phone number, used to recognize and drop self-echoes.
    pub account_number: String,
    /// Poll interval, in seconds, between `receive` RPC calls.
    #[serde(default = "default_signal_poll_seconds")]
    pub poll_seconds: u64,
}

const fn default_signal_poll_seconds() -> u64 {
    2
}

/// Worker process pool sizing and lifecycle timeouts.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Host CLI binary launched for each worker (e.g., `claude`, `codex`).
    pub host_cli: String,
    /// Default arguments passed to the host CLI before the turn payload.
    #[serde(default)]
    pub host_cli_args: Vec<String>,
    /// Maximum number of concurrently spawned worker processes.
    pub pool_size: u32,
    /// Seconds of inactivity on a folder's worker before it is reaped.
    pub idle_reap_seconds: u64,
    /// Maximum time to wait for a worker's ready signal at startup.
    pub startup_timeout_seconds: u64,
    /// Maximum time a single turn may run before being killed.
    pub turn_timeout_seconds: u64,
}

/// Per-transport auto-registration toggles for unknown inbound chat ids.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AutoRegisterConfig {
    /// Auto-register unknown Signal senders on first trigger-matching message.
    #[serde(default)]
    pub signal: bool,
    /// Auto-register unknown Slack channels on first trigger-matching message.
    #[serde(default)]
    pub slack: bool,
}

/// Router trigger and auto-registration policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TriggerConfig {
    /// Regular expression a normalized message body must match to be
    /// considered an addressed turn rather than ambient chatter.
    pub pattern: String,
    /// Auto-registration toggles, hot-reloaded from the same policy file.
    #[serde(default)]
    pub auto_register: AutoRegisterConfig,
}

/// Voice HTTP endpoint settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct VoiceConfig {
    /// Loopback port the voice endpoint binds to.
    pub http_port: u16,
    /// Bearer token the caller must present.
    #[serde(default)]
    pub bearer_token: String,
}

/// Mail-to-bookmark intake poller settings. Absent from config disables it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MailIntakeConfig {
    /// IMAP server hostname.
    pub imap_host: String,
    /// IMAP server port (implicit TLS).
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    /// IMAP login username.
    pub username: String,
    /// Environment variable name holding the IMAP password.
    pub password_env: String,
    /// Only messages from this address (or domain) are scanned for URLs.
    pub from_filter: String,
    /// IMAP flag or label applied after a message has been processed.
    pub processed_label: String,
    /// Poll interval, in seconds.
    #[serde(default = "default_mail_poll_seconds")]
    pub poll_seconds: u64,
}

const fn default_imap_port() -> u16 {
    993
}

const fn default_mail_poll_seconds() -> u64 {
    120
}

/// Intake poller configuration, each poller independently optional.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct IntakeConfig {
    /// Mail-to-bookmark poller, disabled unless configured.
    pub mail: Option<MailIntakeConfig>,
}

/// Bookmark relay HTTP settings. Absent from config disables the
/// `bookmark.*` tool operations (they return `AppError::BridgeOutage`).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BookmarkConfig {
    /// Base URL of the bookmark relay (URL-extraction HTTP service).
    pub relay_url: String,
}

/// Reminders bridge subprocess settings. Absent from config disables the
/// `reminders.*` tool operations.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RemindersConfig {
    /// Command (and leading args) invoked once per call, fed one JSON
    /// request line on stdin and expected to print one JSON response line
    /// on stdout before exiting.
    pub bridge_cmd: Vec<String>,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root directory for the filesystem tool-IPC layout and snapshots.
    pub ipc_root: PathBuf,
    /// Folder name of the operator's main conversation. Tasks and tool
    /// requests scoped to this folder may affect any other conversation.
    pub main_folder: String,
    /// IANA timezone used to evaluate cron and interval task schedules.
    pub timezone: String,
    /// Signal connectivity settings.
    pub signal: SignalConfig,
    /// Slack connectivity settings.
    pub slack: SlackConfig,
    /// Worker pool sizing and timeouts.
    pub worker: WorkerConfig,
    /// Trigger and auto-registration policy.
    pub trigger: TriggerConfig,
    /// Voice HTTP endpoint settings.
    pub voice: VoiceConfig,
    /// Intake poller configuration.
    #[serde(default)]
    pub intake: IntakeConfig,
    /// Bookmark relay settings; absent disables `bookmark.*` tools.
    pub bookmark: Option<BookmarkConfig>,
    /// Reminders bridge settings; absent disables `reminders.*` tools.
    pub reminders: Option<RemindersConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve any credential fields left empty in the config file from the
    /// OS credential store (`keyring`). Values present in the file always
    /// win; the store is only consulted when a field is empty.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a required credential is missing from
    /// both the config file and the credential store.
    pub async fn load_credentials(&mut self) -> Result<()> {
        if self.slack.channel_id.is_empty() {
            return Ok(());
        }
        if self.slack.bot_token.is_empty() {
            self.slack.bot_token = load_keyring_secret("slack_bot_token")?;
        }
        if self.slack.app_token.is_empty() {
            self.slack.app_token = load_keyring_secret("slack_app_token")?;
        }
        Ok(())
    }

    /// Root directory for the filesystem tool-IPC layout.
    #[must_use]
    pub fn ipc_root(&self) -> &Path {
        &self.ipc_root
    }

    /// Path to the durable SQLite database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.ipc_root.join(".dispatcher").join("dispatcher.db")
    }

    /// Whether `folder` is the operator's main conversation.
    #[must_use]
    pub fn is_main_folder(&self, folder: &str) -> bool {
        folder == self.main_folder
    }

    fn validate(&mut self) -> Result<()> {
        if self.worker.pool_size == 0 {
            return Err(AppError::Config(
                "worker.pool_size must be greater than zero".into(),
            ));
        }

        if self.main_folder.trim().is_empty() {
            return Err(AppError::Config("main_folder must not be empty".into()));
        }

        regex::Regex::new(&self.trigger.pattern)
            .map_err(|err| AppError::Config(format!("trigger.pattern invalid regex: {err}")))?;

        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|err| AppError::Config(format!("timezone invalid: {err}")))?;

        fs::create_dir_all(&self.ipc_root)
            .map_err(|err| AppError::Config(format!("ipc_root not creatable: {err}")))?;
        let canonical_root = self
            .ipc_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("ipc_root invalid: {err}")))?;
        self.ipc_root = canonical_root;

        Ok(())
    }
}

fn load_keyring_secret(key: &str) -> Result<String> {
    let entry = keyring::Entry::new("dispatcher", key)
        .map_err(|err| AppError::Config(format!("keyring entry {key}: {err}")))?;
    entry
        .get_password()
        .map_err(|err| AppError::Config(format!("credential {key} not found: {err}")))
}
