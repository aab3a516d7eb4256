#![forbid(unsafe_code)]

//! `dispatcher` — personal chat-agent gateway binary.
//!
//! Bootstraps configuration, the Signal and Slack channels, the Worker
//! Pool, the filesystem-mediated Tool IPC server, the Scheduler, periodic
//! snapshots, and the optional mail intake poller and voice HTTP endpoint.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use dispatcher::channel::signal::SignalChannel;
use dispatcher::channel::slack::{self, SlackChannel};
use dispatcher::channel::Channel;
use dispatcher::config::GlobalConfig;
use dispatcher::dispatcher::Dispatcher;
use dispatcher::persistence::address_book_repo::AddressBookRepo;
use dispatcher::persistence::db;
use dispatcher::persistence::session_repo::SessionRepo;
use dispatcher::persistence::task_repo::TaskRepo;
use dispatcher::policy::PolicyWatcher;
use dispatcher::{intake, ipc, scheduler, snapshot, voice, worker};
use dispatcher::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "dispatcher", about = "Personal chat-agent gateway", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    ///
    /// Defaults to `config.toml` in the current working directory, which is
    /// the expected layout for a portable installation (binary + config.toml
    /// in the same folder).
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("dispatcher bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config).map_err(|err| {
        AppError::Config(format!(
            "cannot load config file '{}': {err} — copy config.toml from the release \
             archive to the same directory as the binary, or pass --config <path>",
            args.config.display()
        ))
    })?;
    config.load_credentials().await?;
    info!("configuration loaded");

    let timezone: chrono_tz::Tz = config
        .timezone
        .parse()
        .map_err(|err| AppError::Config(format!("invalid timezone: {err}")))?;

    // ── Initialize database ─────────────────────────────
    let db_path = config.db_path().to_string_lossy().to_string();
    let db = Arc::new(db::connect(&db_path).await?);
    info!("database connected");

    let address_book = AddressBookRepo::new(Arc::clone(&db));
    let tasks = TaskRepo::new(Arc::clone(&db));
    let sessions = SessionRepo::new(Arc::clone(&db));

    // ── Build channels ───────────────────────────────────
    let signal_channel = SignalChannel::new(config.signal.clone());

    let slack_channel = if config.slack.channel_id.is_empty() {
        info!("slack channel_id empty; slack transport disabled");
        None
    } else {
        Some(SlackChannel::new(config.slack.clone())?)
    };

    let mut channels: Vec<Arc<dyn Channel>> = vec![Arc::clone(&signal_channel) as Arc<dyn Channel>];
    if let Some(ref slack) = slack_channel {
        channels.push(Arc::clone(slack) as Arc<dyn Channel>);
    }

    // ── Start the Worker Pool ────────────────────────────
    let pool = worker::spawn_pool(
        config.worker.clone(),
        config.ipc_root().to_path_buf(),
        channels.clone(),
        sessions.clone(),
    );
    info!("worker pool started");

    // ── Wire the Dispatcher ──────────────────────────────
    let policy_path = config.ipc_root().join(".dispatcher").join("policy.toml");
    let policy = match PolicyWatcher::start(&policy_path, config.trigger.clone()) {
        Ok(watcher) => Arc::new(watcher),
        Err(err) => {
            warn!(%err, "failed to start policy hot-reload watcher; using static configuration");
            Arc::new(PolicyWatcher::static_policy(config.trigger.clone()))
        }
    };

    let dispatcher = Dispatcher::new(address_book.clone(), policy, pool.clone());
    dispatcher.attach(&channels);

    // ── Connect channels ─────────────────────────────────
    signal_channel.connect().await?;
    signal_channel.spawn_poll_loop();
    info!("signal channel connected");

    if let Some(ref slack) = slack_channel {
        slack::start(slack).await?;
        info!("slack channel connected");
    }

    // ── Start the Tool IPC sweeper ───────────────────────
    let ipc_ctx = ipc::IpcContext::new(
        &config,
        address_book.clone(),
        tasks.clone(),
        pool.clone(),
        channels.clone(),
        timezone,
    );
    ipc::sweeper::spawn(ipc_ctx);
    info!("tool ipc sweeper started");

    // ── Start the Scheduler ──────────────────────────────
    scheduler::spawn(tasks.clone(), address_book.clone(), pool.clone(), timezone);
    info!("scheduler started");

    // ── Start periodic snapshots ─────────────────────────
    snapshot::spawn_periodic(config.ipc_root().to_path_buf(), address_book.clone(), tasks.clone());

    // ── Start the mail intake poller, if configured ──────
    if let Some(ref mail) = config.intake.mail {
        if let Some(ref bookmark) = config.bookmark {
            intake::spawn_mail_poller(mail.clone(), bookmark.relay_url.clone(), Client::new());
            info!("mail intake poller started");
        } else {
            warn!("intake.mail configured without bookmark relay; mail intake disabled");
        }
    }

    // ── Start the voice HTTP endpoint ────────────────────
    let voice_cancel = CancellationToken::new();
    let voice_handle = {
        let port = config.voice.http_port;
        let bearer_token = config.voice.bearer_token.clone();
        let pool = pool.clone();
        let cancel = voice_cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = voice::serve(port, bearer_token, pool, cancel).await {
                error!(%err, "voice endpoint failed");
            }
        })
    };
    info!(port = config.voice.http_port, "voice endpoint started");

    info!("dispatcher ready");

    // ── Wait for first shutdown signal ───────────────────
    shutdown_signal().await;
    info!("shutdown signal received — starting graceful shutdown");

    voice_cancel.cancel();
    pool.shutdown().await;
    let _ = voice_handle.await;

    info!("dispatcher shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
