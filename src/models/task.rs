//! Scheduled task records.

use chrono::{DateTime, Utc};

/// How a task's next-fire time is computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// A five-field cron expression, evaluated in the host's configured
    /// timezone.
    Cron(String),
    /// A fixed period in seconds, first fired `period_seconds` after
    /// creation.
    Interval {
        /// Seconds between fires.
        period_seconds: i64,
    },
    /// A single fire at the given instant; the task is marked `completed`
    /// immediately after enqueueing its turn.
    Once(DateTime<Utc>),
}

impl Schedule {
    /// A short tag identifying the schedule kind, used in snapshots.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cron(_) => "cron",
            Self::Interval { .. } => "interval",
            Self::Once(_) => "once",
        }
    }
}

/// Whether a scheduled turn runs with the conversation's accumulated
/// context or starts a clean worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// The turn is appended to the folder's existing worker queue.
    Inherit,
    /// The turn is given to a freshly spawned, unregistered worker whose
    /// output is delivered but whose process is not kept alive for reuse.
    Isolated,
}

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Eligible to fire on its next scheduled occurrence.
    Active,
    /// Not eligible to fire until resumed.
    Paused,
    /// Will never fire again (a `once` task after firing, or an explicit
    /// cancellation).
    Completed,
}

/// A scheduled task: the unit the Scheduler ticks over and the Tool IPC
/// `schedule.*` operations mutate.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Unique task id.
    pub id: String,
    /// Folder this task's turns are dispatched into.
    pub folder: String,
    /// Prompt text delivered as the synthetic turn when the task fires.
    pub prompt: String,
    /// How the next-fire time is computed.
    pub schedule: Schedule,
    /// Inherit vs. isolated worker context.
    pub context_mode: ContextMode,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Folder that created this task; only that folder (or the main
    /// conversation) may pause, resume, or cancel it.
    pub owner_folder: String,
    /// Next instant this task is eligible to fire, if still active.
    pub next_fire_at: Option<DateTime<Utc>>,
    /// Last instant this task actually fired.
    pub last_fire_at: Option<DateTime<Utc>>,
    /// When this task was created.
    pub created_at: DateTime<Utc>,
}
