//! Task types and action aliases.
//!
//! Defines the durable [`TaskRecord`] row shape plus the closure aliases
//! collaborators use to hand executable work to the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// String-keyed parameter mapping, passed verbatim to a handler factory
/// when a persisted task is restored. Must fully determine the
/// reconstructed action.
pub type TaskParameters = serde_json::Map<String, serde_json::Value>;

/// A single asynchronous unit of work, consumed by one fire.
pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Repeatable action for periodic tasks, invoked once per fire.
pub type TaskAction = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Factory that reconstructs an executable action from persisted
/// parameters. Registered under a stable `handler_type` string; resolved
/// on restore and on every cron fire.
pub type HandlerFactory = Arc<dyn Fn(TaskParameters) -> anyhow::Result<TaskFuture> + Send + Sync>;

/// Which of the three timer tables a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Fires exactly once at a predetermined instant.
    OneShot,
    /// Fires repeatedly at a fixed interval, re-armed after each fire.
    Periodic,
    /// Fires per a calendar recurrence expression in a named time zone.
    Cron,
}

impl TaskKind {
    /// Stable string form used in the durable store.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneShot => "one_shot",
            Self::Periodic => "periodic",
            Self::Cron => "cron",
        }
    }

    /// Parse the stable string form. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "one_shot" => Some(Self::OneShot),
            "periodic" => Some(Self::Periodic),
            "cron" => Some(Self::Cron),
            _ => None,
        }
    }
}

/// Durable lifecycle state. Execution is ephemeral; there is no persisted
/// "running" state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Armed (or awaiting restore).
    Scheduled,
    /// Fired, or elapsed before restore.
    Completed,
    /// Explicitly cancelled.
    Cancelled,
}

impl TaskStatus {
    /// Stable string form used in the durable store.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the stable string form. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Durable record of a scheduled task, keyed by `task_id`.
///
/// The id is engine-generated (UUID) for one-shot tasks and
/// caller-supplied for periodic and cron tasks, where it doubles as the
/// replace key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Globally unique opaque identifier.
    pub task_id: String,
    /// Timer table this task belongs to. Immutable.
    pub kind: TaskKind,
    /// Free-text label for observability. Not unique.
    pub name: Option<String>,
    /// Lifecycle state.
    pub status: TaskStatus,
    /// Periodic: fixed interval in seconds.
    pub interval_seconds: Option<f64>,
    /// One-shot: absolute UTC fire instant. Immutable once accepted.
    pub scheduled_for: Option<DateTime<Utc>>,
    /// Cron: recurrence expression.
    pub cron_expression: Option<String>,
    /// Cron: IANA time zone name the expression is evaluated in.
    pub timezone_name: Option<String>,
    /// Cron: cached instant of the most recent fire.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Cron: cached next computed occurrence.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Serialized parameters for the handler factory.
    pub parameters: Option<TaskParameters>,
    /// Registry key of the factory that reconstructs the action.
    pub handler_type: Option<String>,
    /// Row creation instant.
    pub created_at: DateTime<Utc>,
    /// Last mutation instant.
    pub updated_at: DateTime<Utc>,
    /// Completion instant, if completed.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    fn base(task_id: impl Into<String>, kind: TaskKind, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task_id.into(),
            kind,
            name: None,
            status: TaskStatus::Scheduled,
            interval_seconds: None,
            scheduled_for: None,
            cron_expression: None,
            timezone_name: None,
            last_run_at: None,
            next_run_at: None,
            parameters: None,
            handler_type: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// New one-shot row, `scheduled` at `fire_at`.
    pub fn one_shot(task_id: impl Into<String>, fire_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let mut rec = Self::base(task_id, TaskKind::OneShot, now);
        rec.scheduled_for = Some(fire_at);
        rec
    }

    /// New periodic row. The task name doubles as its id.
    pub fn periodic(name: impl Into<String>, interval_seconds: f64, now: DateTime<Utc>) -> Self {
        let name = name.into();
        let mut rec = Self::base(name.clone(), TaskKind::Periodic, now);
        rec.name = Some(name);
        rec.interval_seconds = Some(interval_seconds);
        rec
    }

    /// New cron row.
    pub fn cron(
        task_id: impl Into<String>,
        expression: impl Into<String>,
        timezone: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut rec = Self::base(task_id, TaskKind::Cron, now);
        rec.cron_expression = Some(expression.into());
        rec.timezone_name = Some(timezone.into());
        rec
    }

    /// Attach a display name.
    pub fn with_name(mut self, name: Option<&str>) -> Self {
        if let Some(n) = name {
            self.name = Some(n.to_owned());
        }
        self
    }

    /// Attach restore metadata.
    pub fn with_handler(
        mut self,
        handler_type: Option<&str>,
        parameters: Option<TaskParameters>,
    ) -> Self {
        self.handler_type = handler_type.map(str::to_owned);
        self.parameters = parameters;
        self
    }
}
