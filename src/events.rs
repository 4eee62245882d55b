//! Structured observability events.
//!
//! Every admission, fire, cancellation, persistence failure, and restore
//! step emits a [`SchedulerEvent`]. The engine defines only the event
//! shape; the sink is an optional channel supplied by the embedding
//! application (a logging collaborator, a dashboard feed). Events are
//! additionally traced via `tracing` regardless of sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A task was admitted and armed.
    TaskScheduled,
    /// A timer reached its deadline and its action is about to run.
    TaskExecuting,
    /// An action finished (one-shot: the task is now completed).
    TaskCompleted,
    /// An elapsed one-shot was marked completed at restore without firing.
    TaskExpired,
    /// A task was cancelled.
    TaskCancelled,
    /// The safety shutoff cancelled every armed timer.
    AllTasksCancelled,
    /// An executing action returned an error (logged, never propagated).
    TaskError,
    /// A durable write failed (in-memory scheduling proceeded).
    PersistenceError,
    /// A fire or restore found no registered factory for `handler_type`.
    HandlerMissing,
    /// A persisted task was re-armed at startup.
    TaskRestored,
    /// A persisted task was deliberately not restored (periodic rows).
    RestoreSkipped,
    /// A restore attempt failed; the row stays scheduled.
    RestoreError,
    /// The restore pass finished; detail carries the summary.
    RestoreFinished,
}

/// One structured event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerEvent {
    /// Event discriminator.
    pub kind: EventKind,
    /// Task this event concerns, when applicable.
    pub task_id: Option<String>,
    /// Display name of the task, when known.
    pub name: Option<String>,
    /// Free-form payload (instants, error strings, counts).
    #[serde(default)]
    pub detail: serde_json::Value,
    /// Emission instant.
    pub at: DateTime<Utc>,
}

/// Cloneable emitter shared by the loop, the waiters, and the restorer.
#[derive(Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl EventSink {
    pub(crate) fn new(tx: Option<mpsc::UnboundedSender<SchedulerEvent>>) -> Self {
        Self { tx }
    }

    pub(crate) fn emit(
        &self,
        kind: EventKind,
        task_id: Option<&str>,
        name: Option<&str>,
        detail: serde_json::Value,
    ) {
        debug!(?kind, task_id, name, %detail, "scheduler event");
        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is listening anymore.
            let _ = tx.send(SchedulerEvent {
                kind,
                task_id: task_id.map(str::to_owned),
                name: name.map(str::to_owned),
                detail,
                at: Utc::now(),
            });
        }
    }
}
