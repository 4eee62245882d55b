//! Chime: durable task scheduling for personal automation assistants.
//!
//! Executes arbitrary asynchronous actions at a specific future time
//! (one-shot), at fixed intervals (periodic), or per a calendar recurrence
//! expression evaluated in a named time zone (cron), and survives process
//! restarts: every task is durably recorded before being armed in memory,
//! and on startup the engine rebuilds its timers from the durable record
//! without retroactively firing missed deadlines.
//!
//! # Architecture
//!
//! One supervisor loop per engine owns the in-memory timer tables; callers
//! marshal onto it through a command channel and never block:
//! - **Engine**: arm / fire / cancel, one cooperative tokio task per timer
//! - **Store**: SQLite record of every task, the only cross-restart state
//! - **Recurrence**: cron evaluation in an IANA zone, UTC instants out
//! - **Registry**: `handler_type` → factory, populated by the application
//! - **Restorer**: startup pass re-arming persisted tasks via the registry
//!
//! ```no_run
//! use chime::{Restorer, Scheduler, TaskStore};
//! use std::sync::Arc;
//!
//! # async fn demo() -> chime::Result<()> {
//! let store = Arc::new(TaskStore::open_default()?);
//! let scheduler = Scheduler::new().with_store(store).start();
//!
//! scheduler.register_restore_handler(
//!     "send_reminder",
//!     Arc::new(|params| {
//!         Ok(Box::pin(async move {
//!             println!("reminder: {params:?}");
//!             Ok(())
//!         }) as chime::TaskFuture)
//!     }),
//! );
//!
//! let report = Restorer::new(scheduler.clone()).restore_pending_tasks();
//! println!("restored {} one-shot tasks", report.one_shot_restored);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod recurrence;
pub mod registry;
pub mod restore;
pub mod store;
pub mod task;

pub use clock::{Clock, SystemClock};
pub use config::SchedulerConfig;
pub use engine::{ArmedTaskInfo, Scheduler, SchedulerHandle, StatusSnapshot};
pub use error::{Result, SchedulerError};
pub use events::{EventKind, SchedulerEvent};
pub use registry::HandlerRegistry;
pub use restore::{RestoreReport, Restorer};
pub use store::{StoreError, TaskStore};
pub use task::{
    HandlerFactory, TaskAction, TaskFuture, TaskKind, TaskParameters, TaskRecord, TaskStatus,
};
