//! Scheduler engine: arm, fire, and cancel timers.
//!
//! One supervisor loop per engine owns the three in-memory timer tables
//! (one-shot, periodic, cron). Every mutation is marshalled onto that loop
//! through an unbounded command channel, so callers on other tasks or
//! threads never block and the tables need no locks. Each armed timer is a
//! cooperative tokio task that suspends until its deadline; any number of
//! timers can be pending without a thread per timer.
//!
//! Durable writes are log-and-continue: a store failure never blocks
//! in-memory scheduling. The unpersisted task still runs within this
//! process lifetime; it just would not survive a restart.

use crate::clock::{Clock, SystemClock};
use crate::error::{Result, SchedulerError};
use crate::events::{EventKind, EventSink, SchedulerEvent};
use crate::recurrence;
use crate::registry::HandlerRegistry;
use crate::store::{StoreError, TaskStore};
use crate::task::{TaskAction, TaskFuture, TaskParameters, TaskRecord, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared dependencies handed to the loop, the waiters, and the restorer.
pub(crate) struct EngineContext {
    pub(crate) store: Option<Arc<TaskStore>>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) registry: HandlerRegistry,
    pub(crate) events: EventSink,
}

impl EngineContext {
    /// Policy for durable writes: log, emit, keep scheduling.
    pub(crate) fn persist<T>(
        &self,
        action: &str,
        task_id: &str,
        result: std::result::Result<T, StoreError>,
    ) {
        if let Err(e) = result {
            warn!("persistence failure during {action} for task {task_id}: {e}");
            self.events.emit(
                EventKind::PersistenceError,
                Some(task_id),
                None,
                json!({ "action": action, "error": e.to_string() }),
            );
        }
    }

    /// Best-effort durable status transition.
    pub(crate) fn mark_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        completed_at: Option<DateTime<Utc>>,
        action: &str,
    ) {
        if let Some(store) = &self.store {
            self.persist(action, task_id, store.update_status(task_id, status, completed_at));
        }
    }
}

/// Commands marshalled onto the supervisor loop.
enum Command {
    ArmOneShot {
        task_id: String,
        fire_at: DateTime<Utc>,
        action: TaskFuture,
        name: Option<String>,
    },
    ArmPeriodic {
        name: String,
        interval: Duration,
        action: TaskAction,
    },
    ArmCron {
        task_id: String,
        expression: String,
        timezone: String,
        handler_type: String,
        parameters: TaskParameters,
        name: Option<String>,
    },
    /// A one-shot waiter reached its deadline and asks whether it is still
    /// armed. The loop removes the entry and confirms, so a cancellation
    /// racing the fire is honored.
    BeginOneShot {
        task_id: String,
        reply: oneshot::Sender<bool>,
    },
    /// A cron waiter computed its next occurrence; keep the snapshot fresh.
    NoteNextFire {
        task_id: String,
        at: DateTime<Utc>,
    },
    Cancel {
        key: String,
        reply: oneshot::Sender<bool>,
    },
    CancelAll,
    Shutdown,
    Snapshot {
        reply: oneshot::Sender<StatusSnapshot>,
    },
}

/// One armed timer as tracked by the loop.
struct ArmedEntry {
    name: Option<String>,
    next_fire_at: Option<DateTime<Utc>>,
    interval_seconds: Option<f64>,
    token: CancellationToken,
}

/// Read-only snapshot of everything armed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// `true` after `cancel_all`: the engine refuses new arms until a new
    /// engine is started.
    pub halted: bool,
    /// Armed one-shot timers.
    pub one_shot: Vec<ArmedTaskInfo>,
    /// Armed periodic timers.
    pub periodic: Vec<ArmedTaskInfo>,
    /// Armed cron timers.
    pub cron: Vec<ArmedTaskInfo>,
}

/// Snapshot line for a single armed timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmedTaskInfo {
    /// Task identifier (periodic timers: the task name).
    pub task_id: String,
    /// Display name, when known.
    pub name: Option<String>,
    /// Next computed fire instant (one-shot and cron).
    pub next_fire_at: Option<DateTime<Utc>>,
    /// Fixed interval (periodic only).
    pub interval_seconds: Option<f64>,
}

/// Engine under construction: `Scheduler::new().with_store(..).start()`.
///
/// Constructed once by the embedding application and handed to every
/// collaborator as a [`SchedulerHandle`]; there is no global instance.
pub struct Scheduler {
    store: Option<Arc<TaskStore>>,
    clock: Arc<dyn Clock>,
    event_tx: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Engine without persistence: tasks run within this process lifetime
    /// only.
    pub fn new() -> Self {
        Self {
            store: None,
            clock: Arc::new(SystemClock),
            event_tx: None,
        }
    }

    /// Build an engine from configuration, opening the durable store when
    /// persistence is enabled.
    pub fn from_config(config: &crate::config::SchedulerConfig) -> Result<Self> {
        let mut scheduler = Self::new();
        if config.persistence_enabled {
            let path = config.resolved_db_path().ok_or_else(|| {
                SchedulerError::Store(StoreError::Io("no user config directory".to_owned()))
            })?;
            scheduler = scheduler.with_store(Arc::new(TaskStore::open(&path)?));
        }
        Ok(scheduler)
    }

    /// Attach the durable task store.
    pub fn with_store(mut self, store: Arc<TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Substitute the time source (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach an observability event sink.
    pub fn with_event_sink(mut self, tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Spawn the supervisor loop and return the cloneable handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> SchedulerHandle {
        let ctx = Arc::new(EngineContext {
            store: self.store,
            clock: self.clock,
            registry: HandlerRegistry::new(),
            events: EventSink::new(self.event_tx),
        });

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let state = EngineState {
            ctx: Arc::clone(&ctx),
            cmd_tx: cmd_tx.clone(),
            one_shot: HashMap::new(),
            periodic: HashMap::new(),
            cron: HashMap::new(),
            halted: false,
        };
        tokio::spawn(run_loop(state, cmd_rx));

        SchedulerHandle { cmd_tx, ctx }
    }
}

/// Cheaply-cloneable handle over a running engine.
///
/// All operations marshal onto the engine's supervisor loop; none of them
/// block the caller.
#[derive(Clone)]
pub struct SchedulerHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    ctx: Arc<EngineContext>,
}

impl SchedulerHandle {
    pub(crate) fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| SchedulerError::Channel("engine loop stopped".to_owned()))
    }

    /// Schedule a one-shot task at an absolute UTC instant.
    ///
    /// Rejects with [`SchedulerError::InvalidSchedule`] when `fire_at` is
    /// not strictly in the future, before any durable write. Returns the
    /// engine-generated task id, usable with [`cancel`](Self::cancel).
    pub fn schedule_at(
        &self,
        fire_at: DateTime<Utc>,
        action: TaskFuture,
        name: Option<&str>,
        handler_type: Option<&str>,
        parameters: Option<TaskParameters>,
    ) -> Result<String> {
        let now = self.ctx.clock.now();
        if fire_at <= now {
            return Err(SchedulerError::InvalidSchedule(format!(
                "cannot schedule in the past: {fire_at} <= {now}"
            )));
        }

        let task_id = uuid::Uuid::new_v4().to_string();
        if let Some(store) = &self.ctx.store {
            let record = TaskRecord::one_shot(&task_id, fire_at, now)
                .with_name(name)
                .with_handler(handler_type, parameters);
            self.ctx.persist("save_one_shot", &task_id, store.insert(&record));
        }

        self.ctx.events.emit(
            EventKind::TaskScheduled,
            Some(&task_id),
            name,
            json!({
                "kind": "one_shot",
                "fire_at": fire_at.to_rfc3339(),
                "delay_seconds": (fire_at - now).num_milliseconds() as f64 / 1000.0,
            }),
        );

        self.send(Command::ArmOneShot {
            task_id: task_id.clone(),
            fire_at,
            action,
            name: name.map(str::to_owned),
        })?;
        Ok(task_id)
    }

    /// Schedule a periodic task under a unique name.
    ///
    /// Replace semantics: an armed periodic timer under `name` is cancelled
    /// before the new one is armed. The action runs immediately, then every
    /// `interval`. `handler_type`/`parameters` are recorded for
    /// observability but periodic tasks are not data-restorable (see
    /// [`Restorer`](crate::restore::Restorer)).
    pub fn schedule_periodic(
        &self,
        name: &str,
        action: TaskAction,
        interval: Duration,
        handler_type: Option<&str>,
        parameters: Option<TaskParameters>,
    ) -> Result<()> {
        let now = self.ctx.clock.now();
        if let Some(store) = &self.ctx.store {
            let record = TaskRecord::periodic(name, interval.as_secs_f64(), now)
                .with_handler(handler_type, parameters);
            self.ctx.persist("save_periodic", name, store.upsert(&record));
        }

        self.ctx.events.emit(
            EventKind::TaskScheduled,
            Some(name),
            Some(name),
            json!({ "kind": "periodic", "interval_seconds": interval.as_secs_f64() }),
        );

        self.send(Command::ArmPeriodic {
            name: name.to_owned(),
            interval,
            action,
        })
    }

    /// Schedule a cron task.
    ///
    /// The expression and time zone are validated here, at registration —
    /// [`SchedulerError::InvalidCron`] / [`SchedulerError::InvalidTimezone`]
    /// — never at fire time. Replace semantics under `task_id`. On every
    /// fire the handler factory is resolved from the registry and the next
    /// occurrence is recomputed from the current instant, so missed windows
    /// collapse into a single resumed fire.
    pub fn schedule_cron(
        &self,
        task_id: &str,
        expression: &str,
        timezone: &str,
        handler_type: &str,
        parameters: TaskParameters,
        name: Option<&str>,
    ) -> Result<()> {
        self.schedule_cron_inner(task_id, expression, timezone, handler_type, parameters, name, true)
    }

    /// Cron scheduling path shared with the restorer, which suppresses the
    /// durable write (a restore is not a fresh replace-write).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn schedule_cron_inner(
        &self,
        task_id: &str,
        expression: &str,
        timezone: &str,
        handler_type: &str,
        parameters: TaskParameters,
        name: Option<&str>,
        persist: bool,
    ) -> Result<()> {
        let now = self.ctx.clock.now();
        // Admission: malformed expressions and unknown zones fail here.
        let next = recurrence::next_occurrence(expression, timezone, now)?;

        if persist {
            if let Some(store) = &self.ctx.store {
                let mut record = TaskRecord::cron(task_id, expression, timezone, now)
                    .with_name(name)
                    .with_handler(Some(handler_type), Some(parameters.clone()));
                record.next_run_at = Some(next);
                self.ctx.persist("save_cron", task_id, store.upsert(&record));
            }
        }

        self.ctx.events.emit(
            EventKind::TaskScheduled,
            Some(task_id),
            name,
            json!({
                "kind": "cron",
                "expression": expression,
                "timezone": timezone,
                "next_run_at": next.to_rfc3339(),
            }),
        );

        self.send(Command::ArmCron {
            task_id: task_id.to_owned(),
            expression: expression.to_owned(),
            timezone: timezone.to_owned(),
            handler_type: handler_type.to_owned(),
            parameters,
            name: name.map(str::to_owned),
        })
    }

    /// Re-arm a persisted one-shot task in memory without a durable write.
    ///
    /// Idempotent: an id already armed is left alone.
    pub(crate) fn restore_one_shot_in_memory(
        &self,
        task_id: &str,
        fire_at: DateTime<Utc>,
        action: TaskFuture,
        name: Option<&str>,
    ) -> Result<()> {
        self.send(Command::ArmOneShot {
            task_id: task_id.to_owned(),
            fire_at,
            action,
            name: name.map(str::to_owned),
        })
    }

    /// Cancel a task by id (one-shot, cron) or name (periodic).
    ///
    /// Tries the one-shot table, then periodic, then cron. Returns `false`
    /// when nothing was armed under the key, including a second cancel of
    /// the same id.
    pub async fn cancel(&self, key: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .send(Command::Cancel {
                key: key.to_owned(),
                reply: tx,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Safety shutoff: cancel every armed timer and refuse new arms until a
    /// new engine is started.
    pub fn cancel_all(&self) {
        let _ = self.send(Command::CancelAll);
    }

    /// Engine teardown: stop all in-memory timers and the loop without
    /// touching durable rows; they restore on next start.
    pub fn shutdown(&self) {
        let _ = self.send(Command::Shutdown);
    }

    /// Read-only snapshot of everything armed.
    pub async fn status(&self) -> Result<StatusSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply: tx })?;
        rx.await
            .map_err(|_| SchedulerError::Channel("engine loop stopped".to_owned()))
    }

    /// Register a handler factory for restoring persisted tasks.
    ///
    /// Must happen before
    /// [`Restorer::restore_pending_tasks`](crate::restore::Restorer::restore_pending_tasks)
    /// runs; the engine never hardcodes a handler.
    pub fn register_restore_handler(&self, handler_type: &str, factory: crate::task::HandlerFactory) {
        self.ctx.registry.register(handler_type, factory);
    }

    /// The shared handler registry.
    pub fn registry(&self) -> &HandlerRegistry {
        &self.ctx.registry
    }
}

// ---------------------------------------------------------------------------
// Supervisor loop
// ---------------------------------------------------------------------------

struct EngineState {
    ctx: Arc<EngineContext>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    one_shot: HashMap<String, ArmedEntry>,
    periodic: HashMap<String, ArmedEntry>,
    cron: HashMap<String, ArmedEntry>,
    halted: bool,
}

async fn run_loop(mut state: EngineState, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
    info!("scheduler loop started");
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::ArmOneShot {
                task_id,
                fire_at,
                action,
                name,
            } => state.arm_one_shot(task_id, fire_at, action, name),
            Command::ArmPeriodic {
                name,
                interval,
                action,
            } => state.arm_periodic(name, interval, action),
            Command::ArmCron {
                task_id,
                expression,
                timezone,
                handler_type,
                parameters,
                name,
            } => state.arm_cron(task_id, expression, timezone, handler_type, parameters, name),
            Command::BeginOneShot { task_id, reply } => {
                // Remove-and-confirm: once confirmed, a later cancel finds
                // nothing and returns false.
                let armed = state.one_shot.remove(&task_id).is_some();
                let _ = reply.send(armed);
            }
            Command::NoteNextFire { task_id, at } => {
                if let Some(entry) = state.cron.get_mut(&task_id) {
                    entry.next_fire_at = Some(at);
                }
            }
            Command::Cancel { key, reply } => {
                let cancelled = state.cancel(&key);
                let _ = reply.send(cancelled);
            }
            Command::CancelAll => state.cancel_all(),
            Command::Shutdown => {
                state.stop_all_timers();
                break;
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(state.snapshot());
            }
        }
    }
    debug!("scheduler loop stopped");
}

impl EngineState {
    fn refuse_if_halted(&self, task_id: &str) -> bool {
        if self.halted {
            warn!("engine halted by cancel_all, refusing to arm task {task_id}");
        }
        self.halted
    }

    fn arm_one_shot(
        &mut self,
        task_id: String,
        fire_at: DateTime<Utc>,
        action: TaskFuture,
        name: Option<String>,
    ) {
        if self.refuse_if_halted(&task_id) {
            return;
        }
        if self.one_shot.contains_key(&task_id) {
            // Restore idempotence: the original id is already armed.
            debug!("one-shot task {task_id} already armed, skipping");
            return;
        }

        let token = CancellationToken::new();
        tokio::spawn(one_shot_waiter(
            Arc::clone(&self.ctx),
            self.cmd_tx.clone(),
            token.clone(),
            task_id.clone(),
            fire_at,
            action,
            name.clone(),
        ));
        self.one_shot.insert(
            task_id,
            ArmedEntry {
                name,
                next_fire_at: Some(fire_at),
                interval_seconds: None,
                token,
            },
        );
    }

    fn arm_periodic(&mut self, name: String, interval: Duration, action: TaskAction) {
        if self.refuse_if_halted(&name) {
            return;
        }
        // Replace semantics: at most one periodic timer per name.
        if let Some(existing) = self.periodic.remove(&name) {
            debug!("replacing periodic task '{name}'");
            existing.token.cancel();
        }

        let token = CancellationToken::new();
        tokio::spawn(periodic_waiter(
            Arc::clone(&self.ctx),
            token.clone(),
            name.clone(),
            interval,
            action,
        ));
        self.periodic.insert(
            name.clone(),
            ArmedEntry {
                name: Some(name),
                next_fire_at: None,
                interval_seconds: Some(interval.as_secs_f64()),
                token,
            },
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn arm_cron(
        &mut self,
        task_id: String,
        expression: String,
        timezone: String,
        handler_type: String,
        parameters: TaskParameters,
        name: Option<String>,
    ) {
        if self.refuse_if_halted(&task_id) {
            return;
        }
        if let Some(existing) = self.cron.remove(&task_id) {
            debug!("replacing cron task {task_id}");
            existing.token.cancel();
        }

        let token = CancellationToken::new();
        tokio::spawn(cron_waiter(
            Arc::clone(&self.ctx),
            self.cmd_tx.clone(),
            token.clone(),
            task_id.clone(),
            expression,
            timezone,
            handler_type,
            parameters,
            name.clone(),
        ));
        self.cron.insert(
            task_id,
            ArmedEntry {
                name,
                next_fire_at: None,
                interval_seconds: None,
                token,
            },
        );
    }

    /// Tries one-shot, then periodic, then cron.
    fn cancel(&mut self, key: &str) -> bool {
        let (entry, kind) = if let Some(entry) = self.one_shot.remove(key) {
            (entry, "one_shot")
        } else if let Some(entry) = self.periodic.remove(key) {
            (entry, "periodic")
        } else if let Some(entry) = self.cron.remove(key) {
            (entry, "cron")
        } else {
            return false;
        };

        entry.token.cancel();
        self.ctx
            .mark_status(key, TaskStatus::Cancelled, None, "cancel_task");
        self.ctx.events.emit(
            EventKind::TaskCancelled,
            Some(key),
            entry.name.as_deref(),
            json!({ "kind": kind }),
        );
        true
    }

    fn cancel_all(&mut self) {
        self.halted = true;
        let counts = json!({
            "one_shot": self.one_shot.len(),
            "periodic": self.periodic.len(),
            "cron": self.cron.len(),
        });

        for (task_id, entry) in self
            .one_shot
            .drain()
            .chain(self.periodic.drain())
            .chain(self.cron.drain())
        {
            entry.token.cancel();
            self.ctx
                .mark_status(&task_id, TaskStatus::Cancelled, None, "cancel_all");
        }

        info!("all scheduled tasks cancelled, engine halted");
        self.ctx
            .events
            .emit(EventKind::AllTasksCancelled, None, None, counts);
    }

    /// Teardown without durable writes.
    fn stop_all_timers(&mut self) {
        for (_, entry) in self
            .one_shot
            .drain()
            .chain(self.periodic.drain())
            .chain(self.cron.drain())
        {
            entry.token.cancel();
        }
        info!("scheduler shut down");
    }

    fn snapshot(&self) -> StatusSnapshot {
        fn table(map: &HashMap<String, ArmedEntry>) -> Vec<ArmedTaskInfo> {
            let mut rows: Vec<ArmedTaskInfo> = map
                .iter()
                .map(|(task_id, entry)| ArmedTaskInfo {
                    task_id: task_id.clone(),
                    name: entry.name.clone(),
                    next_fire_at: entry.next_fire_at,
                    interval_seconds: entry.interval_seconds,
                })
                .collect();
            rows.sort_by(|a, b| a.task_id.cmp(&b.task_id));
            rows
        }

        StatusSnapshot {
            halted: self.halted,
            one_shot: table(&self.one_shot),
            periodic: table(&self.periodic),
            cron: table(&self.cron),
        }
    }
}

// ---------------------------------------------------------------------------
// Waiter tasks
// ---------------------------------------------------------------------------

/// Sleep until the one-shot deadline, confirm the task is still armed, run
/// the action once, mark the row completed (attempt-once, no retry).
async fn one_shot_waiter(
    ctx: Arc<EngineContext>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    token: CancellationToken,
    task_id: String,
    fire_at: DateTime<Utc>,
    action: TaskFuture,
    name: Option<String>,
) {
    tokio::select! {
        _ = token.cancelled() => return,
        _ = ctx.clock.sleep_until(fire_at) => {}
    }

    // Recheck in-memory presence: a cancellation racing this fire wins if
    // the loop processes it first.
    let (reply_tx, reply_rx) = oneshot::channel();
    if cmd_tx
        .send(Command::BeginOneShot {
            task_id: task_id.clone(),
            reply: reply_tx,
        })
        .is_err()
    {
        return;
    }
    if !matches!(reply_rx.await, Ok(true)) {
        debug!("one-shot task {task_id} cancelled before run");
        return;
    }

    ctx.events.emit(
        EventKind::TaskExecuting,
        Some(&task_id),
        name.as_deref(),
        json!({ "kind": "one_shot" }),
    );

    if let Err(e) = action.await {
        warn!("one-shot task {task_id} failed: {e:#}");
        ctx.events.emit(
            EventKind::TaskError,
            Some(&task_id),
            name.as_deref(),
            json!({ "kind": "one_shot", "error": format!("{e:#}") }),
        );
    }

    // Firing counts as attempted either way.
    let done_at = ctx.clock.now();
    ctx.mark_status(&task_id, TaskStatus::Completed, Some(done_at), "complete_one_shot");
    ctx.events.emit(
        EventKind::TaskCompleted,
        Some(&task_id),
        name.as_deref(),
        json!({ "kind": "one_shot" }),
    );
}

/// Run the action immediately, then once per interval until cancelled.
///
/// Cancellation is cooperative: an action already executing finishes; the
/// token only prevents the next fire.
async fn periodic_waiter(
    ctx: Arc<EngineContext>,
    token: CancellationToken,
    name: String,
    interval: Duration,
    action: TaskAction,
) {
    loop {
        ctx.events.emit(
            EventKind::TaskExecuting,
            Some(&name),
            Some(&name),
            json!({ "kind": "periodic" }),
        );
        if let Err(e) = (action)().await {
            warn!("periodic task '{name}' failed: {e:#}");
            ctx.events.emit(
                EventKind::TaskError,
                Some(&name),
                Some(&name),
                json!({ "kind": "periodic", "error": format!("{e:#}") }),
            );
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = ctx.clock.sleep(interval) => {}
        }
        if token.is_cancelled() {
            break;
        }
    }
}

/// Compute the next occurrence from the current instant, sleep, resolve the
/// handler, fire, repeat.
///
/// Recomputing from "now" (not from the prior occurrence) means a missed
/// wakeup produces exactly one fire on resume, never a catch-up burst.
#[allow(clippy::too_many_arguments)]
async fn cron_waiter(
    ctx: Arc<EngineContext>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    token: CancellationToken,
    task_id: String,
    expression: String,
    timezone: String,
    handler_type: String,
    parameters: TaskParameters,
    name: Option<String>,
) {
    loop {
        let now = ctx.clock.now();
        let next = match recurrence::next_occurrence(&expression, &timezone, now) {
            Ok(next) => next,
            Err(e) => {
                // Unreachable for admitted tasks; expressions are validated
                // at registration.
                error!("cron task {task_id}: {e}");
                ctx.events.emit(
                    EventKind::TaskError,
                    Some(&task_id),
                    name.as_deref(),
                    json!({ "kind": "cron", "error": e.to_string() }),
                );
                return;
            }
        };

        let _ = cmd_tx.send(Command::NoteNextFire {
            task_id: task_id.clone(),
            at: next,
        });
        if let Some(store) = &ctx.store {
            ctx.persist("cache_next_run", &task_id, store.set_next_run(&task_id, next));
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = ctx.clock.sleep_until(next) => {}
        }
        if token.is_cancelled() {
            return;
        }

        let Some(factory) = ctx.registry.resolve(&handler_type) else {
            warn!("cron task {task_id}: no handler registered for '{handler_type}'");
            ctx.events.emit(
                EventKind::HandlerMissing,
                Some(&task_id),
                name.as_deref(),
                json!({ "handler_type": handler_type }),
            );
            continue;
        };

        ctx.events.emit(
            EventKind::TaskExecuting,
            Some(&task_id),
            name.as_deref(),
            json!({ "kind": "cron", "scheduled_for": next.to_rfc3339() }),
        );

        match factory(parameters.clone()) {
            Ok(fut) => match fut.await {
                Ok(()) => {
                    let ran_at = ctx.clock.now();
                    if let Some(store) = &ctx.store {
                        ctx.persist("cache_last_run", &task_id, store.set_last_run(&task_id, ran_at));
                    }
                    ctx.events.emit(
                        EventKind::TaskCompleted,
                        Some(&task_id),
                        name.as_deref(),
                        json!({ "kind": "cron" }),
                    );
                }
                Err(e) => {
                    warn!("cron task {task_id} failed: {e:#}");
                    ctx.events.emit(
                        EventKind::TaskError,
                        Some(&task_id),
                        name.as_deref(),
                        json!({ "kind": "cron", "error": format!("{e:#}") }),
                    );
                }
            },
            Err(e) => {
                warn!("cron task {task_id}: handler factory failed: {e:#}");
                ctx.events.emit(
                    EventKind::TaskError,
                    Some(&task_id),
                    name.as_deref(),
                    json!({ "kind": "cron", "error": format!("{e:#}") }),
                );
            }
        }
    }
}
