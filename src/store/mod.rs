//! Durable task store.
//!
//! SQLite-backed record of every task ever scheduled, keyed by `task_id`.
//! This is the only cross-restart shared resource: in-memory timer state is
//! rebuilt from these rows at startup, and durable state wins whenever the
//! two disagree after a crash.
//!
//! Every method returns an explicit `Result`; the engine call sites decide
//! what a failed write means (always: log, emit an event, keep scheduling).

mod schema;

use crate::task::{TaskKind, TaskParameters, TaskRecord, TaskStatus};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Errors from the durable store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem failure opening or creating the database.
    #[error("I/O error: {0}")]
    Io(String),
}

const INSERT_SQL: &str = "INSERT INTO scheduler_tasks \
     (task_id, task_type, name, status, interval_seconds, scheduled_for, \
      cron_expression, timezone_name, last_run_at, next_run_at, parameters, \
      handler_type, created_at, updated_at, completed_at) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)";

const UPSERT_SQL: &str = "INSERT INTO scheduler_tasks \
     (task_id, task_type, name, status, interval_seconds, scheduled_for, \
      cron_expression, timezone_name, last_run_at, next_run_at, parameters, \
      handler_type, created_at, updated_at, completed_at) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15) \
     ON CONFLICT(task_id) DO UPDATE SET \
       task_type = excluded.task_type, \
       name = excluded.name, \
       status = excluded.status, \
       interval_seconds = excluded.interval_seconds, \
       scheduled_for = excluded.scheduled_for, \
       cron_expression = excluded.cron_expression, \
       timezone_name = excluded.timezone_name, \
       last_run_at = excluded.last_run_at, \
       next_run_at = excluded.next_run_at, \
       parameters = excluded.parameters, \
       handler_type = excluded.handler_type, \
       updated_at = excluded.updated_at, \
       completed_at = excluded.completed_at";

const COLUMNS: &str = "task_id, task_type, name, status, interval_seconds, scheduled_for, \
     cron_expression, timezone_name, last_run_at, next_run_at, parameters, \
     handler_type, created_at, updated_at, completed_at";

/// Durable CRUD over [`TaskRecord`] rows.
///
/// Thread-safe via an internal `Mutex<Connection>`; writes are serialized
/// and each call is a single transaction.
pub struct TaskStore {
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl TaskStore {
    /// Open (or create) the database at `path`, applying the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        schema::apply_schema(&conn)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Open the database at the platform default location.
    pub fn open_default() -> Result<Self, StoreError> {
        let path = crate::config::default_db_path()
            .ok_or_else(|| StoreError::Io("no user config directory".to_owned()))?;
        Self::open(&path)
    }

    /// In-memory database for tests and persistence-free runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::apply_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a new row. Fails if `task_id` already exists.
    pub fn insert(&self, record: &TaskRecord) -> Result<(), StoreError> {
        self.write_record(INSERT_SQL, record)
    }

    /// Insert or replace the row under `record.task_id`.
    ///
    /// The replace key for periodic and cron tasks: a re-registration
    /// starts a new lifecycle under the same identity. `created_at` of an
    /// existing row is preserved.
    pub fn upsert(&self, record: &TaskRecord) -> Result<(), StoreError> {
        self.write_record(UPSERT_SQL, record)
    }

    fn write_record(&self, sql: &str, record: &TaskRecord) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            sql,
            params![
                record.task_id,
                record.kind.as_str(),
                record.name,
                record.status.as_str(),
                record.interval_seconds,
                record.scheduled_for.map(|dt| dt.timestamp_millis()),
                record.cron_expression,
                record.timezone_name,
                record.last_run_at.map(|dt| dt.timestamp_millis()),
                record.next_run_at.map(|dt| dt.timestamp_millis()),
                record
                    .parameters
                    .as_ref()
                    .map(|p| serde_json::Value::Object(p.clone()).to_string()),
                record.handler_type,
                record.created_at.timestamp_millis(),
                record.updated_at.timestamp_millis(),
                record.completed_at.map(|dt| dt.timestamp_millis()),
            ],
        )?;
        Ok(())
    }

    /// Advance the lifecycle state of a row.
    ///
    /// Returns `false` when no row exists under `task_id`.
    pub fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE scheduler_tasks \
             SET status = ?2, updated_at = ?3, \
                 completed_at = COALESCE(?4, completed_at) \
             WHERE task_id = ?1",
            params![
                task_id,
                status.as_str(),
                Utc::now().timestamp_millis(),
                completed_at.map(|dt| dt.timestamp_millis()),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Cache the next computed occurrence of a cron row.
    pub fn set_next_run(
        &self,
        task_id: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE scheduler_tasks SET next_run_at = ?2, updated_at = ?3 WHERE task_id = ?1",
            params![
                task_id,
                next_run_at.timestamp_millis(),
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Record the instant of the most recent cron fire.
    pub fn set_last_run(
        &self,
        task_id: &str,
        last_run_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE scheduler_tasks SET last_run_at = ?2, updated_at = ?3 WHERE task_id = ?1",
            params![
                task_id,
                last_run_at.timestamp_millis(),
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Fetch a single row.
    pub fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let conn = self.lock();
        let sql = format!("SELECT {COLUMNS} FROM scheduler_tasks WHERE task_id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![task_id], row_to_record)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Every row, newest first. Dashboard-facing.
    pub fn list_all(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.query("ORDER BY updated_at DESC")
    }

    /// All `scheduled` one-shot rows, soonest first.
    ///
    /// Includes rows whose instant has already elapsed; the restorer
    /// partitions future (re-arm) from past (mark completed, never fire).
    pub fn pending_one_shot(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.query("WHERE task_type = 'one_shot' AND status = 'scheduled' ORDER BY scheduled_for ASC")
    }

    /// All `scheduled` periodic rows.
    pub fn pending_periodic(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.query("WHERE task_type = 'periodic' AND status = 'scheduled' ORDER BY task_id")
    }

    /// All `scheduled` cron rows.
    pub fn pending_cron(&self) -> Result<Vec<TaskRecord>, StoreError> {
        self.query("WHERE task_type = 'cron' AND status = 'scheduled' ORDER BY task_id")
    }

    fn query(&self, suffix: &str) -> Result<Vec<TaskRecord>, StoreError> {
        let conn = self.lock();
        let sql = format!("SELECT {COLUMNS} FROM scheduler_tasks {suffix}");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for r in rows {
            records.push(r?);
        }
        Ok(records)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    let kind_str: String = row.get(1)?;
    let status_str: String = row.get(3)?;
    let params_json: Option<String> = row.get(10)?;

    Ok(TaskRecord {
        task_id: row.get(0)?,
        kind: TaskKind::parse(&kind_str).unwrap_or_else(|| {
            warn!("unknown task_type '{kind_str}', treating as one_shot");
            TaskKind::OneShot
        }),
        name: row.get(2)?,
        status: TaskStatus::parse(&status_str).unwrap_or_else(|| {
            warn!("unknown status '{status_str}', treating as cancelled");
            TaskStatus::Cancelled
        }),
        interval_seconds: row.get(4)?,
        scheduled_for: millis_to_datetime(row.get(5)?),
        cron_expression: row.get(6)?,
        timezone_name: row.get(7)?,
        last_run_at: millis_to_datetime(row.get(8)?),
        next_run_at: millis_to_datetime(row.get(9)?),
        parameters: params_json.and_then(|json| parse_parameters(&json)),
        handler_type: row.get(11)?,
        created_at: millis_to_datetime(row.get(12)?).unwrap_or_default(),
        updated_at: millis_to_datetime(row.get(13)?).unwrap_or_default(),
        completed_at: millis_to_datetime(row.get(14)?),
    })
}

fn millis_to_datetime(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(DateTime::from_timestamp_millis)
}

fn parse_parameters(json: &str) -> Option<TaskParameters> {
    match serde_json::from_str::<serde_json::Value>(json) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        Ok(_) | Err(_) => {
            warn!("discarding non-object task parameters: {json}");
            None
        }
    }
}
