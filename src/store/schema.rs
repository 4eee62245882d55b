//! SQLite DDL for the task store.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation.

use rusqlite::Connection;

/// Current schema version stamped into `schema_meta`.
pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Complete DDL for the scheduler database.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent.
/// Instants are INTEGER epoch milliseconds (UTC); the periodic interval is
/// REAL seconds; parameters are a JSON text column.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Enable WAL mode for concurrent reads during writes.
PRAGMA journal_mode = WAL;

-- Schema version tracking.
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Durable task rows, mirrors TaskRecord fields.
CREATE TABLE IF NOT EXISTS scheduler_tasks (
    task_id          TEXT PRIMARY KEY,
    task_type        TEXT NOT NULL,      -- one_shot | periodic | cron
    name             TEXT,
    status           TEXT NOT NULL DEFAULT 'scheduled',
    interval_seconds REAL,               -- periodic only
    scheduled_for    INTEGER,            -- one_shot only
    cron_expression  TEXT,               -- cron only
    timezone_name    TEXT,               -- cron only
    last_run_at      INTEGER,
    next_run_at      INTEGER,
    parameters       TEXT,               -- JSON object
    handler_type     TEXT,
    created_at       INTEGER NOT NULL DEFAULT 0,
    updated_at       INTEGER NOT NULL DEFAULT 0,
    completed_at     INTEGER
);

-- Indexes for the restore and replace query patterns.
CREATE INDEX IF NOT EXISTS idx_tasks_status        ON scheduler_tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_type          ON scheduler_tasks(task_type);
CREATE INDEX IF NOT EXISTS idx_tasks_scheduled_for ON scheduler_tasks(scheduled_for);
CREATE INDEX IF NOT EXISTS idx_tasks_name          ON scheduler_tasks(name);
CREATE INDEX IF NOT EXISTS idx_tasks_next_run_at   ON scheduler_tasks(next_run_at);
"#;

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times. Seeds the schema version on a fresh
/// database without overwriting an existing stamp.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Read the current schema version.
///
/// Returns `None` if the `schema_meta` table is empty or the key is missing.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}
