//! Error types for the scheduling engine.

use crate::store::StoreError;

/// Top-level error type for the scheduler.
///
/// Only admission errors are surfaced to callers synchronously; persistence
/// and execution failures are logged and emitted as events instead (the
/// engine favors scheduling availability over strict durability).
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Task admission rejected (e.g. one-shot instant not in the future).
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Malformed cron expression, rejected at registration time.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Unknown IANA time zone name.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Durable store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Handler registry error (missing factory, factory failure).
    #[error("handler error: {0}")]
    Handler(String),

    /// The engine loop is gone (channel closed after shutdown).
    #[error("scheduler not running: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SchedulerError>;
