//! Startup restore protocol.
//!
//! Rebuilds in-memory timers from durable rows plus registered handler
//! factories. Runs once, after the embedding application has populated the
//! registry and before new scheduling requests are accepted.
//!
//! Each restore attempt is independent; one failure never aborts the
//! rest. A row that cannot be restored (missing or unregistered handler,
//! factory failure, malformed metadata) stays `scheduled` and is reported
//! in the summary; it is never silently dropped.

use crate::engine::SchedulerHandle;
use crate::events::EventKind;
use crate::task::{TaskRecord, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

/// Structured summary of one restore pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Future one-shot tasks re-armed under their original ids.
    pub one_shot_restored: usize,
    /// Elapsed one-shot tasks marked completed without firing.
    pub one_shot_expired: usize,
    /// Cron tasks re-registered through the normal scheduling path.
    pub cron_restored: usize,
    /// Periodic rows left for manual re-registration (they need a live
    /// callable, not just serialized parameters).
    pub periodic_skipped: usize,
    /// Rows that could not be restored and stay `scheduled`.
    pub failed: usize,
    /// Per-task failure detail.
    pub errors: Vec<String>,
}

/// Rebuilds in-memory timers from the durable store at startup.
pub struct Restorer {
    scheduler: SchedulerHandle,
}

impl Restorer {
    /// Restorer over a running engine.
    pub fn new(scheduler: SchedulerHandle) -> Self {
        Self { scheduler }
    }

    /// Restore every `scheduled` row, partitioned by task kind.
    pub fn restore_pending_tasks(&self) -> RestoreReport {
        let mut report = RestoreReport::default();
        let ctx = self.scheduler.context().clone();

        let Some(store) = ctx.store.as_ref() else {
            debug!("persistence disabled, nothing to restore");
            return report;
        };

        // One-shot: future rows re-arm in memory under the original id
        // (no durable write); elapsed rows are marked completed: a missed
        // window is never retroactively fired.
        match store.pending_one_shot() {
            Ok(rows) => {
                for row in rows {
                    let now = ctx.clock.now();
                    let Some(fire_at) = row.scheduled_for else {
                        self.record_failure(&mut report, &row, "missing fire instant");
                        continue;
                    };

                    if fire_at <= now {
                        ctx.mark_status(
                            &row.task_id,
                            TaskStatus::Completed,
                            Some(now),
                            "expire_one_shot",
                        );
                        ctx.events.emit(
                            EventKind::TaskExpired,
                            Some(&row.task_id),
                            row.name.as_deref(),
                            json!({ "scheduled_for": fire_at.to_rfc3339() }),
                        );
                        report.one_shot_expired += 1;
                        continue;
                    }

                    let Some(handler_type) = row.handler_type.clone() else {
                        self.record_failure(&mut report, &row, "no handler_type recorded");
                        continue;
                    };
                    let Some(factory) = ctx.registry.resolve(&handler_type) else {
                        self.record_failure(
                            &mut report,
                            &row,
                            &format!("handler not registered: {handler_type}"),
                        );
                        continue;
                    };

                    let action = match factory(row.parameters.clone().unwrap_or_default()) {
                        Ok(action) => action,
                        Err(e) => {
                            self.record_failure(
                                &mut report,
                                &row,
                                &format!("handler factory failed: {e:#}"),
                            );
                            continue;
                        }
                    };

                    match self.scheduler.restore_one_shot_in_memory(
                        &row.task_id,
                        fire_at,
                        action,
                        row.name.as_deref(),
                    ) {
                        Ok(()) => {
                            report.one_shot_restored += 1;
                            ctx.events.emit(
                                EventKind::TaskRestored,
                                Some(&row.task_id),
                                row.name.as_deref(),
                                json!({ "kind": "one_shot", "fire_at": fire_at.to_rfc3339() }),
                            );
                        }
                        Err(e) => {
                            self.record_failure(&mut report, &row, &e.to_string());
                        }
                    }
                }
            }
            Err(e) => {
                warn!("cannot load pending one-shot tasks: {e}");
                report.failed += 1;
                report.errors.push(format!("loading one-shot tasks: {e}"));
            }
        }

        // Periodic: not data-restorable: a live callable is required, not
        // just serialized parameters. Left for manual re-registration.
        match store.pending_periodic() {
            Ok(rows) => {
                for row in rows {
                    info!(
                        "periodic task '{}' requires manual re-registration, restore skipped",
                        row.task_id
                    );
                    ctx.events.emit(
                        EventKind::RestoreSkipped,
                        Some(&row.task_id),
                        row.name.as_deref(),
                        json!({ "kind": "periodic" }),
                    );
                    report.periodic_skipped += 1;
                }
            }
            Err(e) => {
                warn!("cannot load pending periodic tasks: {e}");
                report.failed += 1;
                report.errors.push(format!("loading periodic tasks: {e}"));
            }
        }

        // Cron: re-register through the normal scheduling path with
        // persistence suppressed: a restore is not a fresh replace-write.
        match store.pending_cron() {
            Ok(rows) => {
                for row in rows {
                    let Some(expression) = row.cron_expression.clone() else {
                        self.record_failure(&mut report, &row, "missing cron expression");
                        continue;
                    };
                    let timezone = row
                        .timezone_name
                        .clone()
                        .unwrap_or_else(|| "UTC".to_owned());
                    let Some(handler_type) = row.handler_type.clone() else {
                        self.record_failure(&mut report, &row, "no handler_type recorded");
                        continue;
                    };
                    if ctx.registry.resolve(&handler_type).is_none() {
                        self.record_failure(
                            &mut report,
                            &row,
                            &format!("handler not registered: {handler_type}"),
                        );
                        continue;
                    }

                    match self.scheduler.schedule_cron_inner(
                        &row.task_id,
                        &expression,
                        &timezone,
                        &handler_type,
                        row.parameters.clone().unwrap_or_default(),
                        row.name.as_deref(),
                        false,
                    ) {
                        Ok(()) => {
                            report.cron_restored += 1;
                            ctx.events.emit(
                                EventKind::TaskRestored,
                                Some(&row.task_id),
                                row.name.as_deref(),
                                json!({
                                    "kind": "cron",
                                    "expression": expression,
                                    "timezone": timezone,
                                }),
                            );
                        }
                        Err(e) => {
                            self.record_failure(&mut report, &row, &e.to_string());
                        }
                    }
                }
            }
            Err(e) => {
                warn!("cannot load pending cron tasks: {e}");
                report.failed += 1;
                report.errors.push(format!("loading cron tasks: {e}"));
            }
        }

        info!(
            "restore finished: {} one-shot restored, {} expired, {} cron restored, \
             {} periodic skipped, {} failed",
            report.one_shot_restored,
            report.one_shot_expired,
            report.cron_restored,
            report.periodic_skipped,
            report.failed
        );
        ctx.events.emit(
            EventKind::RestoreFinished,
            None,
            None,
            serde_json::to_value(&report).unwrap_or_default(),
        );

        report
    }

    fn record_failure(&self, report: &mut RestoreReport, row: &TaskRecord, detail: &str) {
        warn!(
            "cannot restore {} task {}: {detail}",
            row.kind.as_str(),
            row.task_id
        );
        self.scheduler.context().events.emit(
            EventKind::RestoreError,
            Some(&row.task_id),
            row.name.as_deref(),
            json!({ "kind": row.kind.as_str(), "error": detail }),
        );
        report.failed += 1;
        report
            .errors
            .push(format!("{} task {}: {detail}", row.kind.as_str(), row.task_id));
    }
}
