//! End-to-end engine lifecycle tests.
//!
//! Drives a real engine against an on-disk store: admission, firing,
//! replacement, cancellation, the safety shutoff, and the observability
//! event stream.

use chime::{
    EventKind, Scheduler, SchedulerError, TaskAction, TaskFuture, TaskParameters, TaskStatus,
    TaskStore,
};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

fn disk_store(dir: &tempfile::TempDir) -> Arc<TaskStore> {
    Arc::new(TaskStore::open(&dir.path().join("chime.db")).expect("open store"))
}

fn append_action(log: Arc<Mutex<Vec<String>>>, entry: &str) -> TaskFuture {
    let entry = entry.to_owned();
    Box::pin(async move {
        log.lock().expect("log lock").push(entry);
        Ok(())
    })
}

fn counting_action(counter: Arc<AtomicUsize>) -> TaskAction {
    Arc::new(move || {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }) as TaskFuture
    })
}

#[tokio::test]
async fn past_instant_is_rejected_without_a_durable_row() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = disk_store(&dir);
    let scheduler = Scheduler::new().with_store(Arc::clone(&store)).start();

    let log = Arc::new(Mutex::new(Vec::new()));
    let result = scheduler.schedule_at(
        Utc::now() - chrono::Duration::seconds(5),
        append_action(Arc::clone(&log), "never"),
        Some("too late"),
        None,
        None,
    );

    match result {
        Err(SchedulerError::InvalidSchedule(msg)) => {
            assert!(msg.contains("past"), "admission error names the cause: {msg}");
        }
        other => panic!("expected InvalidSchedule, got {other:?}"),
    }
    assert!(store.list_all().expect("list").is_empty());
    assert!(log.lock().expect("log lock").is_empty());
    scheduler.shutdown();
}

#[tokio::test]
async fn one_shot_fires_exactly_once_and_completes_its_row() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = disk_store(&dir);
    let scheduler = Scheduler::new().with_store(Arc::clone(&store)).start();

    let log = Arc::new(Mutex::new(Vec::new()));
    let task_id = scheduler
        .schedule_at(
            Utc::now() + chrono::Duration::milliseconds(200),
            append_action(Arc::clone(&log), "fired"),
            Some("reminder"),
            Some("send_reminder"),
            Some(TaskParameters::new()),
        )
        .expect("schedule");

    tokio::time::sleep(Duration::from_millis(800)).await;

    let entries = log.lock().expect("log lock").clone();
    assert_eq!(entries, vec!["fired".to_owned()], "exactly one fire");

    let row = store.get(&task_id).expect("get").expect("row");
    assert_eq!(row.status, TaskStatus::Completed);
    assert!(row.completed_at.is_some());

    let snapshot = scheduler.status().await.expect("status");
    assert!(snapshot.one_shot.is_empty(), "fired timer leaves the table");
    scheduler.shutdown();
}

#[tokio::test]
async fn second_periodic_registration_replaces_the_first() {
    let scheduler = Scheduler::new().start();

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    scheduler
        .schedule_periodic(
            "inbox_poll",
            counting_action(Arc::clone(&first)),
            Duration::from_millis(50),
            None,
            None,
        )
        .expect("first registration");
    tokio::time::sleep(Duration::from_millis(120)).await;

    scheduler
        .schedule_periodic(
            "inbox_poll",
            counting_action(Arc::clone(&second)),
            Duration::from_millis(50),
            None,
            None,
        )
        .expect("second registration");
    tokio::time::sleep(Duration::from_millis(120)).await;

    let snapshot = scheduler.status().await.expect("status");
    assert_eq!(snapshot.periodic.len(), 1, "exactly one timer armed");
    assert_eq!(snapshot.periodic[0].task_id, "inbox_poll");

    let first_count = first.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        first.load(Ordering::SeqCst),
        first_count,
        "replaced action stopped firing"
    );
    assert!(
        second.load(Ordering::SeqCst) >= 2,
        "replacement keeps firing"
    );
    scheduler.shutdown();
}

#[tokio::test]
async fn cancel_is_idempotent_and_races_are_honored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = disk_store(&dir);
    let scheduler = Scheduler::new().with_store(Arc::clone(&store)).start();

    let log = Arc::new(Mutex::new(Vec::new()));
    let task_id = scheduler
        .schedule_at(
            Utc::now() + chrono::Duration::seconds(60),
            append_action(Arc::clone(&log), "should not run"),
            None,
            None,
            None,
        )
        .expect("schedule");

    assert!(scheduler.cancel(&task_id).await, "first cancel succeeds");
    assert!(!scheduler.cancel(&task_id).await, "second cancel returns false");
    assert!(!scheduler.cancel("unknown-task").await);

    let row = store.get(&task_id).expect("get").expect("row");
    assert_eq!(row.status, TaskStatus::Cancelled);
    assert!(log.lock().expect("log lock").is_empty());
    scheduler.shutdown();
}

#[tokio::test]
async fn cancel_all_is_a_safety_shutoff() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = disk_store(&dir);
    let scheduler = Scheduler::new().with_store(Arc::clone(&store)).start();

    let counter = Arc::new(AtomicUsize::new(0));
    let one_shot_id = scheduler
        .schedule_at(
            Utc::now() + chrono::Duration::seconds(60),
            Box::pin(async { Ok(()) }),
            None,
            None,
            None,
        )
        .expect("one-shot");
    scheduler
        .schedule_periodic(
            "poll",
            counting_action(Arc::clone(&counter)),
            Duration::from_secs(3600),
            None,
            None,
        )
        .expect("periodic");
    scheduler
        .schedule_cron(
            "digest",
            "0 8 * * *",
            "UTC",
            "noop",
            TaskParameters::new(),
            None,
        )
        .expect("cron");

    scheduler.cancel_all();

    let snapshot = scheduler.status().await.expect("status");
    assert!(snapshot.halted);
    assert!(snapshot.one_shot.is_empty());
    assert!(snapshot.periodic.is_empty());
    assert!(snapshot.cron.is_empty());

    for id in [one_shot_id.as_str(), "poll", "digest"] {
        let row = store.get(id).expect("get").expect("row");
        assert_eq!(row.status, TaskStatus::Cancelled, "row {id} cancelled");
    }
    scheduler.shutdown();
}

#[tokio::test]
async fn events_trace_the_task_lifecycle() {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let scheduler = Scheduler::new().with_event_sink(event_tx).start();

    let log = Arc::new(Mutex::new(Vec::new()));
    let task_id = scheduler
        .schedule_at(
            Utc::now() + chrono::Duration::milliseconds(100),
            append_action(Arc::clone(&log), "fired"),
            Some("observed"),
            None,
            None,
        )
        .expect("schedule");

    tokio::time::sleep(Duration::from_millis(600)).await;
    scheduler.shutdown();

    let mut kinds = Vec::new();
    while let Ok(event) = event_rx.try_recv() {
        if event.task_id.as_deref() == Some(task_id.as_str()) {
            kinds.push(event.kind);
        }
    }
    assert_eq!(
        kinds,
        vec![
            EventKind::TaskScheduled,
            EventKind::TaskExecuting,
            EventKind::TaskCompleted,
        ]
    );
}

#[tokio::test]
async fn store_failure_does_not_block_in_memory_scheduling() {
    // Drop the tasks table behind the store's back so every durable write
    // fails while the engine keeps scheduling.
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("chime.db");
    let store = Arc::new(TaskStore::open(&path).expect("create db"));
    rusqlite::Connection::open(&path)
        .expect("side connection")
        .execute_batch("DROP TABLE scheduler_tasks")
        .expect("drop table");

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let scheduler = Scheduler::new()
        .with_store(store)
        .with_event_sink(event_tx)
        .start();

    let log = Arc::new(Mutex::new(Vec::new()));
    let result = scheduler.schedule_at(
        Utc::now() + chrono::Duration::milliseconds(100),
        append_action(Arc::clone(&log), "fired"),
        Some("unpersisted"),
        None,
        None,
    );
    assert!(result.is_ok(), "scheduling proceeds despite store failure");

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(log.lock().expect("log lock").len(), 1, "task still ran");

    let mut saw_persistence_error = false;
    while let Ok(event) = event_rx.try_recv() {
        if event.kind == EventKind::PersistenceError {
            saw_persistence_error = true;
        }
    }
    assert!(saw_persistence_error, "failure surfaced as an event");
    scheduler.shutdown();
}
