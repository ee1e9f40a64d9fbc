
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use cadence::events::{EventBus, SchedulerEvent};
use cadence::scheduler::{DispatchQueue, Job, ReadyQueue, Scheduler};
use cadence::task::{InMemoryTaskStore, Task, TaskOptions, TaskStore};
use test_harness::{at, collect_until, count_kind, job_for, FailingWriteStore};

struct Harness {
    store: Arc<InMemoryTaskStore>,
    ready: Arc<Mutex<ReadyQueue>>,
    dispatch: DispatchQueue,
    events: EventBus,
    scheduler: Scheduler,
}

fn harness(dispatch_capacity: usize) -> Harness {
    let store = Arc::new(InMemoryTaskStore::new());
    let ready = Arc::new(Mutex::new(ReadyQueue::new()));
    let dispatch = DispatchQueue::new(dispatch_capacity);
    let events = EventBus::new(256);
    let scheduler = Scheduler::new(
        store.clone(),
        ready.clone(),
        dispatch.clone(),
        events.clone(),
        Duration::from_millis(10),
        CancellationToken::new(),
    );
    Harness {
        store,
        ready,
        dispatch,
        events,
        scheduler,
    }
}

async fn drain(dispatch: &DispatchQueue) -> Vec<Job> {
    let cancel = CancellationToken::new();
    let mut jobs = Vec::new();
    while !dispatch.is_empty() {
        match dispatch.pop(&cancel).await {
            Some(job) => jobs.push(job),
            None => break,
        }
    }
    jobs
}

#[tokio::test]
async fn test_recurring_task_runs_every_interval() {
    let h = harness(16);
    let options = TaskOptions::default().with_repeat_interval(Duration::from_secs(10));
    let task = Task::new("ping", "NOTIFICATION", at(0), options).unwrap();
    let task_id = task.id;
    h.store.add(task).await.unwrap();

    let mut run_times = Vec::new();
    for now in [0, 5, 10, 15, 20] {
        h.scheduler.tick(at(now)).await.unwrap();
        run_times.extend(drain(&h.dispatch).await.into_iter().map(|j| j.run_time));
    }

    assert_eq!(run_times, vec![at(0), at(10), at(20)]);
    let stored = h.store.get(&task_id).await.unwrap().unwrap();
    assert_eq!(stored.run_count, 3);
    assert_eq!(stored.last_run_time, Some(at(20)));
    assert_eq!(stored.schedule_time, at(30));
}

#[tokio::test]
async fn test_late_recurring_task_catches_up_one_run_per_tick() {
    let h = harness(16);
    let options = TaskOptions::default().with_repeat_interval(Duration::from_secs(10));
    h.store
        .add(Task::new("late", "EMAIL", at(0), options).unwrap())
        .await
        .unwrap();

    // Three intervals overdue: one job per tick, oldest first
    let mut run_times = Vec::new();
    for _ in 0..3 {
        h.scheduler.tick(at(25)).await.unwrap();
        run_times.extend(drain(&h.dispatch).await.into_iter().map(|j| j.run_time));
    }
    assert_eq!(run_times, vec![at(0), at(10), at(20)]);

    assert_eq!(h.scheduler.tick(at(25)).await.unwrap().created, 0);
}

#[tokio::test]
async fn test_one_shot_task_yields_exactly_one_job() {
    let h = harness(16);
    let mut rx = h.events.subscribe();
    let task = Task::new("once", "EMAIL", at(3), TaskOptions::default()).unwrap();
    let task_id = task.id;
    h.store.add(task).await.unwrap();

    let mut jobs = Vec::new();
    for now in [0, 3, 4, 60] {
        h.scheduler.tick(at(now)).await.unwrap();
        jobs.extend(drain(&h.dispatch).await);
    }

    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].task_id, task_id);
    assert_eq!(jobs[0].attempt, 1);
    assert!(h.store.is_empty().await);

    let events = collect_until(&mut rx, Duration::from_millis(200), |e| {
        e.kind() == "job_promoted"
    })
    .await;
    assert_eq!(count_kind(&events, "job_created"), 1);
    assert_eq!(count_kind(&events, "job_promoted"), 1);
}

#[tokio::test]
async fn test_higher_priority_is_dispatched_first() {
    let h = harness(16);
    h.store
        .add(Task::new("low", "EMAIL", at(0), TaskOptions::default().with_priority(5)).unwrap())
        .await
        .unwrap();
    h.store
        .add(Task::new("high", "EMAIL", at(0), TaskOptions::default().with_priority(1)).unwrap())
        .await
        .unwrap();

    h.scheduler.tick(at(0)).await.unwrap();

    let names: Vec<_> = drain(&h.dispatch)
        .await
        .into_iter()
        .map(|j| j.task_name)
        .collect();
    assert_eq!(names, vec!["high", "low"]);
}

#[tokio::test]
async fn test_cancelled_task_stops_recurring() {
    let h = harness(16);
    let options = TaskOptions::default().with_repeat_interval(Duration::from_secs(10));
    let task = Task::new("cancel-me", "EMAIL", at(0), options).unwrap();
    let task_id = task.id;
    h.store.add(task).await.unwrap();

    h.scheduler.tick(at(0)).await.unwrap();
    assert_eq!(drain(&h.dispatch).await.len(), 1);

    h.store.remove(&task_id).await.unwrap();
    let report = h.scheduler.tick(at(30)).await.unwrap();
    assert_eq!(report.created, 0);
    assert!(h.dispatch.is_empty());
}

#[tokio::test]
async fn test_full_dispatch_queue_applies_backpressure() {
    let h = harness(1);
    for i in 0..2 {
        h.ready
            .lock()
            .await
            .add(job_for(&format!("job-{}", i), "EMAIL", TaskOptions::default(), at(0)));
    }

    // The second push waits for room; a consumer frees it
    let dispatch = h.dispatch.clone();
    let consumer = tokio::spawn(async move {
        let cancel = CancellationToken::new();
        dispatch.pop(&cancel).await
    });

    let report = tokio::time::timeout(Duration::from_secs(5), h.scheduler.tick(at(0)))
        .await
        .expect("tick completes once the consumer drains")
        .unwrap();
    assert_eq!(report.promoted, 2);
    assert!(consumer.await.unwrap().is_some());
    assert_eq!(h.dispatch.len(), 1);
    assert!(h.ready.lock().await.is_empty());
}

#[tokio::test]
async fn test_store_write_failure_is_isolated_to_its_task() {
    let store = Arc::new(FailingWriteStore::new());
    let ready = Arc::new(Mutex::new(ReadyQueue::new()));
    let dispatch = DispatchQueue::new(16);
    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let scheduler = Scheduler::new(
        store.clone(),
        ready.clone(),
        dispatch.clone(),
        events,
        Duration::from_millis(10),
        CancellationToken::new(),
    );

    let stuck = Task::new("stuck", "EMAIL", at(0), TaskOptions::default()).unwrap();
    let every10 = TaskOptions::default().with_repeat_interval(Duration::from_secs(10));
    let stuck_recurring = Task::new("stuck-recurring", "REPORT", at(0), every10).unwrap();
    let healthy = Task::new("healthy", "EMAIL", at(0), TaskOptions::default()).unwrap();
    let (stuck_id, recurring_id) = (stuck.id, stuck_recurring.id);
    store.fail_writes_for(stuck_id);
    store.fail_writes_for(recurring_id);
    for task in [stuck, stuck_recurring, healthy] {
        store.add(task).await.unwrap();
    }

    let report = scheduler.tick(at(0)).await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.errors, 2);

    let names: Vec<_> = drain(&dispatch).await.into_iter().map(|j| j.task_name).collect();
    assert_eq!(names, vec!["healthy"]);
    assert!(ready.lock().await.is_empty());

    // Both failing tasks are left exactly as they were
    assert!(store.get(&stuck_id).await.unwrap().is_some());
    let recurring = store.get(&recurring_id).await.unwrap().unwrap();
    assert_eq!(recurring.schedule_time, at(0));
    assert_eq!(recurring.run_count, 0);

    let mut failed_tasks = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let SchedulerEvent::SchedulerError { task_id, .. } = event {
            failed_tasks.push(task_id);
        }
    }
    assert_eq!(failed_tasks.len(), 2);
    assert!(failed_tasks.contains(&Some(stuck_id)));
    assert!(failed_tasks.contains(&Some(recurring_id)));

    // Once the store recovers the same tasks are due again
    store.heal(&stuck_id);
    store.heal(&recurring_id);
    let report = scheduler.tick(at(1)).await.unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(report.errors, 0);
    assert_eq!(drain(&dispatch).await.len(), 2);
    assert!(store.get(&stuck_id).await.unwrap().is_none());
    assert_eq!(
        store.get(&recurring_id).await.unwrap().unwrap().schedule_time,
        at(10)
    );
}

proptest! {
    #[test]
    fn prop_ready_queue_pops_in_priority_then_time_then_fifo_order(
        entries in prop::collection::vec((-3i32..3, 0i64..20), 1..40)
    ) {
        let mut queue = ReadyQueue::new();
        for (i, (priority, offset)) in entries.iter().enumerate() {
            let options = TaskOptions::default().with_priority(*priority);
            queue.add(job_for(&i.to_string(), "EMAIL", options, at(*offset)));
        }

        let mut popped = Vec::new();
        while let Some(job) = queue.pop() {
            let index: usize = job.task_name.parse().unwrap();
            popped.push((job.priority, job.run_time, index));
        }

        prop_assert_eq!(popped.len(), entries.len());
        let mut expected = popped.clone();
        expected.sort();
        prop_assert_eq!(popped, expected);
    }

    #[test]
    fn prop_pop_if_due_never_returns_future_jobs(
        offsets in prop::collection::vec(0i64..100, 1..30),
        now in 0i64..100,
    ) {
        let mut queue = ReadyQueue::new();
        for offset in &offsets {
            queue.add(job_for("job", "EMAIL", TaskOptions::default(), at(*offset)));
        }

        let due = queue.drain_due(at(now));
        prop_assert!(due.iter().all(|job| job.run_time <= at(now)));
        prop_assert_eq!(due.len() + queue.len(), offsets.len());
    }
}
