//! Scheduler integration tests.
//!
//! Covers admission, FIFO and priority ordering, worker exclusivity, batch
//! release, failure isolation, scale-out and termination.

use std::sync::Arc;
use std::time::Duration;

use ocr_dispatch::*;
use ocr_dispatch_testkit::{
    MockBehavior, MockWorker, assert_sequence_monotonic, dispatch_order, dispatched_jobs,
    drain_events, wait_for_event,
};
use serde_json::json;
use tokio::time::{sleep, timeout};

const SETTLE: Duration = Duration::from_millis(50);

fn scheduler_with(workers: &[Arc<MockWorker>]) -> Scheduler {
    SchedulerBuilder::new(SchedulerConfig::new("integration"))
        .with_workers(
            workers
                .iter()
                .map(|worker| Arc::clone(worker) as Arc<dyn Worker>),
        )
        .build()
        .expect("build scheduler")
}

fn submit_named(scheduler: &Scheduler, id: &str, priority: bool) -> JobHandle {
    scheduler
        .submit_job(
            JobSpec::new("recognize")
                .with_id(id)
                .with_payload(json!({ "image": format!("{id}.png") }))
                .with_priority(priority),
        )
        .expect("submit")
}

async fn settled(handle: JobHandle) -> Result<WorkOutput, JobError> {
    timeout(Duration::from_secs(5), handle)
        .await
        .expect("handle did not settle in time")
}

fn ids(names: &[&str]) -> Vec<JobId> {
    names.iter().map(|name| JobId::from(*name)).collect()
}

#[tokio::test]
async fn submit_without_workers_is_rejected() {
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let err = scheduler
        .submit("recognize", json!({}), false)
        .expect_err("no workers registered");

    assert!(matches!(err, SchedulerError::NoWorkers));
    assert_eq!(scheduler.queue_length(), 0);
}

#[tokio::test]
async fn fifo_within_normal_lane() {
    let worker = MockWorker::new("w-0");
    let scheduler = scheduler_with(&[worker.clone()]);

    let handles = vec![
        submit_named(&scheduler, "a", false),
        submit_named(&scheduler, "b", false),
        submit_named(&scheduler, "c", false),
    ];
    for handle in handles {
        settled(handle).await.expect("job succeeds");
    }

    assert_eq!(worker.job_order(), ids(&["a", "b", "c"]));
    assert_eq!(worker.overlap_count(), 0);
}

#[tokio::test]
async fn priority_job_goes_ahead_of_waiting_jobs() {
    let worker = MockWorker::gated("w-0");
    let scheduler = scheduler_with(&[worker.clone()]);

    let running = submit_named(&scheduler, "running", false);
    let a = submit_named(&scheduler, "a", false);
    let b = submit_named(&scheduler, "b", false);
    let p = submit_named(&scheduler, "p", true);
    assert_eq!(scheduler.queue_length(), 3);

    worker.release(4);
    for handle in [running, a, b, p] {
        settled(handle).await.expect("job succeeds");
    }

    assert_eq!(worker.job_order(), ids(&["running", "p", "a", "b"]));
}

#[tokio::test]
async fn priority_job_stays_behind_earlier_priority_jobs() {
    let worker = MockWorker::gated("w-0");
    let scheduler = scheduler_with(&[worker.clone()]);

    let running = submit_named(&scheduler, "running", false);
    let p1 = submit_named(&scheduler, "p1", true);
    let p2 = submit_named(&scheduler, "p2", true);
    let a = submit_named(&scheduler, "a", false);

    worker.release(4);
    for handle in [running, p1, p2, a] {
        settled(handle).await.expect("job succeeds");
    }

    assert_eq!(worker.job_order(), ids(&["running", "p1", "p2", "a"]));
}

#[tokio::test]
async fn busy_worker_never_receives_second_job() {
    let worker = MockWorker::gated("w-0");
    let scheduler = scheduler_with(&[worker.clone()]);

    let first = submit_named(&scheduler, "first", false);
    let second = submit_named(&scheduler, "second", false);

    worker.wait_for_invocations(1).await;
    sleep(SETTLE).await;
    worker.assert_invocation_count_eq(1);
    assert_eq!(scheduler.busy_count(), 1);
    assert_eq!(scheduler.queue_length(), 1);

    worker.release(1);
    settled(first).await.expect("first succeeds");
    worker.wait_for_invocations(2).await;

    worker.release(1);
    settled(second).await.expect("second succeeds");
    assert_eq!(worker.overlap_count(), 0);
}

#[tokio::test]
async fn batch_output_holds_worker_until_every_entry_settles() {
    let worker = MockWorker::with_behavior("w-0", MockBehavior::Batch { parts: 2 });
    let scheduler = scheduler_with(&[worker.clone()]);

    let batch = submit_named(&scheduler, "pages", false);
    let next = submit_named(&scheduler, "next", false);

    let parts = settled(batch)
        .await
        .expect("batch succeeds")
        .into_batch()
        .expect("batch output");
    assert_eq!(parts.len(), 2);
    assert!(parts.iter().all(|part| !part.is_settled()));
    assert_eq!(worker.pending_parts(), 2);

    worker.set_behavior(MockBehavior::Echo);

    sleep(SETTLE).await;
    worker.assert_invocation_count_eq(1);
    assert_eq!(scheduler.queue_length(), 1);

    assert!(worker.settle_next_part(json!({ "page": 1 })));
    sleep(SETTLE).await;
    worker.assert_invocation_count_eq(1);
    assert_eq!(scheduler.busy_count(), 1);
    assert_eq!(worker.pending_parts(), 1);

    assert!(worker.settle_next_part(json!({ "page": 2 })));
    assert_eq!(worker.pending_parts(), 0);
    settled(next).await.expect("next succeeds");
    worker.assert_invocation_count_eq(2);
    assert_eq!(worker.overlap_count(), 0);

    let pages: Vec<_> = futures::future::join_all(parts)
        .await
        .into_iter()
        .map(|part| part.expect("page settles"))
        .collect();
    assert_eq!(pages, vec![json!({ "page": 1 }), json!({ "page": 2 })]);
}

#[tokio::test]
async fn failed_batch_entry_still_releases_worker() {
    let worker = MockWorker::with_behavior("w-0", MockBehavior::Batch { parts: 1 });
    let scheduler = scheduler_with(&[worker.clone()]);

    let batch = submit_named(&scheduler, "pages", false);
    let next = submit_named(&scheduler, "next", false);
    let parts = settled(batch).await.unwrap().into_batch().unwrap();

    worker.set_behavior(MockBehavior::Echo);
    assert!(worker.fail_next_part("unreadable page"));

    settled(next).await.expect("next succeeds");
    assert_eq!(
        parts[0].clone().await,
        Err(WorkerError::Failed("unreadable page".into()))
    );
}

#[tokio::test]
async fn failure_is_isolated_to_its_job() {
    let worker = Arc::new(
        ActionWorker::builder("w-0")
            .action("reject", |_payload, _job_id| async {
                Err(WorkerError::failed("engine rejected image"))
            })
            .action("recognize", |payload, _job_id| async move {
                Ok(WorkOutput::Single(payload))
            })
            .build(),
    );
    let scheduler = Scheduler::default();
    scheduler.add_worker(worker).unwrap();

    let j1 = scheduler.submit("reject", json!({}), false).unwrap();
    let j2 = scheduler
        .submit("recognize", json!({ "text": "ok" }), false)
        .unwrap();
    assert_eq!(scheduler.queue_length(), 1);

    assert_eq!(
        settled(j1).await.unwrap_err(),
        JobError::Worker(WorkerError::Failed("engine rejected image".into()))
    );
    let output = settled(j2).await.expect("j2 succeeds");
    assert_eq!(output.into_single(), Some(json!({ "text": "ok" })));
}

#[tokio::test]
async fn unknown_action_is_reported_to_caller() {
    let worker = Arc::new(
        ActionWorker::builder("w-0")
            .action("recognize", |payload, _job_id| async move {
                Ok(WorkOutput::Single(payload))
            })
            .build(),
    );
    let scheduler = Scheduler::default();
    scheduler.add_worker(worker).unwrap();

    let err = settled(scheduler.submit("detect", json!({}), false).unwrap())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        JobError::Worker(WorkerError::UnknownAction {
            worker: WorkerId::from("w-0"),
            action: "detect".into(),
        })
    );
    settled(scheduler.submit("recognize", json!(1), false).unwrap())
        .await
        .expect("worker still usable");
}

#[tokio::test]
async fn panicking_worker_is_released() {
    let worker = MockWorker::with_behavior("w-0", MockBehavior::Panic("segfault".into()));
    let scheduler = scheduler_with(&[worker.clone()]);

    let crashed = submit_named(&scheduler, "crash", false);
    let err = settled(crashed).await.unwrap_err();
    assert_eq!(
        err,
        JobError::Worker(WorkerError::Panicked("segfault".into()))
    );

    worker.set_behavior(MockBehavior::Echo);
    settled(submit_named(&scheduler, "after", false))
        .await
        .expect("worker released after panic");
}

async fn crash_while_reading_page() -> Result<serde_json::Value, WorkerError> {
    sleep(Duration::from_millis(10)).await;
    panic!("page decoder crashed")
}

#[tokio::test]
async fn panicking_batch_entry_settles_as_error_and_releases_worker() {
    let worker = Arc::new(
        ActionWorker::builder("w-0")
            .action("recognize_pages", |_payload, _job_id| async {
                Ok(WorkOutput::Batch(vec![
                    SubResult::new(crash_while_reading_page()),
                    SubResult::ready(Ok(json!({ "page": 2 }))),
                ]))
            })
            .action("recognize", |payload, _job_id| async move {
                Ok(WorkOutput::Single(payload))
            })
            .build(),
    );
    let scheduler = Scheduler::default();
    scheduler.add_worker(worker).unwrap();

    let batch = scheduler.submit("recognize_pages", json!({}), false).unwrap();
    let next = scheduler
        .submit("recognize", json!({ "text": "after" }), false)
        .unwrap();

    let parts = settled(batch)
        .await
        .expect("batch succeeds")
        .into_batch()
        .expect("batch output");
    let crashed = tokio::spawn(parts[0].clone())
        .await
        .expect("entry settles without panicking");
    assert_eq!(
        crashed,
        Err(WorkerError::Panicked("page decoder crashed".into()))
    );
    assert_eq!(parts[1].clone().await, Ok(json!({ "page": 2 })));

    let output = settled(next).await.expect("worker released after entry panic");
    assert_eq!(output.into_single(), Some(json!({ "text": "after" })));
}

#[tokio::test]
async fn failing_worker_keeps_serving_later_jobs() {
    let worker = MockWorker::with_behavior(
        "w-0",
        MockBehavior::Fail("engine rejected image".into()),
    );
    let scheduler = scheduler_with(&[worker.clone()]);

    let rejected = submit_named(&scheduler, "blurred", false);
    assert_eq!(
        settled(rejected).await.unwrap_err(),
        JobError::Worker(WorkerError::Failed("engine rejected image".into()))
    );

    worker.set_behavior(MockBehavior::Echo);
    let output = settled(submit_named(&scheduler, "sharp", false))
        .await
        .expect("sharp succeeds")
        .into_single()
        .expect("single output");
    assert_eq!(output["payload"], json!({ "image": "sharp.png" }));

    let record = worker.record();
    assert_eq!(record.len(), 2);
    assert_eq!(record[0].job_id, JobId::from("blurred"));
    assert_eq!(record[0].action, "recognize");
    assert_eq!(record[0].payload, json!({ "image": "blurred.png" }));
    assert_eq!(record[1].job_id, JobId::from("sharp"));
    assert_eq!(worker.overlap_count(), 0);
}

#[tokio::test]
async fn idle_workers_all_take_work() {
    let workers: Vec<_> = (0..3)
        .map(|idx| MockWorker::gated(format!("w-{idx}")))
        .collect();
    let scheduler = scheduler_with(&workers);

    let handles: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|id| submit_named(&scheduler, id, false))
        .collect();

    assert_eq!(scheduler.queue_length(), 0);
    assert_eq!(scheduler.busy_count(), 3);
    for worker in &workers {
        worker.wait_for_invocations(1).await;
    }

    for worker in &workers {
        worker.release(1);
    }
    for handle in handles {
        settled(handle).await.expect("job succeeds");
    }
    for worker in &workers {
        worker.assert_invocation_count_eq(1);
    }
}

#[tokio::test]
async fn idle_workers_are_picked_in_registration_order() {
    let workers: Vec<_> = ["w-0", "w-1", "w-2"]
        .iter()
        .map(|id| MockWorker::new(*id))
        .collect();
    let scheduler = scheduler_with(&workers);
    let mut rx = scheduler.subscribe();

    settled(submit_named(&scheduler, "a", false)).await.unwrap();
    wait_for_event(&mut rx, |payload| {
        matches!(payload, SchedulerEventPayload::WorkerReleased { .. })
    })
    .await;
    settled(submit_named(&scheduler, "b", false)).await.unwrap();

    workers[0].assert_invocation_count_eq(2);
    workers[1].assert_invocation_count_eq(0);
    workers[2].assert_invocation_count_eq(0);
}

#[tokio::test]
async fn added_worker_claims_waiting_job() {
    let busy = MockWorker::gated("w-0");
    let scheduler = scheduler_with(&[busy.clone()]);

    let first = submit_named(&scheduler, "first", false);
    let waiting = submit_named(&scheduler, "waiting", false);
    assert_eq!(scheduler.queue_length(), 1);

    let fresh = MockWorker::new("w-1");
    let worker_id = scheduler.add_worker(fresh.clone()).unwrap();
    assert_eq!(worker_id, WorkerId::from("w-1"));
    assert_eq!(scheduler.queue_length(), 0);

    settled(waiting).await.expect("waiting job ran on new worker");
    assert_eq!(fresh.job_order(), ids(&["waiting"]));

    busy.release(1);
    settled(first).await.unwrap();
}

#[tokio::test]
async fn duplicate_worker_id_is_rejected() {
    let scheduler = scheduler_with(&[MockWorker::new("w-0")]);

    let err = scheduler.add_worker(MockWorker::new("w-0")).unwrap_err();

    assert!(matches!(err, SchedulerError::DuplicateWorker(id) if id == WorkerId::from("w-0")));
    assert_eq!(scheduler.worker_count(), 1);
}

#[tokio::test]
async fn dropped_handle_does_not_cancel_job() {
    let worker = MockWorker::new("w-0");
    let scheduler = scheduler_with(&[worker.clone()]);

    drop(submit_named(&scheduler, "fire-and-forget", false));

    worker.wait_for_invocations(1).await;
    assert_eq!(worker.job_order(), ids(&["fire-and-forget"]));
}

#[tokio::test]
async fn terminate_drains_queue_and_stops_every_worker() {
    let workers = vec![MockWorker::gated("w-0"), MockWorker::gated("w-1")];
    let scheduler = scheduler_with(&workers);

    let running: Vec<_> = ["r0", "r1"]
        .iter()
        .map(|id| submit_named(&scheduler, id, false))
        .collect();
    let queued: Vec<_> = ["q0", "q1"]
        .iter()
        .map(|id| submit_named(&scheduler, id, false))
        .collect();
    assert_eq!(scheduler.queue_length(), 2);

    scheduler.terminate().await.expect("terminate");

    assert!(scheduler.is_terminated());
    assert_eq!(scheduler.queue_length(), 0);
    for worker in &workers {
        assert_eq!(worker.terminate_count(), 1);
    }
    for handle in queued {
        let job_id = handle.job_id().clone();
        assert_eq!(settled(handle).await.unwrap_err(), JobError::Terminated(job_id));
    }

    // In-flight jobs are left to finish on their own.
    for worker in &workers {
        worker.release(1);
    }
    for handle in running {
        settled(handle).await.expect("in-flight job completes");
    }
    for worker in &workers {
        worker.assert_invocation_count_eq(1);
    }
}

#[tokio::test]
async fn terminated_scheduler_rejects_new_work() {
    let scheduler = scheduler_with(&[MockWorker::new("w-0")]);
    scheduler.terminate().await.unwrap();

    assert!(matches!(
        scheduler.submit("recognize", json!({}), false),
        Err(SchedulerError::Terminated)
    ));
    assert!(matches!(
        scheduler.add_worker(MockWorker::new("w-1")),
        Err(SchedulerError::Terminated)
    ));
    assert!(matches!(
        scheduler.terminate().await,
        Err(SchedulerError::Terminated)
    ));
}

#[tokio::test]
async fn worker_termination_failures_are_reported() {
    let healthy = MockWorker::new("w-0");
    let broken = MockWorker::new("w-1");
    broken.fail_terminate("engine process already gone");
    let scheduler = scheduler_with(&[healthy.clone(), broken.clone()]);

    let err = scheduler.terminate().await.unwrap_err();

    match err {
        SchedulerError::WorkerTermination { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, WorkerId::from("w-1"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(scheduler.is_terminated());
    assert_eq!(healthy.terminate_count(), 1);
    assert_eq!(broken.terminate_count(), 1);
}

#[tokio::test]
async fn events_follow_job_lifecycle() {
    let worker = MockWorker::new("w-0");
    let scheduler = Scheduler::new(SchedulerConfig::new("events"));
    let mut history = scheduler.subscribe();
    let mut watcher = scheduler.subscribe();

    scheduler.add_worker(worker.clone()).unwrap();
    settled(submit_named(&scheduler, "a", false)).await.unwrap();
    wait_for_event(&mut watcher, |payload| {
        matches!(payload, SchedulerEventPayload::WorkerReleased { .. })
    })
    .await;

    let events = drain_events(&mut history);
    assert_sequence_monotonic(&events);
    assert!(events.iter().all(|event| event.meta.scheduler == "events"));

    let kinds: Vec<&str> = events
        .iter()
        .map(|event| match &event.payload {
            SchedulerEventPayload::WorkerAdded { .. } => "worker_added",
            SchedulerEventPayload::Submitted { .. } => "submitted",
            SchedulerEventPayload::Dispatched { .. } => "dispatched",
            SchedulerEventPayload::Completed { .. } => "completed",
            SchedulerEventPayload::WorkerReleased { .. } => "worker_released",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["worker_added", "submitted", "dispatched", "completed", "worker_released"]
    );
    assert_eq!(
        dispatch_order(&events),
        vec![(JobId::from("a"), WorkerId::from("w-0"))]
    );
}

#[tokio::test]
async fn termination_events_list_rejected_jobs() {
    let worker = MockWorker::gated("w-0");
    let scheduler = scheduler_with(&[worker.clone()]);
    let mut rx = scheduler.subscribe();

    let running = submit_named(&scheduler, "running", false);
    let _queued = submit_named(&scheduler, "queued", false);
    scheduler.terminate().await.unwrap();

    let events = drain_events(&mut rx);
    assert_eq!(dispatched_jobs(&events), ids(&["running"]));
    assert!(events.iter().any(|event| matches!(
        &event.payload,
        SchedulerEventPayload::Rejected { job_id } if job_id.as_str() == "queued"
    )));
    assert!(matches!(
        events.last().map(|event| &event.payload),
        Some(SchedulerEventPayload::Terminated { workers: 1, rejected: 1 })
    ));

    worker.release(1);
    settled(running).await.unwrap();
}
