use std::time::Duration;

use ocr_dispatch::*;
use tokio::sync::broadcast::{self, error::TryRecvError};

/// Drain every event currently buffered in `rx`.
///
/// # Panics
///
/// Panics if the receiver lagged, since the recorded history would have gaps.
pub fn drain_events(rx: &mut broadcast::Receiver<SchedulerEvent>) -> Vec<SchedulerEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
            Err(TryRecvError::Lagged(skipped)) => {
                panic!("event receiver lagged by {skipped} events")
            }
        }
    }
}

/// Receive events until one matches `predicate` and return it.
///
/// # Panics
///
/// Panics if no matching event arrives within five seconds.
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<SchedulerEvent>,
    mut predicate: F,
) -> SchedulerEvent
where
    F: FnMut(&SchedulerEventPayload) -> bool,
{
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event.payload) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await;

    match found {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event bus closed before a matching event arrived"),
        Err(_) => panic!("no matching event within 5s"),
    }
}

/// `(job, worker)` pairs in dispatch order.
pub fn dispatch_order(events: &[SchedulerEvent]) -> Vec<(JobId, WorkerId)> {
    events
        .iter()
        .filter_map(|event| match &event.payload {
            SchedulerEventPayload::Dispatched {
                job_id, worker_id, ..
            } => Some((job_id.clone(), worker_id.clone())),
            _ => None,
        })
        .collect()
}

/// Jobs in dispatch order, without the worker.
pub fn dispatched_jobs(events: &[SchedulerEvent]) -> Vec<JobId> {
    dispatch_order(events)
        .into_iter()
        .map(|(job_id, _)| job_id)
        .collect()
}

/// Assert that event sequence numbers are strictly increasing.
pub fn assert_sequence_monotonic(events: &[SchedulerEvent]) {
    for pair in events.windows(2) {
        assert!(
            pair[0].meta.sequence < pair[1].meta.sequence,
            "event sequence went from {} to {}",
            pair[0].meta.sequence,
            pair[1].meta.sequence
        );
    }
}
