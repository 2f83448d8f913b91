use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::JobError;
use crate::job::{Job, JobPriority};
use crate::runtime::WorkOutput;

/// Channel settling a caller's [`JobHandle`](crate::JobHandle).
pub type Responder = oneshot::Sender<Result<WorkOutput, JobError>>;

/// A job waiting for a worker, together with the channel that settles the
/// caller's handle once a worker has run it.
#[derive(Debug)]
pub struct QueueEntry {
    pub(crate) job: Job,
    pub(crate) responder: Responder,
    pub(crate) enqueued_at: Instant,
}

impl QueueEntry {
    pub fn new(job: Job, responder: Responder) -> Self {
        Self {
            job,
            responder,
            enqueued_at: Instant::now(),
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn priority(&self) -> JobPriority {
        self.job.priority
    }

    /// Settle the caller's handle. A caller that already dropped its handle
    /// is ignored.
    pub(crate) fn settle(self, result: Result<WorkOutput, JobError>) {
        let _ = self.responder.send(result);
    }
}

/// Ordered sequence of not-yet-claimed jobs.
///
/// Logically a single FIFO in which a `High` entry is inserted just before
/// the first `Normal` entry still waiting. Since that keeps every `High`
/// entry ahead of every `Normal` one, the sequence is stored as two lanes and
/// read priority lane first.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    priority: VecDeque<QueueEntry>,
    normal: VecDeque<QueueEntry>,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: QueueEntry) {
        match entry.priority() {
            JobPriority::High => self.priority.push_back(entry),
            JobPriority::Normal => self.normal.push_back(entry),
        }
    }

    /// Remove and return the head of the queue.
    pub fn pop(&mut self) -> Option<QueueEntry> {
        self.priority
            .pop_front()
            .or_else(|| self.normal.pop_front())
    }

    pub fn peek(&self) -> Option<&QueueEntry> {
        self.priority.front().or_else(|| self.normal.front())
    }

    pub fn len(&self) -> usize {
        self.priority.len() + self.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priority.is_empty() && self.normal.is_empty()
    }

    pub fn lane_len(&self, lane: JobPriority) -> usize {
        match lane {
            JobPriority::High => self.priority.len(),
            JobPriority::Normal => self.normal.len(),
        }
    }

    pub fn lanes(&self) -> LaneCounts {
        LaneCounts {
            high: self.priority.len(),
            normal: self.normal.len(),
        }
    }

    /// Entries in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.priority.iter().chain(self.normal.iter())
    }

    /// Remove every entry, in dispatch order.
    pub fn drain(&mut self) -> Vec<QueueEntry> {
        let mut drained = Vec::with_capacity(self.len());
        drained.extend(self.priority.drain(..));
        drained.extend(self.normal.drain(..));
        drained
    }
}

/// Number of queued jobs per lane.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LaneCounts {
    pub high: usize,
    pub normal: usize,
}

impl LaneCounts {
    pub fn total(&self) -> usize {
        self.high + self.normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobId, JobSpec};

    fn entry(id: &str, priority: bool) -> QueueEntry {
        let (tx, _rx) = oneshot::channel();
        let job = Job::from_spec(
            JobSpec::new("recognize").with_id(id).with_priority(priority),
        );
        QueueEntry::new(job, tx)
    }

    fn order(queue: &DispatchQueue) -> Vec<String> {
        queue.iter().map(|e| e.job().id.to_string()).collect()
    }

    #[test]
    fn test_fifo_within_normal_lane() {
        let mut queue = DispatchQueue::new();
        queue.push(entry("a", false));
        queue.push(entry("b", false));
        queue.push(entry("c", false));

        assert_eq!(order(&queue), vec!["a", "b", "c"]);
        assert_eq!(queue.pop().unwrap().job().id, JobId::from("a"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_priority_goes_before_waiting_normal_entries() {
        let mut queue = DispatchQueue::new();
        queue.push(entry("a", false));
        queue.push(entry("b", false));
        queue.push(entry("p", true));

        assert_eq!(order(&queue), vec!["p", "a", "b"]);
    }

    #[test]
    fn test_priority_stays_behind_earlier_priority() {
        let mut queue = DispatchQueue::new();
        queue.push(entry("p1", true));
        queue.push(entry("a", false));
        queue.push(entry("p2", true));
        queue.push(entry("b", false));

        assert_eq!(order(&queue), vec!["p1", "p2", "a", "b"]);
        assert_eq!(queue.lanes(), LaneCounts { high: 2, normal: 2 });
    }

    #[test]
    fn test_priority_after_head_was_claimed() {
        let mut queue = DispatchQueue::new();
        queue.push(entry("a", false));
        queue.push(entry("b", false));
        let claimed = queue.pop().unwrap();
        assert_eq!(claimed.job().id, JobId::from("a"));

        queue.push(entry("p", true));
        assert_eq!(order(&queue), vec!["p", "b"]);
        assert_eq!(queue.peek().unwrap().job().id, JobId::from("p"));
    }

    #[test]
    fn test_drain_empties_in_dispatch_order() {
        let mut queue = DispatchQueue::new();
        queue.push(entry("a", false));
        queue.push(entry("p", true));

        let drained: Vec<String> = queue
            .drain()
            .into_iter()
            .map(|e| e.job().id.to_string())
            .collect();
        assert_eq!(drained, vec!["p", "a"]);
        assert!(queue.is_empty());
        assert_eq!(queue.lane_len(JobPriority::High), 0);
        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn test_settle_delivers_to_receiver() {
        let (tx, rx) = oneshot::channel();
        let job = Job::from_spec(JobSpec::new("recognize").with_id("x"));
        QueueEntry::new(job, tx)
            .settle(Err(JobError::Terminated(JobId::from("x"))));
        assert_eq!(
            rx.await.unwrap().unwrap_err(),
            JobError::Terminated(JobId::from("x"))
        );
    }
}
