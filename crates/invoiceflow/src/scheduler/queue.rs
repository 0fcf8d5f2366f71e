//! In-process priority queue with delayed retries.
//!
//! Jobs are keyed by id. A waiting or delayed job can be replaced by
//! enqueuing the same id again; an active job cannot.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::job::{Job, JobError, JobState, Priority};
use crate::error::SchedulerError;

/// Queue depth by state, plus lifetime totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: u64,
    pub failed: u64,
}

struct Entry<P> {
    job: Job<P>,
    seq: u64,
    ready_at: Option<Instant>,
}

struct QueueState<P> {
    entries: HashMap<String, Entry<P>>,
    /// (priority, seq, id); stale items are skipped on pop.
    heap: BinaryHeap<Reverse<(u8, u64, String)>>,
    next_seq: u64,
    completed: u64,
    failed: u64,
}

impl<P> QueueState<P> {
    fn push_ready(&mut self, id: &str) {
        if let Some(entry) = self.entries.get(id) {
            self.heap
                .push(Reverse((entry.job.priority.value(), entry.seq, id.to_string())));
        }
    }

    fn promote_due(&mut self, now: Instant) {
        let due: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.job.state == JobState::Delayed && e.ready_at.is_some_and(|t| t <= now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in due {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.job.state = JobState::Waiting;
                entry.ready_at = None;
            }
            self.push_ready(&id);
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter(|e| e.job.state == JobState::Delayed)
            .filter_map(|e| e.ready_at)
            .min()
    }

    fn pop_ready(&mut self) -> Option<String> {
        while let Some(Reverse((priority, seq, id))) = self.heap.pop() {
            let current = self.entries.get(&id).is_some_and(|e| {
                e.seq == seq && e.job.priority.value() == priority && e.job.state == JobState::Waiting
            });
            if current {
                return Some(id);
            }
        }
        None
    }
}

enum Take<P> {
    Ready(Job<P>),
    /// Nothing runnable; wake at the given instant if a delayed job is due.
    Wait(Option<Instant>),
}

pub struct JobQueue<P> {
    name: String,
    max_attempts: u32,
    backoff: Duration,
    state: Mutex<QueueState<P>>,
    notify: Notify,
    closed: AtomicBool,
}

impl<P: Clone> JobQueue<P> {
    pub fn new(name: &str, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            name: name.to_string(),
            max_attempts: max_attempts.max(1),
            backoff,
            state: Mutex::new(QueueState {
                entries: HashMap::new(),
                heap: BinaryHeap::new(),
                next_seq: 0,
                completed: 0,
                failed: 0,
            }),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState<P>> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Delay before the retry that follows attempt number `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << exp)
    }

    /// Adds a job or replaces the waiting/delayed job with the same id.
    /// Returns the job id. Enqueuing an id that is currently active leaves
    /// the running job untouched.
    pub fn enqueue(&self, id: &str, payload: P, priority: Priority) -> Result<String, SchedulerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SchedulerError::QueueClosed(self.name.clone()));
        }

        let mut state = self.lock();
        match state.entries.get_mut(id) {
            Some(entry) if entry.job.state == JobState::Active => {
                log::debug!("[{}] job {} is active, ignoring enqueue", self.name, id);
                return Ok(id.to_string());
            }
            Some(entry) => {
                let reprioritized = entry.job.priority != priority;
                entry.job.payload = payload;
                entry.job.priority = priority;
                entry.job.updated_at = Utc::now();
                log::debug!("[{}] replaced queued job {}", self.name, id);
                if reprioritized && entry.job.state == JobState::Waiting {
                    state.push_ready(id);
                }
            }
            None => {
                let seq = state.next_seq;
                state.next_seq += 1;
                let job = Job::new(id, payload, priority, self.max_attempts);
                state.entries.insert(
                    id.to_string(),
                    Entry {
                        job,
                        seq,
                        ready_at: None,
                    },
                );
                state.push_ready(id);
                log::debug!("[{}] enqueued job {} ({:?})", self.name, id, priority);
            }
        }
        drop(state);

        self.notify.notify_one();
        Ok(id.to_string())
    }

    fn try_take(&self) -> Take<P> {
        let mut state = self.lock();
        state.promote_due(Instant::now());

        let Some(id) = state.pop_ready() else {
            return Take::Wait(state.next_wake());
        };
        match state.entries.get_mut(&id) {
            Some(entry) => {
                entry.job.state = JobState::Active;
                entry.job.attempts += 1;
                entry.job.updated_at = Utc::now();
                Take::Ready(entry.job.clone())
            }
            None => Take::Wait(None),
        }
    }

    /// Waits for the next runnable job. Returns `None` once the queue is
    /// closed.
    pub async fn next(&self) -> Option<Job<P>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            let wake = match self.try_take() {
                Take::Ready(job) => return Some(job),
                Take::Wait(wake) => wake,
            };

            match wake {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Marks an active job as done.
    pub fn complete(&self, id: &str) {
        let mut state = self.lock();
        if state.entries.remove(id).is_some() {
            state.completed += 1;
        }
    }

    /// Records a failed attempt. Returns the retry delay when the job was
    /// rescheduled, `None` when it failed for good.
    pub fn fail(&self, id: &str, error: &JobError) -> Option<Duration> {
        let mut state = self.lock();
        let entry = state.entries.get_mut(id)?;
        entry.job.last_error = Some(error.message.clone());
        entry.job.updated_at = Utc::now();

        if error.retryable && entry.job.attempts < entry.job.max_attempts {
            let delay = self.backoff_for(entry.job.attempts);
            entry.job.state = JobState::Delayed;
            entry.ready_at = Some(Instant::now() + delay);
            drop(state);
            self.notify.notify_one();
            return Some(delay);
        }

        state.entries.remove(id);
        state.failed += 1;
        None
    }

    pub fn state_of(&self, id: &str) -> Option<JobState> {
        self.lock().entries.get(id).map(|e| e.job.state)
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.state_of(id) == Some(JobState::Active)
    }

    pub fn counts(&self) -> QueueCounts {
        let state = self.lock();
        let mut counts = QueueCounts {
            completed: state.completed,
            failed: state.failed,
            ..QueueCounts::default()
        };
        for entry in state.entries.values() {
            match entry.job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Completed | JobState::Failed => {}
            }
        }
        counts
    }

    /// Stops handing out jobs. Jobs still queued are dropped.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = self
            .lock()
            .entries
            .values()
            .filter(|e| e.job.state != JobState::Active)
            .count();
        if dropped > 0 {
            log::warn!("[{}] closing with {} queued jobs", self.name, dropped);
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
