use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::job::{Job, JobError};
use super::queue::JobQueue;

/// Runs one job attempt.
#[async_trait]
pub trait JobHandler<P>: Send + Sync {
    async fn handle(&self, job: &Job<P>) -> Result<(), JobError>;
}

/// Fixed set of workers draining one queue.
pub struct WorkerPool<P> {
    queue: Arc<JobQueue<P>>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl<P> WorkerPool<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Spawns `worker_count` workers (at least one) on the current runtime.
    pub fn spawn(
        queue: Arc<JobQueue<P>>,
        handler: Arc<dyn JobHandler<P>>,
        worker_count: usize,
    ) -> Self {
        let worker_count = worker_count.max(1);
        let shutdown = Arc::new(AtomicBool::new(false));

        let workers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&queue),
                    Arc::clone(&handler),
                    Arc::clone(&shutdown),
                ))
            })
            .collect();

        info!("Started {} workers for queue '{}'", worker_count, queue.name());

        Self {
            queue,
            workers,
            shutdown,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue<P>> {
        &self.queue
    }

    /// Stops accepting and dispatching jobs. Running jobs finish.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool '{}'...", self.queue.name());
        self.shutdown.store(true, Ordering::Release);
        self.queue.close();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Joins all workers. Call after `shutdown`.
    pub async fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} of '{}' panicked: {}", i, self.queue.name(), e);
            } else {
                debug!("Worker {} of '{}' finished", i, self.queue.name());
            }
        }
        info!("All workers of '{}' have stopped", self.queue.name());
    }
}

async fn run_worker<P>(
    worker_id: usize,
    queue: Arc<JobQueue<P>>,
    handler: Arc<dyn JobHandler<P>>,
    shutdown: Arc<AtomicBool>,
) where
    P: Clone + Send + Sync + 'static,
{
    debug!("Worker {} of '{}' started", worker_id, queue.name());

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        let Some(job) = queue.next().await else {
            break;
        };

        let span = tracing::info_span!(
            "job",
            queue = queue.name(),
            job_id = %job.id,
            attempt = job.attempts,
            worker = worker_id
        );

        // A panicking handler must not take the worker down with it.
        let outcome = {
            let handler = Arc::clone(&handler);
            let job = job.clone();
            tokio::spawn(async move { handler.handle(&job).await }.instrument(span))
                .await
                .unwrap_or_else(|e| Err(JobError::fatal(format!("job handler panicked: {}", e))))
        };

        match outcome {
            Ok(()) => {
                queue.complete(&job.id);
                debug!("Worker {} finished job {}", worker_id, job.id);
            }
            Err(e) => match queue.fail(&job.id, &e) {
                Some(delay) => warn!(
                    "Job {} attempt {}/{} failed, retrying in {:?}: {}",
                    job.id, job.attempts, job.max_attempts, delay, e
                ),
                None => error!(
                    "Job {} failed after {} attempt(s): {}",
                    job.id, job.attempts, e
                ),
            },
        }
    }

    debug!("Worker {} of '{}' stopped", worker_id, queue.name());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::Priority;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Recorder {
        seen: Mutex<Vec<(String, u32)>>,
        fail_first: bool,
        done: tokio::sync::Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler<u32> for Recorder {
        async fn handle(&self, job: &Job<u32>) -> Result<(), JobError> {
            self.seen
                .lock()
                .unwrap()
                .push((job.id.clone(), job.attempts));
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.done.notify_one();
            if self.fail_first && job.attempts == 1 {
                return Err(JobError::retryable("flaky"));
            }
            if job.payload == 0 {
                panic!("zero payload");
            }
            Ok(())
        }
    }

    fn recorder(fail_first: bool) -> Arc<Recorder> {
        Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail_first,
            done: tokio::sync::Notify::new(),
            calls: AtomicUsize::new(0),
        })
    }

    async fn wait_for_calls(rec: &Recorder, n: usize) {
        while rec.calls.load(Ordering::SeqCst) < n {
            rec.done.notified().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_retries_retryable_failures() {
        let queue = Arc::new(JobQueue::new("test", 3, Duration::from_millis(100)));
        let rec = recorder(true);
        let pool = WorkerPool::spawn(Arc::clone(&queue), rec.clone() as Arc<dyn JobHandler<u32>>, 2);

        queue.enqueue("a", 7, Priority::Normal).unwrap();
        wait_for_calls(&rec, 2).await;
        tokio::task::yield_now().await;

        assert_eq!(
            *rec.seen.lock().unwrap(),
            vec![("a".to_string(), 1), ("a".to_string(), 2)]
        );

        pool.shutdown();
        pool.wait().await;
        assert_eq!(queue.counts().completed, 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_fails_job() {
        let queue = Arc::new(JobQueue::new("test", 3, Duration::from_millis(10)));
        let rec = recorder(false);
        let pool = WorkerPool::spawn(Arc::clone(&queue), rec.clone() as Arc<dyn JobHandler<u32>>, 1);

        queue.enqueue("boom", 0, Priority::Normal).unwrap();
        queue.enqueue("ok", 1, Priority::Low).unwrap();
        wait_for_calls(&rec, 2).await;
        tokio::task::yield_now().await;

        pool.shutdown();
        assert!(pool.is_shutdown());
        pool.wait().await;

        let counts = queue.counts();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.completed, 1);
    }
}
