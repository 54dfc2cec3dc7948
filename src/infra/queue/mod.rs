//! In-process job queue with at-least-once delivery, retries and backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{AppError, Job, JobHandler, JobOptions, JobQueue, QueueError, QueueStats};

struct Shared {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
    stats: DashMap<String, QueueStats>,
    sender: mpsc::UnboundedSender<Job>,
    receiver: Mutex<mpsc::UnboundedReceiver<Job>>,
    closed: AtomicBool,
}

impl Shared {
    fn update_stats(&self, queue: &str, f: impl FnOnce(&mut QueueStats)) {
        let mut entry = self.stats.entry(queue.to_string()).or_default();
        f(entry.value_mut());
    }
}

/// Job queue backed by a tokio channel, consumed by [`spawn_workers`].
#[derive(Clone)]
pub struct InProcessJobQueue {
    shared: Arc<Shared>,
}

impl InProcessJobQueue {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                handlers: DashMap::new(),
                stats: DashMap::new(),
                sender,
                receiver: Mutex::new(receiver),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Refuse new jobs. Jobs already queued stay in the channel.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }

    /// Wait for the next job, or `None` once every sender is gone.
    async fn next_job(&self) -> Option<Job> {
        self.shared.receiver.lock().await.recv().await
    }

    /// Run one job through its handler and apply the retry policy.
    #[instrument(skip(self, job), fields(job_id = %job.id, queue = %job.queue, attempt = job.attempt))]
    pub async fn dispatch(&self, job: Job) {
        let shared = &self.shared;
        shared.update_stats(&job.queue, |s| {
            s.waiting = s.waiting.saturating_sub(1);
            s.active += 1;
        });

        let result = match shared.handlers.get(&job.queue).map(|h| Arc::clone(h.value())) {
            Some(handler) => handler.handle(&job).await,
            None => Err(QueueError::UnknownQueue(job.queue.clone()).into()),
        };

        shared.update_stats(&job.queue, |s| s.active = s.active.saturating_sub(1));

        match result {
            Ok(()) => {
                shared.update_stats(&job.queue, |s| s.completed += 1);
                debug!("Job completed");
            }
            Err(e) if e.is_retryable() && !job.is_last_attempt() => {
                let delay = job.options.backoff.delay_for(job.attempt);
                warn!(error = ?e, retry_in = ?delay, "Job failed, scheduling retry");
                shared.update_stats(&job.queue, |s| s.delayed += 1);

                let shared = Arc::clone(shared);
                let mut retry = job;
                retry.attempt += 1;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    shared.update_stats(&retry.queue, |s| {
                        s.delayed = s.delayed.saturating_sub(1);
                        s.waiting += 1;
                    });
                    if shared.sender.send(retry).is_err() {
                        error!("Queue receiver dropped, retry lost");
                    }
                });
            }
            Err(e) => {
                shared.update_stats(&job.queue, |s| s.failed += 1);
                error!(error = ?e, retryable = e.is_retryable(), "Job failed permanently");
            }
        }
    }
}

impl Default for InProcessJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InProcessJobQueue {
    async fn enqueue(&self, queue: &str, payload: Value, options: JobOptions) -> Result<String, AppError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed.into());
        }
        if !self.shared.handlers.contains_key(queue) {
            return Err(QueueError::UnknownQueue(queue.to_string()).into());
        }

        let job = Job {
            id: Uuid::new_v4().to_string(),
            queue: queue.to_string(),
            payload,
            attempt: 1,
            options,
        };
        let id = job.id.clone();
        self.shared.update_stats(queue, |s| s.waiting += 1);
        self.shared.sender.send(job).map_err(|_| {
            self.shared
                .update_stats(queue, |s| s.waiting = s.waiting.saturating_sub(1));
            AppError::Queue(QueueError::Closed)
        })?;
        debug!(job_id = %id, queue = %queue, "Job enqueued");
        Ok(id)
    }

    fn on_job(&self, queue: &str, handler: Arc<dyn JobHandler>) {
        self.shared.handlers.insert(queue.to_string(), handler);
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats, AppError> {
        if !self.shared.handlers.contains_key(queue) {
            return Err(QueueError::UnknownQueue(queue.to_string()).into());
        }
        Ok(self
            .shared
            .stats
            .get(queue)
            .map(|s| *s.value())
            .unwrap_or_default())
    }
}

/// Queue worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs handled concurrently
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Spawn `concurrency` workers pulling from the queue until shutdown.
///
/// A worker finishes the job it is running before observing shutdown.
pub fn spawn_workers(
    queue: InProcessJobQueue,
    config: WorkerConfig,
) -> (Vec<JoinHandle<()>>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    info!(concurrency = config.concurrency, "Starting queue workers");

    let handles = (0..config.concurrency.max(1))
        .map(|worker_id| {
            let queue = queue.clone();
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        job = queue.next_job() => match job {
                            Some(job) => queue.dispatch(job).await,
                            None => break,
                        },
                        _ = shutdown_rx.changed() => break,
                    }
                }
                info!(worker_id, "Queue worker stopped");
            })
        })
        .collect();

    (handles, shutdown_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Backoff, DatabaseError};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Fails with the given error for the first `failures` deliveries.
    struct FlakyHandler {
        failures: u32,
        retryable: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler for FlakyHandler {
        async fn handle(&self, _job: &Job) -> Result<(), AppError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(if self.retryable {
                    DatabaseError::Connection("down".into()).into()
                } else {
                    AppError::NotFound("gone".into())
                });
            }
            Ok(())
        }
    }

    fn flaky(failures: u32, retryable: bool) -> Arc<FlakyHandler> {
        Arc::new(FlakyHandler {
            failures,
            retryable,
            calls: AtomicU32::new(0),
        })
    }

    fn fast_options(attempts: u32) -> JobOptions {
        JobOptions {
            attempts,
            backoff: Backoff::Fixed(Duration::from_millis(10)),
        }
    }

    async fn wait_for(queue: &InProcessJobQueue, name: &str, done: impl Fn(&QueueStats) -> bool) -> QueueStats {
        for _ in 0..200 {
            let stats = queue.stats(name).await.unwrap();
            if done(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue {name} did not settle");
    }

    #[tokio::test]
    async fn test_enqueue_requires_registered_handler() {
        let queue = InProcessJobQueue::new();
        let err = queue
            .enqueue("nowhere", serde_json::json!({}), JobOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Queue(QueueError::UnknownQueue(_))));
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_jobs() {
        let queue = InProcessJobQueue::new();
        queue.on_job("q", flaky(0, true));
        queue.close();
        let err = queue.enqueue("q", serde_json::json!({}), JobOptions::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Queue(QueueError::Closed)));
    }

    #[tokio::test]
    async fn test_workers_complete_jobs() {
        let queue = InProcessJobQueue::new();
        let handler = flaky(0, true);
        queue.on_job("q", handler.clone());
        let (handles, shutdown) = spawn_workers(queue.clone(), WorkerConfig { concurrency: 2 });

        for _ in 0..3 {
            queue.enqueue("q", serde_json::json!({}), fast_options(1)).await.unwrap();
        }
        let stats = wait_for(&queue, "q", |s| s.completed == 3).await;
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.failed, 0);

        shutdown.send(true).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_retryable_failure_is_redelivered() {
        let queue = InProcessJobQueue::new();
        let handler = flaky(2, true);
        queue.on_job("q", handler.clone());
        let (_handles, shutdown) = spawn_workers(queue.clone(), WorkerConfig::default());

        queue.enqueue("q", serde_json::json!({}), fast_options(3)).await.unwrap();
        let stats = wait_for(&queue, "q", |s| s.completed == 1).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(stats.failed, 0);
        shutdown.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let queue = InProcessJobQueue::new();
        let handler = flaky(10, true);
        queue.on_job("q", handler.clone());
        let (_handles, shutdown) = spawn_workers(queue.clone(), WorkerConfig::default());

        queue.enqueue("q", serde_json::json!({}), fast_options(3)).await.unwrap();
        wait_for(&queue, "q", |s| s.failed == 1).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        shutdown.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let queue = InProcessJobQueue::new();
        let handler = flaky(1, false);
        queue.on_job("q", handler.clone());
        let (_handles, shutdown) = spawn_workers(queue.clone(), WorkerConfig::default());

        queue.enqueue("q", serde_json::json!({}), fast_options(3)).await.unwrap();
        let stats = wait_for(&queue, "q", |s| s.failed == 1).await;
        assert_eq!(stats.completed, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        shutdown.send(true).unwrap();
    }
}
