//! Observable, cancellable executor for detached background continuations.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Inner {
    in_flight: AtomicUsize,
    idle: Notify,
    shutdown_tx: watch::Sender<bool>,
}

/// Runs fire-and-forget tasks that outlive the request that started them,
/// while still letting tests await completion and shutdown cancel them.
#[derive(Debug, Clone)]
pub struct BackgroundExecutor {
    inner: Arc<Inner>,
}

/// Decrements the in-flight count even if the task panics or is cancelled.
struct InFlightGuard(Arc<Inner>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl BackgroundExecutor {
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                shutdown_tx,
            }),
        }
    }

    /// Spawn a named task. Once [`shutdown`](Self::shutdown) is called it is
    /// dropped at its next await point, and `on_cancel` runs to completion in
    /// its place. A task spawned after shutdown only runs `on_cancel`.
    pub fn spawn_with_fallback<F, C>(&self, name: &'static str, task: F, on_cancel: C) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
        C: Future<Output = ()> + Send + 'static,
    {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard(Arc::clone(&self.inner));
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _guard = guard;
            if *shutdown_rx.borrow() {
                warn!(task = name, "Executor shut down, task not started");
                on_cancel.await;
                return;
            }
            tokio::select! {
                _ = task => debug!(task = name, "Background task finished"),
                _ = shutdown_rx.changed() => {
                    warn!(task = name, "Background task cancelled by shutdown");
                    on_cancel.await;
                }
            }
        })
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Resolve once no spawned task is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Give running tasks up to `grace` to finish, then shut down and wait
    /// for the cancelled ones. Returns whether everything finished in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        info!(in_flight = self.in_flight(), ?grace, "Draining background executor");
        let finished = tokio::time::timeout(grace, self.wait_idle()).await.is_ok();
        if !finished {
            warn!(in_flight = self.in_flight(), "Grace period elapsed, cancelling background tasks");
        }
        self.shutdown();
        self.wait_idle().await;
        finished
    }

    /// Cancel running tasks and refuse to start new ones.
    pub fn shutdown(&self) {
        info!(in_flight = self.in_flight(), "Shutting down background executor");
        self.inner.shutdown_tx.send_replace(true);
    }
}

impl Default for BackgroundExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn test_wait_idle_awaits_spawned_tasks() {
        let executor = BackgroundExecutor::new();
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();

        executor.spawn_with_fallback(
            "sleepy",
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.store(true, Ordering::SeqCst);
            },
            async {},
        );
        assert_eq!(executor.in_flight(), 1);

        executor.wait_idle().await;
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_when_empty() {
        let executor = BackgroundExecutor::new();
        tokio::time::timeout(Duration::from_millis(100), executor.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_cancels_running_tasks() {
        let executor = BackgroundExecutor::new();
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();

        let handle = executor.spawn_with_fallback(
            "forever",
            async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                flag.store(true, Ordering::SeqCst);
            },
            async {},
        );
        executor.shutdown();
        handle.await.unwrap();

        assert!(!done.load(Ordering::SeqCst));
        assert_eq!(executor.in_flight(), 0);

        // Tasks spawned after shutdown never run
        let late = Arc::new(AtomicBool::new(false));
        let late_flag = late.clone();
        executor
            .spawn_with_fallback(
                "late",
                async move { late_flag.store(true, Ordering::SeqCst) },
                async {},
            )
            .await
            .unwrap();
        assert!(!late.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_fallback_runs_when_task_is_cancelled() {
        let executor = BackgroundExecutor::new();
        let finished = Arc::new(AtomicBool::new(false));
        let fell_back = Arc::new(AtomicBool::new(false));
        let (f1, f2) = (finished.clone(), fell_back.clone());

        executor.spawn_with_fallback(
            "slow",
            async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                f1.store(true, Ordering::SeqCst);
            },
            async move { f2.store(true, Ordering::SeqCst) },
        );

        assert!(!executor.drain(Duration::from_millis(20)).await);
        assert!(!finished.load(Ordering::SeqCst));
        assert!(fell_back.load(Ordering::SeqCst));
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_drain_lets_short_tasks_finish() {
        let executor = BackgroundExecutor::new();
        let finished = Arc::new(AtomicBool::new(false));
        let fell_back = Arc::new(AtomicBool::new(false));
        let (f1, f2) = (finished.clone(), fell_back.clone());

        executor.spawn_with_fallback(
            "quick",
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                f1.store(true, Ordering::SeqCst);
            },
            async move { f2.store(true, Ordering::SeqCst) },
        );

        assert!(executor.drain(Duration::from_secs(5)).await);
        assert!(finished.load(Ordering::SeqCst));
        assert!(!fell_back.load(Ordering::SeqCst));
    }
}
