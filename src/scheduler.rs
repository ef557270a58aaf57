//! Repeating background tasks
//!
//! Each task runs on the actix runtime (`actix_rt::spawn`, never
//! `tokio::spawn`, so it shares the HTTP server's local set). A run always
//! completes before the next sleep starts, so runs of the same task never
//! overlap. The period is re-read before every sleep, which lets a settings
//! change retime a running task.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

/// How long a task waits between runs
#[derive(Debug, Clone)]
pub enum Period {
    Fixed(Duration),
    /// Milliseconds, adjustable while the task runs
    Shared(Arc<AtomicU64>),
}

impl Period {
    pub fn current(&self) -> Duration {
        match self {
            Period::Fixed(d) => *d,
            Period::Shared(ms) => Duration::from_millis(ms.load(Ordering::SeqCst)),
        }
    }
}

/// Cancellation handle for a spawned task
pub struct TaskHandle {
    name: &'static str,
    cancelled: Arc<AtomicBool>,
    join: actix_rt::task::JoinHandle<()>,
}

impl TaskHandle {
    /// Stop the task. A run in progress is aborted at its next await point.
    pub fn cancel(&self) {
        if self.is_cancelled() {
            return;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        info!(task = self.name, "Cancelling background task");
        self.join.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Spawn `task` to run every `period`. With `run_immediately` the first
/// run starts right away, otherwise after one period.
pub fn spawn_repeating<F, Fut>(
    name: &'static str,
    period: Period,
    run_immediately: bool,
    mut task: F,
) -> TaskHandle
where
    F: FnMut() -> Fut + 'static,
    Fut: Future<Output = ()> + 'static,
{
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();

    info!(task = name, period_ms = period.current().as_millis() as u64, "Starting background task");

    let join = actix_rt::spawn(async move {
        if !run_immediately {
            sleep(period.current()).await;
        }

        let mut runs: u64 = 0;
        while !flag.load(Ordering::SeqCst) {
            task().await;
            runs += 1;

            if flag.load(Ordering::SeqCst) {
                break;
            }
            sleep(period.current()).await;
        }

        debug!(task = name, runs, "Background task finished");
    });

    TaskHandle {
        name,
        cancelled,
        join,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(counter: &Arc<AtomicUsize>) -> impl FnMut() -> futures::future::Ready<()> + 'static {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    #[actix_rt::test]
    async fn test_runs_repeatedly_until_cancelled() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = spawn_repeating(
            "test",
            Period::Fixed(Duration::from_millis(10)),
            true,
            counting_task(&counter),
        );

        sleep(Duration::from_millis(100)).await;
        handle.cancel();
        let after_cancel = counter.load(Ordering::SeqCst);
        sleep(Duration::from_millis(50)).await;

        assert!(after_cancel >= 2);
        assert_eq!(counter.load(Ordering::SeqCst), after_cancel);
        assert!(handle.is_cancelled());
    }

    #[actix_rt::test]
    async fn test_delayed_start() {
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = spawn_repeating(
            "delayed",
            Period::Fixed(Duration::from_secs(60)),
            false,
            counting_task(&counter),
        );

        sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        handle.cancel();
    }

    #[actix_rt::test]
    async fn test_shared_period_is_reread() {
        let period_ms = Arc::new(AtomicU64::new(60_000));
        let counter = Arc::new(AtomicUsize::new(0));
        let period = Period::Shared(period_ms.clone());

        assert_eq!(period.current(), Duration::from_secs(60));
        period_ms.store(5, Ordering::SeqCst);
        assert_eq!(period.current(), Duration::from_millis(5));

        let handle = spawn_repeating("shared", period, true, counting_task(&counter));
        sleep(Duration::from_millis(60)).await;
        handle.cancel();

        assert!(counter.load(Ordering::SeqCst) >= 2);
    }
}
