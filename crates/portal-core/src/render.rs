//! Trailing-edge debounce between feed mutations and repaints.
//!
//! Producers hold a cheap [`RenderHandle`] and call `request_render()` as
//! often as they like. The [`RenderScheduler`] task fires its callback once the
//! requests have been quiet for a full window.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

/// Seam between the aggregator and whatever repaints. Must never render inline.
pub trait RenderRequest: Send + Sync {
    fn request_render(&self);
}

#[derive(Debug, Clone)]
pub struct RenderHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl RenderRequest for RenderHandle {
    fn request_render(&self) {
        // Closed after cancel; nothing left to schedule.
        let _ = self.tx.send(());
    }
}

/// Receiving half of a render channel, consumed by [`RenderScheduler::start`].
#[derive(Debug)]
pub struct PendingRenders {
    rx: mpsc::UnboundedReceiver<()>,
}

/// Create the request side before the scheduler exists, so the aggregator can
/// be built first and the scheduler's callback can capture it.
pub fn render_channel() -> (RenderHandle, PendingRenders) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RenderHandle { tx }, PendingRenders { rx })
}

pub struct RenderScheduler {
    task: Option<JoinHandle<()>>,
}

impl RenderScheduler {
    /// Spawn the debounce loop on the current tokio runtime.
    pub fn start<F>(pending: PendingRenders, window: Duration, on_render: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let task = tokio::spawn(run(pending.rx, window, on_render));
        Self { task: Some(task) }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Drop any pending render and stop the loop. Safe to call repeatedly.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run<F>(mut rx: mpsc::UnboundedReceiver<()>, window: Duration, mut on_render: F)
where
    F: FnMut(),
{
    while rx.recv().await.is_some() {
        let quiet = sleep(window);
        tokio::pin!(quiet);

        loop {
            tokio::select! {
                _ = &mut quiet => {
                    on_render();
                    break;
                }
                request = rx.recv() => match request {
                    Some(()) => quiet.as_mut().reset(Instant::now() + window),
                    None => return,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_scheduler(window_ms: u64) -> (RenderHandle, RenderScheduler, Arc<AtomicUsize>) {
        let renders = Arc::new(AtomicUsize::new(0));
        let counter = renders.clone();
        let (handle, pending) = render_channel();
        let scheduler = RenderScheduler::start(pending, Duration::from_millis(window_ms), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (handle, scheduler, renders)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_one_render() {
        let (handle, _scheduler, renders) = counting_scheduler(120);

        for _ in 0..10 {
            handle.request_render();
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(renders.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_render_separately() {
        let (handle, _scheduler, renders) = counting_scheduler(100);

        handle.request_render();
        sleep(Duration::from_millis(150)).await;
        handle.request_render();
        handle.request_render();
        sleep(Duration::from_millis(150)).await;

        assert_eq!(renders.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_waits_for_quiet_after_last_request() {
        let (handle, _scheduler, renders) = counting_scheduler(100);

        handle.request_render();
        sleep(Duration::from_millis(90)).await;
        handle.request_render();
        sleep(Duration::from_millis(90)).await;
        assert_eq!(renders.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(20)).await;
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_drops_pending_render() {
        let (handle, mut scheduler, renders) = counting_scheduler(100);

        handle.request_render();
        sleep(Duration::from_millis(10)).await;
        scheduler.cancel();
        scheduler.cancel();
        handle.request_render();

        sleep(Duration::from_millis(300)).await;
        assert_eq!(renders.load(Ordering::SeqCst), 0);
        assert!(!scheduler.is_running());
    }
}
