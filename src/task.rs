//! Cancellable background task handle.
//!
//! Every long-running piece of a session (pollers, push connection, event
//! dispatcher, banner countdowns) runs as one of these. The task gets a
//! shutdown receiver; dropping the handle signals it and aborts the task, so
//! nothing outlives the session that spawned it.

use std::future::Future;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub struct BackgroundTask {
    name: &'static str,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn `body` on the current tokio runtime. `body` receives the
    /// shutdown signal and should return once it resolves.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(oneshot::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(body(shutdown_rx));
        tracing::debug!(task = name, "Background task started");
        Self {
            name,
            shutdown: Some(shutdown_tx),
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the task to stop at its next await point.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.cancel();
        self.handle.abort();
        tracing::debug!(task = self.name, "Background task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_resolves_shutdown_receiver() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();
        let mut task = BackgroundTask::spawn("test", move |shutdown| async move {
            let _ = shutdown.await;
            flag.store(true, Ordering::SeqCst);
        });

        task.cancel();
        for _ in 0..20 {
            if task.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(task.name(), "test");
    }

    #[tokio::test]
    async fn drop_aborts_task_that_ignores_shutdown() {
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = ticks.clone();
        let task = BackgroundTask::spawn("stubborn", move |_shutdown| async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(task);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_drop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_drop);
    }
}
