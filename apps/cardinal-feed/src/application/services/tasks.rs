//! Background Task Accounting
//!
//! Counts the tasks a session has spawned that are still alive. The count
//! drops when a task finishes, panics or is aborted, so it doubles as a
//! leak probe for shutdown paths.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::task::JoinHandle;

/// Shared counter of live background tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskCounter {
    active: Arc<AtomicUsize>,
}

impl TaskCounter {
    /// Create a counter with no live tasks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked tasks still alive.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Spawn `future` on the runtime and track it until it completes.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let guard = self.track();
        tokio::spawn(async move {
            let _guard = guard;
            future.await
        })
    }

    fn track(&self) -> TaskGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            active: Arc::clone(&self.active),
        }
    }
}

struct TaskGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn counts_until_completion() {
        let counter = TaskCounter::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = counter.spawn(async move {
            let _ = rx.await;
        });
        assert_eq!(counter.active(), 1);

        tx.send(()).unwrap();
        handle.await.unwrap();
        assert_eq!(counter.active(), 0);
    }

    #[tokio::test]
    async fn aborted_task_is_released() {
        let counter = TaskCounter::new();
        let handle = counter.spawn(tokio::time::sleep(Duration::from_secs(60)));
        assert_eq!(counter.active(), 1);

        handle.abort();
        let _ = handle.await;
        assert_eq!(counter.active(), 0);
    }
}
