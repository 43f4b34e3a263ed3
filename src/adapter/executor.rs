//! Single-consumer task queues
//!
//! Each queue runs the futures submitted to it one at a time, in
//! submission order. Work that must not interleave (control requests,
//! launch/attach, each output stream) gets its own queue.

use futures_util::future::BoxFuture;
use std::future::Future;
use tokio::sync::mpsc;

/// A serial executor backed by one tokio task
pub struct TaskQueue {
    name: &'static str,
    tx: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl TaskQueue {
    /// Spawn the queue's worker. Must be called inside a tokio runtime.
    pub fn new(name: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();

        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task.await;
            }
            tracing::trace!(queue = name, "Task queue closed");
        });

        Self { name, tx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue `task` behind everything submitted before it
    pub fn execute<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tx.send(Box::pin(task)).is_err() {
            tracing::warn!(queue = self.name, "Task queue worker is gone, dropping task");
        }
    }
}

/// The four queues of an adapter session
pub struct Queues {
    /// Breakpoints, stepping, resume, pause, threads, exception info, disconnect
    pub control: TaskQueue,
    /// Launch and attach
    pub launch: TaskQueue,
    pub stdout: TaskQueue,
    pub stderr: TaskQueue,
}

impl Queues {
    pub fn new() -> Self {
        Self {
            control: TaskQueue::new("control"),
            launch: TaskQueue::new("launch"),
            stdout: TaskQueue::new("stdout"),
            stderr: TaskQueue::new("stderr"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_tasks_run_in_submission_order() {
        let queue = TaskQueue::new("test");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..5u64 {
            let seen = Arc::clone(&seen);
            // Earlier tasks sleep longer; order must still hold
            queue.execute(async move {
                tokio::time::sleep(Duration::from_millis(10 * (5 - i))).await;
                seen.lock().push(i);
            });
        }

        let (done_tx, done_rx) = oneshot::channel();
        queue.execute(async move {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();

        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_queues_do_not_block_each_other() {
        let queues = Queues::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        queues.launch.execute(async move {
            let _ = release_rx.await;
        });

        let (done_tx, done_rx) = oneshot::channel();
        queues.control.execute(async move {
            let _ = done_tx.send(());
        });

        // Launch is still parked; control must have run anyway
        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .expect("control queue blocked by launch queue")
            .unwrap();
        let _ = release_tx.send(());
    }
}
