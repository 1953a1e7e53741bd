//! Bounded fire-and-forget work queue drained by a fixed worker pool.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Processes one job. Failures are logged by the worker and never retried.
#[async_trait]
pub trait JobHandler<J>: Send + Sync + 'static {
    async fn handle(&self, job: J) -> anyhow::Result<()>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("work queue is full")]
    QueueFull,
    #[error("work queue is closed")]
    Closed,
}

/// Producer side; cheap to clone
pub struct WorkQueue<J> {
    name: &'static str,
    sender: mpsc::Sender<J>,
}

impl<J> Clone for WorkQueue<J> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            sender: self.sender.clone(),
        }
    }
}

/// Worker tasks; they exit once every `WorkQueue` clone is dropped
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to drain and exit
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "work queue worker panicked");
            }
        }
    }
}

impl<J: Send + 'static> WorkQueue<J> {
    /// Spawn `workers` tasks pulling from a queue of `capacity` jobs
    pub fn start<H>(
        name: &'static str,
        capacity: usize,
        workers: usize,
        handler: Arc<H>,
    ) -> (Self, WorkerPool)
    where
        H: JobHandler<J>,
    {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    loop {
                        // Lock only while waiting for the next job.
                        let job = { receiver.lock().await.recv().await };
                        let Some(job) = job else { break };
                        if let Err(e) = handler.handle(job).await {
                            tracing::warn!(queue = name, worker, error = %e, "job failed");
                        }
                    }
                    tracing::debug!(queue = name, worker, "worker stopped");
                })
            })
            .collect();

        tracing::info!(queue = name, capacity, workers, "work queue started");

        (Self { name, sender }, WorkerPool { handles })
    }

    /// Enqueue without waiting
    pub fn enqueue(&self, job: J) -> Result<(), EnqueueError> {
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!(queue = self.name, "work queue full, job dropped");
                EnqueueError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct Counter {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler<u32> for Counter {
        async fn handle(&self, job: u32) -> anyhow::Result<()> {
            if job == 0 {
                anyhow::bail!("zero is not a job");
            }
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Blocked {
        gate: Notify,
    }

    #[async_trait]
    impl JobHandler<u32> for Blocked {
        async fn handle(&self, _job: u32) -> anyhow::Result<()> {
            self.gate.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn workers_drain_every_job() {
        let handler = Arc::new(Counter {
            seen: AtomicUsize::new(0),
        });
        let (queue, pool) = WorkQueue::start("test", 16, 3, handler.clone());
        assert_eq!(pool.len(), 3);

        for job in 0..10u32 {
            queue.enqueue(job).unwrap();
        }
        drop(queue);
        pool.join().await;

        // job 0 fails and is not counted
        assert_eq!(handler.seen.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn full_queue_rejects_without_blocking() {
        let handler = Arc::new(Blocked {
            gate: Notify::new(),
        });
        let (queue, _pool) = WorkQueue::start("test", 1, 1, handler.clone());

        // One job in flight, one buffered; the rest must be rejected.
        let mut rejected = 0;
        for job in 0..10u32 {
            if queue.enqueue(job) == Err(EnqueueError::QueueFull) {
                rejected += 1;
            }
        }
        assert!(rejected >= 8);
        handler.gate.notify_waiters();
    }
}
