//! Bounded worker pools
//!
//! One pool per resource type: a bounded queue in front of a fixed number of
//! executors. Submissions that find the queue full are rejected immediately
//! so callers can surface 503 instead of blocking.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use sm_domain::errors::{DomainError, Result};

pub type Work = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Clone)]
pub struct WorkerPool {
    resource: String,
    sender: mpsc::Sender<Work>,
}

impl WorkerPool {
    pub fn new(resource: &str, size: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Work>(size);
        let receiver = Arc::new(Mutex::new(receiver));

        for executor in 0..size {
            let receiver = Arc::clone(&receiver);
            let resource = resource.to_string();
            tokio::spawn(async move {
                loop {
                    let work = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    match work {
                        Some(work) => work.await,
                        None => {
                            debug!(resource = %resource, executor, "worker pool drained, stopping");
                            break;
                        }
                    }
                }
            });
        }

        WorkerPool {
            resource: resource.to_string(),
            sender,
        }
    }

    /// Enqueues work, failing synchronously when the queue is at capacity.
    pub fn try_submit(&self, work: Work) -> Result<()> {
        self.sender.try_send(work).map_err(|_| DomainError::QueueFull {
            resource: self.resource.clone(),
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn submitted_work_is_executed() {
        let pool = WorkerPool::new("service_brokers", 2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            pool.try_submit(Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn a_full_queue_rejects_submissions() {
        let pool = WorkerPool::new("service_instances", 1);
        let (release, gate) = tokio::sync::oneshot::channel::<()>();

        // occupy the single executor
        pool.try_submit(Box::pin(async move {
            let _ = gate.await;
        }))
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // one slot in the queue, the next submission must bounce
        pool.try_submit(Box::pin(async {})).unwrap();
        let err = pool.try_submit(Box::pin(async {})).unwrap_err();
        assert!(matches!(err, DomainError::QueueFull { .. }));

        let _ = release.send(());
    }
}
