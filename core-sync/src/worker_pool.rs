//! # Worker Pool
//!
//! Fixed number of worker tasks fed by a bounded queue.
//!
//! When the queue is full, [`WorkerPool::submit`] runs the job on the
//! submitting task before returning, so the caller slows down to the pool's
//! pace and queued work never exceeds `queue_capacity`. Each job reports
//! through its own [`JobHandle`]; a job that panics yields
//! `SyncError::WorkerPool` on its handle and leaves the worker alive.

use crate::{Result, SyncError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Job = BoxFuture<'static, ()>;

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

/// Result slot of one submitted job.
pub struct JobHandle<T> {
    receiver: oneshot::Receiver<std::result::Result<T, String>>,
}

impl<T> JobHandle<T> {
    /// Wait for the job.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::WorkerPool` if the job panicked or was dropped
    /// before it ran.
    pub async fn join(self) -> Result<T> {
        match self.receiver.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(panic)) => Err(SyncError::WorkerPool(format!("Job panicked: {}", panic))),
            Err(_) => Err(SyncError::WorkerPool("Job dropped before completion".to_string())),
        }
    }
}

impl WorkerPool {
    /// Spawn `size` workers sharing a queue of `queue_capacity` jobs.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(size: usize, queue_capacity: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..size)
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        match job {
                            Some(job) => job.await,
                            None => break,
                        }
                    }
                    debug!(worker_id, "Worker stopped");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queue a job, or run it right here when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::WorkerPool` after [`WorkerPool::shutdown`].
    pub async fn submit<F, T>(&self, job: F) -> Result<JobHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .map_err(|_| SyncError::WorkerPool("Worker pool lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| SyncError::WorkerPool("Worker pool is shut down".to_string()))?;

        let (tx, receiver) = oneshot::channel();
        let wrapped: Job = async move {
            let outcome = AssertUnwindSafe(job)
                .catch_unwind()
                .await
                .map_err(panic_message);
            // The handle may have been dropped
            let _ = tx.send(outcome);
        }
        .boxed();

        match sender.try_send(wrapped) {
            Ok(()) => {}
            Err(TrySendError::Full(wrapped)) => {
                debug!("Worker queue full, running job on caller");
                wrapped.await;
            }
            Err(TrySendError::Closed(_)) => {
                return Err(SyncError::WorkerPool("Worker pool is shut down".to_string()));
            }
        }

        Ok(JobHandle { receiver })
    }

    /// Stop accepting jobs, let queued ones finish and wait for every worker.
    pub async fn shutdown(&self) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        drop(sender);

        let workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Worker ended abnormally");
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
