//! Typed worker pool of tokio tasks, based on the thread pool from The Book.
//! <https://doc.rust-lang.org/book/ch20-02-multithreaded.html>
//!
//! Unlike The Book's pool, tasks are plain data handled by one shared async function,
//! the task queue is bounded, and every task produces exactly one outcome on the results
//! channel. Closing the task channel is the only shutdown signal.

use crate::error::WorkerPanicked;
use futures::FutureExt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// The pool was shut down, or every worker is gone.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("worker pool {0} is closed")]
pub struct PoolClosed(pub &'static str);

/// A fixed number of tokio tasks applying the same handler to tasks of type `T`.
///
/// Dropping the pool aborts its workers.
pub struct WorkerPool<T, R> {
    name: &'static str,
    workers: Vec<JoinHandle<()>>,
    sender: Option<Sender<T>>,
    results: UnboundedReceiver<Result<R, WorkerPanicked>>,
}

impl<T: Send + 'static, R: Send + 'static> WorkerPool<T, R> {
    /// Spawn `size` workers on the current tokio runtime. At most `capacity` submitted
    /// tasks wait in the queue; [WorkerPool::submit] waits while it is full.
    pub fn new<F, Fut>(size: NonZeroUsize, capacity: NonZeroUsize, name: &'static str, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(capacity.get());
        let (results_tx, results) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let handler = Arc::new(handler);
        let workers = (0..size.get())
            .map(|id| {
                tokio::spawn(work(
                    id,
                    name,
                    Arc::clone(&receiver),
                    results_tx.clone(),
                    Arc::clone(&handler),
                ))
            })
            .collect();
        Self {
            name,
            workers,
            sender: Some(sender),
            results,
        }
    }

    /// Queue a task.
    pub async fn submit(&self, task: T) -> Result<(), PoolClosed> {
        self.sender
            .as_ref()
            .ok_or(PoolClosed(self.name))?
            .send(task)
            .await
            .map_err(|_| PoolClosed(self.name))
    }

    /// Wait for the outcome of the next finished task.
    ///
    /// Returns [None] once the pool has been shut down and all outcomes were received.
    pub async fn recv(&mut self) -> Option<Result<R, WorkerPanicked>> {
        self.results.recv().await
    }

    /// Close the task queue and wait for the workers to finish the tasks already queued.
    /// Their outcomes can still be received afterwards.
    pub async fn shutdown(&mut self) {
        drop(self.sender.take());
        for (id, worker) in self.workers.drain(..).enumerate() {
            if let Err(e) = worker.await {
                tracing::error!("Worker {}/{id} died: {e}", self.name);
            }
        }
    }
}

impl<T, R> Drop for WorkerPool<T, R> {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn work<T, R, F, Fut>(
    id: usize,
    pool_name: &'static str,
    receiver: Arc<Mutex<Receiver<T>>>,
    results: UnboundedSender<Result<R, WorkerPanicked>>,
    handler: Arc<F>,
) where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    tracing::debug!("Starting worker {pool_name}/{id}");
    loop {
        // note: the lock is released before the task runs
        let message = receiver.lock().await.recv().await;
        let Some(task) = message else {
            tracing::debug!("Shutting down worker {pool_name}/{id}");
            break;
        };
        let outcome = AssertUnwindSafe(async { handler(task).await })
            .catch_unwind()
            .await
            .map_err(|payload| WorkerPanicked {
                pool: pool_name,
                worker: id,
                message: panic_message(payload.as_ref()),
            });
        if results.send(outcome).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
