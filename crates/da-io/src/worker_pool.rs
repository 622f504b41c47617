//! Fixed-size FIFO task queue with N long-lived worker threads.
//!
//! Workers pull `FnOnce` tasks off a shared unbounded queue until the
//! queue is both drained and stopped. Enqueueing after `stop()` returns
//! a typed `Stopped` error rather than silently dropping the task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use da_common::error::DaError;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A pool of `workers` long-lived threads draining a shared task queue.
pub struct WorkerPool {
    name: &'static str,
    sender: Option<Sender<Task>>,
    stopped: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` threads named `{name}-{i}`.
    pub fn new(name: &'static str, workers: usize) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Task>();
        let stopped = Arc::new(AtomicBool::new(false));

        let handles = (0..workers)
            .map(|i| spawn_worker(name, i, rx.clone()))
            .collect();

        WorkerPool {
            name,
            sender: Some(tx),
            stopped,
            handles,
        }
    }

    /// Queue a task. Fails with `DaError::Stopped` if `stop()` has already
    /// been called, matching the "enqueue after stop is an error" rule —
    /// the caller never silently loses work.
    pub fn enqueue(&self, task: impl FnOnce() + Send + 'static) -> Result<(), DaError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(DaError::stopped("worker pool"));
        }
        match &self.sender {
            Some(sender) => sender
                .send(Box::new(task))
                .map_err(|_| DaError::stopped("worker pool")),
            None => Err(DaError::stopped("worker pool")),
        }
    }

    /// Mark the pool stopped and drop the sender so workers exit once the
    /// queue drains. Does not block; call `join()` afterward to wait.
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::Release);
        self.sender = None;
    }

    /// Block until every worker thread has exited. Call after `stop()`.
    pub fn join(&mut self) {
        for handle in self.handles.drain(..) {
            if let Err(panic) = handle.join() {
                tracing::error!(pool = self.name, ?panic, "worker pool thread panicked");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

fn spawn_worker(name: &'static str, index: usize, rx: Receiver<Task>) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("{name}-{index}"))
        .spawn(move || {
            while let Ok(task) = rx.recv() {
                task();
            }
            tracing::debug!(pool = name, worker = index, "worker pool thread exiting");
        })
        .expect("failed to spawn worker pool thread")
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
        self.join();
    }
}
