//! Fixed-size worker pool for device reactions
//!
//! Jobs are queued on one crossbeam channel and picked up by whichever worker
//! is free. Submission order is preserved in the queue; completion order is
//! not guaranteed once more than one worker is running.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

/// Pool size used when none is configured
pub const DEFAULT_WORKERS: usize = 8;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `size` worker threads (at least one)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (sender, receiver) = channel::unbounded::<Job>();

        let workers = (0..size)
            .filter_map(|index| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("knob-worker-{}", index))
                    .spawn(move || Self::work(receiver))
                    .map_err(|e| warn!("Failed to start worker {}: {}", index, e))
                    .ok()
            })
            .collect::<Vec<_>>();

        debug!("Worker pool started with {} threads", workers.len());

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        }
    }

    fn work(receiver: Receiver<Job>) {
        while let Ok(job) = receiver.recv() {
            job();
        }
        trace!("Worker {:?} exiting", thread::current().name());
    }

    /// Queue a job; `false` once the pool is shut down
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    /// Number of running worker threads
    pub fn size(&self) -> usize {
        self.workers.lock().len()
    }

    /// Stop accepting jobs, let the queue drain, and join every worker
    pub fn shutdown(&self) {
        self.sender.lock().take();

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for worker in workers {
            // A job may shut the pool down from one of its own workers
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers exit once the queue is closed and drained
        self.sender.lock().take();
    }
}
