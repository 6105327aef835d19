//! Fixed-size pool of request workers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use super::spawn::ProcessSpec;
use super::worker::{Completion, Worker, WorkerEvent, WorkerState};
use crate::{Error, Result};

/// Owns up to `size` workers and hands them out one lease at a time.
///
/// Exhaustion is reported immediately; acquiring never waits.
#[derive(Debug)]
pub struct WorkerPool {
    size: usize,
    idle: Mutex<Vec<Worker>>,
}

impl WorkerPool {
    /// Create a pool of `size` workers running `spec`. Processes start
    /// lazily on first lease.
    pub fn new(spec: ProcessSpec, size: usize) -> Self {
        let spec = Arc::new(spec);
        let idle = (0..size)
            .rev()
            .map(|id| Worker::new(id, Arc::clone(&spec)))
            .collect();
        Self {
            size,
            idle: Mutex::new(idle),
        }
    }

    /// Total number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of workers not currently leased.
    pub fn available(&self) -> usize {
        self.lock().len()
    }

    /// Lease a free worker.
    pub fn acquire(self: &Arc<Self>) -> Result<WorkerLease> {
        let mut worker = self
            .lock()
            .pop()
            .ok_or(Error::PoolExhausted { size: self.size })?;
        worker.set_leased(true);
        tracing::debug!(worker = worker.id(), "worker leased");
        Ok(WorkerLease {
            worker: Some(worker),
            pool: Arc::clone(self),
            completion: Completion::new(),
            clean: false,
        })
    }

    fn release(&self, mut worker: Worker) {
        worker.set_leased(false);
        tracing::debug!(worker = worker.id(), state = ?worker.state(), "worker released");
        self.lock().push(worker);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Worker>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive use of one worker. Returned to the pool on drop.
#[derive(Debug)]
pub struct WorkerLease {
    worker: Option<Worker>,
    pool: Arc<WorkerPool>,
    completion: Completion,
    clean: bool,
}

impl WorkerLease {
    fn worker(&mut self) -> Result<&mut Worker> {
        self.worker.as_mut().ok_or(Error::UnexpectedExit)
    }

    /// Index of the leased worker.
    pub fn id(&self) -> usize {
        self.worker.as_ref().map_or(usize::MAX, Worker::id)
    }

    /// State of the leased worker.
    pub fn state(&self) -> WorkerState {
        self.worker
            .as_ref()
            .map_or(WorkerState::Exited, Worker::state)
    }

    /// Start or reuse the process and arm the request timer.
    pub async fn initialize(
        &mut self,
        timeout: Duration,
    ) -> Result<mpsc::UnboundedReceiver<WorkerEvent>> {
        let completion = self.completion.clone();
        self.worker()?.initialize(timeout, completion).await
    }

    /// Write one request line.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.worker()?.write_line(line).await
    }

    /// Claim this lease's outcome for a response.
    ///
    /// Returns `false` if the timer already claimed it. A successful claim
    /// marks the worker safe to reuse.
    pub fn complete(&mut self) -> bool {
        let won = self.completion.try_complete();
        self.clean = won;
        won
    }

    /// Claim this lease's outcome for a failure, so a late timer stays silent.
    pub fn abandon(&mut self) {
        self.completion.try_complete();
        self.clean = false;
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.release(self.clean);
            self.pool.release(worker);
        }
    }
}
