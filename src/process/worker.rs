//! A reusable `keybase chat api` subprocess.
//!
//! A worker keeps its process alive across requests. Reader tasks forward
//! every output line to whichever lease currently holds the worker; while
//! idle, output is discarded.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::io::ProcessWriter;
use super::spawn::{KeybaseProcess, ProcessSpec};
use crate::Result;

/// Lifecycle state of a pooled worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// In the pool with a live process, or never started.
    Idle,
    /// Held by exactly one request.
    Leased,
    /// The process has gone away; the next lease restarts it.
    Exited,
}

/// Why a worker stopped producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The process closed its output on its own.
    Exit,
    /// The lease timer expired and the process was killed.
    Timeout,
}

/// Output delivered to the current lease holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A stdout line.
    Line(String),
    /// A stderr line.
    ErrorLine(String),
    /// The process exited or was killed.
    Exited(ExitReason),
}

/// Single-use resolution token.
///
/// The first caller of [`try_complete`](Completion::try_complete) wins; every
/// later call is refused. A response and a timer racing to finish the same
/// request therefore yield exactly one outcome.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    done: Arc<AtomicBool>,
}

impl Completion {
    /// A fresh, unresolved token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim resolution. Returns `true` only for the first caller.
    pub fn try_complete(&self) -> bool {
        !self.done.swap(true, Ordering::AcqRel)
    }

    /// Check whether anyone has resolved this token.
    pub fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

type Sink = Arc<Mutex<Option<mpsc::UnboundedSender<WorkerEvent>>>>;

fn deliver(sink: &Sink, worker: usize, event: WorkerEvent) {
    let guard = sink.lock().unwrap_or_else(PoisonError::into_inner);
    match guard.as_ref() {
        Some(tx) => {
            let _ = tx.send(event);
        }
        None => tracing::debug!(worker, ?event, "discarding output from idle worker"),
    }
}

struct WorkerProcess {
    process: Arc<Mutex<KeybaseProcess>>,
    stdin: ProcessWriter,
    exited: Arc<AtomicBool>,
    readers: Vec<JoinHandle<()>>,
}

impl WorkerProcess {
    fn start(id: usize, spec: &ProcessSpec, sink: &Sink) -> Result<Self> {
        let mut process = spec.spawn()?;
        let exited = Arc::new(AtomicBool::new(false));
        let mut readers = Vec::with_capacity(2);

        if let Some(mut stdout) = process.take_reader() {
            let sink = Arc::clone(sink);
            let exited = Arc::clone(&exited);
            readers.push(tokio::spawn(async move {
                loop {
                    match stdout.next_line().await {
                        Ok(Some(line)) => deliver(&sink, id, WorkerEvent::Line(line)),
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(worker = id, error = %e, "worker stdout read failed");
                            break;
                        }
                    }
                }
                exited.store(true, Ordering::Release);
                deliver(&sink, id, WorkerEvent::Exited(ExitReason::Exit));
            }));
        }

        if let Some(mut stderr) = process.take_stderr_reader() {
            let sink = Arc::clone(sink);
            readers.push(tokio::spawn(async move {
                while let Ok(Some(line)) = stderr.next_line().await {
                    deliver(&sink, id, WorkerEvent::ErrorLine(line));
                }
            }));
        }

        let stdin = process.take_writer().ok_or_else(|| {
            crate::Error::ProcessSpawn(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "worker stdin unavailable",
            ))
        })?;

        Ok(Self {
            process: Arc::new(Mutex::new(process)),
            stdin,
            exited,
            readers,
        })
    }

    fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
        let _ = self
            .process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .start_kill();
    }
}

/// One pooled request channel to the keybase CLI.
pub struct Worker {
    id: usize,
    spec: Arc<ProcessSpec>,
    leased: bool,
    process: Option<WorkerProcess>,
    sink: Sink,
    timer: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn new(id: usize, spec: Arc<ProcessSpec>) -> Self {
        Self {
            id,
            spec,
            leased: false,
            process: None,
            sink: Arc::new(Mutex::new(None)),
            timer: None,
        }
    }

    /// Index of this worker within its pool.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        if self.leased {
            return WorkerState::Leased;
        }
        match &self.process {
            Some(p) if !p.has_exited() => WorkerState::Idle,
            Some(_) => WorkerState::Exited,
            None => WorkerState::Idle,
        }
    }

    /// Process ID of the live subprocess, if any.
    pub fn pid(&self) -> Option<u32> {
        let process = self.process.as_ref()?;
        let guard = process.process.lock().unwrap_or_else(PoisonError::into_inner);
        guard.pid()
    }

    pub(crate) fn set_leased(&mut self, leased: bool) {
        self.leased = leased;
    }

    /// Prepare the worker for a request.
    ///
    /// Restarts the process if it was never started or has exited, otherwise
    /// flushes pending input. Arms a one-shot timer that kills the process and
    /// reports [`ExitReason::Timeout`] once `timeout` elapses, unless
    /// `completion` has already been claimed.
    pub(crate) async fn initialize(
        &mut self,
        timeout: Duration,
        completion: Completion,
    ) -> Result<mpsc::UnboundedReceiver<WorkerEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);

        let reuse = match self.process.as_mut() {
            Some(p) if !p.has_exited() => p.stdin.flush().await.is_ok(),
            _ => false,
        };
        if !reuse {
            if self.process.is_some() {
                tracing::debug!(worker = self.id, "restarting exited worker");
            }
            self.process = None;
            self.process = Some(WorkerProcess::start(self.id, &self.spec, &self.sink)?);
        }

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(process) = self.process.as_ref() {
            let target = Arc::clone(&process.process);
            let exited = Arc::clone(&process.exited);
            let sink = Arc::clone(&self.sink);
            let id = self.id;
            self.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if !completion.try_complete() {
                    return;
                }
                tracing::warn!(worker = id, ?timeout, "request timed out, killing worker");
                exited.store(true, Ordering::Release);
                let _ = target
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .start_kill();
                deliver(&sink, id, WorkerEvent::Exited(ExitReason::Timeout));
            }));
        }

        Ok(rx)
    }

    /// Write one request line to the process.
    pub(crate) async fn write_line(&mut self, line: &str) -> Result<()> {
        match self.process.as_mut() {
            Some(process) => process.stdin.write_line(line).await,
            None => Err(crate::Error::UnexpectedExit),
        }
    }

    /// Detach the current holder: clear the output sink and disarm the timer.
    ///
    /// A worker whose request did not finish cleanly may still owe output to
    /// the abandoned request, so its process is discarded.
    pub(crate) fn release(&mut self, clean: bool) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = None;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let exited = self.process.as_ref().map_or(false, WorkerProcess::has_exited);
        if !clean || exited {
            self.process = None;
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
