// crates/jobs/src/handle.rs
//! Per-job state: the child process, its output buffer, and the drain worker.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout};

use crate::buffer::OutputBuffer;

// Drain worker lifecycle. Transitions only ever move forward:
// Idle -> Draining (compare-exchange in ensure_draining)
// Draining -> Drained (stored by the worker at stdout EOF)
const DRAIN_IDLE: u8 = 0;
const DRAIN_DRAINING: u8 = 1;
const DRAIN_DRAINED: u8 = 2;

/// Owns one mining process invocation: its reaped-by-us child handle, the
/// stdout stream (consumed exactly once by the drain worker), and the line
/// buffer the status poller empties.
pub struct JobHandle {
    /// Taken by the drain worker when draining starts; `None` afterwards.
    stdout: Mutex<Option<ChildStdout>>,
    /// Taken by the drain worker so it can `wait()` the child at EOF.
    child: Mutex<Option<Child>>,
    buffer: OutputBuffer,
    drain: AtomicU8,
    created_at: Instant,
    /// Set once, by the worker, after the child is reaped.
    finished_at: OnceLock<Instant>,
    exit_code: OnceLock<Option<i32>>,
}

impl JobHandle {
    /// Wrap a freshly spawned child whose stdin has already been fed.
    ///
    /// `stdout` must be the pipe taken from this same child.
    pub fn new(child: Child, stdout: ChildStdout) -> Self {
        Self {
            stdout: Mutex::new(Some(stdout)),
            child: Mutex::new(Some(child)),
            buffer: OutputBuffer::new(),
            drain: AtomicU8::new(DRAIN_IDLE),
            created_at: Instant::now(),
            finished_at: OnceLock::new(),
            exit_code: OnceLock::new(),
        }
    }

    pub fn buffer(&self) -> &OutputBuffer {
        &self.buffer
    }

    /// Whether the drain worker has reached stdout EOF and reaped the child.
    pub fn is_drained(&self) -> bool {
        self.drain.load(Ordering::Acquire) == DRAIN_DRAINED
    }

    /// Whether a drain worker was ever started for this job.
    pub fn drain_started(&self) -> bool {
        self.drain.load(Ordering::Acquire) != DRAIN_IDLE
    }

    /// When this handle was created (the launch time).
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the drain finished, if it has.
    pub fn finished_at(&self) -> Option<Instant> {
        self.finished_at.get().copied()
    }

    /// The child's exit code, once reaped. `None` inner value means the
    /// process was killed by a signal.
    pub fn exit_code(&self) -> Option<Option<i32>> {
        self.exit_code.get().copied()
    }

    /// Start the drain worker for this job if one has not started yet.
    ///
    /// Idempotent: the Idle -> Draining compare-exchange admits exactly one
    /// caller over the handle's lifetime, so two workers can never run
    /// concurrently no matter how many pollers race here. Later calls
    /// (including after the worker's natural exit) are no-ops.
    pub fn ensure_draining(self: Arc<Self>, job_id: &str) {
        if self
            .drain
            .compare_exchange(
                DRAIN_IDLE,
                DRAIN_DRAINING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        // We won the exchange: the stdout and child slots are ours alone.
        let stdout = match self.stdout.lock() {
            Ok(mut slot) => slot.take(),
            Err(e) => {
                tracing::error!(job_id, "stdout mutex poisoned: {e}");
                None
            }
        };
        let child = match self.child.lock() {
            Ok(mut slot) => slot.take(),
            Err(e) => {
                tracing::error!(job_id, "child mutex poisoned: {e}");
                None
            }
        };

        let Some(stdout) = stdout else {
            // Nothing to read; mark the job drained so polls can complete.
            self.drain.store(DRAIN_DRAINED, Ordering::Release);
            return;
        };

        let job_id = job_id.to_string();
        tokio::spawn(async move {
            self.drain_stdout(stdout, child, &job_id).await;
        });
    }

    /// Kill the child of a job that was never polled.
    ///
    /// No drain worker ever started, so nothing else will reap the process;
    /// the tokio runtime reaps the killed child in the background once the
    /// taken handle is dropped.
    pub(crate) fn abandon(&self, job_id: &str) {
        match self.stdout.lock() {
            Ok(mut slot) => {
                slot.take();
            }
            Err(e) => tracing::error!(job_id, "stdout mutex poisoned: {e}"),
        }
        let child = match self.child.lock() {
            Ok(mut slot) => slot.take(),
            Err(e) => {
                tracing::error!(job_id, "child mutex poisoned: {e}");
                None
            }
        };
        if let Some(mut child) = child {
            if let Err(e) = child.start_kill() {
                tracing::warn!(job_id, error = %e, "failed to kill abandoned mining process");
            }
        }
    }

    /// Drain worker body: move lines from the child's stdout into the buffer
    /// until EOF, then reap the child. A read error ends the loop the same
    /// way EOF does; the job is considered fully drained either way.
    async fn drain_stdout(&self, stdout: ChildStdout, child: Option<Child>, job_id: &str) {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();
        let mut count = 0u64;

        while let Ok(Some(line)) = lines.next_line().await {
            self.buffer.push(line);
            count += 1;
        }

        if let Some(mut child) = child {
            match child.wait().await {
                Ok(status) => {
                    let _ = self.exit_code.set(status.code());
                    if !status.success() {
                        tracing::warn!(
                            job_id,
                            exit_code = ?status.code(),
                            "mining process exited with non-zero status"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(job_id, error = %e, "failed to wait for mining process");
                }
            }
        }

        let _ = self.finished_at.set(Instant::now());
        // Release-store after the final push and the reap, so a poller that
        // observes Drained also observes every buffered line.
        self.drain.store(DRAIN_DRAINED, Ordering::Release);
        tracing::debug!(job_id, lines = count, "drain worker finished");
    }
}
