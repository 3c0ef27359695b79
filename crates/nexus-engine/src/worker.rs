//! Bounded worker pool for the operations a chunk's transient states
//! dispatch off the device lock: backing-store I/O and transform calls.
//!
//! Grounded in `oxcrypt-fuse::scheduler::executor::FsSyscallExecutor`
//! (fixed thread count, bounded submission queue, per-job result
//! delivery), generalized from "filesystem syscalls" to "crypto/
//! compression/backing-store calls" and simplified from futures/oneshot
//! to plain closures: a job *is* the full off-lock operation plus the
//! on-completion callback that reacquires the device lock and advances
//! the chunk's state, so there is no separate result-channel type to
//! thread through the state machine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, trace};

/// Default number of worker threads. Spec.md §5 calls for "worker
/// threads for crypto/compression" distinct from the request-submission
/// and completion-callback threads; a small fixed pool is enough since
/// each job is CPU-bound (crypto/compression) or a single blocking I/O
/// call, not a long-lived connection.
pub const DEFAULT_WORKER_THREADS: usize = 8;

/// Default bound on queued-but-not-yet-running jobs. Spec.md §5: "Worker
/// dispatch uses bounded channels; producers block when a channel is
/// full to exert back-pressure" -- this is the bound on that channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Running counters mirroring `oxcrypt-fuse::scheduler::executor::ExecutorStats`,
/// surfaced through `nexus-daemon`'s `stats` control call.
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
}

impl WorkerStats {
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64) {
        (self.submitted.load(Ordering::Relaxed), self.completed.load(Ordering::Relaxed))
    }
}

/// A fixed-size pool of worker threads draining a bounded job queue.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<WorkerStats>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(threads: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = bounded::<Job>(queue_capacity);
        let stats = Arc::new(WorkerStats::default());
        let mut handles = Vec::with_capacity(threads);
        for id in 0..threads {
            let rx = rx.clone();
            let stats = Arc::clone(&stats);
            handles.push(
                std::thread::Builder::new()
                    .name(format!("nexus-worker-{id}"))
                    .spawn(move || {
                        for job in rx {
                            trace!(worker = id, "running job");
                            job();
                            stats.completed.fetch_add(1, Ordering::Relaxed);
                        }
                        debug!(worker = id, "worker thread exiting, channel closed");
                    })
                    .expect("failed to spawn nexus worker thread"),
            );
        }
        Self { sender: Some(tx), handles, stats }
    }

    /// Submits `job` for execution on a worker thread. Blocks the caller
    /// if the queue is at capacity, exerting the back-pressure spec.md
    /// §5 requires rather than rejecting or growing unbounded.
    ///
    /// # Panics
    /// Panics if called after [`WorkerPool::shutdown`]; callers must not
    /// submit work to a pool that has begun tearing down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        self.sender
            .as_ref()
            .expect("worker pool already shut down")
            .send(Box::new(job))
            .expect("worker pool threads exited unexpectedly");
    }

    #[must_use]
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    /// Drops the sender (closing the queue) and joins every worker
    /// thread, ensuring no job is left running when this returns. Part
    /// of the device shutdown barrier (spec.md §4.6).
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
