//! Fixed-size worker pool with a FIFO job queue
//!
//! Workers pop jobs in submission order. Joins are claim-or-run: waiting on
//! a [`JobHandle`] whose job is still queued claims the job and runs it on
//! the waiting thread instead of blocking, so recursive submission (a
//! pooled job waiting on another pooled job) cannot deadlock a saturated
//! pool.
//!
//! Shutdown is clean: queued jobs drain before workers exit, and
//! submissions after shutdown fail with a resource error.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::error::{ComputeError, Result};

type UnitJob = Box<dyn FnOnce() + Send>;

enum JobCell<T> {
    /// Waiting in the queue; first claimant runs it.
    Queued(Box<dyn FnOnce() -> T + Send>),
    /// Claimed by a worker or a joiner.
    Running,
    /// Finished on a worker; value awaiting pickup.
    Done(T),
    /// The job panicked; payload awaiting re-raise at the join point.
    Panicked(Box<dyn std::any::Any + Send>),
}

struct JobShared<T> {
    cell: Mutex<JobCell<T>>,
    done: Condvar,
}

impl<T: Send + 'static> JobShared<T> {
    /// Worker-side entry: run the job if nobody claimed it yet.
    fn run_if_queued(&self) {
        let job = {
            let mut cell = self.cell.lock();
            match std::mem::replace(&mut *cell, JobCell::Running) {
                JobCell::Queued(job) => job,
                other => {
                    // A joiner claimed it first; put the state back.
                    *cell = other;
                    return;
                }
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(job));
        let mut cell = self.cell.lock();
        *cell = match outcome {
            Ok(value) => JobCell::Done(value),
            Err(payload) => JobCell::Panicked(payload),
        };
        self.done.notify_all();
    }
}

/// Handle to a job submitted to a [`WorkerPool`].
pub struct JobHandle<T> {
    shared: Arc<JobShared<T>>,
}

impl<T> std::fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> JobHandle<T> {
    /// Block until the job completes and take its result.
    ///
    /// If the job is still queued, the calling thread claims and runs it
    /// inline. A panic inside the job resumes unwinding here.
    pub fn wait(self) -> T {
        let mut cell = self.shared.cell.lock();
        loop {
            match std::mem::replace(&mut *cell, JobCell::Running) {
                JobCell::Queued(job) => {
                    drop(cell);
                    trace!("join claimed a queued job, running inline");
                    return job();
                }
                JobCell::Running => {
                    self.shared.done.wait(&mut cell);
                }
                JobCell::Done(value) => return value,
                JobCell::Panicked(payload) => panic::resume_unwind(payload),
            }
        }
    }
}

struct PoolQueue {
    jobs: VecDeque<UnitJob>,
    shutdown: bool,
}

struct PoolInner {
    queue: Mutex<PoolQueue>,
    work_available: Condvar,
}

/// Fixed-size pool of worker threads consuming a shared FIFO queue.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    threads: usize,
}

impl WorkerPool {
    /// Spawn a pool with `threads` workers; 0 selects hardware
    /// concurrency.
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            threads
        };

        let inner = Arc::new(PoolInner {
            queue: Mutex::new(PoolQueue {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            work_available: Condvar::new(),
        });

        let workers = (0..threads)
            .map(|index| {
                let inner = inner.clone();
                thread::Builder::new()
                    .name(format!("compute-graph-worker-{index}"))
                    .spawn(move || Self::worker_loop(&inner))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        debug!(threads, "worker pool started");
        Self {
            inner,
            workers: Mutex::new(workers),
            threads,
        }
    }

    fn worker_loop(inner: &PoolInner) {
        loop {
            let job = {
                let mut queue = inner.queue.lock();
                loop {
                    if let Some(job) = queue.jobs.pop_front() {
                        break job;
                    }
                    if queue.shutdown {
                        return;
                    }
                    inner.work_available.wait(&mut queue);
                }
            };
            job();
        }
    }

    /// Submit a job. Fails with a resource error once the pool has been
    /// shut down.
    pub fn enqueue<T, F>(&self, job: F) -> Result<JobHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let shared = Arc::new(JobShared {
            cell: Mutex::new(JobCell::Queued(Box::new(job))),
            done: Condvar::new(),
        });

        let unit: UnitJob = {
            let shared = shared.clone();
            Box::new(move || shared.run_if_queued())
        };

        {
            let mut queue = self.inner.queue.lock();
            if queue.shutdown {
                return Err(ComputeError::resource(
                    "cannot enqueue on a stopped worker pool",
                ));
            }
            queue.jobs.push_back(unit);
        }
        self.inner.work_available.notify_one();
        Ok(JobHandle { shared })
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.threads
    }

    /// Stop accepting jobs, drain the queue, and join all workers.
    /// Idempotent.
    pub fn shutdown(&self) {
        {
            let mut queue = self.inner.queue.lock();
            if queue.shutdown {
                return;
            }
            queue.shutdown = true;
        }
        self.inner.work_available.notify_all();

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
        debug!("worker pool drained and stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .finish()
    }
}
