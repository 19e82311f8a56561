// src/installer/pool.rs

//! Fixed-size worker pool for artifact jobs
//!
//! Jobs are fanned out over a bounded number of threads. The first
//! failure flips a cancellation flag: workers finish their current job,
//! then drain the queue without executing. All failures are collected
//! and reported together so one bad artifact never takes the process
//! down.

use crate::error::{Error, Result};
use crossbeam::channel;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// Create a pool with `workers` threads; zero is clamped to one
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Run `work` over every job, at most `workers` at a time.
    ///
    /// Returns `Ok(())` when every job succeeded, otherwise
    /// `Error::JobsFailed` carrying one message per failed job.
    pub fn execute<T, F>(&self, jobs: Vec<T>, work: F) -> Result<()>
    where
        T: Send,
        F: Fn(&T) -> Result<()> + Sync,
    {
        if jobs.is_empty() {
            return Ok(());
        }

        let (job_tx, job_rx) = channel::unbounded::<T>();
        let (err_tx, err_rx) = channel::unbounded::<String>();
        let cancelled = AtomicBool::new(false);

        for job in jobs {
            // Unbounded channel, send cannot fail while rx is alive
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for worker in 0..self.workers {
                let job_rx = job_rx.clone();
                let err_tx = err_tx.clone();
                let cancelled = &cancelled;
                let work = &work;

                scope.spawn(move || {
                    debug!("Worker {} started", worker);
                    while let Ok(job) = job_rx.recv() {
                        if cancelled.load(Ordering::SeqCst) {
                            continue; // drain without executing
                        }
                        if let Err(e) = work(&job) {
                            warn!("Worker {} job failed: {}", worker, e);
                            cancelled.store(true, Ordering::SeqCst);
                            let _ = err_tx.send(e.to_string());
                        }
                    }
                    debug!("Worker {} finished", worker);
                });
            }
        });
        drop(err_tx);

        let failed: Vec<String> = err_rx.into_iter().collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::JobsFailed { failed })
        }
    }
}
