//! Worker pool manager.
//!
//! Owns the worker processes and the two shared channels. Jobs go in through
//! [`WorkerPool::dispatch`], results come out of [`WorkerPool::get_result`] in
//! completion order.

use super::health::{PoolHealth, PoolStatus};
use super::link::{Envelope, Handshake, Link};
use super::proc::ProcHandle;
use super::spawn::{WorkerCommand, spawn_worker};
use crate::error::{Result, TrafficError};
use crate::job::{Job, JobPayload, JobResult};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

/// How long a worker gets to exit on its own before it is killed, when the
/// pool is torn down without a clean `stop()`.
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker processes to spawn.
    pub worker_count: usize,
    /// How each worker process is launched.
    pub command: WorkerCommand,
    /// How long every worker has to acquire its session and report ready.
    pub startup_timeout: Duration,
}

impl WorkerPoolConfig {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            worker_count: Self::default_worker_count(),
            command,
            startup_timeout: Duration::from_secs(60),
        }
    }

    /// Two workers per CPU: sessions spend most of their time waiting on the
    /// browser, not computing.
    pub fn default_worker_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(4)
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

/// A fixed-size pool of persistent worker processes.
pub struct WorkerPool {
    worker_count: usize,
    job_tx: Sender<Envelope>,
    result_rx: Receiver<JobResult>,
    handles: Vec<ProcHandle>,
    completed: Vec<Arc<AtomicUsize>>,
    /// Link threads; emptied by `stop()`.
    links: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl WorkerPool {
    /// Spawn all workers and wait until every one of them holds a session.
    ///
    /// If any worker fails to start, the workers already running are shut
    /// down and the failure is returned. The pool never runs short-handed.
    #[instrument(level = "debug", skip(config), fields(workers = config.worker_count))]
    pub fn start(config: WorkerPoolConfig) -> Result<Self> {
        let worker_count = config.worker_count;
        if worker_count == 0 {
            return Err(TrafficError::Worker(
                "Worker pool needs at least one worker".into(),
            ));
        }

        info!(
            workers = worker_count,
            program = %config.command.program.display(),
            "Starting worker pool"
        );

        let (job_tx, job_rx) = unbounded::<Envelope>();
        let (result_tx, result_rx) = unbounded::<JobResult>();
        let (ready_tx, ready_rx) = unbounded::<Handshake>();

        let mut handles = Vec::with_capacity(worker_count);
        let mut completed = Vec::with_capacity(worker_count);
        let mut links = Vec::with_capacity(worker_count);

        for id in 0..worker_count {
            let proc = match spawn_worker(&config.command, id) {
                Ok(proc) => proc,
                Err(e) => {
                    abort_startup(job_tx, &handles, links, &vec![false; handles.len()]);
                    return Err(e);
                }
            };

            let (handle, writer, reader) = proc.into_parts();
            let counter = Arc::new(AtomicUsize::new(0));
            let link = Link::new(
                handle.clone(),
                writer,
                reader,
                job_rx.clone(),
                job_tx.clone(),
                result_tx.clone(),
                counter.clone(),
            );
            handles.push(handle);
            completed.push(counter);

            match link.spawn(ready_tx.clone()) {
                Ok(thread) => links.push(thread),
                Err(e) => {
                    // The new process has no link; it must be killed with the rest
                    abort_startup(job_tx, &handles, links, &vec![false; handles.len()]);
                    return Err(e);
                }
            }
        }

        // Only link threads may hold result senders, so the channel
        // disconnects once every link is gone.
        drop(result_tx);
        drop(ready_tx);
        drop(job_rx);

        let mut ready = vec![false; worker_count];
        let mut pending = worker_count;
        let deadline = Instant::now() + config.startup_timeout;

        while pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match ready_rx.recv_timeout(remaining) {
                Ok((id, Ok(()))) => {
                    ready[id] = true;
                    pending -= 1;
                }
                Ok((id, Err(e))) => {
                    error!(worker_id = id, error = %e, "Worker failed to start");
                    abort_startup(job_tx, &handles, links, &ready);
                    return Err(e);
                }
                Err(RecvTimeoutError::Timeout) => {
                    let worker = ready.iter().position(|r| !r).unwrap_or(0);
                    abort_startup(job_tx, &handles, links, &ready);
                    return Err(TrafficError::StartupTimeout {
                        worker,
                        secs: config.startup_timeout.as_secs(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    abort_startup(job_tx, &handles, links, &ready);
                    return Err(TrafficError::Worker(
                        "Worker links exited before reporting ready".into(),
                    ));
                }
            }
        }

        info!(workers = worker_count, "All workers ready");

        Ok(Self {
            worker_count,
            job_tx,
            result_rx,
            handles,
            completed,
            links: Mutex::new(links),
            stopped: AtomicBool::new(false),
        })
    }

    /// Get the configured number of workers.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Queue a job. Never blocks.
    pub fn dispatch(&self, index: usize, payload: JobPayload) -> Result<()> {
        self.dispatch_job(Job::new(0, index, payload))
    }

    /// Queue a job carrying an explicit batch tag. Never blocks.
    pub fn dispatch_job(&self, job: Job) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(TrafficError::PoolStopped);
        }
        trace!(batch = job.batch, index = job.index, "Dispatching job");
        self.job_tx
            .send(Envelope::Job(job))
            .map_err(|_| TrafficError::PoolStopped)
    }

    /// Take the next completed result, blocking until one arrives.
    ///
    /// Results come out in completion order. Fails only once no worker is
    /// left that could ever produce another result.
    pub fn get_result(&self) -> Result<JobResult> {
        self.result_rx.recv().map_err(|_| self.disconnected())
    }

    /// Like [`get_result`](Self::get_result), but gives up after `timeout`
    /// and returns `None`.
    pub fn get_result_timeout(&self, timeout: Duration) -> Result<Option<JobResult>> {
        match self.result_rx.recv_timeout(timeout) {
            Ok(result) => Ok(Some(result)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(self.disconnected()),
        }
    }

    fn disconnected(&self) -> TrafficError {
        if self.stopped.load(Ordering::Acquire) {
            TrafficError::PoolStopped
        } else {
            TrafficError::Worker("All worker processes have exited".into())
        }
    }

    /// Send one stop sentinel per worker and wait for every process to exit.
    ///
    /// In-flight jobs finish first; nothing is preempted. Calling `stop()`
    /// again is a no-op.
    pub fn stop(&self) {
        let links = std::mem::take(
            &mut *self
                .links
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        if links.is_empty() {
            return;
        }

        self.stopped.store(true, Ordering::Release);
        info!(workers = self.worker_count, "Stopping worker pool");

        for _ in 0..self.worker_count {
            // Receivers live as long as their link threads; a send can only
            // fail when every link is already gone.
            let _ = self.job_tx.send(Envelope::Stop);
        }

        for link in links {
            if link.join().is_err() {
                warn!("Worker link thread panicked");
            }
        }

        for handle in &self.handles {
            let reason = handle.wait();
            debug!(worker_id = handle.worker_id(), reason = %reason, "Worker reaped");
        }

        info!("Worker pool stopped");
    }

    /// OS process ids of the workers, by worker id.
    pub fn worker_pids(&self) -> Vec<u32> {
        self.handles.iter().map(|h| h.pid()).collect()
    }

    /// Snapshot liveness and queue depths without touching pool state.
    pub fn health(&self) -> PoolHealth {
        let workers_alive = self.handles.iter().filter(|h| h.is_running()).count();
        PoolHealth {
            workers_expected: self.worker_count,
            workers_alive,
            job_queue_size: self.job_tx.len(),
            result_queue_size: self.result_rx.len(),
            jobs_completed: self.stats().total_jobs_completed,
            status: PoolStatus::classify(workers_alive, self.worker_count),
        }
    }

    /// Per-worker job counters.
    pub fn stats(&self) -> WorkerPoolStats {
        let per_worker: Vec<usize> = self
            .completed
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect();
        WorkerPoolStats {
            worker_count: self.worker_count,
            total_jobs_completed: per_worker.iter().sum(),
            jobs_per_worker: per_worker,
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let links = std::mem::take(
            self.links
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        if links.is_empty() {
            return;
        }

        warn!("Worker pool dropped without stop(), terminating workers");
        self.stopped.store(true, Ordering::Release);
        // Links hold job senders of their own, so idle links need a sentinel
        for _ in 0..self.worker_count {
            let _ = self.job_tx.send(Envelope::Stop);
        }
        for handle in &self.handles {
            handle.terminate_and_reap(TEARDOWN_GRACE);
        }
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolStats {
    pub worker_count: usize,
    pub total_jobs_completed: usize,
    pub jobs_per_worker: Vec<usize>,
}

/// Tear down a partially started pool.
///
/// Every link gets a stop sentinel, so ready workers release their session
/// and exit. Workers still in INIT are killed.
fn abort_startup(
    job_tx: Sender<Envelope>,
    handles: &[ProcHandle],
    links: Vec<JoinHandle<()>>,
    ready: &[bool],
) {
    // Links hold job senders themselves; the channel never disconnects here
    for _ in 0..links.len() {
        let _ = job_tx.send(Envelope::Stop);
    }
    drop(job_tx);

    for (handle, is_ready) in handles.iter().zip(ready.iter().chain(std::iter::repeat(&false))) {
        if !is_ready {
            handle.terminate_and_reap(Duration::from_millis(100));
        }
    }

    for link in links {
        let _ = link.join();
    }

    for handle in handles {
        if handle.wait_timeout(TEARDOWN_GRACE).is_none() {
            handle.terminate_and_reap(Duration::from_millis(100));
        }
    }
}
