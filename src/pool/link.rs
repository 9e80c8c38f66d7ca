//! Parent-side relay between the shared channels and one worker process.
//!
//! Every worker process gets a dedicated link thread. The link pulls the next
//! envelope from the shared job channel, forwards it over the worker's stdin,
//! blocks for the reply on its stdout and pushes the result onto the shared
//! result channel. Because a link only pulls a job once its worker has
//! answered the previous one, a worker never holds more than one job, and an
//! idle worker picks up the next queued job first.
//!
//! A link whose worker has exited stops pulling jobs. A job it already took
//! but could not hand over goes back on the job channel for a live worker.

use super::ipc::{LineReader, LineWriter};
use super::proc::ProcHandle;
use super::protocol::{WorkRequest, WorkResponse};
use super::signals::TerminationReason;
use crate::error::{Result, TrafficError};
use crate::job::{Job, JobResult};
use crossbeam_channel::{Receiver, Sender};
use std::process::{ChildStdin, ChildStdout};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long to wait for a dying worker's exit status before logging it.
const DEATH_REAP_GRACE: Duration = Duration::from_secs(1);

/// Message on the shared job channel.
#[derive(Debug)]
pub(crate) enum Envelope {
    Job(Job),
    /// Stop sentinel; exactly one is consumed per live worker.
    Stop,
}

/// Startup report sent by each link once its worker is ready or has failed.
pub(crate) type Handshake = (usize, Result<()>);

pub(crate) struct Link {
    worker_id: usize,
    handle: ProcHandle,
    writer: LineWriter<ChildStdin>,
    reader: LineReader<ChildStdout>,
    jobs: Receiver<Envelope>,
    /// Puts back jobs that never reached the worker.
    requeue: Sender<Envelope>,
    results: Sender<JobResult>,
    completed: Arc<AtomicUsize>,
}

impl Link {
    pub(crate) fn new(
        handle: ProcHandle,
        writer: LineWriter<ChildStdin>,
        reader: LineReader<ChildStdout>,
        jobs: Receiver<Envelope>,
        requeue: Sender<Envelope>,
        results: Sender<JobResult>,
        completed: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            worker_id: handle.worker_id(),
            handle,
            writer,
            reader,
            jobs,
            requeue,
            results,
            completed,
        }
    }

    /// Run the link on its own named thread.
    pub(crate) fn spawn(self, ready: Sender<Handshake>) -> Result<JoinHandle<()>> {
        let worker_id = self.worker_id;
        std::thread::Builder::new()
            .name(format!("worker-link-{}", worker_id))
            .spawn(move || self.run(ready))
            .map_err(|e| {
                TrafficError::Worker(format!(
                    "Failed to spawn link thread for worker {}: {}",
                    worker_id, e
                ))
            })
    }

    fn run(mut self, ready: Sender<Handshake>) {
        let handshake = self.handshake();
        let failed = handshake.is_err();
        // The pool may already have given up on startup; nobody to tell then.
        let _ = ready.send((self.worker_id, handshake));
        drop(ready);

        if !failed {
            self.serve();
        }
    }

    /// Wait for the worker to finish INIT.
    fn handshake(&mut self) -> Result<()> {
        match self.reader.recv::<WorkResponse>() {
            Ok(Some(WorkResponse::Ready)) => {
                debug!(worker_id = self.worker_id, pid = self.handle.pid(), "Worker ready");
                Ok(())
            }
            Ok(Some(WorkResponse::StartupFailed { message })) => {
                let reason = self.reap_after_death();
                debug!(worker_id = self.worker_id, reason = %reason, "Worker exited after startup failure");
                Err(TrafficError::SessionAcquisition {
                    worker: self.worker_id,
                    message,
                })
            }
            Ok(Some(other)) => Err(TrafficError::Worker(format!(
                "Worker {} sent unexpected response instead of Ready: {:?}",
                self.worker_id, other
            ))),
            Ok(None) => {
                let reason = self.reap_after_death();
                Err(TrafficError::Worker(format!(
                    "Worker {} closed connection before Ready ({})",
                    self.worker_id, reason
                )))
            }
            Err(e) => Err(TrafficError::Worker(format!(
                "Worker {} handshake failed: {}",
                self.worker_id, e
            ))),
        }
    }

    fn serve(mut self) {
        loop {
            if !self.handle.is_running() {
                self.log_idle_death();
                return;
            }

            let envelope = match self.jobs.recv() {
                Ok(envelope) => envelope,
                Err(_) => {
                    debug!(worker_id = self.worker_id, "Job channel closed");
                    return;
                }
            };

            match envelope {
                Envelope::Stop => {
                    self.shutdown();
                    return;
                }
                Envelope::Job(job) => {
                    // The worker may have died while this link sat in recv()
                    if !self.handle.is_running() {
                        self.requeue(job);
                        self.log_idle_death();
                        return;
                    }
                    if !self.relay(job) {
                        return;
                    }
                }
            }
        }
    }

    /// Forward one job and push its result. Returns `false` once the link
    /// can no longer serve jobs.
    fn relay(&mut self, job: Job) -> bool {
        let (batch, index) = (job.batch, job.index);

        let request = WorkRequest::Job(job);
        if let Err(e) = self.writer.send(&request) {
            // Nothing reached the worker, so another one can run the job
            if let WorkRequest::Job(job) = request {
                self.requeue(job);
            }
            let reason = self.reap_after_death();
            error!(
                worker_id = self.worker_id,
                pid = self.handle.pid(),
                reason = %reason,
                error = %e,
                "Worker unreachable, no longer taking jobs"
            );
            return false;
        }

        match self.reader.recv::<WorkResponse>() {
            Ok(Some(WorkResponse::Result(result))) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                if self.results.send(result).is_err() {
                    debug!(worker_id = self.worker_id, "Result channel closed");
                    return false;
                }
                true
            }
            Ok(Some(other)) => {
                warn!(
                    worker_id = self.worker_id,
                    response = ?other,
                    "Worker sent unexpected response instead of a result, terminating it"
                );
                self.handle.terminate_and_reap(DEATH_REAP_GRACE);
                self.log_death(batch, index, "protocol violation");
                false
            }
            Ok(None) => {
                self.log_death(batch, index, "worker closed its pipe");
                false
            }
            Err(e) => {
                self.log_death(batch, index, &format!("reading result failed: {}", e));
                false
            }
        }
    }

    /// Hand a job that never reached this link's worker to another worker.
    fn requeue(&self, job: Job) {
        let (batch, index) = (job.batch, job.index);
        match self.requeue.send(Envelope::Job(job)) {
            Ok(()) => warn!(
                worker_id = self.worker_id,
                batch,
                index,
                "Requeued job taken for a dead worker"
            ),
            Err(_) => error!(
                worker_id = self.worker_id,
                batch,
                index,
                "Job channel closed, job taken for a dead worker is lost"
            ),
        }
    }

    fn log_idle_death(&self) {
        let reason = self.reap_after_death();
        error!(
            worker_id = self.worker_id,
            pid = self.handle.pid(),
            reason = %reason,
            "Worker exited while idle, no longer taking jobs"
        );
    }

    fn reap_after_death(&self) -> TerminationReason {
        self.handle
            .wait_timeout(DEATH_REAP_GRACE)
            .unwrap_or(TerminationReason::StillAlive)
    }

    /// The in-flight job's result will never arrive. Nothing is synthesized
    /// for it: callers waiting on that index need a result timeout.
    fn log_death(&self, batch: u64, index: usize, context: &str) {
        let reason = self.reap_after_death();
        error!(
            worker_id = self.worker_id,
            pid = self.handle.pid(),
            batch,
            index,
            reason = %reason,
            context,
            "Worker died with a job in flight"
        );
    }

    /// Forward the stop sentinel and wait for the process to exit.
    fn shutdown(self) {
        let Self {
            worker_id,
            handle,
            mut writer,
            ..
        } = self;

        if let Err(e) = writer.send(&WorkRequest::Exit) {
            warn!(worker_id, error = %e, "Failed to send exit request");
        }
        // Closing stdin doubles as the sentinel for a worker that missed the message
        drop(writer);

        let reason = handle.wait();
        if reason.is_clean() {
            info!(worker_id, "Worker stopped");
        } else {
            warn!(worker_id, reason = %reason, "Worker stopped uncleanly");
        }
    }
}
