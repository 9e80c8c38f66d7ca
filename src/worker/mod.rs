//! Worker process side of the pool.
//!
//! This module runs when `trafficd worker` is invoked by the pool. The worker
//! acquires one browser session, then serves jobs from stdin until it sees a
//! stop sentinel or its stdin closes.
//!
//! ```text
//! INIT ──► READY ──► RUN ──┐
//!   │        ▲ │           │
//!   │        └─┼───────────┘
//!   ▼          ▼
//! (exit 2)  SHUTDOWN ──► (exit 0)
//! ```

pub mod session;
pub mod simulated;

use crate::error::{Result, TrafficError};
use crate::job::{Job, JobPayload, JobResult, Outcome};
use crate::pool::{LineReader, LineWriter, WorkRequest, WorkResponse, worker_id_from_env};
use session::{Analyzer, SessionGuard, SessionProvider};
use simulated::{SimulatedAnalyzer, SimulatedConfig, SimulatedProvider};
use std::io::{Read, Write};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

/// Exit code of a worker whose session could not be acquired.
pub const EXIT_STARTUP_FAILED: i32 = 2;

/// Where the worker is in its lifecycle.
#[derive(Debug)]
enum WorkerState {
    /// Waiting for the next request.
    Ready,
    /// Executing one job.
    Run(Job),
    /// Stop sentinel or EOF seen.
    Shutdown,
}

/// One worker's loop over a session it owns for its whole life.
pub struct WorkerLoop<P, A> {
    worker_id: usize,
    provider: P,
    analyzer: A,
}

impl<P, A> WorkerLoop<P, A>
where
    P: SessionProvider,
    A: Analyzer<Session = P::Session>,
{
    pub fn new(worker_id: usize, provider: P, analyzer: A) -> Self {
        Self {
            worker_id,
            provider,
            analyzer,
        }
    }

    /// Run INIT, then serve requests until shutdown.
    ///
    /// Returns the number of jobs served. A session acquisition failure is
    /// reported to the parent as `startup_failed` before it is returned.
    pub fn run<R: Read, W: Write>(
        mut self,
        reader: &mut LineReader<R>,
        writer: &mut LineWriter<W>,
    ) -> Result<usize> {
        let worker_id = self.worker_id;

        // INIT
        let session = match self.provider.acquire() {
            Ok(session) => session,
            Err(e) => {
                let message = format!("{:#}", e);
                error!(worker_id, error = %message, "Failed to initialize browser resources");
                writer.send(&WorkResponse::startup_failed(message.clone()))?;
                return Err(TrafficError::SessionAcquisition {
                    worker: worker_id,
                    message,
                });
            }
        };
        let mut guard = SessionGuard::new(&mut self.provider, session, worker_id);
        writer.send(&WorkResponse::Ready)?;
        info!(worker_id, "Worker ready");

        let mut served = 0;
        let mut state = WorkerState::Ready;
        loop {
            state = match state {
                WorkerState::Ready => match reader.recv::<WorkRequest>()? {
                    Some(WorkRequest::Job(job)) => WorkerState::Run(job),
                    Some(WorkRequest::Exit) => WorkerState::Shutdown,
                    None => {
                        debug!(worker_id, "Stdin closed, shutting down");
                        WorkerState::Shutdown
                    }
                },
                WorkerState::Run(job) => {
                    let outcome = execute(&self.analyzer, guard.session_mut(), &job.payload);
                    if let Outcome::Failure { message, .. } = &outcome {
                        warn!(worker_id, batch = job.batch, index = job.index, error = %message, "Job failed");
                    } else {
                        debug!(worker_id, batch = job.batch, index = job.index, "Job completed");
                    }
                    let result = JobResult::new(job.batch, job.index, worker_id, outcome);
                    writer.send(&WorkResponse::Result(result))?;
                    served += 1;
                    WorkerState::Ready
                }
                WorkerState::Shutdown => {
                    guard.release();
                    info!(worker_id, jobs_served = served, "Worker stopped");
                    return Ok(served);
                }
            };
        }
    }
}

/// Run the analysis with every failure, panics included, turned into an
/// outcome.
fn execute<A: Analyzer>(analyzer: &A, session: &mut A::Session, payload: &JobPayload) -> Outcome {
    match panic::catch_unwind(AssertUnwindSafe(|| analyzer.analyze(session, payload))) {
        Ok(Ok(value)) => Outcome::success(value),
        Ok(Err(e)) => Outcome::failure_with_trace(format!("{:#}", e), format!("{:?}", e)),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            Outcome::failure(format!("analysis panicked: {}", message))
        }
    }
}

/// Entry point of the `worker` subcommand. Returns the process exit code.
pub fn run_worker_main(config: SimulatedConfig) -> i32 {
    // A dead parent shows up as a write error, not a signal
    unsafe {
        nix::sys::signal::signal(
            nix::sys::signal::Signal::SIGPIPE,
            nix::sys::signal::SigHandler::SigIgn,
        )
        .ok();
    }

    let worker_id = worker_id_from_env();
    let _span = tracing::info_span!("worker", worker_id).entered();
    let mut reader = LineReader::new(std::io::stdin().lock());
    let mut writer = LineWriter::new(std::io::stdout().lock());

    let worker = WorkerLoop::new(
        worker_id,
        SimulatedProvider::new(config.clone()),
        SimulatedAnalyzer::new(&config),
    );

    match worker.run(&mut reader, &mut writer) {
        Ok(_) => 0,
        Err(TrafficError::SessionAcquisition { .. }) => EXIT_STARTUP_FAILED,
        Err(e) => {
            error!(worker_id, error = %e, "Worker exiting on error");
            1
        }
    }
}
