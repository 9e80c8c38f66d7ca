//! Process handle for worker subprocesses.
//!
//! A spawned worker is split into two halves: the IPC pipes, owned by the
//! worker's relay thread, and a cloneable [`ProcHandle`] used for liveness
//! checks, reaping and termination from any thread.

use super::ipc::{LineReader, LineWriter};
use super::signals::{TerminationReason, analyze_exit_status};
use crate::error::{Result, TrafficError};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::process::{Child, ChildStdin, ChildStdout};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// How often blocking waits re-check the process.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Freshly spawned worker process with its pipes still attached.
pub struct Proc {
    handle: ProcHandle,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl Proc {
    /// Take ownership of a spawned child. Its stdin and stdout must be piped.
    pub fn from_child(worker_id: usize, mut child: Child) -> Result<Self> {
        let stdin = child.stdin.take().ok_or_else(|| {
            TrafficError::Worker(format!("Worker {} stdin not captured", worker_id))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TrafficError::Worker(format!("Worker {} stdout not captured", worker_id))
        })?;

        Ok(Self {
            handle: ProcHandle::new(worker_id, child),
            stdin,
            stdout,
        })
    }

    pub fn handle(&self) -> &ProcHandle {
        &self.handle
    }

    /// Split into the shared handle and the framed IPC ends.
    pub fn into_parts(self) -> (ProcHandle, LineWriter<ChildStdin>, LineReader<ChildStdout>) {
        (
            self.handle,
            LineWriter::new(self.stdin),
            LineReader::new(self.stdout),
        )
    }
}

/// Shared, thread-safe handle to a worker's OS process.
///
/// `std::process::Child` caches the exit status once reaped, so every clone
/// sees the same answer regardless of which thread reaped the process.
#[derive(Clone)]
pub struct ProcHandle {
    worker_id: usize,
    pid: Pid,
    child: Arc<Mutex<Child>>,
}

impl ProcHandle {
    fn new(worker_id: usize, child: Child) -> Self {
        Self {
            worker_id,
            pid: Pid::from_raw(child.id() as i32),
            child: Arc::new(Mutex::new(child)),
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    fn lock(&self) -> MutexGuard<'_, Child> {
        // A panic while holding the lock cannot leave Child inconsistent
        self.child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Non-blocking check whether the process has exited.
    ///
    /// Returns `None` while the process is still running.
    pub fn try_wait(&self) -> Option<TerminationReason> {
        match self.lock().try_wait() {
            Ok(None) => None,
            Ok(Some(status)) => Some(analyze_exit_status(status)),
            Err(_) => Some(TerminationReason::Unknown),
        }
    }

    /// Whether the OS still reports the process as running.
    pub fn is_running(&self) -> bool {
        self.try_wait().is_none()
    }

    /// Block until the process exits.
    ///
    /// Polls instead of holding the lock in `waitpid`, so health checks stay
    /// responsive while a worker is shutting down.
    pub fn wait(&self) -> TerminationReason {
        loop {
            if let Some(reason) = self.try_wait() {
                return reason;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Wait up to `timeout` for the process to exit.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TerminationReason> {
        let start = Instant::now();
        loop {
            if let Some(reason) = self.try_wait() {
                return Some(reason);
            }
            if start.elapsed() >= timeout {
                return None;
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Send SIGTERM to the process.
    pub fn terminate(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGTERM).map_err(|e| {
            TrafficError::Worker(format!(
                "Failed to send SIGTERM to worker {}: {}",
                self.worker_id, e
            ))
        })
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL and reap.
    ///
    /// Only used when tearing down a pool that was never stopped cleanly.
    pub fn terminate_and_reap(&self, grace: Duration) -> TerminationReason {
        let _ = self.terminate();
        if let Some(reason) = self.wait_timeout(grace) {
            return reason;
        }

        let mut child = self.lock();
        let _ = child.kill();
        match child.wait() {
            Ok(status) => analyze_exit_status(status),
            Err(_) => TerminationReason::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};

    fn spawn(program: &str, args: &[&str]) -> Proc {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("Failed to spawn test process");
        Proc::from_child(0, child).expect("Failed to create Proc")
    }

    #[test]
    fn test_closing_stdin_lets_cat_exit() {
        let proc = spawn("cat", &[]);
        let (handle, writer, reader) = proc.into_parts();
        assert!(handle.is_running());

        drop(writer);
        drop(reader);
        let reason = handle.wait();
        assert!(reason.is_clean());
        assert!(!handle.is_running());
    }

    #[test]
    fn test_terminate_and_reap() {
        let proc = spawn("sleep", &["60"]);
        let handle = proc.handle().clone();
        assert!(handle.is_running());

        let reason = handle.terminate_and_reap(Duration::from_secs(2));
        assert_eq!(reason, TerminationReason::Signaled(Signal::SIGTERM));
        assert!(!handle.is_running());
    }

    #[test]
    fn test_clones_share_exit_status() {
        let proc = spawn("true", &[]);
        let a = proc.handle().clone();
        let b = proc.handle().clone();

        assert!(a.wait().is_clean());
        assert_eq!(b.try_wait(), Some(TerminationReason::Exited(0)));
    }

    #[test]
    fn test_wait_timeout_expires_for_running_process() {
        let proc = spawn("sleep", &["60"]);
        let handle = proc.handle().clone();
        assert_eq!(handle.wait_timeout(Duration::from_millis(50)), None);
        handle.terminate_and_reap(Duration::from_secs(2));
    }
}
