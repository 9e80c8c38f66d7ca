//! Termination analysis for worker processes.
//!
//! Used when a worker disappears so the log says *why*: a clean exit after its
//! stop sentinel, a startup failure exit code, or death by signal mid-job.

use nix::sys::signal::Signal;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by a signal other than the ones below.
    Signaled(Signal),
    /// SIGKILL, usually the OOM killer when a browser balloons.
    Killed,
    /// SIGSEGV or SIGBUS.
    Crashed(Signal),
    /// Process is still running.
    StillAlive,
    /// Status could not be determined.
    Unknown,
}

impl TerminationReason {
    /// Whether the worker went away on its own terms.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("killed by signal {:?}", sig),
            Self::Killed => "killed by SIGKILL (possibly out of memory)".to_string(),
            Self::Crashed(sig) => format!("crashed ({:?})", sig),
            Self::StillAlive => "still running".to_string(),
            Self::Unknown => "unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Classify a reaped process's exit status.
pub fn analyze_exit_status(status: ExitStatus) -> TerminationReason {
    if let Some(code) = status.code() {
        return TerminationReason::Exited(code);
    }

    match status.signal().map(Signal::try_from) {
        Some(Ok(Signal::SIGKILL)) => TerminationReason::Killed,
        Some(Ok(sig @ (Signal::SIGSEGV | Signal::SIGBUS))) => TerminationReason::Crashed(sig),
        Some(Ok(sig)) => TerminationReason::Signaled(sig),
        _ => TerminationReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Raw wait statuses: exit code in the high byte, signal number in the low bits.
    fn exited(code: i32) -> ExitStatus {
        ExitStatus::from_raw(code << 8)
    }

    fn signaled(sig: Signal) -> ExitStatus {
        ExitStatus::from_raw(sig as i32)
    }

    #[test]
    fn test_clean_exit() {
        let reason = analyze_exit_status(exited(0));
        assert_eq!(reason, TerminationReason::Exited(0));
        assert!(reason.is_clean());
    }

    #[test]
    fn test_startup_failure_exit_code() {
        let reason = analyze_exit_status(exited(2));
        assert_eq!(reason, TerminationReason::Exited(2));
        assert!(!reason.is_clean());
        assert_eq!(reason.to_string(), "exited with code 2");
    }

    #[test]
    fn test_signals() {
        assert_eq!(
            analyze_exit_status(signaled(Signal::SIGKILL)),
            TerminationReason::Killed
        );
        assert_eq!(
            analyze_exit_status(signaled(Signal::SIGSEGV)),
            TerminationReason::Crashed(Signal::SIGSEGV)
        );
        assert_eq!(
            analyze_exit_status(signaled(Signal::SIGTERM)),
            TerminationReason::Signaled(Signal::SIGTERM)
        );
    }
}
