//! Worker subprocess spawning.
//!
//! Workers are started with `std::process::Command` (posix_spawn under the
//! hood) rather than fork, so nothing from the parent's threads or runtime
//! leaks into a worker. By default a worker is this same executable running
//! the hidden `worker` subcommand.

use super::proc::Proc;
use crate::error::{Result, TrafficError};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Environment variable carrying the worker's pool slot to the child.
pub const WORKER_ID_ENV: &str = "TRAFFICD_WORKER_ID";

/// How to launch one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Executable to run.
    pub program: PathBuf,
    /// Arguments, including the subcommand that selects worker mode.
    pub args: Vec<OsString>,
    /// Extra environment on top of the inherited one.
    pub env: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// The running executable in `worker` mode.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| TrafficError::Worker(format!("Failed to get current executable: {}", e)))?;
        Ok(Self::new(exe).arg("worker"))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn to_command(&self, worker_id: usize) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.env.iter().map(|(k, v)| (k, v)));
        cmd.env(WORKER_ID_ENV, worker_id.to_string());

        // stdin/stdout carry the protocol; worker logs go to the parent's stderr
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::inherit());
        cmd
    }
}

/// Spawn the worker process for pool slot `worker_id`.
pub fn spawn_worker(command: &WorkerCommand, worker_id: usize) -> Result<Proc> {
    let child = command.to_command(worker_id).spawn().map_err(|e| {
        TrafficError::Worker(format!(
            "Failed to spawn worker {} ({}): {}",
            worker_id,
            command.program.display(),
            e
        ))
    })?;

    Proc::from_child(worker_id, child)
}

/// Read this process's pool slot, as set by [`spawn_worker`].
pub fn worker_id_from_env() -> usize {
    std::env::var(WORKER_ID_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}
