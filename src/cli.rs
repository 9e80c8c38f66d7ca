//! Command-line interface definitions using clap.

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;
use trafficd::logging::LogFormat;
use trafficd::pool::WorkerPoolConfig;
use trafficd::worker::simulated::SimulatedConfig;

/// Parallel traffic scoring over a pool of persistent browser-session workers.
#[derive(Parser, Debug)]
#[command(name = "trafficd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all log output except errors.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format: pretty, compact or json.
    #[arg(long, env = "TRAFFICD_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Also write logs to this file (rotated daily).
    #[arg(long, env = "TRAFFICD_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP API backed by a worker pool.
    Serve(ServeArgs),

    /// Process one batch of locations from a JSON file and print the report.
    Run(RunArgs),

    /// Run as a pool worker process (internal).
    #[command(hide = true)]
    Worker(WorkerArgs),

    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Arguments for shell completions.
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate and print completions to stdout.
    pub fn generate(&self) {
        clap_complete::generate(
            self.shell,
            &mut Cli::command(),
            "trafficd",
            &mut std::io::stdout(),
        );
    }
}

/// Behaviour of the simulated browser backend. Passed through to every
/// worker process.
#[derive(Args, Debug, Clone, Default)]
pub struct BackendArgs {
    /// Milliseconds each worker takes to launch its browser.
    #[arg(long, env = "TRAFFICD_LAUNCH_DELAY_MS", default_value_t = 0)]
    pub launch_delay_ms: u64,

    /// Make every browser launch fail.
    #[arg(long, hide = true)]
    pub fail_launch: bool,

    /// Milliseconds each analysis takes.
    #[arg(long, env = "TRAFFICD_JOB_LATENCY_MS", default_value_t = 0)]
    pub job_latency_ms: u64,
}

impl BackendArgs {
    pub fn to_config(&self) -> SimulatedConfig {
        SimulatedConfig {
            launch_delay: Duration::from_millis(self.launch_delay_ms),
            fail_launch: self.fail_launch,
            job_latency: Duration::from_millis(self.job_latency_ms),
        }
    }

    /// The same settings as `worker` subcommand arguments.
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = vec![
            "--launch-delay-ms".to_string(),
            self.launch_delay_ms.to_string(),
            "--job-latency-ms".to_string(),
            self.job_latency_ms.to_string(),
        ];
        if self.fail_launch {
            args.push("--fail-launch".to_string());
        }
        args
    }
}

/// Worker pool options shared by `serve` and `run`.
#[derive(Args, Debug, Clone)]
pub struct PoolArgs {
    /// Number of worker processes (default: twice the CPU count).
    #[arg(short, long, env = "TRAFFICD_WORKERS", default_value_t = WorkerPoolConfig::default_worker_count())]
    pub workers: usize,

    /// Seconds every worker has to acquire its browser session.
    #[arg(long, env = "TRAFFICD_STARTUP_TIMEOUT", default_value_t = 60)]
    pub startup_timeout: u64,

    /// Give up on a batch's missing results after this many seconds without
    /// one arriving. Waits forever when unset.
    #[arg(
        long,
        env = "TRAFFICD_RESULT_TIMEOUT",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub result_timeout: Option<u64>,

    #[command(flatten)]
    pub backend: BackendArgs,
}

impl PoolArgs {
    pub fn result_timeout(&self) -> Option<Duration> {
        self.result_timeout.map(Duration::from_secs)
    }
}

/// Arguments for the serve command.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Host address to bind to.
    #[arg(long, env = "TRAFFICD_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, env = "TRAFFICD_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Enable CORS for all origins.
    #[arg(long)]
    pub cors: bool,

    /// Allowed CORS origins, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Directory saved captures go to, served under `/static`; health checks
    /// verify it is writable.
    #[arg(long, env = "TRAFFICD_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    #[command(flatten)]
    pub pool: PoolArgs,
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// JSON file with a list of locations (or `{"locations": [...]}`); `-` reads stdin.
    pub input: PathBuf,

    /// Ask the analysis to keep its captures.
    #[arg(long)]
    pub save_to_static: bool,

    #[command(flatten)]
    pub pool: PoolArgs,
}

/// Arguments for the internal worker mode.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub backend: BackendArgs,
}

impl Cli {
    /// Filter directive implied by `-q` / `-v`, if any.
    pub fn log_filter(&self) -> Option<String> {
        if self.quiet {
            return Some("error".to_string());
        }
        match self.verbose {
            0 => None,
            1 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        }
    }
}
