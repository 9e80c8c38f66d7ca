//! trafficd - parallel traffic scoring over a worker pool

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cli::{Cli, Commands, PoolArgs};
use trafficd::correlator::{Correlator, MAX_BATCH_SIZE};
use trafficd::error::TrafficError;
use trafficd::logging::{self, LogConfig};
use trafficd::pool::{WorkerCommand, WorkerPool, WorkerPoolConfig};
use trafficd::server::types::{LocationRequest, MultiLocationRequest};
use trafficd::server::{AppState, ServerConfig, run_server};
use trafficd::sink::DiscardSink;
use trafficd::worker::run_worker_main;

/// Program entry point: parses CLI arguments, dispatches the selected command, and handles top-level errors.
///
/// On error it prints a colored error header followed by each cause in the error
/// chain, then exits with status code 1.
fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }

    let result = match &cli.command {
        Commands::Serve(args) => cmd_serve(&cli, args),
        Commands::Run(args) => cmd_run(&cli, args),
        Commands::Worker(args) => {
            init_logging(&cli, LogConfig::for_worker());
            std::process::exit(run_worker_main(args.backend.to_config()));
        }
        Commands::Completions(args) => {
            args.generate();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        // Print the error chain if there are causes
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// Install the global subscriber from a preset, the CLI flags and the environment.
fn init_logging(cli: &Cli, preset: LogConfig) {
    let mut config = preset;
    if let Some(filter) = cli.log_filter() {
        config = config.with_filter(filter);
    }
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    if let Some(path) = &cli.log_file {
        config = config.with_file(path.clone());
    }
    if cli.no_color {
        config = config.with_ansi(false);
    }
    logging::init(config.with_env_overrides());
}

/// Start a pool of `trafficd worker` processes.
///
/// Workers inherit the parent's environment; the logging flags given on the
/// command line are forwarded as environment variables so that both sides
/// log the same way.
fn start_pool(cli: &Cli, args: &PoolArgs) -> Result<WorkerPool> {
    let mut command = WorkerCommand::current_exe()?.args(args.backend.worker_args());

    if let Some(filter) = cli.log_filter() {
        command = command.env("TRAFFICD_LOG", filter);
    }
    if let Some(format) = cli.log_format {
        command = command.env("TRAFFICD_LOG_FORMAT", format.to_string());
    }
    if cli.no_color {
        command = command.env("NO_COLOR", "1");
    }

    let config = WorkerPoolConfig::new(command)
        .with_workers(args.workers)
        .with_startup_timeout(Duration::from_secs(args.startup_timeout));

    WorkerPool::start(config).context("Failed to start worker pool")
}

fn cmd_serve(cli: &Cli, args: &cli::ServeArgs) -> Result<()> {
    init_logging(cli, LogConfig::for_server());

    let config = ServerConfig {
        host: args.host.clone(),
        port: args.port,
        cors: args.cors,
        cors_origins: args.cors_origins.clone(),
    };

    let pool = Arc::new(start_pool(cli, &args.pool)?);
    let state = AppState::new(pool.clone(), Arc::new(DiscardSink), args.pool.result_timeout())
        .with_static_dir(args.static_dir.clone());

    // Create tokio runtime and run the server
    let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    rt.block_on(run_server(config, pool, state))?;

    Ok(())
}

/// Input accepted by `trafficd run`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RunInput {
    List(Vec<LocationRequest>),
    Request(MultiLocationRequest),
}

fn read_locations(path: &Path) -> Result<Vec<LocationRequest>> {
    let mut raw = String::new();
    if path == Path::new("-") {
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read locations from stdin")?;
    } else {
        raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
    }

    let input: RunInput = serde_json::from_str(&raw)
        .context("Expected a JSON list of locations or {\"locations\": [...]}")?;
    Ok(match input {
        RunInput::List(locations) => locations,
        RunInput::Request(request) => request.locations,
    })
}

fn cmd_run(cli: &Cli, args: &cli::RunArgs) -> Result<()> {
    init_logging(cli, LogConfig::for_server());

    let locations = read_locations(&args.input)?;
    if locations.is_empty() {
        return Err(TrafficError::EmptyBatch.into());
    }
    if locations.len() > MAX_BATCH_SIZE {
        return Err(TrafficError::BatchTooLarge {
            count: locations.len(),
            max: MAX_BATCH_SIZE,
        }
        .into());
    }

    let payloads = locations
        .into_iter()
        .map(|location| location.into_payload(args.save_to_static, None))
        .collect();

    let pool = Arc::new(start_pool(cli, &args.pool)?);
    let correlator = Correlator::new(pool.clone()).with_result_timeout(args.pool.result_timeout());
    let report = correlator.run_batch(payloads);
    pool.stop();
    let report = report?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
