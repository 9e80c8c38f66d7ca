//! Logging setup shared by the server, the one-shot runner and worker
//! processes.
//!
//! Everything is written to stderr: a worker's stdout carries the pool
//! protocol, and workers inherit the parent's stderr, so all processes end up
//! in one stream.
//!
//! # Environment Variables
//!
//! - `TRAFFICD_LOG` - Log filter (overrides RUST_LOG)
//! - `TRAFFICD_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `TRAFFICD_LOG_FORMAT` - Output format: pretty, compact, json
//! - `TRAFFICD_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! Workers inherit the parent's environment, so they pick up the same
//! settings.
//!
//! # Example
//!
//! ```no_run
//! use trafficd::logging::{LogConfig, init};
//!
//! init(LogConfig::for_server().with_env_overrides());
//! ```

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human-readable output.
    #[default]
    Pretty,
    /// Single-line output.
    Compact,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Daily-rotated log file written next to stderr output.
    pub file_path: Option<PathBuf>,
    /// Log span timing on close.
    pub span_events: bool,
    /// Filter directive; overrides `level` when set.
    pub filter: Option<String>,
    pub show_target: bool,
    pub show_thread_ids: bool,
    /// Colour stderr output.
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            file_path: None,
            span_events: false,
            filter: None,
            show_target: true,
            show_thread_ids: false,
            ansi: std::io::stderr().is_terminal(),
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for `serve` and `run`: INFO, pretty, with thread IDs so that
    /// link threads can be told apart.
    pub fn for_server() -> Self {
        Self {
            show_thread_ids: true,
            ..Self::default()
        }
    }

    /// Preset for worker processes: one compact line per event, interleaving
    /// cleanly with the parent's output.
    pub fn for_worker() -> Self {
        Self {
            format: LogFormat::Compact,
            show_target: false,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// Apply environment variable overrides.
    ///
    /// A filter already set from the command line wins over `TRAFFICD_LOG`,
    /// `RUST_LOG` and `TRAFFICD_LOG_LEVEL`.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            self.filter = std::env::var("TRAFFICD_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .ok();
        }

        if self.filter.is_none()
            && let Ok(level) = std::env::var("TRAFFICD_LOG_LEVEL")
        {
            self.level = parse_level(&level).unwrap_or(self.level);
        }

        if let Ok(format) = std::env::var("TRAFFICD_LOG_FORMAT")
            && let Ok(format) = format.parse()
        {
            self.format = format;
        }

        if let Ok(path) = std::env::var("TRAFFICD_LOG_FILE") {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    fn build_filter(&self) -> EnvFilter {
        let default = || EnvFilter::new(format!("{}", self.level).to_lowercase());
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                default()
            }),
            None => default(),
        }
    }

    fn file_appender(&self) -> Option<RollingFileAppender> {
        let path = self.file_path.as_ref()?;
        let dir = path.parent().unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("trafficd.log");
        Some(RollingFileAppender::new(Rotation::DAILY, dir, file_name))
    }
}

/// Parse a log level string.
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

type FilteredRegistry = Layered<EnvFilter, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

fn fmt_layer<W>(config: &LogConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let span_events = if config.span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_span_events(span_events)
        .with_target(config.show_target)
        .with_ansi(ansi)
        .with_writer(writer);

    match config.format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer
            .compact()
            .with_thread_ids(config.show_thread_ids)
            .boxed(),
        LogFormat::Pretty => layer.with_thread_ids(config.show_thread_ids).boxed(),
    }
}

/// Install the global subscriber: stderr, plus the log file when one is
/// configured. Calling it again is a no-op.
pub fn init(config: LogConfig) {
    let mut layers = vec![fmt_layer(&config, std::io::stderr, config.ansi)];
    if let Some(appender) = config.file_appender() {
        layers.push(fmt_layer(&config, appender, false));
    }

    let _ = tracing_subscriber::registry()
        .with(config.build_filter())
        .with(layers)
        .try_init();
}
