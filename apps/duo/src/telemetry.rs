use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// How chatty the `duo::*` targets are. Dependencies stay at `info` or
/// quieter unless `DUO_TRACE_DEPS` is set.
#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("cannot open log file {path:?}: {source}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Subscriber(#[from] SetGlobalDefaultError),
}

// webrtc and the websocket stack log every packet at debug.
const QUIET_DEPS: &[&str] = &["webrtc", "tokio_tungstenite", "tungstenite"];

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Installs the global subscriber. Logs go to stderr unless a file is given,
/// so they never interleave with the chat transcript on stdout.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let directives = std::env::var("DUO_LOG_FILTER").unwrap_or_else(|_| {
        let deps_verbose = std::env::var("DUO_TRACE_DEPS").is_ok_and(|value| value == "1");
        directives_for(config.level, deps_verbose)
    });

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::LogFile {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_target(config.level >= LogLevel::Debug)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = GUARD.set(guard);
    Ok(())
}

/// Every event in this workspace is emitted under a `duo::` target, so the
/// chosen level applies there and everything else is capped at `info`.
fn directives_for(level: LogLevel, deps_verbose: bool) -> String {
    if level <= LogLevel::Info {
        return level.directive().to_string();
    }
    let mut directives = format!("info,duo={}", level.directive());
    if deps_verbose {
        for dep in QUIET_DEPS {
            directives.push_str(&format!(",{dep}={}", level.directive()));
        }
    }
    directives
}
