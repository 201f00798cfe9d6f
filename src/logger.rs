use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// An `EnvFilter` directive such as `info` or `kubecast=debug,warn`.
    pub level: String,
    /// Daily-rotated log file, in addition to stdout.
    pub file: Option<PathBuf>,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

/// Keeps the file writer flushing; drop it only at exit.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// The filter in effect: `RUST_LOG` when set, the configured level otherwise.
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directives) if !directives.trim().is_empty() => Ok(EnvFilter::try_new(directives)?),
        _ => EnvFilter::try_new(level).map_err(|err| anyhow!("invalid log level `{level}`: {err}")),
    }
}

fn file_appender(path: &Path) -> Result<RollingFileAppender> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("log file `{}` has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Ok(RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file_name.to_string_lossy())
        .build(dir)?)
}

/// Install the global subscriber: stdout (plain or JSON) plus an optional
/// plain-text rolling file.
pub fn init_tracing(config: &LogConfig) -> Result<LogGuard> {
    let filter = env_filter(&config.level)?;

    let (file_layer, guard) = match config.file.as_deref() {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(file_appender(path)?);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let json_layer = config.json.then(|| fmt::layer().json().with_target(true));
    let plain_layer = (!config.json).then(|| fmt::layer());

    Registry::default()
        .with(filter)
        .with(json_layer)
        .with(plain_layer)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!("tracing already initialised: {err}"))?;

    Ok(LogGuard { _file: guard })
}
