use crate::config::LogConfig;
use anyhow::Result;
use std::ffi::OsStr;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::EnvFilter;

/// Keeps the background file writer alive. Drop it last.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Installs the global subscriber: stdout, plus `log.file` when configured.
///
/// `RUST_LOG` takes precedence over `log.level`.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuard> {
    let (writer, file_guard) = build_writer(config)?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_writer(writer)
        .with_ansi(file_guard.is_none())
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    if std::env::var_os("RUST_LOG").is_some() {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return filter;
        }
    }
    EnvFilter::new(&config.level)
}

fn build_writer(config: &LogConfig) -> Result<(BoxMakeWriter, Option<WorkerGuard>)> {
    let Some(path) = config.file.as_ref() else {
        return Ok((BoxMakeWriter::new(std::io::stdout), None));
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let file_name = path
        .file_name()
        .unwrap_or_else(|| OsStr::new("hostprobe-agent.log"));

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let writer = BoxMakeWriter::new(BoxMakeWriter::new(std::io::stdout).and(non_blocking));
    Ok((writer, Some(guard)))
}
