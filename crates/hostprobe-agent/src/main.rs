mod config;
mod logging;
mod pipeline;
mod reload;
mod remote;

use anyhow::Result;
use config::{AgentConfig, DEFAULT_CONFIG_PATH};
use hostprobe_sender::restart::{restart_channel, RestartReason};
use pipeline::Pipeline;
use reload::ConfigWatcher;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::signal;

enum Event {
    Shutdown,
    Restart(RestartReason),
    Stopped(Result<()>),
}

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = match AgentConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            report_startup_error(&format!("{}: {e}", config_path.display()));
            return ExitCode::FAILURE;
        }
    };

    let _logging = match logging::init_logging(&config.log) {
        Ok(guard) => guard,
        Err(e) => {
            report_startup_error(&format!("{e:#}"));
            return ExitCode::FAILURE;
        }
    };

    match run(&config_path, &mut config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("hostprobe-agent stopped: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: &Path, config: &mut AgentConfig) -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "hostprobe-agent starting"
    );

    let (restart, mut restarts) = restart_channel();
    let _watcher = match ConfigWatcher::start(config_path, restart.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            tracing::warn!(error = %e, "Config hot reload disabled");
            None
        }
    };

    let mut loaded = snapshot(config_path);
    let mut pipeline = Pipeline::start(config, config_path, restart.clone())?;

    loop {
        let event = tokio::select! {
            _ = shutdown_signal() => Event::Shutdown,
            Some(reason) = restarts.recv() => Event::Restart(reason),
            result = pipeline.wait() => Event::Stopped(result),
        };

        match event {
            Event::Shutdown => {
                tracing::info!("Shutting down gracefully");
                return pipeline.shutdown().await;
            }
            Event::Stopped(result) => {
                result?;
                tracing::info!("All collectors finished");
                return pipeline.shutdown().await;
            }
            Event::Restart(reason) => {
                // Watch events can trail the write that a restart already
                // picked up, e.g. after a pushed config was persisted.
                if reason == RestartReason::ConfigFileChanged
                    && snapshot(config_path) == loaded
                {
                    tracing::debug!("Config file content unchanged, not restarting");
                    continue;
                }
                tracing::info!(?reason, "Restarting pipeline");
                pipeline.shutdown().await?;
                while restarts.try_recv().is_ok() {}

                loaded = snapshot(config_path);
                match loaded.as_deref().map(AgentConfig::from_yaml) {
                    Some(Ok(reloaded)) => *config = reloaded,
                    Some(Err(e)) => tracing::error!(error = %e, "Reload failed, keeping previous configuration"),
                    None => tracing::error!(
                        path = %config_path.display(),
                        "Config file unreadable, keeping previous configuration"
                    ),
                }
                pipeline = Pipeline::start(config, config_path, restart.clone())?;
            }
        }
    }
}

/// Current file contents, compared to skip watch events for writes that
/// were already loaded.
fn snapshot(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

/// Logging is not up yet when the config cannot be loaded.
#[allow(clippy::print_stderr)]
fn report_startup_error(message: &str) {
    eprintln!("hostprobe-agent: {message}");
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal as unix_signal, SignalKind};

    match unix_signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable");
            let _ = signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
