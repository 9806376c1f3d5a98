//! Restart on configuration file changes.
//!
//! The watcher observes the file's directory rather than the file itself, so
//! editors and the remote-config writer that replace the file by rename are
//! still seen.

use anyhow::{Context, Result};
use hostprobe_sender::restart::{RestartReason, RestartSignal};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Posts [`RestartReason::ConfigFileChanged`] while alive.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    pub fn start(config_path: &Path, signal: RestartSignal) -> Result<Self> {
        let file_name = config_path
            .file_name()
            .map(OsString::from)
            .with_context(|| format!("{} has no file name", config_path.display()))?;
        let dir = watch_dir(config_path);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_config_change(&event, &file_name) {
                    tracing::debug!(paths = ?event.paths, "Config file changed");
                    signal.notify(RestartReason::ConfigFileChanged);
                }
            }
            Err(e) => tracing::error!(error = %e, "Config watcher error"),
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", dir.display()))?;
        tracing::info!(dir = %dir.display(), "Watching for config changes");

        Ok(Self { _watcher: watcher })
    }
}

fn watch_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn is_config_change(event: &Event, file_name: &OsString) -> bool {
    (event.kind.is_modify() || event.kind.is_create())
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}
