//! Persistence of configuration pushed by the API.
//!
//! The pushed JSON object is merged key by key over the local YAML document,
//! so settings the API does not send (credentials, log paths) survive. The
//! merged document must still validate before it replaces the file.

use crate::config::AgentConfig;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use hostprobe_sender::ConfigSink;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct YamlConfigSink {
    path: PathBuf,
}

impl YamlConfigSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigSink for YamlConfigSink {
    fn persist(&self, document: &[u8], updated_at: DateTime<Utc>) -> Result<()> {
        let pushed: serde_json::Value =
            serde_json::from_slice(document).context("remote configuration is not JSON")?;
        let current = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;

        let merged = merge(&current, &pushed, updated_at)?;
        let yaml = serde_yaml::to_string(&merged)?;
        AgentConfig::from_yaml(&yaml).context("remote configuration is invalid")?;

        write_atomic(&self.path, yaml.as_bytes())?;
        tracing::info!(path = %self.path.display(), updated_at = %updated_at, "Remote configuration saved");
        Ok(())
    }
}

fn merge(current: &str, pushed: &serde_json::Value, updated_at: DateTime<Utc>) -> Result<Value> {
    let serde_json::Value::Object(pushed) = pushed else {
        bail!("remote configuration must be a JSON object");
    };

    let mut root = match serde_yaml::from_str::<Value>(current)? {
        Value::Mapping(map) => map,
        Value::Null => Mapping::new(),
        _ => bail!("local configuration is not a mapping"),
    };
    for (key, value) in pushed {
        root.insert(Value::String(key.clone()), serde_yaml::to_value(value)?);
    }
    root.insert(
        Value::String("config_last_update".to_string()),
        Value::String(updated_at.to_rfc3339()),
    );
    Ok(Value::Mapping(root))
}

/// Writes through a sibling temp file so readers never see a partial file.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, contents).with_context(|| format!("failed to write {}", tmp.display()))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("failed to replace {}", path.display()));
    }
    Ok(())
}
