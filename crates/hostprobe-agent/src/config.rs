//! YAML configuration of the agent.
//!
//! Every field except the sender credentials has a default, so a minimal file
//! only needs the `api` section. The same document is rewritten in place
//! when the API pushes a newer configuration (see [`crate::remote`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostprobe/config.yaml";

/// Default batch send interval (60 seconds).
pub const DEFAULT_SEND_INTERVAL_SECS: u64 = 60;

/// Default capacity of the collector -> batcher channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Length in bytes of an AES-256 key.
const ENCRYPTION_KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Where batches go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    #[default]
    Api,
    LogFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub sender: SenderKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<LogFileConfig>,

    #[serde(default = "default_send_interval_secs")]
    pub send_interval_secs: u64,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Version of the last configuration pushed by the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_last_update: Option<DateTime<Utc>>,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub collectors: CollectorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Ingest base URL; the project id is appended as the last path segment.
    pub base_url: String,
    pub project_id: String,
    /// Machine name reported with each batch (default: host name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    pub token: String,
    /// Exactly 32 bytes. Payloads are sent in the clear when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFileConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Base level, overridden by `RUST_LOG` when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also write logs to this file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Schedule shared by every collector section.
#[derive(Debug, Clone, Serialize)]
pub struct Schedule {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Schedule {
    fn new(enabled: bool, interval_secs: u64) -> Self {
        Self {
            enabled,
            interval_secs,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceCollectorConfig {
    #[serde(flatten)]
    pub schedule: Schedule,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginFailuresConfig {
    #[serde(flatten)]
    pub schedule: Schedule,
    pub auth_log: PathBuf,
}

/// Per-collector settings. A section given only in part keeps the defaults
/// of [`CollectorsConfig::default`] for the keys it omits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "CollectorsFile")]
pub struct CollectorsConfig {
    pub cpu: Schedule,
    pub ram: Schedule,
    pub disk: Schedule,
    pub service: ServiceCollectorConfig,
    pub user_activity: Schedule,
    pub login_failures: LoginFailuresConfig,
    pub port: Schedule,
    pub system_info: Schedule,
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            cpu: Schedule::new(true, 10),
            ram: Schedule::new(true, 10),
            disk: Schedule::new(true, 60),
            service: ServiceCollectorConfig {
                schedule: Schedule::new(false, 30),
                services: Vec::new(),
            },
            user_activity: Schedule::new(false, 60),
            login_failures: LoginFailuresConfig {
                schedule: Schedule::new(false, 60),
                auth_log: default_auth_log(),
            },
            port: Schedule::new(false, 60),
            system_info: Schedule::new(true, 3600),
        }
    }
}

impl CollectorsConfig {
    /// Every collector section with its name, enabled or not.
    pub fn schedules(&self) -> [(&'static str, &Schedule); 8] {
        [
            ("cpu", &self.cpu),
            ("ram", &self.ram),
            ("disk", &self.disk),
            ("service", &self.service.schedule),
            ("user_activity", &self.user_activity),
            ("login_failures", &self.login_failures.schedule),
            ("port", &self.port),
            ("system_info", &self.system_info),
        ]
    }
}

/// `collectors` as written in the file, every key optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CollectorsFile {
    cpu: ScheduleFile,
    ram: ScheduleFile,
    disk: ScheduleFile,
    service: ServiceFile,
    user_activity: ScheduleFile,
    login_failures: LoginFailuresFile,
    port: ScheduleFile,
    system_info: ScheduleFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScheduleFile {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
}

impl ScheduleFile {
    fn apply(self, schedule: &mut Schedule) {
        if let Some(enabled) = self.enabled {
            schedule.enabled = enabled;
        }
        if let Some(secs) = self.interval_secs {
            schedule.interval_secs = secs;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServiceFile {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    services: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoginFailuresFile {
    enabled: Option<bool>,
    interval_secs: Option<u64>,
    auth_log: Option<PathBuf>,
}

impl From<CollectorsFile> for CollectorsConfig {
    fn from(file: CollectorsFile) -> Self {
        let mut config = Self::default();
        file.cpu.apply(&mut config.cpu);
        file.ram.apply(&mut config.ram);
        file.disk.apply(&mut config.disk);
        file.user_activity.apply(&mut config.user_activity);
        file.port.apply(&mut config.port);
        file.system_info.apply(&mut config.system_info);

        let ServiceFile {
            enabled,
            interval_secs,
            services,
        } = file.service;
        ScheduleFile {
            enabled,
            interval_secs,
        }
        .apply(&mut config.service.schedule);
        if let Some(services) = services {
            config.service.services = services;
        }

        let LoginFailuresFile {
            enabled,
            interval_secs,
            auth_log,
        } = file.login_failures;
        ScheduleFile {
            enabled,
            interval_secs,
        }
        .apply(&mut config.login_failures.schedule);
        if let Some(auth_log) = auth_log {
            config.login_failures.auth_log = auth_log;
        }
        config
    }
}

fn default_send_interval_secs() -> u64 {
    DEFAULT_SEND_INTERVAL_SECS
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_auth_log() -> PathBuf {
    PathBuf::from("/var/log/auth.log")
}

impl AgentConfig {
    /// Reads, parses and validates the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.sender {
            SenderKind::Api => {
                let api = self.api.as_ref().ok_or_else(|| {
                    ConfigError::ValidationError("sender 'api' requires an 'api' section".into())
                })?;
                api.validate()?;
            }
            SenderKind::LogFile => {
                let path_set = self
                    .log_file
                    .as_ref()
                    .is_some_and(|f| !f.path.as_os_str().is_empty());
                if !path_set {
                    return Err(ConfigError::ValidationError(
                        "sender 'log_file' requires 'log_file.path'".into(),
                    ));
                }
            }
        }

        if self.send_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "send_interval_secs must be greater than 0".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel_capacity must be greater than 0".into(),
            ));
        }

        let mut enabled = 0;
        for (name, schedule) in self.collectors.schedules() {
            if !schedule.enabled {
                continue;
            }
            if schedule.interval_secs == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "collector '{name}': interval_secs must be greater than 0"
                )));
            }
            enabled += 1;
        }
        if enabled == 0 {
            return Err(ConfigError::ValidationError(
                "at least one collector must be enabled".into(),
            ));
        }

        Ok(())
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_secs(self.send_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl ApiConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("api.base_url", &self.base_url),
            ("api.project_id", &self.project_id),
            ("api.token", &self.token),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!("{field} cannot be empty")));
            }
        }
        if let Some(key) = &self.encryption_key {
            if key.len() != ENCRYPTION_KEY_LEN {
                return Err(ConfigError::ValidationError(format!(
                    "api.encryption_key must be {ENCRYPTION_KEY_LEN} bytes, got {}",
                    key.len()
                )));
            }
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "api.timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
