use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Top-level classification of a sample.
///
/// # Examples
///
/// ```
/// use hostprobe_common::types::Category;
///
/// assert_eq!(Category::System.to_string(), "system");
/// assert_eq!(serde_json::to_string(&Category::System).unwrap(), "\"system\"");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    System,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::System => "system",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a metric. The set is closed: every collector emits exactly one
/// of these names.
///
/// # Examples
///
/// ```
/// use hostprobe_common::types::MetricName;
///
/// let name: MetricName = "login_failures".parse().unwrap();
/// assert_eq!(name, MetricName::LoginFailures);
/// assert_eq!(name.to_string(), "login_failures");
/// assert!("load".parse::<MetricName>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    Cpu,
    Ram,
    Disk,
    Service,
    UserActivity,
    LoginFailures,
    Port,
    SystemInfo,
}

impl MetricName {
    pub const ALL: [MetricName; 8] = [
        MetricName::Cpu,
        MetricName::Ram,
        MetricName::Disk,
        MetricName::Service,
        MetricName::UserActivity,
        MetricName::LoginFailures,
        MetricName::Port,
        MetricName::SystemInfo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricName::Cpu => "cpu",
            MetricName::Ram => "ram",
            MetricName::Disk => "disk",
            MetricName::Service => "service",
            MetricName::UserActivity => "user_activity",
            MetricName::LoginFailures => "login_failures",
            MetricName::Port => "port",
            MetricName::SystemInfo => "system_info",
        }
    }
}

impl std::fmt::Display for MetricName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| format!("unknown metric name: {s}"))
    }
}

/// One timestamped observation produced by a collector.
///
/// Samples are immutable once built; senders only ever borrow them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub category: Category,
    pub name: MetricName,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Scalar, map or list depending on `name`.
    pub value: Value,
}

impl Sample {
    /// Builds a `system` sample stamped with the current time.
    pub fn system(name: MetricName, value: impl Into<Value>) -> Self {
        Self::system_at(Utc::now(), name, value)
    }

    pub fn system_at(timestamp: DateTime<Utc>, name: MetricName, value: impl Into<Value>) -> Self {
        Self {
            timestamp,
            category: Category::System,
            name,
            metadata: HashMap::new(),
            value: value.into(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
