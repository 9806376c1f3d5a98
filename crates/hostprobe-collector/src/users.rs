use crate::Collector;
use anyhow::{Context, Result};
use hostprobe_common::types::{MetricName, Sample};
use serde_json::{json, Value};
use std::process::Command;

/// Reports the currently logged-in sessions as listed by `who`.
pub struct UserActivityCollector;

impl UserActivityCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for UserActivityCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses lines like `alice pts/0 2024-05-01 12:00 (10.0.0.7)`.
pub(crate) fn parse_who(output: &str) -> Vec<Value> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let user = fields.next()?;
            let terminal = fields.next()?;
            let rest: Vec<&str> = fields.collect();

            let (host, time_fields) = match rest.last() {
                Some(last) if last.starts_with('(') && last.ends_with(')') => (
                    Some(last.trim_start_matches('(').trim_end_matches(')')),
                    &rest[..rest.len() - 1],
                ),
                _ => (None, &rest[..]),
            };

            Some(json!({
                "user": user,
                "terminal": terminal,
                "host": host,
                "login_time": time_fields.join(" "),
            }))
        })
        .collect()
}

impl Collector for UserActivityCollector {
    fn name(&self) -> &str {
        "user_activity"
    }

    fn collect(&mut self) -> Result<Vec<Sample>> {
        let output = Command::new("who").output().context("failed to run who")?;
        if !output.status.success() {
            anyhow::bail!("who exited with {}", output.status);
        }
        let sessions = parse_who(&String::from_utf8_lossy(&output.stdout));
        Ok(vec![Sample::system(
            MetricName::UserActivity,
            Value::Array(sessions),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_remote_and_local_sessions() {
        let output = "alice    pts/0        2024-05-01 12:00 (10.0.0.7)\n\
                      bob      tty1         2024-05-01 08:15\n";
        let sessions = parse_who(output);
        assert_eq!(sessions.len(), 2);

        assert_eq!(sessions[0]["user"], "alice");
        assert_eq!(sessions[0]["terminal"], "pts/0");
        assert_eq!(sessions[0]["host"], "10.0.0.7");
        assert_eq!(sessions[0]["login_time"], "2024-05-01 12:00");

        assert_eq!(sessions[1]["user"], "bob");
        assert!(sessions[1]["host"].is_null());
        assert_eq!(sessions[1]["login_time"], "2024-05-01 08:15");
    }

    #[test]
    fn ignores_blank_lines() {
        assert!(parse_who("\n\n").is_empty());
    }
}
