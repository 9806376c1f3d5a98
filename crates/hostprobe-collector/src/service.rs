use crate::Collector;
use anyhow::{Context, Result};
use chrono::Utc;
use hostprobe_common::types::{MetricName, Sample};
use serde_json::json;
use std::process::Command;

/// Reports the systemd unit state of each configured service.
pub struct ServiceCollector {
    services: Vec<String>,
}

impl ServiceCollector {
    pub fn new(services: Vec<String>) -> Self {
        Self { services }
    }
}

/// `systemctl is-active` prints the state even when it exits non-zero.
fn unit_state(service: &str) -> Result<String> {
    let output = Command::new("systemctl")
        .arg("is-active")
        .arg(service)
        .output()
        .context("failed to run systemctl")?;
    let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if state.is_empty() {
        Ok("unknown".to_string())
    } else {
        Ok(state)
    }
}

pub(crate) fn state_sample(service: &str, state: &str) -> Sample {
    Sample::system_at(
        Utc::now(),
        MetricName::Service,
        json!({ "active": state == "active", "state": state }),
    )
    .with_metadata("service", service)
}

impl Collector for ServiceCollector {
    fn name(&self) -> &str {
        "service"
    }

    fn collect(&mut self) -> Result<Vec<Sample>> {
        let mut samples = Vec::with_capacity(self.services.len());
        for service in &self.services {
            let state = unit_state(service)?;
            samples.push(state_sample(service, &state));
        }
        Ok(samples)
    }
}
