use crate::Collector;
use anyhow::Result;
use hostprobe_common::types::{MetricName, Sample};
use serde_json::json;
use sysinfo::System;

pub struct SystemInfoCollector {
    system: System,
}

impl SystemInfoCollector {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemInfoCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for SystemInfoCollector {
    fn name(&self) -> &str {
        "system_info"
    }

    fn collect(&mut self) -> Result<Vec<Sample>> {
        self.system.refresh_cpu_all();

        let value = json!({
            "host_name": System::host_name(),
            "os": System::name(),
            "os_version": System::os_version(),
            "kernel_version": System::kernel_version(),
            "arch": System::cpu_arch(),
            "cpu_count": self.system.cpus().len(),
            "uptime": System::uptime(),
            "boot_time": System::boot_time(),
        });

        Ok(vec![Sample::system(MetricName::SystemInfo, value)])
    }
}
