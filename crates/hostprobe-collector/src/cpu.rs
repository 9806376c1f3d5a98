use crate::Collector;
use anyhow::Result;
use hostprobe_common::types::{MetricName, Sample};
use sysinfo::System;

pub struct CpuCollector {
    system: System,
}

impl CpuCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        // Usage is a delta between two refreshes; prime the first one.
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn collect(&mut self) -> Result<Vec<Sample>> {
        self.system.refresh_cpu_all();
        let usage = f64::from(self.system.global_cpu_usage());
        Ok(vec![Sample::system(MetricName::Cpu, usage)])
    }
}
