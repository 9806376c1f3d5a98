use crate::{percent, Collector};
use anyhow::Result;
use hostprobe_common::types::{MetricName, Sample};
use serde_json::json;
use sysinfo::System;

pub struct MemoryCollector {
    system: System,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        "ram"
    }

    fn collect(&mut self) -> Result<Vec<Sample>> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let used = self.system.used_memory();

        let value = json!({
            "total": total,
            "used": used,
            "available": self.system.available_memory(),
            "used_percent": percent(used, total),
            "swap_total": self.system.total_swap(),
            "swap_used": self.system.used_swap(),
        });

        Ok(vec![Sample::system(MetricName::Ram, value)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_one_map_sample() {
        let samples = MemoryCollector::new().collect().unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name, MetricName::Ram);
        let value = &samples[0].value;
        for key in ["total", "used", "available", "used_percent", "swap_total", "swap_used"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        let pct = value["used_percent"].as_f64().unwrap();
        assert!((0.0..=100.0).contains(&pct));
    }
}
