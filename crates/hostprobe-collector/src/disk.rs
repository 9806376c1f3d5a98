use crate::{percent, Collector};
use anyhow::Result;
use chrono::Utc;
use hostprobe_common::types::{MetricName, Sample};
use serde_json::json;
use sysinfo::Disks;

pub struct DiskCollector {
    disks: Disks,
}

impl DiskCollector {
    pub fn new() -> Self {
        Self {
            disks: Disks::new_with_refreshed_list(),
        }
    }
}

impl Default for DiskCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for DiskCollector {
    fn name(&self) -> &str {
        "disk"
    }

    fn collect(&mut self) -> Result<Vec<Sample>> {
        self.disks.refresh_list();
        let now = Utc::now();
        let mut samples = Vec::new();

        for disk in self.disks.iter() {
            let total = disk.total_space();
            let available = disk.available_space();
            let used = total.saturating_sub(available);

            let value = json!({
                "total": total,
                "used": used,
                "available": available,
                "used_percent": percent(used, total),
            });

            samples.push(
                Sample::system_at(now, MetricName::Disk, value)
                    .with_metadata("mount", disk.mount_point().to_string_lossy())
                    .with_metadata("filesystem", disk.file_system().to_string_lossy()),
            );
        }

        Ok(samples)
    }
}
