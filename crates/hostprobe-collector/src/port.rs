use crate::Collector;
use anyhow::{Context, Result};
use hostprobe_common::types::{MetricName, Sample};
use serde_json::{json, Value};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

const TCP_LISTEN: &str = "0A";

/// Lists listening TCP sockets from the kernel socket tables.
pub struct PortCollector {
    tables: Vec<(&'static str, PathBuf)>,
}

impl PortCollector {
    pub fn new() -> Self {
        Self {
            tables: vec![
                ("tcp", PathBuf::from("/proc/net/tcp")),
                ("tcp6", PathBuf::from("/proc/net/tcp6")),
            ],
        }
    }
}

impl Default for PortCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_v4(hex: &str) -> Option<String> {
    let raw = u32::from_str_radix(hex, 16).ok()?;
    Some(Ipv4Addr::from(raw.to_le_bytes()).to_string())
}

fn decode_v6(hex: &str) -> Option<String> {
    if hex.len() != 32 {
        return None;
    }
    let mut bytes = [0u8; 16];
    for word in 0..4 {
        let raw = u32::from_str_radix(&hex[word * 8..word * 8 + 8], 16).ok()?;
        bytes[word * 4..word * 4 + 4].copy_from_slice(&raw.to_le_bytes());
    }
    Some(Ipv6Addr::from(bytes).to_string())
}

/// Parses one `/proc/net/tcp*` table and keeps sockets in LISTEN state.
pub(crate) fn parse_table(protocol: &str, content: &str) -> Vec<Value> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local = fields.get(1)?;
            let state = fields.get(3)?;
            if *state != TCP_LISTEN {
                return None;
            }
            let (addr_hex, port_hex) = local.split_once(':')?;
            let port = u16::from_str_radix(port_hex, 16).ok()?;
            let address = if protocol == "tcp6" {
                decode_v6(addr_hex)?
            } else {
                decode_v4(addr_hex)?
            };
            Some(json!({ "protocol": protocol, "address": address, "port": port }))
        })
        .collect()
}

impl Collector for PortCollector {
    fn name(&self) -> &str {
        "port"
    }

    fn collect(&mut self) -> Result<Vec<Sample>> {
        let mut listening = Vec::new();
        for (protocol, path) in &self.tables {
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            listening.extend(parse_table(protocol, &content));
        }
        if listening.is_empty() && !self.tables.iter().any(|(_, p)| p.exists()) {
            anyhow::bail!("no kernel socket table available on this platform");
        }
        Ok(vec![Sample::system(MetricName::Port, Value::Array(listening))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:0016 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 1234 1 0000000000000000 100 0 0 10 0
   1: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 1235 1 0000000000000000 100 0 0 10 0
   2: 0F02000A:0016 0102000A:C350 01 00000000:00000000 00:00000000 00000000     0        0 1236 1 0000000000000000 100 0 0 10 0
";

    const TCP6: &str = "  sl  local_address                         remote_address                        st
   0: 00000000000000000000000001000000:0050 00000000000000000000000000000000:0000 0A
";

    #[test]
    fn keeps_only_listening_ipv4_sockets() {
        let ports = parse_table("tcp", TCP);
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0]["address"], "0.0.0.0");
        assert_eq!(ports[0]["port"], 22);
        assert_eq!(ports[1]["address"], "127.0.0.1");
        assert_eq!(ports[1]["port"], 8080);
    }

    #[test]
    fn decodes_ipv6_loopback() {
        let ports = parse_table("tcp6", TCP6);
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0]["protocol"], "tcp6");
        assert_eq!(ports[0]["address"], "::1");
        assert_eq!(ports[0]["port"], 80);
    }
}
