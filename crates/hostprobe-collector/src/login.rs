use crate::Collector;
use anyhow::{Context, Result};
use hostprobe_common::types::{MetricName, Sample};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;

const FAILURE_MARKERS: [&str; 3] = ["Failed password", "authentication failure", "Invalid user"];

/// Counts failed logins appended to the auth log since the previous poll.
///
/// The first poll only records the current end of the file. A file that
/// shrank since the last poll is treated as rotated and read from the start.
pub struct LoginFailureCollector {
    path: PathBuf,
    offset: Option<u64>,
}

impl LoginFailureCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: None,
        }
    }
}

fn is_failure(line: &str) -> bool {
    FAILURE_MARKERS.iter().any(|marker| line.contains(marker))
}

/// Extracts the token following `from`, e.g. `... from 10.0.0.7 port 22`.
fn source_of(line: &str) -> Option<&str> {
    let mut words = line.split_whitespace();
    while let Some(word) = words.next() {
        if word == "from" {
            return words.next();
        }
    }
    line.split_whitespace()
        .find_map(|w| w.strip_prefix("rhost="))
        .filter(|host| !host.is_empty())
}

impl Collector for LoginFailureCollector {
    fn name(&self) -> &str {
        "login_failures"
    }

    fn collect(&mut self) -> Result<Vec<Sample>> {
        let mut file = File::open(&self.path)
            .with_context(|| format!("failed to open auth log {}", self.path.display()))?;
        let len = file.metadata()?.len();

        let start = match self.offset {
            None => {
                self.offset = Some(len);
                return Ok(Vec::new());
            }
            Some(offset) if offset > len => 0,
            Some(offset) => offset,
        };

        file.seek(SeekFrom::Start(start))?;
        let mut reader = BufReader::new(file);
        let mut count = 0u64;
        let mut sources: BTreeMap<String, u64> = BTreeMap::new();
        let mut consumed = start;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf)?;
            if read == 0 || buf.last() != Some(&b'\n') {
                // Partial trailing line is picked up on the next poll.
                break;
            }
            consumed += read as u64;
            // Auth logs may carry non-UTF-8 usernames.
            let line = String::from_utf8_lossy(&buf);
            if is_failure(&line) {
                count += 1;
                if let Some(source) = source_of(&line) {
                    *sources.entry(source.to_string()).or_default() += 1;
                }
            }
        }
        self.offset = Some(consumed);

        let sample = Sample::system(
            MetricName::LoginFailures,
            json!({ "count": count, "sources": sources }),
        )
        .with_metadata("log", self.path.to_string_lossy());
        Ok(vec![sample])
    }
}
