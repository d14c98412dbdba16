/// Phase-time reader for the incremental agent's timing logs.
///
/// Each line is `<event-name>@<nanosecond-timestamp>`, for example
///   select:beg@1000
///   select:end@2500001000
///   test:org.demo.FooTest:beg@...
/// An `X:end` paired with an earlier `X:beg` adds `(end - beg) / 1e9`
/// seconds to `X`. `select` is analysis, every `test:*` event is test
/// execution plus coverage collection, `report` is report generation.
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::model::PhaseTimes;

static EVENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<event>.+)@(?P<ns>\d+)$").unwrap());

/// Accumulates event durations across one or more log files.
#[derive(Debug, Default)]
pub struct PhaseLog {
    last_seen: HashMap<String, u64>,
    durations: HashMap<String, f64>,
}

impl PhaseLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the lines of one log file.
    pub fn feed(&mut self, content: &str) {
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some(caps) = EVENT_RE.captures(line) else {
                warn!("Ignoring malformed timing event '{}'", line);
                continue;
            };
            let event = &caps["event"];
            let Ok(ns) = caps["ns"].parse::<u64>() else {
                warn!("Ignoring out-of-range timestamp in '{}'", line);
                continue;
            };
            self.last_seen.insert(event.to_string(), ns);

            if let Some(base) = event.strip_suffix(":end") {
                if let Some(&beg) = self.last_seen.get(&format!("{base}:beg")) {
                    *self.durations.entry(base.to_string()).or_insert(0.0) +=
                        (ns as f64 - beg as f64) / 1e9;
                }
            }
        }
    }

    /// Seconds accumulated for one base event name.
    pub fn seconds(&self, base: &str) -> f64 {
        self.durations.get(base).copied().unwrap_or(0.0)
    }

    pub fn phases(&self) -> PhaseTimes {
        PhaseTimes {
            analysis: self.seconds("select"),
            execution_collection: self
                .durations
                .iter()
                .filter(|(event, _)| event.starts_with("test:"))
                .map(|(_, secs)| secs)
                .sum(),
            report: self.seconds("report"),
        }
    }
}

/// Read every `*.log` file in `dir`, in file-name order. A missing
/// directory gives all-zero phases.
pub fn read_phase_times(dir: &Path) -> PhaseTimes {
    let mut files: Vec<_> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("log"))
            .collect(),
        Err(_) => {
            warn!("No timing logs found in {}", dir.display());
            return PhaseTimes::default();
        }
    };
    files.sort();

    let mut log = PhaseLog::new();
    for path in files {
        match std::fs::read_to_string(&path) {
            Ok(content) => log.feed(&content),
            Err(e) => warn!("Skipping timing log {}: {}", path.display(), e),
        }
    }
    log.phases()
}
