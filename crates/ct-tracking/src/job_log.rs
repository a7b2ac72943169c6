//! HTCondor job (user) log scanning for resource usage

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::tracker::Metrics;

struct Patterns {
    run_time: Regex,
    remote_usage: Regex,
    memory: Regex,
    disk: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        run_time: Regex::new(r"(?is)Job terminated.*?run time.*?(\d+):(\d+):(\d+)")
            .expect("valid regex"),
        remote_usage: Regex::new(r"(?s)Job terminated.*?Usr (\d+) (\d+):(\d+):(\d+)")
            .expect("valid regex"),
        memory: Regex::new(r"Memory \(MB\)\s*:\s*(\d+)").expect("valid regex"),
        disk: Regex::new(r"Disk \(KB\)\s*:\s*(\d+)").expect("valid regex"),
    })
}

fn capture_u64(caps: &regex::Captures<'_>, idx: usize) -> u64 {
    caps.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Extract `runtime_seconds`, `memory_mb` and `disk_kb` from a job log
///
/// Only metrics present in the log are returned; a log of a job that has
/// not terminated usually yields none.
pub fn parse_job_log(text: &str) -> Metrics {
    let p = patterns();
    let mut metrics = Metrics::new();

    let runtime = if let Some(caps) = p.run_time.captures(text) {
        Some(capture_u64(&caps, 1) * 3600 + capture_u64(&caps, 2) * 60 + capture_u64(&caps, 3))
    } else {
        // "Usr D HH:MM:SS" remote usage line in the termination event
        p.remote_usage.captures(text).map(|caps| {
            capture_u64(&caps, 1) * 86_400
                + capture_u64(&caps, 2) * 3600
                + capture_u64(&caps, 3) * 60
                + capture_u64(&caps, 4)
        })
    };
    if let Some(seconds) = runtime {
        metrics.insert("runtime_seconds".to_string(), Value::from(seconds));
    }

    if let Some(caps) = p.memory.captures(text) {
        metrics.insert("memory_mb".to_string(), Value::from(capture_u64(&caps, 1)));
    }
    if let Some(caps) = p.disk.captures(text) {
        metrics.insert("disk_kb".to_string(), Value::from(capture_u64(&caps, 1)));
    }

    metrics
}
