//! HTCondor submit-file scanning
//!
//! Only the handful of keys worth recording as run configuration are
//! extracted; everything else in the file is ignored.

use serde_json::Value;
use std::collections::BTreeMap;

/// Submit-file keys copied into the run configuration
pub const RESOURCE_KEYS: [&str; 5] = [
    "request_cpus",
    "request_memory",
    "request_disk",
    "executable",
    "universe",
];

/// Extract the resource keys from submit-file text
///
/// Keys match case-insensitively and are stored lower-case; values keep
/// their original text. Blank lines and `#` comments are skipped. A key
/// given twice keeps its last value, as `condor_submit` does.
pub fn parse_submit_resources(text: &str) -> BTreeMap<String, Value> {
    let mut resources = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        if RESOURCE_KEYS.contains(&key.as_str()) {
            resources.insert(key, Value::String(value.trim().to_string()));
        }
    }

    resources
}
