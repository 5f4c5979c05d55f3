//! Telemetry token scanning
//!
//! Decoded text is scanned for `key:number` tokens such as `temp:25.3` or
//! `rssi:-71`. Scanning is stateless and never fails.

use regex::Regex;
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"([A-Za-z_]+):(-?[0-9]+(?:\.[0-9]+)?)").expect("telemetry pattern is valid")
    })
}

/// Extract every `key:number` pair in order of appearance
pub fn scan(text: &str) -> Vec<(String, f64)> {
    pattern()
        .captures_iter(text)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str();
            let value = caps.get(2)?.as_str().parse::<f64>().ok()?;
            Some((key.to_string(), value))
        })
        .collect()
}
