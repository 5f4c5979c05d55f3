//! Bounded telemetry series

use std::collections::{BTreeMap, VecDeque};

/// Maximum samples kept per series
pub const MAX_SAMPLES: usize = 100;

/// A bounded, arrival-ordered numeric series
#[derive(Debug, Clone)]
pub struct TelemetrySeries {
    samples: VecDeque<f64>,
    max_samples: usize,
}

impl Default for TelemetrySeries {
    fn default() -> Self {
        Self::with_capacity(MAX_SAMPLES)
    }
}

impl TelemetrySeries {
    /// Create a series with a custom cap
    pub fn with_capacity(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Add a sample, evicting the oldest when full
    pub fn push(&mut self, value: f64) {
        self.samples.push_back(value);
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Samples, oldest first
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    /// Latest value
    pub fn last(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// Get min/max values
    pub fn range(&self) -> Option<(f64, f64)> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().fold((f64::MAX, f64::MIN), |(min, max), &v| {
            (min.min(v), max.max(v))
        }))
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// No samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// All series keyed by label
#[derive(Debug, Clone, Default)]
pub struct TelemetryStore {
    series: BTreeMap<String, TelemetrySeries>,
}

impl TelemetryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan decoded text and feed every extracted sample.
    /// Returns how many samples were recorded.
    pub fn ingest(&mut self, text: &str) -> usize {
        let samples = super::parser::scan(text);
        let count = samples.len();
        for (key, value) in samples {
            self.record(&key, value);
        }
        count
    }

    /// Append one sample to a series
    pub fn record(&mut self, key: &str, value: f64) {
        self.series.entry(key.to_string()).or_default().push(value);
    }

    /// Series by key
    pub fn get(&self, key: &str) -> Option<&TelemetrySeries> {
        self.series.get(key)
    }

    /// Copy of every series as plain vectors
    pub fn snapshot(&self) -> BTreeMap<String, Vec<f64>> {
        self.series
            .iter()
            .map(|(key, series)| (key.clone(), series.values()))
            .collect()
    }

    /// Series keys in order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Drop every series
    pub fn clear(&mut self) {
        self.series.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_keeps_last_100() {
        let mut store = TelemetryStore::new();
        for i in 0..150 {
            store.record("temp", f64::from(i));
        }
        let series = store.get("temp").unwrap();
        assert_eq!(series.len(), 100);
        let expected: Vec<f64> = (50..150).map(f64::from).collect();
        assert_eq!(series.values(), expected);
    }

    #[test]
    fn test_ingest_line() {
        let mut store = TelemetryStore::new();
        assert_eq!(store.ingest("temp:25.3,humi:60\n"), 2);
        let snapshot = store.snapshot();
        assert_eq!(snapshot["temp"], vec![25.3]);
        assert_eq!(snapshot["humi"], vec![60.0]);
    }

    #[test]
    fn test_series_range() {
        let mut series = TelemetrySeries::default();
        series.push(10.0);
        series.push(50.0);
        series.push(30.0);
        assert_eq!(series.range(), Some((10.0, 50.0)));
        assert_eq!(series.last(), Some(30.0));
    }
}
