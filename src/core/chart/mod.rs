//! Telemetry extraction for live charting
//!
//! Decoded RX text is scanned for `key:number` tokens; each value is appended
//! to a bounded series keyed by its label.

mod data;
mod parser;

pub use data::{TelemetrySeries, TelemetryStore, MAX_SAMPLES};
pub use parser::scan;
