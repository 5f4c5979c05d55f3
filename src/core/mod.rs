//! Core module containing the session pipeline
//!
//! This module provides:
//! - Byte source adapters (serial ports, in-memory loopback)
//! - Frame decoding under text, hex, decimal and RGB display modes
//! - Coalesced, timestamped log entries with highlighting
//! - Telemetry extraction for charting
//! - Auto-reply and highlight rules
//! - One-shot and polling macros, plus a demo producer
//! - Session management with state machine
//! - Automation export/import

pub mod chart;
pub mod codec;
pub mod logger;
pub mod macros;
pub mod session;
pub mod simulator;
pub mod transport;
pub mod trigger;
pub mod workspace;
