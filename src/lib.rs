//! # Serial Studio Core Library
//!
//! A live serial session pipeline:
//! - Owns one byte-oriented hardware connection at a time
//! - Decodes the stream as text (UTF-8/GBK), hex, decimal or RGB swatches
//! - Coalesces decoded output into timestamped, highlighted log entries
//! - Extracts `key:value` telemetry for charting
//! - Drives macros, polling timers and pattern-triggered auto-replies
//!
//! ## Example
//!
//! ```rust,no_run
//! use serial_studio_core::{JsonFileStore, SerialOptions, SessionConfig, SessionController, SessionEvent, TriggerManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let rules = TriggerManager::load(Arc::new(JsonFileStore::open_default()?))?;
//!     let session = SessionController::new(SessionConfig::default(), Arc::new(rules));
//!     session.connect_port("COM3", &SerialOptions::new(115200)).await?;
//!
//!     session.send_line("AT", true, serial_studio_core::TxOrigin::User).await?;
//!
//!     let mut rx = session.subscribe();
//!     while let Ok(event) = rx.recv().await {
//!         if let SessionEvent::EntryCreated(entry) = event {
//!             println!("{}", entry.to_text(true));
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, EventPrinter, ExitCodes, OutputFormat};
pub use crate::config::{AppConfig, ConfigStore, JsonFileStore, MemoryStore, StoreError};
pub use crate::core::chart::TelemetryStore;
pub use crate::core::codec::{DisplayMode, EntryType, FrameDecoder, RgbRemainder, TextEncoding};
pub use crate::core::logger::{LogAggregator, LogEntry, TimestampMode};
pub use crate::core::macros::{Invocation, Macro, MacroScheduler, WriteSink};
pub use crate::core::session::{
    PayloadFormat, SessionConfig, SessionController, SessionEvent, SessionState, TxOrigin, WriteError,
};
pub use crate::core::simulator::DemoProducer;
pub use crate::core::transport::{
    ConnectionError, MemoryDevice, MemoryTransport, SerialOptions, SerialTransport, TransportTrait, TransportType,
};
pub use crate::core::trigger::{AutoReplyRule, HighlightRule, TriggerManager};
pub use crate::core::workspace::AutomationBundle;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
