//! CLI Module
//!
//! Provides command-line interface functionality including:
//! - Exit codes for automation
//! - Rendering of session events to stdout

pub mod exit_codes;
pub mod render;

pub use exit_codes::{exit_code_description, print_exit_codes, CliResult, ExitCodes};
pub use render::{EventPrinter, OutputFormat};
