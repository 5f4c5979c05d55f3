//! Terminal rendering of session events

use crate::core::session::SessionEvent;
use clap::ValueEnum;
use std::io::{self, Write};

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable log lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Writes session events to a stream
pub struct EventPrinter<W: Write> {
    out: W,
    format: OutputFormat,
    timestamps: bool,
    line_open: bool,
}

impl<W: Write> EventPrinter<W> {
    /// Create a printer writing to `out`
    pub fn new(out: W, format: OutputFormat, timestamps: bool) -> Self {
        Self {
            out,
            format,
            timestamps,
            line_open: false,
        }
    }

    /// Render one event
    pub fn print(&mut self, event: &SessionEvent) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => self.print_text(event),
            OutputFormat::Json => self.print_json(event),
        }?;
        self.out.flush()
    }

    fn print_text(&mut self, event: &SessionEvent) -> io::Result<()> {
        match event {
            SessionEvent::EntryCreated(entry) => {
                self.close_line()?;
                let body = entry.content.trim_end_matches(&['\r', '\n'][..]);
                if self.timestamps {
                    write!(self.out, "[{}] ", entry.created_at)?;
                }
                write!(self.out, "{:<4} {body}", entry.entry_type.tag())?;
                self.line_open = true;
                if entry.finalized || entry.is_hex_mode {
                    self.close_line()?;
                }
            }
            SessionEvent::EntryExtended { text, finalized, .. } => {
                write!(self.out, "{}", text.trim_end_matches(&['\r', '\n'][..]))?;
                if *finalized {
                    self.close_line()?;
                }
            }
            SessionEvent::StateChanged(state) => {
                tracing::debug!(?state, "session state");
            }
            SessionEvent::TelemetryUpdated(_) | SessionEvent::AutoReplied(_) => {}
            SessionEvent::Error(message) => {
                self.close_line()?;
                writeln!(self.out, "error: {message}")?;
            }
        }
        Ok(())
    }

    fn print_json(&mut self, event: &SessionEvent) -> io::Result<()> {
        let value = match event {
            SessionEvent::EntryCreated(entry) => serde_json::json!({ "entry": entry }),
            SessionEvent::EntryExtended { id, text, finalized } => {
                serde_json::json!({ "append": { "id": id, "text": text, "finalized": finalized } })
            }
            SessionEvent::StateChanged(state) => serde_json::json!({ "state": format!("{state:?}") }),
            SessionEvent::TelemetryUpdated(samples) => serde_json::json!({ "telemetry": samples }),
            SessionEvent::AutoReplied(reply) => serde_json::json!({ "autoReply": reply }),
            SessionEvent::Error(message) => serde_json::json!({ "error": message }),
        };
        writeln!(self.out, "{value}")
    }

    fn close_line(&mut self) -> io::Result<()> {
        if self.line_open {
            writeln!(self.out)?;
            self.line_open = false;
        }
        Ok(())
    }

    /// Terminate any open line
    pub fn finish(&mut self) -> io::Result<()> {
        self.close_line()?;
        self.out.flush()
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.out
    }
}
