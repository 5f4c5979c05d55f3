//! Log aggregation
//!
//! Decoded units are coalesced into timestamped entries. Plain-text RX output
//! keeps growing the open entry until a line break arrives; every other unit
//! (TX, system notices, hex renderings) gets an entry of its own.

use crate::core::codec::{DecodedUnit, EntryType};
use crate::core::trigger::PatternEngine;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Maximum entries kept in memory
pub const MAX_ENTRIES: usize = 1000;

/// Timestamp label style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampMode {
    /// Wall clock (`14:03:27`)
    #[default]
    Absolute,
    /// Milliseconds since the previous entry was created (`+120ms`)
    Delta,
}

/// A single coalesced log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic entry id
    pub id: u64,
    /// Direction or origin
    pub entry_type: EntryType,
    /// Accumulated text
    pub content: String,
    /// Timestamp label fixed at creation
    pub created_at: String,
    /// Set once the content contains a line break
    pub finalized: bool,
    /// Rendered from bytes rather than decoded text
    pub is_hex_mode: bool,
    /// Produced by the demo producer
    pub simulated: bool,
    /// Classes of every matching highlight rule
    pub highlight_classes: BTreeSet<String>,
}

impl LogEntry {
    /// Format as text
    pub fn to_text(&self, show_timestamp: bool) -> String {
        let body = self.content.trim_end_matches(&['\r', '\n'][..]);
        if show_timestamp {
            format!("[{}] {} {}", self.created_at, self.entry_type.tag(), body)
        } else {
            format!("{} {}", self.entry_type.tag(), body)
        }
    }
}

/// What an append did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Entry that received the text
    pub id: u64,
    /// A new entry was created
    pub created: bool,
    /// The entry is finalized after this append
    pub finalized: bool,
}

/// Decide whether an incoming unit opens a new entry.
///
/// `open` is the type and finalized flag of the most recent entry, if any.
pub fn needs_new_entry(open: Option<(EntryType, bool)>, incoming: EntryType, is_hex_mode: bool) -> bool {
    if incoming != EntryType::Rx || is_hex_mode {
        return true;
    }
    match open {
        None => true,
        Some((open_type, finalized)) => open_type != incoming || finalized,
    }
}

/// Plain-text mirror of the log written to disk
struct LogCapture {
    writer: BufWriter<File>,
    path: PathBuf,
    writes: usize,
}

/// Coalescing, capped log buffer
pub struct LogAggregator {
    entries: VecDeque<LogEntry>,
    max_entries: usize,
    next_id: u64,
    timestamp_mode: TimestampMode,
    last_created: Option<DateTime<Local>>,
    capture: Option<LogCapture>,
}

impl Default for LogAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl LogAggregator {
    /// Create with the default entry cap
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENTRIES)
    }

    /// Create with a custom entry cap
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries.min(MAX_ENTRIES)),
            max_entries: max_entries.max(1),
            next_id: 1,
            timestamp_mode: TimestampMode::default(),
            last_created: None,
            capture: None,
        }
    }

    /// Current label style
    pub fn timestamp_mode(&self) -> TimestampMode {
        self.timestamp_mode
    }

    /// Applies to entries created from now on
    pub fn set_timestamp_mode(&mut self, mode: TimestampMode) {
        self.timestamp_mode = mode;
    }

    /// Append plain text without highlight evaluation
    pub fn append(&mut self, entry_type: EntryType, text: &str, is_hex_mode: bool) -> AppendOutcome {
        let unit = DecodedUnit {
            entry_type,
            ..DecodedUnit::rx(text, is_hex_mode)
        };
        self.append_unit(&unit, None)
    }

    /// Append a decoded unit, evaluating highlight rules when given
    pub fn append_unit(&mut self, unit: &DecodedUnit, rules: Option<&PatternEngine>) -> AppendOutcome {
        self.append_unit_at(unit, rules, Local::now())
    }

    pub(crate) fn append_unit_at(
        &mut self,
        unit: &DecodedUnit,
        rules: Option<&PatternEngine>,
        now: DateTime<Local>,
    ) -> AppendOutcome {
        let open = self.entries.back().map(|e| (e.entry_type, e.finalized));
        let created = needs_new_entry(open, unit.entry_type, unit.is_hex_mode);

        if created {
            self.create_entry(unit, now);
        } else if let Some(entry) = self.entries.back_mut() {
            entry.content.push_str(&unit.text);
            if let Some(capture) = self.capture.as_mut() {
                capture.write(&unit.text);
            }
        }

        let entry = match self.entries.back_mut() {
            Some(entry) => entry,
            None => unreachable!("an entry exists after append"),
        };

        if !entry.finalized && entry.content.contains('\n') {
            entry.finalized = true;
        }

        if let Some(rules) = rules {
            if entry.entry_type == EntryType::Rx && !entry.is_hex_mode {
                entry
                    .highlight_classes
                    .extend(rules.highlight_classes(&entry.content));
            }
        }

        AppendOutcome {
            id: entry.id,
            created,
            finalized: entry.finalized,
        }
    }

    fn create_entry(&mut self, unit: &DecodedUnit, now: DateTime<Local>) {
        let created_at = match self.timestamp_mode {
            TimestampMode::Absolute => now.format("%H:%M:%S").to_string(),
            TimestampMode::Delta => {
                let delta = self
                    .last_created
                    .map(|prev| (now - prev).num_milliseconds().max(0))
                    .unwrap_or(0);
                format!("+{delta}ms")
            }
        };
        self.last_created = Some(now);

        let entry = LogEntry {
            id: self.next_id,
            entry_type: unit.entry_type,
            content: unit.text.clone(),
            created_at,
            finalized: false,
            is_hex_mode: unit.is_hex_mode,
            simulated: unit.simulated,
            highlight_classes: BTreeSet::new(),
        };
        self.next_id += 1;

        if let Some(capture) = self.capture.as_mut() {
            capture.begin(&entry);
        }

        self.entries.push_back(entry);
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    /// Entries, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Find an entry by id
    pub fn get(&self, id: u64) -> Option<&LogEntry> {
        self.entries.iter().rev().find(|e| e.id == id)
    }

    /// Most recent entry
    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry. The delta clock restarts.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_created = None;
    }

    /// One physical line per entry, entry text only, buffer order
    pub fn export_text(&self) -> String {
        let mut result = String::new();
        for entry in &self.entries {
            let line = entry
                .content
                .trim_end_matches(&['\r', '\n'][..])
                .replace("\r\n", " ")
                .replace(&['\r', '\n'][..], " ");
            result.push_str(&line);
            result.push('\n');
        }
        result
    }

    /// Mirror every entry to a text file
    pub fn start_capture(&mut self, path: &Path) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.capture = Some(LogCapture {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            writes: 0,
        });
        tracing::info!(path = %path.display(), "log capture started");
        Ok(())
    }

    /// Stop mirroring and flush
    pub fn stop_capture(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.flush();
            tracing::info!(path = %capture.path.display(), "log capture stopped");
        }
    }

    /// Capture file path, if capturing
    pub fn capture_path(&self) -> Option<&Path> {
        self.capture.as_ref().map(|c| c.path.as_path())
    }
}

impl Drop for LogAggregator {
    fn drop(&mut self) {
        self.stop_capture();
    }
}

impl LogCapture {
    fn begin(&mut self, entry: &LogEntry) {
        let prefix = if self.writes == 0 { "" } else { "\n" };
        let text = entry.content.trim_end_matches(&['\r', '\n'][..]);
        let result = write!(
            self.writer,
            "{}[{}] {} {}",
            prefix,
            entry.created_at,
            entry.entry_type.tag(),
            text
        );
        self.after_write(result);
    }

    fn write(&mut self, text: &str) {
        let result = self.writer.write_all(text.trim_end_matches(&['\r', '\n'][..]).as_bytes());
        self.after_write(result);
    }

    fn after_write(&mut self, result: std::io::Result<()>) {
        if let Err(e) = result {
            tracing::warn!(error = %e, path = %self.path.display(), "log capture write failed");
            return;
        }
        self.writes += 1;
        if self.writes % 100 == 0 {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!(error = %e, "log capture flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::trigger::HighlightRule;
    use chrono::Duration;

    #[test]
    fn test_coalesces_until_newline() {
        let mut log = LogAggregator::new();
        for chunk in ["he", "ll", "o"] {
            log.append(EntryType::Rx, chunk, false);
        }
        assert_eq!(log.len(), 1);
        let entry = log.last().unwrap();
        assert_eq!(entry.content, "hello");
        assert!(!entry.finalized);
    }

    #[test]
    fn test_newline_finalizes_and_next_rx_opens_entry() {
        let mut log = LogAggregator::new();
        log.append(EntryType::Rx, "ok\n", false);
        assert!(log.last().unwrap().finalized);
        let outcome = log.append(EntryType::Rx, "x", false);
        assert!(outcome.created);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_hex_units_never_coalesce() {
        let mut log = LogAggregator::new();
        log.append(EntryType::Rx, "AA BB", true);
        log.append(EntryType::Rx, "CC", true);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_other_types_break_coalescing() {
        let mut log = LogAggregator::new();
        log.append(EntryType::Rx, "a", false);
        log.append(EntryType::Tx, "cmd", false);
        log.append(EntryType::Rx, "b", false);
        log.append(EntryType::System, "note", false);
        log.append(EntryType::System, "note", false);
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn test_decision_function() {
        assert!(needs_new_entry(None, EntryType::Rx, false));
        assert!(!needs_new_entry(Some((EntryType::Rx, false)), EntryType::Rx, false));
        assert!(needs_new_entry(Some((EntryType::Rx, true)), EntryType::Rx, false));
        assert!(needs_new_entry(Some((EntryType::Tx, false)), EntryType::Rx, false));
        assert!(needs_new_entry(Some((EntryType::Rx, false)), EntryType::Rx, true));
        assert!(needs_new_entry(Some((EntryType::Rx, false)), EntryType::Auto, false));
    }

    #[test]
    fn test_fifo_eviction() {
        let mut log = LogAggregator::new();
        for i in 0..1500 {
            log.append(EntryType::Rx, &format!("line {i}\n"), false);
        }
        assert_eq!(log.len(), MAX_ENTRIES);
        let contents: Vec<_> = log.entries().map(|e| e.content.clone()).collect();
        assert_eq!(contents.first().unwrap(), "line 500\n");
        assert_eq!(contents.last().unwrap(), "line 1499\n");
    }

    #[test]
    fn test_highlight_is_a_set_on_accumulated_text() {
        let rules = PatternEngine::new(Vec::new(), vec![HighlightRule::new("ERROR", "hl-error")]);
        let mut log = LogAggregator::new();
        let units = ["boot ER", "ROR occ", "urred\n"];
        for text in units {
            log.append_unit(&DecodedUnit::rx(text, false), Some(&rules));
        }
        let entry = log.last().unwrap();
        assert_eq!(entry.content, "boot ERROR occurred\n");
        assert_eq!(entry.highlight_classes.len(), 1);
        assert!(entry.highlight_classes.contains("hl-error"));
    }

    #[test]
    fn test_highlight_skips_hex_and_tx() {
        let rules = PatternEngine::new(Vec::new(), vec![HighlightRule::new("45", "x")]);
        let mut log = LogAggregator::new();
        log.append_unit(&DecodedUnit::rx("45 46", true), Some(&rules));
        assert!(log.last().unwrap().highlight_classes.is_empty());
    }

    #[test]
    fn test_delta_labels_measure_entry_creation() {
        let mut log = LogAggregator::new();
        log.set_timestamp_mode(TimestampMode::Delta);
        let t0 = Local::now();
        log.append_unit_at(&DecodedUnit::rx("a", false), None, t0);
        // coalesced append does not move the clock
        log.append_unit_at(&DecodedUnit::rx("b\n", false), None, t0 + Duration::milliseconds(40));
        log.append_unit_at(&DecodedUnit::rx("c", false), None, t0 + Duration::milliseconds(250));
        let labels: Vec<_> = log.entries().map(|e| e.created_at.clone()).collect();
        assert_eq!(labels, vec!["+0ms", "+250ms"]);
    }

    #[test]
    fn test_export_one_line_per_entry() {
        let mut log = LogAggregator::new();
        log.append(EntryType::System, "connected", false);
        log.append(EntryType::Rx, "a\r\n", false);
        log.append(EntryType::Rx, "two\nlines\n", false);
        assert_eq!(log.export_text(), "connected\na\ntwo lines\n");
    }

    #[test]
    fn test_capture_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.log");
        let mut log = LogAggregator::new();
        log.start_capture(&path).unwrap();
        log.append(EntryType::Rx, "hel", false);
        log.append(EntryType::Rx, "lo\n", false);
        log.append(EntryType::Tx, "AT", false);
        log.stop_capture();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("RX hello"));
        assert!(lines[1].ends_with("TX AT"));
    }
}
