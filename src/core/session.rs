//! Session management for the active hardware connection
//!
//! A `SessionController` owns at most one open link. Its read loop decodes
//! every chunk and fans the result out to the log aggregator, the telemetry
//! extractor and the pattern engine, in that order. Writes from the user,
//! macros and auto-replies all go through one writer lock.

use super::chart::TelemetryStore;
use super::codec::{parse_hex_payload, CodecError, DecodedUnit, DisplayMode, EntryType, FrameDecoder, RgbRemainder, TextEncoding};
use super::logger::{LogAggregator, LogEntry, TimestampMode};
use super::transport::{create_transport, BoxedWriter, ConnectionError, SerialOptions, TransportTrait};
use super::trigger::{PatternEngine, TriggerManager};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const READ_BUFFER_SIZE: usize = 4096;
const EVENT_CAPACITY: usize = 1024;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected
    Closed,
    /// Open in progress
    Opening,
    /// Connected and reading
    Open,
    /// Disconnect in progress
    Closing,
    /// The stream failed; reconnect explicitly
    Error,
}

/// Session events
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// State changed
    StateChanged(SessionState),
    /// A new log entry was created
    EntryCreated(LogEntry),
    /// Text was appended to an open entry
    EntryExtended {
        /// Entry id
        id: u64,
        /// Appended text
        text: String,
        /// Entry is finalized after the append
        finalized: bool,
    },
    /// Telemetry samples were recorded
    TelemetryUpdated(usize),
    /// An auto-reply rule fired
    AutoReplied(String),
    /// Stream or write failure
    Error(String),
}

/// Write errors
#[derive(Debug, Error)]
pub enum WriteError {
    /// No open session
    #[error("Not connected")]
    NotConnected,

    /// Hex payload rejected before reaching the adapter
    #[error("Malformed hex payload: {0}")]
    MalformedHex(#[from] CodecError),

    /// Adapter write failed
    #[error("Write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// How an outbound payload is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    /// Encoded with the active text encoding
    #[default]
    Text,
    /// Whitespace-separated hex digits
    Hex,
}

/// Who issued a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOrigin {
    /// Typed by the user
    User,
    /// Macro or polling timer
    Macro,
    /// Auto-reply rule
    AutoReply,
}

impl TxOrigin {
    fn entry_type(self) -> EntryType {
        match self {
            Self::User | Self::Macro => EntryType::Tx,
            Self::AutoReply => EntryType::Auto,
        }
    }
}

/// Byte counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes received from hardware
    pub rx_bytes: u64,
    /// Bytes written to hardware
    pub tx_bytes: u64,
}

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Display mode
    pub display_mode: DisplayMode,
    /// Text encoding
    pub encoding: TextEncoding,
    /// Timestamp labels
    pub timestamp_mode: TimestampMode,
    /// Feed the telemetry extractor
    pub charting: bool,
    /// RGB remainder policy
    pub rgb_remainder: RgbRemainder,
    /// Log entry cap
    pub max_log_entries: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::Text,
            encoding: TextEncoding::Utf8,
            timestamp_mode: TimestampMode::Absolute,
            charting: false,
            rgb_remainder: RgbRemainder::Truncate,
            max_log_entries: super::logger::MAX_ENTRIES,
        }
    }
}

struct Pipeline {
    decoder: FrameDecoder,
    log: LogAggregator,
    telemetry: TelemetryStore,
    charting: bool,
}

struct ActiveSession {
    transport: Box<dyn TransportTrait>,
    cancel: CancellationToken,
    reader_task: JoinHandle<()>,
}

struct Inner {
    state: RwLock<SessionState>,
    pipeline: Mutex<Pipeline>,
    rules: Arc<TriggerManager>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    active: Mutex<Option<ActiveSession>>,
    connection_info: RwLock<Option<String>>,
    events: broadcast::Sender<SessionEvent>,
    rx_bytes: AtomicU64,
    tx_bytes: AtomicU64,
    replies_orphaned: AtomicBool,
}

/// Orchestrates the single active session
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// Create a controller with no open session
    pub fn new(config: SessionConfig, rules: Arc<TriggerManager>) -> Self {
        let mut decoder = FrameDecoder::new(config.display_mode, config.encoding);
        decoder.set_rgb_remainder(config.rgb_remainder);
        let mut log = LogAggregator::with_capacity(config.max_log_entries);
        log.set_timestamp_mode(config.timestamp_mode);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(SessionState::Closed),
                pipeline: Mutex::new(Pipeline {
                    decoder,
                    log,
                    telemetry: TelemetryStore::new(),
                    charting: config.charting,
                }),
                rules,
                writer: tokio::sync::Mutex::new(None),
                active: Mutex::new(None),
                connection_info: RwLock::new(None),
                events,
                rx_bytes: AtomicU64::new(0),
                tx_bytes: AtomicU64::new(0),
                replies_orphaned: AtomicBool::new(false),
            }),
        }
    }

    /// Open a serial port by name
    pub async fn connect_port(&self, port: &str, options: &SerialOptions) -> Result<(), ConnectionError> {
        let transport = create_transport(port)?;
        self.connect(transport, options).await
    }

    /// Open `transport` and start the read loop
    pub async fn connect(
        &self,
        mut transport: Box<dyn TransportTrait>,
        options: &SerialOptions,
    ) -> Result<(), ConnectionError> {
        {
            let mut state = self.inner.state.write();
            if matches!(*state, SessionState::Opening | SessionState::Open | SessionState::Closing) {
                return Err(ConnectionError::Busy("a session is already active".to_string()));
            }
            *state = SessionState::Opening;
        }
        self.emit(SessionEvent::StateChanged(SessionState::Opening));

        // a link left behind by a stream error or stream end
        self.release().await;

        let link = match transport.open(options).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(error = %e, "connect failed");
                self.set_state(SessionState::Closed);
                return Err(e);
            }
        };

        let info = transport.connection_info();
        *self.inner.writer.lock().await = Some(link.writer);
        self.inner.pipeline.lock().decoder.reset();
        *self.inner.connection_info.write() = Some(info.clone());

        {
            // the read loop may end on its first read; it must observe Open,
            // and a concurrent release must find the task it has to cancel
            let mut active = self.inner.active.lock();
            self.set_state(SessionState::Open);
            self.log_system(&format!("Connected to {info} (baud {})", options.baud_rate));

            let cancel = CancellationToken::new();
            let reader_task = tokio::spawn(self.clone().read_loop(link.reader, cancel.clone()));
            *active = Some(ActiveSession {
                transport,
                cancel,
                reader_task,
            });
        }
        tracing::info!(%info, "session open");
        Ok(())
    }

    /// Close the active session. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let closing = {
            let mut state = self.inner.state.write();
            match *state {
                SessionState::Open | SessionState::Error => {
                    *state = SessionState::Closing;
                    true
                }
                SessionState::Closed => false,
                SessionState::Opening | SessionState::Closing => return,
            }
        };

        if closing {
            self.emit(SessionEvent::StateChanged(SessionState::Closing));
        }

        self.release().await;

        if closing {
            self.set_state(SessionState::Closed);
            self.log_system("Port closed");
            tracing::info!("session closed");
        }
    }

    async fn release(&self) {
        let active = self.inner.active.lock().take();
        let Some(mut active) = active else {
            return;
        };

        active.cancel.cancel();
        if let Err(e) = (&mut active.reader_task).await {
            tracing::warn!(error = %e, "read loop ended abnormally");
        }

        // waits for any in-flight write to finish
        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "writer shutdown failed");
            }
        }

        if let Err(e) = active.transport.close().await {
            tracing::warn!(error = %e, "transport close failed");
        }
        *self.inner.connection_info.write() = None;
    }

    async fn read_loop(self, mut reader: super::transport::BoxedReader, cancel: CancellationToken) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let read = tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("read loop cancelled");
                    break;
                }
                read = reader.read(&mut buf) => read,
            };

            match read {
                Ok(0) => {
                    tracing::info!("stream ended");
                    if self.transition(SessionState::Open, SessionState::Closed) {
                        self.log_system("Stream ended");
                    }
                    break;
                }
                Ok(n) => {
                    self.inner.rx_bytes.fetch_add(n as u64, Ordering::Relaxed);
                    self.ingest(&buf[..n], false);
                }
                Err(e) => {
                    tracing::error!(error = %e, "read failed");
                    if self.transition(SessionState::Open, SessionState::Error) {
                        self.log_system(&format!("Receive interrupted: {e}"));
                        self.emit(SessionEvent::Error(e.to_string()));
                    }
                    break;
                }
            }
        }
    }

    /// Feed bytes through the receive pipeline without an adapter
    pub fn inject(&self, data: &[u8], simulated: bool) {
        self.ingest(data, simulated);
    }

    fn ingest(&self, data: &[u8], simulated: bool) {
        let rules = self.inner.rules.engine();
        let mut events = Vec::new();
        let mut replies = Vec::new();

        {
            let mut pipeline = self.inner.pipeline.lock();
            let output = pipeline.decoder.decode(data);

            for mut unit in output.units {
                unit.simulated = simulated;
                events.extend(Self::record(&mut pipeline.log, &unit, Some(&*rules)));

                if !unit.is_rx_text() {
                    continue;
                }
                if pipeline.charting {
                    let samples = pipeline.telemetry.ingest(&unit.text);
                    if samples > 0 {
                        events.push(SessionEvent::TelemetryUpdated(samples));
                    }
                }
                replies.extend(rules.replies_for(&unit.text));
            }

            if let Some(warning) = output.warning {
                tracing::debug!(%warning, "decode warning");
                let notice = DecodedUnit {
                    entry_type: EntryType::System,
                    ..DecodedUnit::rx(format!("Decode: {warning}"), false)
                };
                events.extend(Self::record(&mut pipeline.log, &notice, None));
            }
        }
        drop(rules);

        for event in events {
            self.emit(event);
        }
        for reply in replies {
            self.spawn_auto_reply(reply);
        }
    }

    fn spawn_auto_reply(&self, reply: String) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("auto-reply dropped: no runtime");
            return;
        };
        let this = self.clone();
        handle.spawn(async move {
            match this.send(&reply, PayloadFormat::Text, TxOrigin::AutoReply).await {
                Ok(_) => {
                    this.inner.replies_orphaned.store(false, Ordering::Relaxed);
                    this.emit(SessionEvent::AutoReplied(reply));
                }
                Err(WriteError::NotConnected) => {
                    if !this.inner.replies_orphaned.swap(true, Ordering::Relaxed) {
                        tracing::warn!(%reply, "auto-reply has no open session; further misses are silent");
                    }
                }
                Err(e) => tracing::debug!(error = %e, "auto-reply not sent"),
            }
        });
    }

    /// An auto-reply fired while no session was open, and none has been
    /// delivered since
    pub fn auto_replies_orphaned(&self) -> bool {
        self.inner.replies_orphaned.load(Ordering::Relaxed)
    }

    fn record(log: &mut LogAggregator, unit: &DecodedUnit, rules: Option<&PatternEngine>) -> Option<SessionEvent> {
        let outcome = log.append_unit(unit, rules);
        if outcome.created {
            log.get(outcome.id).cloned().map(SessionEvent::EntryCreated)
        } else {
            Some(SessionEvent::EntryExtended {
                id: outcome.id,
                text: unit.text.clone(),
                finalized: outcome.finalized,
            })
        }
    }

    fn append_entry(&self, entry_type: EntryType, text: &str) {
        let unit = DecodedUnit {
            entry_type,
            ..DecodedUnit::rx(text, false)
        };
        let event = Self::record(&mut self.inner.pipeline.lock().log, &unit, None);
        if let Some(event) = event {
            self.emit(event);
        }
    }

    fn log_system(&self, message: &str) {
        self.append_entry(EntryType::System, message);
    }

    /// Add a notice from the demo producer
    pub fn log_simulation(&self, message: &str) {
        self.append_entry(EntryType::Sim, message);
    }

    /// Write raw bytes through the writer lock
    pub async fn write(&self, data: &[u8]) -> Result<usize, WriteError> {
        if self.state() != SessionState::Open {
            return Err(WriteError::NotConnected);
        }

        let mut guard = self.inner.writer.lock().await;
        let writer = guard.as_mut().ok_or(WriteError::NotConnected)?;
        writer.write_all(data).await?;
        writer.flush().await?;
        drop(guard);

        self.inner.tx_bytes.fetch_add(data.len() as u64, Ordering::Relaxed);
        tracing::trace!(bytes = data.len(), "written");
        Ok(data.len())
    }

    /// Encode, write and log an outbound payload
    pub async fn send(&self, payload: &str, format: PayloadFormat, origin: TxOrigin) -> Result<usize, WriteError> {
        let bytes = match format {
            PayloadFormat::Hex => match parse_hex_payload(payload) {
                Ok(bytes) => bytes,
                Err(e) => {
                    self.log_system(&format!("Send failed: invalid HEX ({e})"));
                    return Err(WriteError::MalformedHex(e));
                }
            },
            PayloadFormat::Text => Bytes::from(self.encoding().encode(payload)),
        };

        if bytes.is_empty() {
            return Ok(0);
        }

        let written = match self.write(&bytes).await {
            Ok(n) => n,
            Err(WriteError::NotConnected) => return Err(WriteError::NotConnected),
            Err(e) => {
                self.log_system(&format!("Send failed: {e}"));
                self.emit(SessionEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        let label = match format {
            PayloadFormat::Hex => format!("[HEX] {payload}"),
            PayloadFormat::Text => payload.to_string(),
        };
        self.append_entry(origin.entry_type(), &label);
        Ok(written)
    }

    /// Send text, optionally followed by a line break
    pub async fn send_line(&self, text: &str, newline: bool, origin: TxOrigin) -> Result<usize, WriteError> {
        if newline {
            self.send(&format!("{text}\n"), PayloadFormat::Text, origin).await
        } else {
            self.send(text, PayloadFormat::Text, origin).await
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Open
    }

    fn set_state(&self, state: SessionState) {
        *self.inner.state.write() = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        {
            let mut state = self.inner.state.write();
            if *state != from {
                return false;
            }
            *state = to;
        }
        self.emit(SessionEvent::StateChanged(to));
        true
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Connection description of the open link
    pub fn connection_info(&self) -> Option<String> {
        self.inner.connection_info.read().clone()
    }

    /// Byte counters
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            rx_bytes: self.inner.rx_bytes.load(Ordering::Relaxed),
            tx_bytes: self.inner.tx_bytes.load(Ordering::Relaxed),
        }
    }

    /// Shared rule sets
    pub fn rules(&self) -> &Arc<TriggerManager> {
        &self.inner.rules
    }

    /// Active display mode
    pub fn display_mode(&self) -> DisplayMode {
        self.inner.pipeline.lock().decoder.mode()
    }

    /// Switch display mode; carried decoder state is dropped
    pub fn set_display_mode(&self, mode: DisplayMode) {
        self.inner.pipeline.lock().decoder.set_mode(mode);
    }

    /// Active text encoding
    pub fn encoding(&self) -> TextEncoding {
        self.inner.pipeline.lock().decoder.encoding()
    }

    /// Switch text encoding; a partial character is dropped
    pub fn set_encoding(&self, encoding: TextEncoding) {
        self.inner.pipeline.lock().decoder.set_encoding(encoding);
    }

    /// Set what happens to trailing bytes that do not fill an RGB triple
    pub fn set_rgb_remainder(&self, policy: RgbRemainder) {
        self.inner.pipeline.lock().decoder.set_rgb_remainder(policy);
    }

    /// Applies to entries created from now on
    pub fn set_timestamp_mode(&self, mode: TimestampMode) {
        self.inner.pipeline.lock().log.set_timestamp_mode(mode);
    }

    /// Enable or disable telemetry extraction
    pub fn set_charting(&self, enabled: bool) {
        self.inner.pipeline.lock().charting = enabled;
    }

    /// Copy of the log, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.pipeline.lock().log.entries().cloned().collect()
    }

    /// Most recent entry
    pub fn last_entry(&self) -> Option<LogEntry> {
        self.inner.pipeline.lock().log.last().cloned()
    }

    /// Plain-text log export
    pub fn export_log(&self) -> String {
        self.inner.pipeline.lock().log.export_text()
    }

    /// Clear the log and the RX counter
    pub fn clear_log(&self) {
        self.inner.pipeline.lock().log.clear();
        self.inner.rx_bytes.store(0, Ordering::Relaxed);
    }

    /// Mirror the log to a text file
    pub fn start_capture(&self, path: &Path) -> std::io::Result<()> {
        self.inner.pipeline.lock().log.start_capture(path)
    }

    /// Stop mirroring the log
    pub fn stop_capture(&self) {
        self.inner.pipeline.lock().log.stop_capture();
    }

    /// Copy of every telemetry series
    pub fn telemetry_snapshot(&self) -> BTreeMap<String, Vec<f64>> {
        self.inner.pipeline.lock().telemetry.snapshot()
    }

    /// Drop every telemetry series
    pub fn clear_telemetry(&self) {
        self.inner.pipeline.lock().telemetry.clear();
    }
}
