//! Macros - one-shot and polling outbound commands
//!
//! A macro with `interval_ms <= 0` writes once per invocation. A positive
//! interval makes it a polling macro: the first invocation writes immediately
//! and starts a repeating timer, the next invocation cancels that timer.
//! Timers live independently of the session; a timer whose write finds no
//! open session is reported as orphaned until a later write succeeds.

use super::session::{PayloadFormat, SessionController, TxOrigin, WriteError};
use crate::config::store::{self, ConfigStore, StoreError, KEY_MACROS};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A user-defined outbound command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Macro {
    /// Stable identifier
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Button label
    pub label: String,
    /// Payload
    pub command: String,
    /// Payload is hex digits
    #[serde(rename = "isHex", default)]
    pub is_hex: bool,
    /// Polling period; zero or negative means one-shot
    #[serde(rename = "intervalMs", default)]
    pub interval_ms: i64,
}

impl Macro {
    /// Create a one-shot text macro
    pub fn new(label: &str, command: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.to_string(),
            command: command.to_string(),
            is_hex: false,
            interval_ms: 0,
        }
    }

    /// Send the command as hex
    #[must_use]
    pub fn hex(mut self) -> Self {
        self.is_hex = true;
        self
    }

    /// Repeat every `ms` milliseconds
    #[must_use]
    pub fn every(mut self, ms: i64) -> Self {
        self.interval_ms = ms;
        self
    }

    /// Repeats on an interval
    pub fn is_polling(&self) -> bool {
        self.interval_ms > 0
    }

    /// Payload encoding of the command
    pub fn format(&self) -> PayloadFormat {
        if self.is_hex {
            PayloadFormat::Hex
        } else {
            PayloadFormat::Text
        }
    }

    fn period(&self) -> Option<Duration> {
        u64::try_from(self.interval_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Outbound write seam used by the scheduler
#[async_trait]
pub trait WriteSink: Send + Sync {
    /// Write one macro command
    async fn send_command(&self, command: &str, format: PayloadFormat) -> Result<usize, WriteError>;
}

#[async_trait]
impl WriteSink for SessionController {
    async fn send_command(&self, command: &str, format: PayloadFormat) -> Result<usize, WriteError> {
        self.send(command, format, TxOrigin::Macro).await
    }
}

/// Macro errors
#[derive(Debug, Error)]
pub enum MacroError {
    /// Unknown macro id
    #[error("Macro not found: {0}")]
    NotFound(Uuid),

    /// Persistence failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Write failed
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Result of invoking a macro
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// One-shot write issued
    Sent,
    /// Polling timer started
    Started,
    /// Polling timer cancelled
    Stopped,
}

struct TimerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Runs macros against a write sink and persists the macro list
pub struct MacroScheduler {
    macros: RwLock<Vec<Macro>>,
    store: Arc<dyn ConfigStore>,
    sink: Arc<dyn WriteSink>,
    timers: Mutex<HashMap<Uuid, TimerHandle>>,
    orphaned: Arc<Mutex<HashSet<Uuid>>>,
}

impl MacroScheduler {
    /// Load macros from the store
    pub fn load(store: Arc<dyn ConfigStore>, sink: Arc<dyn WriteSink>) -> Result<Self, StoreError> {
        let macros: Vec<Macro> = store::load_items(store.as_ref(), KEY_MACROS)?;
        tracing::debug!(count = macros.len(), "macros loaded");
        Ok(Self {
            macros: RwLock::new(macros),
            store,
            sink,
            timers: Mutex::new(HashMap::new()),
            orphaned: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// All macros in insertion order
    pub fn list(&self) -> Vec<Macro> {
        self.macros.read().clone()
    }

    /// Find by id
    pub fn get(&self, id: Uuid) -> Option<Macro> {
        self.macros.read().iter().find(|m| m.id == id).cloned()
    }

    /// Find a macro by label
    pub fn find(&self, label: &str) -> Option<Macro> {
        self.macros.read().iter().find(|m| m.label == label).cloned()
    }

    /// Add and persist
    pub fn add(&self, item: Macro) -> Result<(), StoreError> {
        let mut macros = self.macros.write();
        macros.push(item);
        store::save_items(self.store.as_ref(), KEY_MACROS, &macros)
    }

    /// Replace a macro in place; a running timer is stopped
    pub fn update(&self, item: Macro) -> Result<(), MacroError> {
        let id = item.id;
        {
            let mut macros = self.macros.write();
            let slot = macros
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or(MacroError::NotFound(id))?;
            *slot = item;
            store::save_items(self.store.as_ref(), KEY_MACROS, &macros)?;
        }
        self.stop(id);
        Ok(())
    }

    /// Remove and persist, stopping its timer
    pub fn remove(&self, id: Uuid) -> Result<Option<Macro>, StoreError> {
        self.stop(id);
        let mut macros = self.macros.write();
        let Some(index) = macros.iter().position(|m| m.id == id) else {
            return Ok(None);
        };
        let removed = macros.remove(index);
        store::save_items(self.store.as_ref(), KEY_MACROS, &macros)?;
        Ok(Some(removed))
    }

    /// Replace the whole list, stopping every timer
    pub fn replace_all(&self, items: Vec<Macro>) -> Result<(), StoreError> {
        self.stop_all();
        let mut macros = self.macros.write();
        *macros = items;
        store::save_items(self.store.as_ref(), KEY_MACROS, &macros)
    }

    /// Run a one-shot macro, or toggle a polling one
    pub async fn invoke(&self, id: Uuid) -> Result<Invocation, MacroError> {
        let item = self.get(id).ok_or(MacroError::NotFound(id))?;

        let Some(period) = item.period() else {
            self.sink.send_command(&item.command, item.format()).await?;
            return Ok(Invocation::Sent);
        };

        if self.stop(id) {
            return Ok(Invocation::Stopped);
        }

        let handle = self.spawn_timer(&item, period);
        if let Some(previous) = self.timers.lock().insert(id, handle) {
            previous.cancel.cancel();
        }
        tracing::info!(label = %item.label, interval_ms = item.interval_ms, "polling started");

        match fire(self.sink.as_ref(), &self.orphaned, &item).await {
            Err(e @ WriteError::MalformedHex(_)) => {
                self.stop(id);
                Err(e.into())
            }
            _ => Ok(Invocation::Started),
        }
    }

    fn spawn_timer(&self, item: &Macro, period: Duration) -> TimerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let sink = self.sink.clone();
        let orphaned = self.orphaned.clone();
        let item = item.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = fire(sink.as_ref(), &orphaned, &item).await;
                    }
                }
            }
            tracing::debug!(label = %item.label, "polling task finished");
        });

        TimerHandle { cancel, task }
    }

    /// Cancel a polling timer; returns whether one was running
    pub fn stop(&self, id: Uuid) -> bool {
        let handle = self.timers.lock().remove(&id);
        self.orphaned.lock().remove(&id);
        match handle {
            Some(handle) => {
                handle.cancel.cancel();
                drop(handle.task);
                true
            }
            None => false,
        }
    }

    /// Cancel every polling timer
    pub fn stop_all(&self) {
        let handles: Vec<_> = self.timers.lock().drain().collect();
        self.orphaned.lock().clear();
        for (_, handle) in handles {
            handle.cancel.cancel();
        }
    }

    /// Polling timer active
    pub fn is_running(&self, id: Uuid) -> bool {
        self.timers.lock().get(&id).is_some_and(|h| !h.task.is_finished())
    }

    /// Ids of running macros whose last write found no session
    pub fn orphaned(&self) -> Vec<Uuid> {
        self.orphaned.lock().iter().copied().collect()
    }

    /// Last write found no session
    pub fn is_orphaned(&self, id: Uuid) -> bool {
        self.orphaned.lock().contains(&id)
    }
}

impl Drop for MacroScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

async fn fire(sink: &dyn WriteSink, orphaned: &Mutex<HashSet<Uuid>>, item: &Macro) -> Result<usize, WriteError> {
    let result = sink.send_command(&item.command, item.format()).await;
    match &result {
        Ok(_) => {
            orphaned.lock().remove(&item.id);
        }
        Err(WriteError::NotConnected) => {
            if orphaned.lock().insert(item.id) {
                tracing::warn!(label = %item.label, "macro orphaned: no open session");
            }
        }
        Err(e) => tracing::warn!(label = %item.label, error = %e, "macro write failed"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<String>>,
        offline: AtomicBool,
    }

    #[async_trait]
    impl WriteSink for RecordingSink {
        async fn send_command(&self, command: &str, _format: PayloadFormat) -> Result<usize, WriteError> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(WriteError::NotConnected);
            }
            self.writes.lock().push(command.to_string());
            Ok(command.len())
        }
    }

    fn scheduler(macros: Vec<Macro>) -> (MacroScheduler, Arc<RecordingSink>) {
        let store = Arc::new(MemoryStore::new());
        store::save_items(store.as_ref(), KEY_MACROS, &macros).unwrap();
        let sink = Arc::new(RecordingSink::default());
        (MacroScheduler::load(store, sink.clone()).unwrap(), sink)
    }

    #[tokio::test]
    async fn test_one_shot_writes_once() {
        let item = Macro::new("reset", "AT+RST\r\n");
        let id = item.id;
        let (scheduler, sink) = scheduler(vec![item]);

        assert_eq!(scheduler.invoke(id).await.unwrap(), Invocation::Sent);
        assert_eq!(sink.writes.lock().as_slice(), ["AT+RST\r\n"]);
        assert!(!scheduler.is_running(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_toggle_cancels_before_first_tick() {
        let item = Macro::new("poll", "STATUS?\n").every(500);
        let id = item.id;
        let (scheduler, sink) = scheduler(vec![item]);

        assert_eq!(scheduler.invoke(id).await.unwrap(), Invocation::Started);
        assert_eq!(sink.writes.lock().len(), 1);

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert_eq!(scheduler.invoke(id).await.unwrap(), Invocation::Stopped);

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(sink.writes.lock().len(), 1);
        assert!(!scheduler.is_running(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_repeats_on_interval() {
        let item = Macro::new("poll", "STATUS?\n").every(500);
        let id = item.id;
        let (scheduler, sink) = scheduler(vec![item]);

        scheduler.invoke(id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1250)).await;
        assert_eq!(sink.writes.lock().len(), 3);
        scheduler.stop_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphaned_while_offline() {
        let item = Macro::new("poll", "PING\n").every(100);
        let id = item.id;
        let (scheduler, sink) = scheduler(vec![item]);
        sink.offline.store(true, Ordering::SeqCst);

        assert_eq!(scheduler.invoke(id).await.unwrap(), Invocation::Started);
        assert!(scheduler.is_orphaned(id));
        assert!(scheduler.is_running(id));

        sink.offline.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!scheduler.is_orphaned(id));
        scheduler.stop(id);
    }

    #[tokio::test]
    async fn test_unknown_macro() {
        let (scheduler, _sink) = scheduler(Vec::new());
        assert!(matches!(
            scheduler.invoke(Uuid::new_v4()).await,
            Err(MacroError::NotFound(_))
        ));
    }

    #[test]
    fn test_mutations_write_through() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let scheduler = MacroScheduler::load(store.clone(), sink).unwrap();

        let item = Macro::new("a", "A");
        let id = item.id;
        scheduler.add(item).unwrap();
        let saved: Vec<Macro> = store::load_items(store.as_ref(), KEY_MACROS).unwrap();
        assert_eq!(saved.len(), 1);

        scheduler.remove(id).unwrap();
        let saved: Vec<Macro> = store::load_items(store.as_ref(), KEY_MACROS).unwrap();
        assert!(saved.is_empty());
    }

    #[test]
    fn test_macro_json_shape() {
        let json = r#"{"label":"poll","command":"AA 55","isHex":true,"intervalMs":250}"#;
        let item: Macro = serde_json::from_str(json).unwrap();
        assert!(item.is_hex);
        assert!(item.is_polling());
        assert_eq!(item.format(), PayloadFormat::Hex);
        assert!(Macro::new("x", "y").every(-5).period().is_none());
    }
}
