//! Demo producer
//!
//! Generates synthetic device output on a fixed tick and injects it into the
//! session's receive pipeline, so decoding, logging, charting and auto-replies
//! all run without hardware attached.

use super::codec::DisplayMode;
use super::session::SessionController;
use parking_lot::Mutex;
use rand::Rng;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Demo tick period
pub const DEMO_TICK: Duration = Duration::from_millis(1000);

/// Swatches emitted per RGB tick
const RGB_SWATCHES: usize = 4;

/// One tick of synthetic device output for `mode`
pub fn demo_payload<R: Rng + ?Sized>(rng: &mut R, mode: DisplayMode) -> Vec<u8> {
    match mode {
        DisplayMode::Rgb => (0..RGB_SWATCHES * 3).map(|_| rng.gen::<u8>()).collect(),
        _ => {
            let temp = rng.gen_range(20.0..30.0_f64);
            let humi = rng.gen_range(40..70);
            format!("temp:{temp:.1},humi:{humi}\n").into_bytes()
        }
    }
}

/// Periodically injects demo data into a session
pub struct DemoProducer {
    session: SessionController,
    tick: Duration,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl DemoProducer {
    /// Producer feeding `session`
    pub fn new(session: SessionController) -> Self {
        Self {
            session,
            tick: DEMO_TICK,
            running: Mutex::new(None),
        }
    }

    /// Override the tick period
    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Start or stop; returns whether the producer is now running
    pub fn toggle(&self) -> bool {
        if self.stop() {
            false
        } else {
            self.start();
            true
        }
    }

    /// Start ticking; no-op if already running
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let session = self.session.clone();
        let tick = self.tick;

        let task = tokio::spawn(async move {
            session.log_simulation("Demo mode started");
            let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let payload = demo_payload(&mut rand::thread_rng(), session.display_mode());
                        session.inject(&payload, true);
                    }
                }
            }
            session.log_simulation("Demo mode stopped");
        });

        tracing::info!(tick_ms = tick.as_millis() as u64, "demo producer started");
        *running = Some((cancel, task));
    }

    /// Stop the producer; returns whether it was running
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some((cancel, _task)) => {
                cancel.cancel();
                tracing::info!("demo producer stopped");
                true
            }
            None => false,
        }
    }

    /// Producer task active
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl Drop for DemoProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::store::MemoryStore;
    use crate::core::codec::EntryType;
    use crate::core::session::SessionConfig;
    use crate::core::trigger::TriggerManager;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn session() -> SessionController {
        let rules = TriggerManager::load(Arc::new(MemoryStore::new())).unwrap();
        let config = SessionConfig {
            charting: true,
            ..SessionConfig::default()
        };
        SessionController::new(config, Arc::new(rules))
    }

    #[test]
    fn test_text_payload_is_telemetry_line() {
        let mut rng = StdRng::seed_from_u64(7);
        let payload = String::from_utf8(demo_payload(&mut rng, DisplayMode::Text)).unwrap();
        assert!(payload.starts_with("temp:"));
        assert!(payload.contains(",humi:"));
        assert!(payload.ends_with('\n'));
    }

    #[test]
    fn test_rgb_payload_is_whole_triples() {
        let mut rng = StdRng::seed_from_u64(7);
        let payload = demo_payload(&mut rng, DisplayMode::Rgb);
        assert_eq!(payload.len() % 3, 0);
        assert!(!payload.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_feed_the_pipeline() {
        let session = session();
        let producer = DemoProducer::new(session.clone());
        assert!(producer.toggle());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(session.telemetry_snapshot()["temp"].len(), 3);

        let simulated_rx = session
            .entries()
            .iter()
            .filter(|e| e.entry_type == EntryType::Rx && e.simulated)
            .count();
        assert_eq!(simulated_rx, 3);

        assert!(!producer.toggle());
        assert!(!producer.is_running());
    }
}
