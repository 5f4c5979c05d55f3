//! End-to-end tests over the in-memory loopback transport

use serial_studio_core::config::store::MemoryStore;
use serial_studio_core::core::codec::{DisplayMode, EntryType, TextEncoding};
use serial_studio_core::core::macros::{Invocation, Macro, MacroScheduler};
use serial_studio_core::core::session::{
    PayloadFormat, SessionConfig, SessionController, SessionEvent, SessionState, TxOrigin, WriteError,
};
use serial_studio_core::core::transport::{ConnectionError, MemoryDevice, MemoryTransport, SerialOptions};
use serial_studio_core::core::trigger::{AutoReplyRule, HighlightRule, TriggerManager};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

fn session_with(config: SessionConfig) -> SessionController {
    let rules = TriggerManager::load(Arc::new(MemoryStore::new())).unwrap();
    SessionController::new(config, Arc::new(rules))
}

async fn open(config: SessionConfig) -> (SessionController, MemoryDevice) {
    let session = session_with(config);
    let (transport, device) = MemoryTransport::pair();
    assert_ok!(session.connect(Box::new(transport), &SerialOptions::default()).await);
    (session, device)
}

async fn settle<F: Fn(&SessionController) -> bool>(session: &SessionController, check: F) {
    for _ in 0..200 {
        if check(session) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never reached the expected state");
}

fn rx_entries(session: &SessionController) -> Vec<String> {
    session
        .entries()
        .into_iter()
        .filter(|e| e.entry_type == EntryType::Rx)
        .map(|e| e.content)
        .collect()
}

#[tokio::test]
async fn partial_lines_coalesce_then_finalize() {
    let (session, mut device) = open(SessionConfig::default()).await;

    for chunk in [&b"boot"[..], b" seq", b"uence"] {
        device.push(chunk).await.unwrap();
    }
    settle(&session, |s| s.stats().rx_bytes == 13).await;
    assert_eq!(rx_entries(&session), vec!["boot sequence"]);

    device.push(b" ok\n").await.unwrap();
    settle(&session, |s| s.stats().rx_bytes == 17).await;
    device.push(b"next").await.unwrap();
    settle(&session, |s| s.stats().rx_bytes == 21).await;
    let rx = session
        .entries()
        .into_iter()
        .filter(|e| e.entry_type == EntryType::Rx)
        .collect::<Vec<_>>();
    assert_eq!(rx.len(), 2);
    assert_eq!(rx[0].content, "boot sequence ok\n");
    assert!(rx[0].finalized);
    assert_eq!(rx[1].content, "next");
}

#[tokio::test]
async fn hex_mode_never_coalesces() {
    let config = SessionConfig {
        display_mode: DisplayMode::Hex,
        ..SessionConfig::default()
    };
    let (session, mut device) = open(config).await;

    device.push(&[0x01, 0x02]).await.unwrap();
    settle(&session, |s| s.stats().rx_bytes == 2).await;
    device.push(&[0xFF]).await.unwrap();
    settle(&session, |s| s.stats().rx_bytes == 3).await;

    assert_eq!(rx_entries(&session), vec!["01 02", "FF"]);
    assert!(session.entries().iter().filter(|e| e.entry_type == EntryType::Rx).all(|e| e.is_hex_mode));
}

#[tokio::test]
async fn ping_gets_exactly_one_pong() {
    let (session, mut device) = open(SessionConfig::default()).await;
    session.rules().add_auto_reply(AutoReplyRule::new("PING", "PONG\n")).unwrap();

    device.push(b"PING\n").await.unwrap();
    let reply = device.read_exact(5, Duration::from_secs(1)).await.unwrap();
    assert_eq!(reply, b"PONG\n");
    assert!(device.read_available(Duration::from_millis(50)).await.is_empty());

    settle(&session, |s| s.entries().iter().any(|e| e.entry_type == EntryType::Auto)).await;
    let auto: Vec<_> = session
        .entries()
        .into_iter()
        .filter(|e| e.entry_type == EntryType::Auto)
        .collect();
    assert_eq!(auto.len(), 1);
    assert_eq!(auto[0].content, "PONG\n");
}

#[tokio::test]
async fn highlight_class_is_recorded_once() {
    let (session, mut device) = open(SessionConfig::default()).await;
    session.rules().add_highlight(HighlightRule::new("ERROR", "hl-error")).unwrap();

    device.push(b"boot ERR").await.unwrap();
    settle(&session, |s| s.stats().rx_bytes == 8).await;
    device.push(b"OR occurred, error again\n").await.unwrap();
    settle(&session, |s| s.last_entry().is_some_and(|e| e.finalized)).await;

    let entry = session.last_entry().unwrap();
    assert_eq!(entry.highlight_classes.len(), 1);
    assert!(entry.highlight_classes.contains("hl-error"));
}

#[tokio::test]
async fn telemetry_from_hardware_lines() {
    let config = SessionConfig {
        charting: true,
        ..SessionConfig::default()
    };
    let (session, mut device) = open(config).await;

    device.push(b"temp:25.3,humi:60\n").await.unwrap();
    settle(&session, |s| !s.telemetry_snapshot().is_empty()).await;

    let telemetry = session.telemetry_snapshot();
    assert_eq!(telemetry["temp"], vec![25.3]);
    assert_eq!(telemetry["humi"], vec![60.0]);
}

#[tokio::test]
async fn gbk_characters_split_across_chunks() {
    let config = SessionConfig {
        encoding: TextEncoding::Gbk,
        ..SessionConfig::default()
    };
    let (session, mut device) = open(config).await;

    // "温度" in GBK
    let bytes = [0xCE, 0xC2, 0xB6, 0xC8];
    device.push(&bytes[..1]).await.unwrap();
    settle(&session, |s| s.stats().rx_bytes == 1).await;
    device.push(&bytes[1..]).await.unwrap();
    settle(&session, |s| s.stats().rx_bytes == 4).await;

    assert_eq!(rx_entries(&session), vec!["温度"]);
}

#[tokio::test]
async fn malformed_hex_leaves_log_untouched() {
    let (session, mut device) = open(SessionConfig::default()).await;
    device.push(b"hello\n").await.unwrap();
    settle(&session, |s| s.stats().rx_bytes == 6).await;
    let before = session.entries();

    let result = session.send("0G", PayloadFormat::Hex, TxOrigin::User).await;
    assert!(matches!(result, Err(WriteError::MalformedHex(_))));

    let after = session.entries();
    assert_eq!(after.len(), before.len() + 1);
    let unchanged = after[..before.len()]
        .iter()
        .zip(&before)
        .all(|(a, b)| a.id == b.id && a.content == b.content);
    assert!(unchanged);
    assert_eq!(after.last().unwrap().entry_type, EntryType::System);
    assert!(device.read_available(Duration::from_millis(20)).await.is_empty());
}

#[tokio::test]
async fn stream_failure_requires_reconnect() {
    let (session, mut device) = open(SessionConfig::default()).await;
    let mut events = session.subscribe();

    device.break_link().await.unwrap();
    let reported = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Ok(SessionEvent::Error(message)) = events.recv().await {
                return message;
            }
        }
    })
    .await;
    assert!(reported.is_ok());
    assert_eq!(session.state(), SessionState::Error);
    assert_eq!(session.last_entry().unwrap().entry_type, EntryType::System);

    let (transport, mut fresh) = MemoryTransport::pair();
    assert_ok!(session.connect(Box::new(transport), &SerialOptions::default()).await);
    assert_eq!(session.state(), SessionState::Open);

    session.send_line("AT", true, TxOrigin::User).await.unwrap();
    assert_eq!(fresh.read_exact(3, Duration::from_secs(1)).await.unwrap(), b"AT\n");
}

#[tokio::test]
async fn stream_end_closes_session() {
    let session = session_with(SessionConfig::default());
    let (transport, device) = MemoryTransport::pair();
    session.connect(Box::new(transport), &SerialOptions::default()).await.unwrap();

    drop(device);
    settle(&session, |s| s.state() == SessionState::Closed).await;
    assert!(matches!(session.write(b"x").await, Err(WriteError::NotConnected)));
}

#[tokio::test]
async fn connect_rules() {
    let (session, _device) = open(SessionConfig::default()).await;
    let (other, _) = MemoryTransport::pair();
    assert!(matches!(
        session.connect(Box::new(other), &SerialOptions::default()).await,
        Err(ConnectionError::Busy(_))
    ));

    session.disconnect().await;
    session.disconnect().await;
    assert_eq!(session.state(), SessionState::Closed);

    let refused = MemoryTransport::refusing(ConnectionError::Unsupported("no serial support".into()));
    assert!(session.connect(Box::new(refused), &SerialOptions::default()).await.is_err());
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn polling_macro_writes_through_session() {
    let (session, mut device) = open(SessionConfig::default()).await;
    let store = Arc::new(MemoryStore::new());
    let scheduler = MacroScheduler::load(store, Arc::new(session.clone())).unwrap();

    let item = Macro::new("status", "STATUS?\n").every(50);
    let id = item.id;
    scheduler.add(item).unwrap();

    assert_eq!(scheduler.invoke(id).await.unwrap(), Invocation::Started);
    let first = device.read_exact(8, Duration::from_secs(1)).await.unwrap();
    assert_eq!(first, b"STATUS?\n");
    let second = device.read_exact(8, Duration::from_secs(1)).await.unwrap();
    assert_eq!(second, b"STATUS?\n");

    assert_eq!(scheduler.invoke(id).await.unwrap(), Invocation::Stopped);

    session.disconnect().await;
    let hex = Macro::new("raw", "AA 55").hex();
    let raw_id = hex.id;
    scheduler.add(hex).unwrap();
    assert!(scheduler.invoke(raw_id).await.is_err());
}
