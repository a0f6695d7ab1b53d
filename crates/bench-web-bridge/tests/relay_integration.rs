//! Integration tests for the web bridge over the in-process broker.
//!
//! Requests go through [`DeviceService`] and land on the broker's command
//! channel, where the tests read them back in publish order.  The last test
//! drives a real WebSocket session end to end.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bench_broker::MemoryBroker;
use bench_core::protocol::commands::CLOSE_OSCILLOSCOPE;
use bench_core::{Frame, NoopStore, Sensor, StateStore, StreamMode};
use bench_web_bridge::application::{
    ClientGone, DeviceService, FrameSink, RelayEnd, TelemetryRelay,
};
use bench_web_bridge::domain::{ClientRequest, ServerMessage};
use bench_web_bridge::infrastructure::{serve, TomlStateStore};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message as WsMessage;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn relay_with(broker: &MemoryBroker, store: Arc<dyn StateStore>) -> Arc<TelemetryRelay> {
    let service = Arc::new(DeviceService::new(Arc::new(broker.clone()), store));
    Arc::new(TelemetryRelay::new(Arc::new(broker.clone()), service))
}

fn published(broker: &MemoryBroker) -> Vec<Frame> {
    broker
        .pending_commands()
        .iter()
        .map(|payload| Frame::try_from(payload.as_slice()).unwrap())
        .collect()
}

/// Polls `condition` every 10 ms for up to five seconds.
async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

struct VecSink(Vec<Frame>);

#[async_trait]
impl FrameSink for VecSink {
    async fn deliver(&mut self, frame: Frame) -> Result<(), ClientGone> {
        self.0.push(frame);
        Ok(())
    }
}

// ── Device requests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_switching_from_oscilloscope_to_resistance_closes_first() {
    // Arrange
    let broker = MemoryBroker::default();
    let relay = relay_with(&broker, Arc::new(NoopStore));
    let service = relay.service();
    service.open_mode(StreamMode::Oscilloscope).await.unwrap();

    // Act
    service.open_mode(StreamMode::MultimeterResistance).await.unwrap();

    // Assert
    assert_eq!(
        published(&broker),
        vec![
            Frame::from_bytes([0x08, 0x00, 0x01, 0xFE]),
            Frame::from_bytes([0x07, 0x00, 0x00, 0xFE]),
            Frame::from_bytes([0x02, 0x00, 0x01, 0xFE]),
        ]
    );
    assert_eq!(
        service.status().await.current_mode,
        Some(StreamMode::MultimeterResistance)
    );
}

#[tokio::test]
async fn test_temperature_read_while_idle_sends_only_the_read() {
    let broker = MemoryBroker::default();
    let relay = relay_with(&broker, Arc::new(NoopStore));

    relay.service().read_sensor(Sensor::Temperature).await.unwrap();

    assert_eq!(published(&broker), vec![Frame::from_bytes([0x0B, 0x00, 0x01, 0xFE])]);
}

#[tokio::test]
async fn test_distance_read_during_ac_voltage_restores_the_stream() {
    // Arrange
    let broker = MemoryBroker::default();
    let relay = relay_with(&broker, Arc::new(NoopStore));
    let service = relay.service();
    service.open_mode(StreamMode::MultimeterAcVoltage).await.unwrap();

    // Act
    service.read_sensor(Sensor::Distance).await.unwrap();

    // Assert
    assert_eq!(
        published(&broker)[1..],
        [
            Frame::from_bytes([0x0C, 0x00, 0x01, 0xFE]),
            Frame::from_bytes([0x05, 0x00, 0x04, 0xFE]),
        ]
    );
    assert_eq!(
        service.status().await.current_mode,
        Some(StreamMode::MultimeterAcVoltage)
    );
}

#[tokio::test]
async fn test_invalid_led_request_is_rejected_before_publishing() {
    // Arrange
    let broker = MemoryBroker::default();
    let relay = relay_with(&broker, Arc::new(NoopStore));

    // Act
    let reply = relay
        .service()
        .handle(ClientRequest::SetLeds {
            numbers: "1,x".to_string(),
            on: true,
        })
        .await;

    // Assert
    assert!(matches!(reply, ServerMessage::Error { .. }));
    assert!(broker.pending_commands().is_empty());
}

#[tokio::test]
async fn test_state_survives_restart_through_snapshot_file() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.toml");
    let broker = MemoryBroker::default();
    let first = relay_with(&broker, Arc::new(TomlStateStore::new(&path)));
    first.service().open_mode(StreamMode::MultimeterDcVoltage).await.unwrap();
    first.service().set_leds(&[2, 4], true).await.unwrap();

    // Act: a new process starts from the same file
    let second = relay_with(&broker, Arc::new(TomlStateStore::new(&path)));

    // Assert
    let state = second.service().status().await;
    assert_eq!(state.current_mode, Some(StreamMode::MultimeterDcVoltage));
    assert_eq!(state.leds.lit(), vec![2, 4]);
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_from_default_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.toml");
    std::fs::write(&path, "this is not toml ===").unwrap();

    let relay = relay_with(&MemoryBroker::default(), Arc::new(TomlStateStore::new(&path)));

    assert_eq!(relay.service().status().await.current_mode, None);
}

// ── Relay ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_attach_skips_frames_published_before_it() {
    // Arrange: frames produced while nobody was listening
    let broker = MemoryBroker::default();
    let relay = relay_with(&broker, Arc::new(NoopStore));
    let queue = broker.telemetry_queue();
    for n in 0..10 {
        queue.push(Frame::command(0x08, n));
    }

    // Act
    let subscription = relay.attach("late").await.unwrap();
    queue.push(Frame::command(0x08, 100));
    queue.close();
    let mut sink = VecSink(Vec::new());
    let end = relay.relay(subscription, &mut sink).await;

    // Assert
    assert_eq!(end, RelayEnd::SourceClosed);
    assert_eq!(sink.0, vec![Frame::command(0x08, 100)]);
}

#[tokio::test]
async fn test_detach_closes_running_mode() {
    // Arrange
    let broker = MemoryBroker::default();
    let relay = relay_with(&broker, Arc::new(NoopStore));
    relay.service().open_mode(StreamMode::Oscilloscope).await.unwrap();

    // Act
    relay.detach("gone").await;

    // Assert
    assert_eq!(published(&broker).last(), Some(&CLOSE_OSCILLOSCOPE));
    assert_eq!(relay.service().status().await.current_mode, None);
}

// ── WebSocket end to end ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_websocket_session_requests_telemetry_and_release() {
    // Arrange: server on an ephemeral port
    let broker = MemoryBroker::default();
    let relay = relay_with(&broker, Arc::new(NoopStore));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(serve(listener, relay, shutdown_rx));

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();

    // Act 1: open the oscilloscope
    ws.send(WsMessage::Text(r#"{"type":"OpenMode","mode":"occ"}"#.to_string()))
        .await
        .unwrap();
    let reply = ws.next().await.unwrap().unwrap();

    // Assert 1
    let reply: ServerMessage = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert_eq!(
        reply,
        ServerMessage::Accepted {
            frames: vec!["080001fe".to_string()]
        }
    );

    // Act 2: invalid JSON is skipped, the session stays usable
    ws.send(WsMessage::Text("{not json".to_string())).await.unwrap();
    broker.telemetry_queue().push(Frame::command(0x08, 0x0123));
    let telemetry = ws.next().await.unwrap().unwrap();

    // Assert 2
    let telemetry: ServerMessage = serde_json::from_str(telemetry.to_text().unwrap()).unwrap();
    assert_eq!(
        telemetry,
        ServerMessage::Telemetry {
            frame: "080123fe".to_string()
        }
    );

    // Act 3: the client leaves
    ws.close(None).await.unwrap();
    eventually(|| published(&broker).len() == 2).await;

    // Assert 3: the abandoned oscilloscope was closed
    assert_eq!(published(&broker)[1], CLOSE_OSCILLOSCOPE);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
}
