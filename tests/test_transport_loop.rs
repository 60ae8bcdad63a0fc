//! Transport loop behavior against a scripted session
//!
//! Tests run on a paused clock so backoff delays and event wait timeouts are
//! exact:
//! - First connection failure with and without retry
//! - Backoff pattern between attempts and reconnect after a lost session
//! - One tick per iteration, bounded events per iteration
//! - Outbound queue drained before disconnect on shutdown

use std::time::Duration;
use tokio::sync::watch;
use trv_bridge::cloud::CloudDevice;
use trv_bridge::radio::{self, RadioReading};
use trv_bridge::testing::{test_bridge_config, MockCloud, MockSession};
use trv_bridge::transport::{
    InboundMessage, LoopHandler, LoopOptions, Outbox, TransportError, TransportLoop,
};
use trv_bridge::TrvBridge;

/// Handler that records every callback and can request shutdown after a
/// number of ticks
#[derive(Default)]
struct RecordingHandler {
    log: Vec<String>,
    connects: usize,
    ticks: usize,
    stop_after_ticks: Option<usize>,
    shutdown: Option<watch::Sender<bool>>,
    publish_on_stop: Vec<String>,
    fail_on_message: bool,
}

impl RecordingHandler {
    fn stopping_after(ticks: usize, shutdown: watch::Sender<bool>) -> Self {
        Self {
            stop_after_ticks: Some(ticks),
            shutdown: Some(shutdown),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl LoopHandler for RecordingHandler {
    type Error = std::io::Error;

    fn subscriptions(&self) -> Vec<String> {
        vec!["home/test/#".to_string()]
    }

    async fn on_connected(&mut self, _outbox: &mut Outbox) -> Result<(), Self::Error> {
        self.connects += 1;
        self.log.push("connected".to_string());
        Ok(())
    }

    async fn on_tick(&mut self, outbox: &mut Outbox) -> Result<(), Self::Error> {
        self.ticks += 1;
        self.log.push("tick".to_string());

        if self.stop_after_ticks == Some(self.ticks) {
            for (i, payload) in self.publish_on_stop.iter().enumerate() {
                outbox.publish(format!("home/test/{i}"), payload.clone(), false);
            }
            if let Some(shutdown) = &self.shutdown {
                let _ = shutdown.send(true);
            }
        }
        Ok(())
    }

    async fn on_message(
        &mut self,
        message: InboundMessage,
        _outbox: &mut Outbox,
    ) -> Result<(), Self::Error> {
        if self.fail_on_message {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "bad message"));
        }
        self.log.push(format!("message:{}", message.topic));
        Ok(())
    }
}

fn options(retry_first_connection: bool) -> LoopOptions {
    LoopOptions {
        retry_first_connection,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_connection_failure_is_fatal_without_retry() {
    let (session, recorder) = MockSession::new();
    recorder.fail_next_connects(1);
    let (tx, rx) = watch::channel(false);
    let mut handler = RecordingHandler::stopping_after(1, tx);

    let result = TransportLoop::new(session, options(false), rx)
        .run(&mut handler)
        .await;

    assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    assert_eq!(recorder.connect_attempts(), 1);
    assert_eq!(handler.connects, 0);
    assert_eq!(handler.ticks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_first_connection_retried_with_backoff() {
    let (session, recorder) = MockSession::new();
    recorder.fail_next_connects(3);
    let (tx, rx) = watch::channel(false);
    let mut handler = RecordingHandler::stopping_after(1, tx);

    TransportLoop::new(session, options(true), rx)
        .run(&mut handler)
        .await
        .unwrap();

    let times = recorder.connect_times();
    assert_eq!(times.len(), 4);
    assert_eq!(times[1] - times[0], Duration::from_millis(250));
    assert_eq!(times[2] - times[1], Duration::from_millis(500));
    assert_eq!(times[3] - times[2], Duration::from_millis(1000));

    assert_eq!(recorder.subscriptions(), vec![vec!["home/test/#".to_string()]]);
    assert_eq!(handler.connects, 1);
    assert_eq!(recorder.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lost_session_reconnects_and_resubscribes() {
    let (session, recorder) = MockSession::new();
    recorder.send_message("home/test/a", "1");
    recorder.lose_connection();
    let (tx, rx) = watch::channel(false);
    let mut handler = RecordingHandler::stopping_after(2, tx);

    TransportLoop::new(session, options(false), rx)
        .run(&mut handler)
        .await
        .unwrap();

    let times = recorder.connect_times();
    assert_eq!(times.len(), 2);
    assert_eq!(times[1] - times[0], Duration::from_millis(250));
    assert_eq!(recorder.subscriptions().len(), 2);
    assert_eq!(
        handler.log,
        vec!["connected", "tick", "message:home/test/a", "connected", "tick"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_broker_disconnect_triggers_reconnect() {
    let (session, recorder) = MockSession::new();
    recorder.broker_disconnect();
    let (tx, rx) = watch::channel(false);
    let mut handler = RecordingHandler::stopping_after(2, tx);

    TransportLoop::new(session, options(false), rx)
        .run(&mut handler)
        .await
        .unwrap();

    assert_eq!(recorder.connect_attempts(), 2);
    assert_eq!(handler.connects, 2);
}

#[tokio::test(start_paused = true)]
async fn test_one_tick_per_iteration_with_bounded_events() {
    let (session, recorder) = MockSession::new();
    for topic in ["a", "b", "c", "d", "e"] {
        recorder.send_message(&format!("home/test/{topic}"), "x");
    }
    let (tx, rx) = watch::channel(false);
    let mut handler = RecordingHandler::stopping_after(3, tx);

    let options = LoopOptions {
        max_events_per_iteration: 2,
        ..Default::default()
    };
    TransportLoop::new(session, options, rx)
        .run(&mut handler)
        .await
        .unwrap();

    assert_eq!(
        handler.log,
        vec![
            "connected",
            "tick",
            "message:home/test/a",
            "message:home/test/b",
            "tick",
            "message:home/test/c",
            "message:home/test/d",
            "tick",
            "message:home/test/e",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_outbox_before_disconnect() {
    let (session, recorder) = MockSession::new();
    recorder.set_capacity(1);
    let (tx, rx) = watch::channel(false);
    let mut handler = RecordingHandler::stopping_after(1, tx);
    handler.publish_on_stop = vec!["one".to_string(), "two".to_string(), "three".to_string()];

    TransportLoop::new(session, options(false), rx)
        .run(&mut handler)
        .await
        .unwrap();

    let payloads: Vec<String> = recorder.published().into_iter().map(|m| m.payload).collect();
    assert_eq!(payloads, vec!["one", "two", "three"]);
    assert_eq!(recorder.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_backoff() {
    let (session, recorder) = MockSession::new();
    recorder.fail_next_connects(100);
    let (tx, rx) = watch::channel(false);
    let mut handler = RecordingHandler::default();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        let _ = tx.send(true);
    });

    TransportLoop::new(session, options(true), rx)
        .run(&mut handler)
        .await
        .unwrap();

    // Attempts at 0, 0.25, 0.75 and 1.75s; the 2s wait is cut short
    assert_eq!(recorder.connect_attempts(), 4);
    assert_eq!(recorder.disconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_handler_error_stops_the_loop() {
    let (session, recorder) = MockSession::new();
    recorder.send_message("home/test/a", "1");
    let (_tx, rx) = watch::channel(false);
    let mut handler = RecordingHandler {
        fail_on_message: true,
        ..Default::default()
    };

    let result = TransportLoop::new(session, options(false), rx)
        .run(&mut handler)
        .await;

    assert!(matches!(result, Err(TransportError::Handler(_))));
}

#[tokio::test(start_paused = true)]
async fn test_bridge_runs_over_scripted_session() {
    let config = test_bridge_config(&[("lounge", 8220, 4411, 0.0)]);
    let cloud = MockCloud::with_devices(vec![CloudDevice::new(4411, Some(20.0))]);
    let (radio, handle) = radio::channel(8);
    let mut bridge = TrvBridge::new(&config, cloud, radio).unwrap();

    let (session, recorder) = MockSession::new();
    let (tx, rx) = watch::channel(false);
    let mut transport = TransportLoop::new(session, LoopOptions::from_config(&config.mqtt), rx);
    bridge.start(transport.outbox_mut()).await;

    handle
        .report(RadioReading {
            radio_id: 8220,
            temperature: 18.0,
        })
        .unwrap();
    recorder.send_message("home/lounge/trv/set", "21");

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let _ = tx.send(true);
    });

    transport.run(&mut bridge).await.unwrap();

    assert!(recorder.subscriptions()[0].contains(&"home/lounge/trv/set".to_string()));
    assert_eq!(recorder.published_on("constants/auto"), vec!["Auto"]);
    assert_eq!(recorder.published_on("home/lounge/trv/current"), vec!["18"]);
    assert_eq!(recorder.published_on("home/lounge/trv/target"), vec!["21"]);
    assert_eq!(
        recorder.published_on("home/nest/call_for_heat").last().map(String::as_str),
        Some("on")
    );
    assert_eq!(bridge.cloud_api().target_writes().await, vec![(4411, 22.0)]);
    assert_eq!(recorder.disconnects(), 1);
}
