//! Command messages driving a live session, without a broker.
//!
//! Mirrors what the MQTT bridge does per message: handle the command, route
//! the door transition, and wrap any resulting delta for publishing.

use std::sync::Arc;
use std::time::Duration;

use vending_inference::transport::{delta_envelope, handle_command, DoorCommandRouter};
use vending_inference::{
    DetectionRecord, DoorLatch, EventBus, FrameRef, FrameSource, Session, SessionConfig,
    SkuMapping, StubDetector,
};

const DOOR_TOPIC: &str = "Inference/CommandTopic/inferenceDoorStatus/set/42";
const BOX: [f32; 4] = [0.2, 0.2, 0.5, 0.5];

fn door_command(router: &DoorCommandRouter, status: &str) -> bool {
    let payload = format!(r#"{{"inferenceDoorStatus":"{}"}}"#, status);
    let outcome = handle_command(DOOR_TOPIC, payload.as_bytes())
        .unwrap()
        .unwrap();
    assert_eq!(outcome.reply_topic, "Inference/ResponseTopic/42");
    router.route(outcome.door.unwrap()).unwrap()
}

#[test]
fn door_commands_produce_delta_envelope() {
    let frames = FrameSource::new(vec![
        FrameRef::new("shelf/0.jpg"),
        FrameRef::new("shelf/1.jpg"),
    ])
    .unwrap();
    let detector = StubDetector::new()
        .with_frame(
            FrameRef::new("shelf/0.jpg"),
            vec![
                DetectionRecord::new(12, 0.9, BOX),
                DetectionRecord::new(12, 0.9, BOX),
            ],
        )
        .with_frame(
            FrameRef::new("shelf/1.jpg"),
            vec![DetectionRecord::new(12, 0.9, BOX)],
        );
    let mapping: SkuMapping = [("pringles", "4900002525")].into_iter().collect();
    let mut config = SessionConfig::new(0.85, mapping);
    config.republish_interval = Duration::from_millis(10);

    let bus = EventBus::new();
    let session = Session::new(config, frames, detector);
    let channels = bus.session;
    let handle = std::thread::spawn(move || session.run(channels));

    let router = DoorCommandRouter::new(bus.door_signals, Arc::new(DoorLatch::new()));
    assert!(door_command(&router, "true"));
    // a repeated open is acknowledged but not forwarded
    assert!(!door_command(&router, "true"));
    assert!(door_command(&router, "false"));

    let deltas = bus
        .deltas
        .recv_timeout(Duration::from_secs(5))
        .unwrap()
        .unwrap();
    let envelope: serde_json::Value =
        serde_json::from_slice(&delta_envelope(&deltas).unwrap().unwrap()).unwrap();
    assert_eq!(envelope["method"], "get");
    assert_eq!(
        envelope["inferenceSkuDelta"],
        r#"[{"SKU":"4900002525","delta":-1}]"#
    );

    drop(router);
    handle.join().unwrap().unwrap();
}

#[test]
fn heartbeat_does_not_touch_the_session() {
    let outcome = handle_command(
        "Inference/CommandTopic/inferenceHeartbeat/get/7",
        br#"{"inferenceHeartbeat":"ping","device":"vending-1"}"#,
    )
    .unwrap()
    .unwrap();
    assert!(outcome.door.is_none());
    let reply: serde_json::Value = serde_json::from_slice(&outcome.reply).unwrap();
    assert_eq!(reply["inferenceHeartbeat"], "inferencePong");
    assert_eq!(reply["device"], "vending-1");
}
