//! Transport layer between the broker and the event bus.
//!
//! `commands` holds the command-topic protocol (parsing, replies, delta
//! envelope) independent of any client; `mqtt` wires it to a rumqttc client.

pub mod commands;
pub mod mqtt;

pub use commands::{
    delta_envelope, delta_topic, handle_command, parse_door_status, CommandOutcome, CommandTopic,
};
pub use mqtt::{
    parse_mqtt_endpoint, DoorCommandRouter, MqttBridge, MqttBridgeConfig, MqttBridgeHandle,
    MqttEndpoint,
};
