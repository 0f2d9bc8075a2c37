//! Command-topic protocol.
//!
//! Commands arrive on `Inference/CommandTopic/<command>/<segment>/<id>`
//! (exactly five segments) with a flat JSON object of string fields as
//! payload. Replies echo the payload on `Inference/ResponseTopic/<id>`.
//! SKU deltas are published on a fixed data topic inside a `get` envelope.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::session::DoorState;

pub const COMMAND_SUBSCRIPTION: &str = "Inference/CommandTopic/#";
pub const RESPONSE_TOPIC: &str = "Inference/ResponseTopic";
pub const DATA_TOPIC: &str = "Inference/DataTopic";
pub const DEVICE_NAME: &str = "Inference-device";

pub const CMD_HEARTBEAT: &str = "inferenceHeartbeat";
pub const CMD_DOOR_STATUS: &str = "inferenceDoorStatus";
pub const CMD_SKU_DELTA: &str = "inferenceSkuDelta";

pub const HEARTBEAT_REPLY: &str = "inferencePong";
pub const DOOR_STATUS_REPLY: &str = "Got it!";

const TOPIC_SEGMENTS: usize = 5;

/// Command message payload. Keys serialize in sorted order.
pub type CommandPayload = BTreeMap<String, String>;

/// Routing fields of a command topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTopic {
    pub command: String,
    pub correlation_id: String,
}

impl CommandTopic {
    pub fn parse(topic: &str) -> Result<Self> {
        let segments: Vec<&str> = topic.split('/').collect();
        if segments.len() != TOPIC_SEGMENTS {
            return Err(anyhow!(
                "command topic must have {} segments: {}",
                TOPIC_SEGMENTS,
                topic
            ));
        }
        Ok(Self {
            command: segments[2].to_string(),
            correlation_id: segments[4].to_string(),
        })
    }

    pub fn response_topic(&self) -> String {
        format!("{}/{}", RESPONSE_TOPIC, self.correlation_id)
    }
}

/// Result of handling one command: a reply to publish and, for door status
/// commands, the door transition to drive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandOutcome {
    pub reply_topic: String,
    pub reply: Vec<u8>,
    pub door: Option<DoorState>,
}

/// Interpret the `inferenceDoorStatus` field: `"true"` opens, `"false"` closes.
pub fn parse_door_status(value: &str) -> Option<DoorState> {
    match value {
        "true" => Some(DoorState::Open),
        "false" => Some(DoorState::Closed),
        _ => None,
    }
}

/// Handle a command message.
///
/// Returns `Ok(None)` for unknown commands, which get no reply.
pub fn handle_command(topic: &str, payload: &[u8]) -> Result<Option<CommandOutcome>> {
    let mut message: CommandPayload = serde_json::from_slice(payload)
        .map_err(|e| anyhow!("failed to parse command payload: {}", e))?;
    let topic = CommandTopic::parse(topic)?;
    log::debug!("received {} command: {:?}", topic.command, message);

    let door = match topic.command.as_str() {
        CMD_HEARTBEAT => {
            message.insert(CMD_HEARTBEAT.to_string(), HEARTBEAT_REPLY.to_string());
            None
        }
        CMD_DOOR_STATUS => {
            let status = message
                .insert(CMD_DOOR_STATUS.to_string(), DOOR_STATUS_REPLY.to_string())
                .unwrap_or_default();
            let door = parse_door_status(&status);
            if door.is_none() {
                log::warn!("ignoring door status {:?}", status);
            }
            door
        }
        other => {
            log::warn!("unknown command {}", other);
            return Ok(None);
        }
    };

    Ok(Some(CommandOutcome {
        reply_topic: topic.response_topic(),
        reply: serde_json::to_vec(&message)?,
        door,
    }))
}

#[derive(Serialize)]
struct DeltaEnvelope<'a> {
    method: &'a str,
    #[serde(rename = "inferenceSkuDelta")]
    sku_delta: &'a str,
}

/// Topic SKU deltas are published on.
pub fn delta_topic() -> String {
    format!("{}/{}/{}", DATA_TOPIC, DEVICE_NAME, CMD_SKU_DELTA)
}

/// Wrap a serialized delta array in the publish envelope.
///
/// Returns `Ok(None)` for an empty array: nothing is published for a cycle
/// without changes.
pub fn delta_envelope(deltas_json: &[u8]) -> Result<Option<Vec<u8>>> {
    let deltas: Vec<serde_json::Value> = serde_json::from_slice(deltas_json)
        .map_err(|e| anyhow!("delta payload is not a JSON array: {}", e))?;
    if deltas.is_empty() {
        return Ok(None);
    }
    let sku_delta = std::str::from_utf8(deltas_json)?;
    let envelope = DeltaEnvelope {
        method: "get",
        sku_delta,
    };
    Ok(Some(serde_json::to_vec(&envelope)?))
}
