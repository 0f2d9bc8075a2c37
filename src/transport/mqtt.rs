//! MQTT bridge between the broker and the event bus.
//!
//! Three threads:
//! - the connection loop, which drives rumqttc and forwards command publishes;
//! - the command worker, which replies and sends door signals (blocking on the
//!   session, never on the connection loop);
//! - the delta publisher, which drains the delta channel.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Event, Incoming, MqttOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::bus::{DeltaReceiver, DoorLatch, DoorSignalSender};
use crate::session::DoorState;
use crate::transport::commands::{self, COMMAND_SUBSCRIPTION};

pub const DEFAULT_CLIENT_ID: &str = "ds-cv-inference";
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 10;

/// Parsed broker address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
}

/// Parse `host:port`, `[ipv6]:port`, `mqtt://host:port` or `tcp://host:port`.
pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut remainder = addr.trim();
    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }
    let (host, port) = split_host_port(remainder)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    Ok(MqttEndpoint { host, port })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid MQTT port in {}", addr))?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))?;
    Ok((host.to_string(), port))
}

/// Turns door commands into door signals, ignoring repeated opens.
pub struct DoorCommandRouter {
    door_signals: DoorSignalSender,
    latch: Arc<DoorLatch>,
}

impl DoorCommandRouter {
    pub fn new(door_signals: DoorSignalSender, latch: Arc<DoorLatch>) -> Self {
        Self {
            door_signals,
            latch,
        }
    }

    /// Forward a door transition to the session.
    ///
    /// Returns `Ok(false)` when an open was ignored because the door already
    /// was open. Blocks until the session accepts the signal.
    pub fn route(&self, door: DoorState) -> Result<bool> {
        match door {
            DoorState::Open => {
                if !self.latch.try_open() {
                    log::info!("door is already open");
                    return Ok(false);
                }
            }
            DoorState::Closed => self.latch.close(),
        }
        self.door_signals.send(door)?;
        Ok(true)
    }
}

#[derive(Clone, Debug)]
pub struct MqttBridgeConfig {
    pub endpoint: MqttEndpoint,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Handle on a running bridge.
pub struct MqttBridgeHandle {
    client: Client,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl MqttBridgeHandle {
    /// Disconnect from the broker and wait for the connection loop to end.
    ///
    /// The command worker and delta publisher end on their own once the
    /// session stops.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(err) = self.client.disconnect() {
            log::debug!("mqtt disconnect: {}", err);
        }
        if !self.threads.is_empty() {
            let connection = self.threads.remove(0);
            connection
                .join()
                .map_err(|_| anyhow!("mqtt connection thread panicked"))?;
        }
        Ok(())
    }
}

pub struct MqttBridge {
    config: MqttBridgeConfig,
}

impl MqttBridge {
    pub fn new(config: MqttBridgeConfig) -> Self {
        Self { config }
    }

    pub fn spawn(
        self,
        door_signals: DoorSignalSender,
        deltas: DeltaReceiver,
        latch: Arc<DoorLatch>,
    ) -> Result<MqttBridgeHandle> {
        let endpoint = &self.config.endpoint;
        let mut options = MqttOptions::new(&self.config.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = &self.config.username {
            options.set_credentials(user, self.config.password.clone().unwrap_or_default());
        }
        let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
        log::info!(
            "connecting to MQTT broker {}:{} as {}",
            endpoint.host,
            endpoint.port,
            self.config.client_id
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let (command_tx, command_rx) = mpsc::channel::<(String, Vec<u8>)>();

        let loop_client = client.clone();
        let loop_shutdown = shutdown.clone();
        let connection_thread = std::thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        log::info!("connected to MQTT broker");
                        match loop_client.try_subscribe(COMMAND_SUBSCRIPTION, QoS::AtMostOnce) {
                            Ok(()) => log::info!("subscribed to {}", COMMAND_SUBSCRIPTION),
                            Err(e) => log::error!("failed to subscribe: {}", e),
                        }
                    }
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        let topic = match std::str::from_utf8(&publish.topic) {
                            Ok(topic) => topic.to_string(),
                            Err(e) => {
                                log::warn!("skipping publish with invalid topic: {}", e);
                                continue;
                            }
                        };
                        if command_tx.send((topic, publish.payload.to_vec())).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if loop_shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        log::error!("MQTT connection error: {}. Reconnecting...", e);
                        std::thread::sleep(RECONNECT_DELAY);
                    }
                }
            }
            log::info!("MQTT connection loop stopped");
        });

        let router = DoorCommandRouter::new(door_signals, latch);
        let worker_client = client.clone();
        let command_thread = std::thread::spawn(move || {
            for (topic, payload) in command_rx {
                if let Err(e) = process_command(&worker_client, &router, &topic, &payload) {
                    log::warn!("failed to process command on {}: {}", topic, e);
                }
            }
        });

        let publish_client = client.clone();
        let delta_thread = std::thread::spawn(move || {
            while let Ok(deltas) = deltas.recv() {
                if let Err(e) = publish_deltas(&publish_client, &deltas) {
                    log::warn!("failed to publish sku delta: {}", e);
                }
            }
            log::info!("delta publisher stopped");
        });

        Ok(MqttBridgeHandle {
            client,
            shutdown,
            threads: vec![connection_thread, command_thread, delta_thread],
        })
    }
}

fn process_command(
    client: &Client,
    router: &DoorCommandRouter,
    topic: &str,
    payload: &[u8],
) -> Result<()> {
    let Some(outcome) = commands::handle_command(topic, payload)? else {
        return Ok(());
    };
    client.publish(
        outcome.reply_topic.as_str(),
        QoS::AtMostOnce,
        false,
        outcome.reply,
    )?;
    if let Some(door) = outcome.door {
        router.route(door)?;
    }
    Ok(())
}

fn publish_deltas(client: &Client, deltas: &[u8]) -> Result<()> {
    let Some(envelope) = commands::delta_envelope(deltas)? else {
        return Ok(());
    };
    log::info!("publishing sku delta {}", String::from_utf8_lossy(deltas));
    client.publish(commands::delta_topic(), QoS::AtMostOnce, false, envelope)?;
    Ok(())
}
