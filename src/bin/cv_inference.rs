//! cv_inference - door-cycle product inference service
//!
//! This daemon:
//! 1. Loads the SKU mapping, frame directory and detection model (fatal on error)
//! 2. Runs the door-cycle session on a dedicated thread
//! 3. Bridges door commands and SKU deltas over MQTT
//! 4. Serves the annotated current frame as an MJPEG stream

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use vending_inference::config::InferenceConfig;
use vending_inference::detect::Detector;
use vending_inference::transport::{parse_mqtt_endpoint, MqttBridge, MqttBridgeConfig};
use vending_inference::{
    DoorLatch, EventBus, FrameSource, LiveServer, LiveView, Session, SessionConfig, SkuMapping,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Door-cycle product inference service")]
struct Args {
    /// Images directory.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// MQTT broker address.
    #[arg(long)]
    mqtt: Option<String>,

    /// ONNX model file path.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Confidence threshold.
    #[arg(long)]
    confidence: Option<f64>,

    /// SKU mapping JSON file path.
    #[arg(long)]
    sku_mapping: Option<PathBuf>,

    /// Live view listen address.
    #[arg(long)]
    live_addr: Option<String>,
}

impl Args {
    fn apply(self, cfg: &mut InferenceConfig) {
        if let Some(dir) = self.dir {
            cfg.image_dir = dir;
        }
        if let Some(addr) = self.mqtt {
            cfg.mqtt.addr = addr;
        }
        if let Some(model) = self.model {
            cfg.model.path = model;
        }
        if let Some(confidence) = self.confidence {
            cfg.model.confidence = confidence;
        }
        if let Some(path) = self.sku_mapping {
            cfg.sku_mapping = path;
        }
        if let Some(addr) = self.live_addr {
            cfg.live_addr = addr;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = InferenceConfig::load()?;
    args.apply(&mut cfg);
    cfg.validate()?;

    let sku_mapping = SkuMapping::load(&cfg.sku_mapping)?;
    log::info!(
        "loaded {} sku mappings from {}",
        sku_mapping.len(),
        cfg.sku_mapping.display()
    );
    let frames = FrameSource::from_directory(&cfg.image_dir)?;
    let mut detector = load_detector(&cfg)?;
    detector.warm_up()?;
    let endpoint = parse_mqtt_endpoint(&cfg.mqtt.addr)?;

    let live = LiveView::new();
    let live_handle = LiveServer::new(cfg.live_addr.clone(), live.clone()).spawn()?;
    log::info!("live view listening on {}", live_handle.addr);

    let shutdown = Arc::new(AtomicBool::new(false));
    let (stop_tx, stop_rx) = mpsc::channel();

    let bus = EventBus::new();
    let session_config = SessionConfig::new(cfg.model.confidence as f32, sku_mapping);
    let session = Session::new(session_config, frames, detector);
    let channels = bus
        .session
        .with_live_view(live)
        .with_shutdown(shutdown.clone());
    let session_stop = stop_tx.clone();
    let session_thread = std::thread::spawn(move || {
        let result = session.run(channels);
        let _ = session_stop.send(());
        result
    });

    let bridge = MqttBridge::new(MqttBridgeConfig {
        endpoint,
        client_id: cfg.mqtt.client_id.clone(),
        username: cfg.mqtt.username.clone(),
        password: cfg.mqtt.password.clone(),
    })
    .spawn(bus.door_signals, bus.deltas, Arc::new(DoorLatch::new()))?;

    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    log::info!("cv_inference running (Ctrl-C to stop)");
    let _ = stop_rx.recv();
    log::info!("stopping");
    shutdown.store(true, Ordering::SeqCst);

    bridge.stop()?;
    live_handle.stop()?;
    session_thread
        .join()
        .map_err(|_| anyhow!("session thread panicked"))?
}

#[cfg(feature = "backend-tract")]
fn load_detector(cfg: &InferenceConfig) -> Result<vending_inference::detect::TractDetector> {
    let detector = vending_inference::detect::TractDetector::new(
        &cfg.model.path,
        cfg.model.width,
        cfg.model.height,
    )?;
    log::info!("loaded detection model {}", cfg.model.path.display());
    Ok(detector)
}

#[cfg(not(feature = "backend-tract"))]
fn load_detector(cfg: &InferenceConfig) -> Result<vending_inference::StubDetector> {
    Err(anyhow!(
        "cannot load {}: model inference requires the backend-tract feature",
        cfg.model.path.display()
    ))
}
