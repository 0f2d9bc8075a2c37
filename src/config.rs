use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_IMAGE_DIR: &str = "./images";
const DEFAULT_MODEL_PATH: &str = "product-detection-0001/product-detection-0001.onnx";
const DEFAULT_CONFIDENCE: f64 = 0.85;
const DEFAULT_SKU_MAPPING: &str = "skumapping.json";
const DEFAULT_MQTT_ADDR: &str = "localhost:1883";
const DEFAULT_MQTT_CLIENT_ID: &str = "ds-cv-inference";
const DEFAULT_LIVE_ADDR: &str = "0.0.0.0:9005";
const DEFAULT_FRAME_WIDTH: u32 = 900;
const DEFAULT_FRAME_HEIGHT: u32 = 700;

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    image_dir: Option<PathBuf>,
    sku_mapping: Option<PathBuf>,
    model: Option<ModelConfigFile>,
    mqtt: Option<MqttConfigFile>,
    live: Option<LiveConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    confidence: Option<f64>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    addr: Option<String>,
    client_id: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LiveConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub image_dir: PathBuf,
    pub sku_mapping: PathBuf,
    pub model: ModelSettings,
    pub mqtt: MqttSettings,
    pub live_addr: String,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub confidence: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub addr: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self::from_file(InferenceConfigFile::default())
    }
}

impl InferenceConfig {
    /// Defaults, then the JSON file named by `INFERENCE_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("INFERENCE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: InferenceConfigFile) -> Self {
        let model = file.model.unwrap_or_default();
        let mqtt = file.mqtt.unwrap_or_default();
        Self {
            image_dir: file
                .image_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_DIR)),
            sku_mapping: file
                .sku_mapping
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SKU_MAPPING)),
            model: ModelSettings {
                path: model
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                confidence: model.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                width: model.width.unwrap_or(DEFAULT_FRAME_WIDTH),
                height: model.height.unwrap_or(DEFAULT_FRAME_HEIGHT),
            },
            mqtt: MqttSettings {
                addr: mqtt.addr.unwrap_or_else(|| DEFAULT_MQTT_ADDR.to_string()),
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
                username: mqtt.username,
                password: mqtt.password,
            },
            live_addr: file
                .live
                .and_then(|live| live.addr)
                .unwrap_or_else(|| DEFAULT_LIVE_ADDR.to_string()),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = non_empty_env("INFERENCE_IMAGE_DIR") {
            self.image_dir = PathBuf::from(dir);
        }
        if let Some(path) = non_empty_env("INFERENCE_MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(confidence) = non_empty_env("INFERENCE_CONFIDENCE") {
            self.model.confidence = confidence
                .parse()
                .map_err(|_| anyhow!("INFERENCE_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Some(path) = non_empty_env("INFERENCE_SKU_MAPPING") {
            self.sku_mapping = PathBuf::from(path);
        }
        if let Some(addr) = non_empty_env("MQTT_BROKER_ADDR") {
            self.mqtt.addr = addr;
        }
        if let Some(client_id) = non_empty_env("MQTT_CLIENT_ID") {
            self.mqtt.client_id = client_id;
        }
        if let Some(username) = non_empty_env("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = non_empty_env("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        if let Some(addr) = non_empty_env("INFERENCE_LIVE_ADDR") {
            self.live_addr = addr;
        }
        Ok(())
    }

    /// Check invariants. Also called by the binary after CLI overrides.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.model.confidence) {
            return Err(anyhow!(
                "confidence threshold must be within 0..=1, got {}",
                self.model.confidence
            ));
        }
        if self.image_dir.as_os_str().is_empty() {
            return Err(anyhow!("image directory must not be empty"));
        }
        if self.sku_mapping.as_os_str().is_empty() {
            return Err(anyhow!("sku mapping path must not be empty"));
        }
        if self.model.width == 0 || self.model.height == 0 {
            return Err(anyhow!("model input size must be non-zero"));
        }
        if self.mqtt.client_id.trim().is_empty() {
            return Err(anyhow!("mqtt client id must not be empty"));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<InferenceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
