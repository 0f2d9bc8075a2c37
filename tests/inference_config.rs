use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use vending_inference::config::InferenceConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "INFERENCE_CONFIG",
        "INFERENCE_IMAGE_DIR",
        "INFERENCE_MODEL_PATH",
        "INFERENCE_CONFIDENCE",
        "INFERENCE_SKU_MAPPING",
        "INFERENCE_LIVE_ADDR",
        "MQTT_BROKER_ADDR",
        "MQTT_CLIENT_ID",
        "MQTT_USERNAME",
        "MQTT_PASSWORD",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "image_dir": "/srv/vending/images",
        "sku_mapping": "/etc/vending/skumapping.json",
        "model": {
            "path": "/opt/models/product-detection.onnx",
            "confidence": 0.7,
            "width": 640,
            "height": 480
        },
        "mqtt": {
            "addr": "edgex-mqtt-broker:1883",
            "client_id": "cv-inference-2"
        },
        "live": {
            "addr": "127.0.0.1:9105"
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("INFERENCE_CONFIG", file.path());
    std::env::set_var("INFERENCE_CONFIDENCE", "0.9");
    std::env::set_var("MQTT_BROKER_ADDR", "localhost:1884");

    let cfg = InferenceConfig::load().expect("load config");

    assert_eq!(cfg.image_dir, PathBuf::from("/srv/vending/images"));
    assert_eq!(cfg.sku_mapping, PathBuf::from("/etc/vending/skumapping.json"));
    assert_eq!(
        cfg.model.path,
        PathBuf::from("/opt/models/product-detection.onnx")
    );
    assert_eq!(cfg.model.confidence, 0.9);
    assert_eq!((cfg.model.width, cfg.model.height), (640, 480));
    assert_eq!(cfg.mqtt.addr, "localhost:1884");
    assert_eq!(cfg.mqtt.client_id, "cv-inference-2");
    assert_eq!(cfg.live_addr, "127.0.0.1:9105");

    clear_env();
}

#[test]
fn rejects_invalid_confidence_from_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("INFERENCE_CONFIDENCE", "high");
    assert!(InferenceConfig::load().is_err());

    std::env::set_var("INFERENCE_CONFIDENCE", "1.2");
    assert!(InferenceConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_fatal() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("INFERENCE_CONFIG", "/nonexistent/inference.json");
    let err = InferenceConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
