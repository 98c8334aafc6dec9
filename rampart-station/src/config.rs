//! Station configuration: one TOML file naming every device link plus
//! the video sources. Missing or malformed configuration is fatal.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use rampart_comms::LinkConfig;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct VideoSourceConfig {
    /// Directory of decoded frames; absent means this camera feed is
    /// not attached (bench configurations).
    pub frame_dir: Option<PathBuf>,
    pub fps: Option<f64>,
    pub crop_left: u32,
    pub crop_right: u32,
    pub crop_top: u32,
    pub crop_bottom: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StationConfig {
    pub zones_file: PathBuf,
    /// YOLOv8 ONNX weights; detection stays disabled without them.
    pub detector_model: Option<PathBuf>,
    pub joystick_uuid: Option<String>,

    pub day_camera: LinkConfig,
    pub night_camera: LinkConfig,
    pub lrf: LinkConfig,
    pub imu: LinkConfig,
    pub plc21: LinkConfig,
    pub plc42: LinkConfig,
    pub servo_az: LinkConfig,
    pub servo_el: LinkConfig,
    pub actuator: LinkConfig,
    pub radar: LinkConfig,

    pub day_video: VideoSourceConfig,
    pub night_video: VideoSourceConfig,
}

impl Default for StationConfig {
    fn default() -> Self {
        StationConfig {
            zones_file: PathBuf::from("zones.json"),
            detector_model: None,
            joystick_uuid: None,
            day_camera: link("/dev/ttyUSB0", 9600, 500, 10_000, 500),
            night_camera: link("/dev/ttyUSB1", 57600, 500, 10_000, 1000),
            lrf: link("/dev/ttyUSB2", 115200, 600, 10_000, 1000),
            imu: link("/dev/ttyUSB3", 115200, 500, 3_000, 50),
            plc21: link("/dev/ttyUSB4", 19200, 500, 3_000, 50),
            plc42: link("/dev/ttyUSB5", 19200, 500, 3_000, 50),
            servo_az: link("/dev/ttyUSB6", 115200, 500, 5_000, 20),
            servo_el: link("/dev/ttyUSB7", 115200, 500, 5_000, 20),
            actuator: link("/dev/ttyUSB8", 115200, 1000, 5_000, 500),
            radar: link("/dev/ttyUSB9", 4800, 500, 15_000, 1000),
            day_video: VideoSourceConfig::default(),
            night_video: VideoSourceConfig::default(),
        }
    }
}

fn link(port: &str, baud: u32, timeout_ms: u64, watchdog_ms: u64, poll_interval_ms: u64) -> LinkConfig {
    LinkConfig {
        port: port.to_string(),
        baud,
        timeout_ms,
        watchdog_ms,
        poll_interval_ms,
        ..LinkConfig::default()
    }
}

impl StationConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", path.display()))?;
        let config: StationConfig = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("malformed config {}: {e}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let toml_text = r#"
            zones_file = "site-zones.json"

            [lrf]
            port = "/dev/ttyS3"
            baud = 115200

            [imu]
            port = "/dev/ttyS4"
            modbus_slave_id = 7
        "#;
        let config: StationConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.zones_file, PathBuf::from("site-zones.json"));
        assert_eq!(config.lrf.port, "/dev/ttyS3");
        assert_eq!(config.imu.modbus_slave_id, 7);
        // Untouched sections keep their defaults.
        assert_eq!(config.plc21.baud, 19200);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<StationConfig>("no_such_key = 1").is_err());
    }

    #[test]
    fn load_missing_file_is_fatal() {
        assert!(StationConfig::load(Path::new("/nonexistent/rampart.toml")).is_err());
    }
}
