use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::vision::Roi;

/// Errors loading calibration files at startup. Always fatal for the process.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid color range '{color}': {reason}")]
    InvalidRange { color: String, reason: String },
    #[error("color range table is empty")]
    NoRanges,
}

/// Read a whole calibration file.
pub fn read_file(path: &std::path::Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Environment prefix for config overrides (`TRAY_MIN_REGION_AREA=3000` etc).
pub const ENV_PREFIX: &str = "TRAY_";

/// All station parameters. Defaults match the physical tray rig; any field may be
/// overridden from `TRAY_*` environment variables at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrayCfg {
    // message bus
    pub broker_host: String,
    pub broker_port: u16,
    pub keep_alive_secs: u64,
    pub client_id_prefix: String,
    pub bus_buffer: usize,

    // calibration files
    pub hsv_ranges_path: PathBuf,
    pub emotion_map_path: Option<PathBuf>,

    // tray region of interest (pixels, half-open)
    pub roi_x1: u32,
    pub roi_y1: u32,
    pub roi_x2: u32,
    pub roi_y2: u32,

    // detection
    pub min_region_area: usize,
    pub debounce_frames: u32,
    pub max_emotions: usize,
    pub settle_frames: u32,
    pub frame_interval_ms: u64,

    // prompting
    pub prompt_timeout_ms: u64,

    // shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for TrayCfg {
    fn default() -> Self {
        Self {
            broker_host: "test.mosquitto.org".into(),
            broker_port: 1883,
            keep_alive_secs: 60,
            client_id_prefix: "tray".into(),
            bus_buffer: 64,
            hsv_ranges_path: PathBuf::from("config/hsv_ranges.json"),
            emotion_map_path: None,
            roi_x1: 100,
            roi_y1: 150,
            roi_x2: 1140,
            roi_y2: 800,
            min_region_area: 2500,
            debounce_frames: 4,
            max_emotions: 3,
            settle_frames: 8,
            frame_interval_ms: 250,
            prompt_timeout_ms: 15_000,
            shutdown_timeout_secs: 5,
        }
    }
}

impl TrayCfg {
    /// Defaults overridden by any `TRAY_*` variables in the process environment.
    pub fn from_env() -> Self {
        let map: HashMap<String, String> = std::env::vars()
            .filter_map(|(k, v)| {
                k.strip_prefix(ENV_PREFIX)
                    .map(|key| (key.to_ascii_lowercase(), v))
            })
            .collect();
        Self::from_map(&map)
    }

    /// Build from a key → value map. Missing or unparsable keys keep their default.
    pub fn from_map(m: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            broker_host: get_or(m, "broker_host", d.broker_host),
            broker_port: get_or(m, "broker_port", d.broker_port),
            keep_alive_secs: get_or(m, "keep_alive_secs", d.keep_alive_secs),
            client_id_prefix: get_or(m, "client_id_prefix", d.client_id_prefix),
            bus_buffer: get_or(m, "bus_buffer", d.bus_buffer),
            hsv_ranges_path: get_or(m, "hsv_ranges_path", d.hsv_ranges_path),
            emotion_map_path: m
                .get("emotion_map_path")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .or(d.emotion_map_path),
            roi_x1: get_or(m, "roi_x1", d.roi_x1),
            roi_y1: get_or(m, "roi_y1", d.roi_y1),
            roi_x2: get_or(m, "roi_x2", d.roi_x2),
            roi_y2: get_or(m, "roi_y2", d.roi_y2),
            min_region_area: get_or(m, "min_region_area", d.min_region_area),
            debounce_frames: get_or(m, "debounce_frames", d.debounce_frames),
            max_emotions: get_or(m, "max_emotions", d.max_emotions),
            settle_frames: get_or(m, "settle_frames", d.settle_frames),
            frame_interval_ms: get_or(m, "frame_interval_ms", d.frame_interval_ms),
            prompt_timeout_ms: get_or(m, "prompt_timeout_ms", d.prompt_timeout_ms),
            shutdown_timeout_secs: get_or(m, "shutdown_timeout_secs", d.shutdown_timeout_secs),
        }
    }

    pub fn roi(&self) -> Roi {
        Roi::new(self.roi_x1, self.roi_y1, self.roi_x2, self.roi_y2)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Key, value, description triples, logged once at startup.
    pub fn to_entries(&self) -> Vec<(&str, String, &str)> {
        vec![
            ("broker_host", self.broker_host.clone(), "MQTT broker host"),
            ("broker_port", self.broker_port.to_string(), "MQTT broker port"),
            ("keep_alive_secs", self.keep_alive_secs.to_string(), "MQTT keep-alive seconds"),
            ("client_id_prefix", self.client_id_prefix.clone(), "MQTT client id prefix"),
            ("bus_buffer", self.bus_buffer.to_string(), "Inbound queue capacity"),
            ("hsv_ranges_path", self.hsv_ranges_path.display().to_string(), "Color range table"),
            (
                "emotion_map_path",
                self.emotion_map_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(built-in)".into()),
                "Color to emotion table",
            ),
            ("roi", format!("{:?}", self.roi()), "Tray region of interest"),
            ("min_region_area", self.min_region_area.to_string(), "Minimum region area px"),
            ("debounce_frames", self.debounce_frames.to_string(), "Frames before a color is trusted"),
            ("max_emotions", self.max_emotions.to_string(), "Emotion set cap"),
            ("settle_frames", self.settle_frames.to_string(), "Quiet frames before a partial set is sent"),
            ("frame_interval_ms", self.frame_interval_ms.to_string(), "Frame sampling interval ms"),
            ("prompt_timeout_ms", self.prompt_timeout_ms.to_string(), "Prompt generator timeout ms"),
            ("shutdown_timeout_secs", self.shutdown_timeout_secs.to_string(), "Bus disconnect timeout seconds"),
        ]
    }

    pub fn log_summary(&self) {
        for (key, value, desc) in self.to_entries() {
            tracing::debug!(key, value = %value, desc, "config");
        }
    }
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
