//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::MediaConstraints;

/// Top-level peekcam configuration, read from a JSON5 file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Constraints used for the first acquisition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaConstraints>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detector: Option<DetectorConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    /// Devices exposed by the virtual capture backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<VirtualDevicesConfig>,
}

/// Speaking-activity detector tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Normalized level (0..1) a poll must exceed to count as speaking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    /// Poll interval in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Base level, e.g. "debug". `--verbose` and `RUST_LOG` take precedence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "peekcam_media=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualDevicesConfig {
    #[serde(default)]
    pub cameras: Vec<VirtualDeviceConfig>,

    #[serde(default)]
    pub microphones: Vec<VirtualDeviceConfig>,

    /// Reject every stream request with a permission error.
    #[serde(default)]
    pub deny_permission: bool,

    /// Make device enumeration fail.
    #[serde(default)]
    pub fail_enumeration: bool,
}

/// One virtual capture device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualDeviceConfig {
    pub id: String,

    #[serde(default)]
    pub label: String,

    /// Delay before a stream request for this device resolves.
    #[serde(default)]
    pub latency_ms: u64,

    /// Frequency-bin level (0..255) script for microphones, one entry per
    /// analysis read, cycled.
    #[serde(default)]
    pub levels: Vec<u8>,
}

impl VirtualDeviceConfig {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            latency_ms: 0,
            levels: Vec::new(),
        }
    }
}

impl VirtualDevicesConfig {
    /// A built-in camera and a microphone that alternates speech and silence.
    pub fn builtin() -> Self {
        let mut mic = VirtualDeviceConfig::new("mic-0", "Built-in Microphone");
        mic.levels = vec![0, 2, 4, 30, 42, 55, 48, 36, 20, 6, 2, 0];
        Self {
            cameras: vec![VirtualDeviceConfig::new("cam-0", "Built-in Camera")],
            microphones: vec![mic],
            deny_permission: false,
            fail_enumeration: false,
        }
    }
}

/// Expand `${NAME}` references; unset variables become empty.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Read a JSON5 config. A missing file yields the defaults.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::PeekcamError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json5")
    }

    /// Constraints for the first acquisition (audio and video by default).
    pub fn initial_constraints(&self) -> MediaConstraints {
        self.media.clone().unwrap_or_default()
    }

    /// Detector threshold used by the preview (default: 0.05).
    pub fn detector_threshold(&self) -> f64 {
        self.detector
            .as_ref()
            .and_then(|d| d.threshold)
            .unwrap_or(0.05)
    }

    /// Detector poll interval used by the preview (default: 50ms).
    pub fn detector_interval_ms(&self) -> u64 {
        self.detector
            .as_ref()
            .and_then(|d| d.interval_ms)
            .unwrap_or(50)
    }

    /// Virtual devices, falling back to the built-in pair.
    pub fn virtual_devices(&self) -> VirtualDevicesConfig {
        self.devices
            .clone()
            .unwrap_or_else(VirtualDevicesConfig::builtin)
    }

    /// Get a config value by dotted path (e.g. "detector.threshold").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Returns `(warnings, errors)`.
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(detector) = &self.detector {
            if let Some(threshold) = detector.threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    errors.push(format!(
                        "Detector threshold {threshold} is outside 0..1"
                    ));
                }
            }
            if detector.interval_ms == Some(0) {
                warnings.push(
                    "Detector interval_ms is 0, the default interval will be used".to_string(),
                );
            }
        }

        if let Some(devices) = &self.devices {
            if devices.cameras.is_empty() && devices.microphones.is_empty() {
                warnings.push("No virtual devices configured".to_string());
            }
            for dev in devices.cameras.iter().chain(&devices.microphones) {
                if dev.id.is_empty() {
                    errors.push("Virtual device with empty id".to_string());
                }
            }
        }

        if let Some(logging) = &self.logging {
            if logging.format != "plain" && logging.format != "json" {
                errors.push(format!("Unknown log format '{}'", logging.format));
            }
            if logging.output != "stderr" && logging.output != "stdout" {
                errors.push(format!("Unknown log output '{}'", logging.output));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for peekcam data: `~/.peekcam/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".peekcam")
}
