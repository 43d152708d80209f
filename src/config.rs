//! Configuration system using Figment.
//!
//! Settings are loaded from (in order of precedence, highest first):
//! 1. Environment variables prefixed with `FPWC_` (nested keys split on `__`)
//! 2. A TOML file (default: `config/fpwc.toml`)
//! 3. Built-in lab defaults ([`Settings::default`])
//!
//! ```text
//! FPWC_APPLICATION__LOG_LEVEL=debug
//! FPWC_CAMERA__TEMPERATURE_C=-20
//! FPWC_LASER__PORT=/dev/ttyUSB3
//! ```
//!
//! # Example
//!
//! ```no_run
//! use fpwc_daq::config::Settings;
//!
//! let settings = Settings::load_from("config/fpwc.toml")?;
//! println!("Camera serial: {}", settings.camera.handle.serial_number);
//! # Ok::<(), fpwc_daq::error::DaqError>(())
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::camera::{DeviceHandle, ExposureGeometry};
use crate::error::{AppResult, DaqError};
use crate::hardware::{Gain, ShutterPriority};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Name and log level
    pub application: ApplicationConfig,
    /// Camera unit and exposure defaults
    pub camera: CameraSettings,
    /// Frame pipeline
    pub acquisition: AcquisitionSettings,
    /// Laser serial port
    pub laser: LaserSettings,
    /// Laser calibration
    pub calibration: CalibrationSettings,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name, used in log output
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "fpwc-daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Camera unit, cooling and exposure defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Camera unit identity and sensor extent
    pub handle: DeviceHandle,
    /// Cooling setpoint in °C (-50..=50)
    pub temperature_c: f64,
    /// Geometry applied by `configure`
    pub geometry: ExposureGeometry,
    /// Sensor gain
    pub gain: Gain,
    /// Shutter timing mode
    pub shutter_priority: ShutterPriority,
    /// Exposure-completion polling
    pub polling: PollingSettings,
}

impl Default for CameraSettings {
    fn default() -> Self {
        let handle = DeviceHandle::default();
        let geometry = handle.default_geometry();
        Self {
            handle,
            temperature_c: -15.0,
            geometry,
            gain: Gain::Low,
            shutter_priority: ShutterPriority::Electrical,
            polling: PollingSettings::default(),
        }
    }
}

/// Exposure-completion polling.
///
/// The poll interval starts at `initial_interval_ms` and doubles up to
/// `max_interval_ms`. The exposure times out `timeout_margin_ms` after its
/// nominal duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// First poll interval
    pub initial_interval_ms: u64,
    /// Upper bound of the doubling poll interval
    pub max_interval_ms: u64,
    /// Slack added to the exposure time before timing out
    pub timeout_margin_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1,
            max_interval_ms: 50,
            timeout_margin_ms: 30_000,
        }
    }
}

impl PollingSettings {
    /// First poll interval, at least 1 ms.
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms.max(1))
    }

    /// Largest poll interval, never below the first one.
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms.max(self.initial_interval_ms).max(1))
    }

    /// Deadline for an exposure of the given length.
    pub fn timeout_for(&self, exposure: Duration) -> Duration {
        exposure + Duration::from_millis(self.timeout_margin_ms)
    }
}

/// Frame pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Raw counts above which a frame is rejected
    pub saturation_threshold: f64,
    /// Exposures averaged into a dark frame
    pub dark_frame_count: usize,
    /// Dark-frame geometry size `(width, height)`
    pub dark_frame_size: (u32, u32),
    /// Centred crop `(width, height)` after rotation; `None` keeps the full frame
    pub output_size: Option<(usize, usize)>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            saturation_threshold: 3.3e5,
            dark_frame_count: 30,
            dark_frame_size: (500, 500),
            output_size: None,
        }
    }
}

/// Laser serial port and command settle times.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserSettings {
    /// Serial device (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Line speed
    pub baud_rate: u32,
    /// Data bits per character (5-8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Serial read timeout in milliseconds
    pub timeout_ms: u64,
    /// Settle delays after each command
    pub timing: LaserTiming,
}

impl Default for LaserSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            timeout_ms: 1000,
            timing: LaserTiming::default(),
        }
    }
}

/// Device settle delays after each laser command, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserTiming {
    /// After `system=…` (enable / disable)
    pub system_settle_ms: u64,
    /// After `channel=N`
    pub channel_settle_ms: u64,
    /// After `enable=N`
    pub enable_settle_ms: u64,
    /// After `enable=0` when switching a channel off
    pub disable_settle_ms: u64,
    /// After `current=…`
    pub current_settle_ms: u64,
    /// Wait between `statword?` and reading the reply
    pub status_wait_ms: u64,
    /// After reading the status reply
    pub status_settle_ms: u64,
}

impl Default for LaserTiming {
    fn default() -> Self {
        Self {
            system_settle_ms: 3000,
            channel_settle_ms: 2000,
            enable_settle_ms: 2000,
            disable_settle_ms: 1000,
            current_settle_ms: 1000,
            status_wait_ms: 2000,
            status_settle_ms: 1000,
        }
    }
}

impl LaserTiming {
    /// No settle delays; for mock ports.
    pub fn immediate() -> Self {
        Self {
            system_settle_ms: 0,
            channel_settle_ms: 0,
            enable_settle_ms: 0,
            disable_settle_ms: 0,
            current_settle_ms: 0,
            status_wait_ms: 0,
            status_settle_ms: 0,
        }
    }
}

/// Laser calibration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Spectrum resolution exponent (11 or 12)
    pub resolution: u32,
    /// Normalized height the secondary peak is driven to
    pub target_fraction: f64,
    /// Levenberg-Marquardt iteration limit
    pub max_fit_iterations: usize,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            resolution: 12,
            target_fraction: 0.9,
            max_fit_iterations: 200,
        }
    }
}

impl Settings {
    /// Load configuration from `config/fpwc.toml` and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/fpwc.toml")
    }

    /// Load configuration from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    /// The merged result is validated.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("FPWC_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if !(-50.0..=50.0).contains(&self.camera.temperature_c) {
            return Err(DaqError::Configuration(format!(
                "Camera temperature {} °C outside -50..=50",
                self.camera.temperature_c
            )));
        }

        self.camera
            .geometry
            .validate(self.camera.handle.sensor_extent)
            .map_err(|e| DaqError::Configuration(format!("camera.geometry: {e}")))?;

        if !(self.acquisition.saturation_threshold > 0.0) {
            return Err(DaqError::Configuration(
                "acquisition.saturation_threshold must be positive".to_string(),
            ));
        }

        if self.acquisition.dark_frame_count == 0 {
            return Err(DaqError::Configuration(
                "acquisition.dark_frame_count must be at least 1".to_string(),
            ));
        }

        if !matches!(self.calibration.resolution, 11 | 12) {
            return Err(DaqError::Configuration(format!(
                "calibration.resolution {} must be 11 or 12",
                self.calibration.resolution
            )));
        }

        let target = self.calibration.target_fraction;
        if !(target > 0.0 && target <= 1.0) {
            return Err(DaqError::Configuration(format!(
                "calibration.target_fraction {target} must be in (0, 1]"
            )));
        }

        if self.calibration.max_fit_iterations == 0 {
            return Err(DaqError::Configuration(
                "calibration.max_fit_iterations must be at least 1".to_string(),
            ));
        }

        if self.laser.port.is_empty() {
            return Err(DaqError::Configuration(
                "laser.port cannot be empty".to_string(),
            ));
        }

        if !matches!(self.laser.data_bits, 5..=8) {
            return Err(DaqError::Configuration(format!(
                "laser.data_bits {} must be 5-8",
                self.laser.data_bits
            )));
        }

        if !matches!(self.laser.stop_bits, 1 | 2) {
            return Err(DaqError::Configuration(format!(
                "laser.stop_bits {} must be 1 or 2",
                self.laser.stop_bits
            )));
        }

        Ok(())
    }
}
