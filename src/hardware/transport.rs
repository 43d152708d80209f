//! Device transport capabilities.
//!
//! The core never talks to a vendor object model directly. A camera unit is
//! reached through [`CameraTransport`], a register-style property interface with
//! blocking start-exposure / poll-ready semantics. A laser unit is reached through
//! [`LaserTransport`], a byte-stream port that carries ASCII commands.
//!
//! Property names are a closed enum rather than strings so that a typo is a
//! compile error instead of a driver fault.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::camera::RawFrame;

/// Camera registers the session reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraProperty {
    /// Link state (read-only)
    Connected,
    /// Whether this unit is the main camera of the host
    IsMainCamera,
    /// Fan mode, see [`FanMode`]
    FanMode,
    /// CCD cooler on/off
    CoolerOn,
    /// Whether the unit supports a cooling setpoint (read-only)
    CanSetCcdTemperature,
    /// Cooling setpoint in °C
    SetCcdTemperature,
    /// Current CCD temperature in °C (read-only)
    CcdTemperature,
    /// Gain setting, see [`Gain`]
    CameraGain,
    /// Manual shutter control on/off
    ManualShutterMode,
    /// Manual shutter position
    ManualShutterOpen,
    /// See [`ShutterPriority`]
    ShutterPriority,
    /// See [`ReadoutSpeed`]
    ReadoutSpeed,
    /// Readout origin column
    StartX,
    /// Readout origin row
    StartY,
    /// Frame width in binned pixels
    NumX,
    /// Frame height in binned pixels
    NumY,
    /// Horizontal bin factor
    BinX,
    /// Vertical bin factor
    BinY,
}

impl fmt::Display for CameraProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Value carried by a camera property.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    /// Flag
    Bool(bool),
    /// Integer register
    Int(i64),
    /// Floating point register
    Float(f64),
    /// Fan mode
    Fan(FanMode),
    /// Gain setting
    Gain(Gain),
    /// Shutter priority
    ShutterPriority(ShutterPriority),
    /// Readout speed
    Readout(ReadoutSpeed),
}

impl PropertyValue {
    /// Interpret the value as a boolean flag.
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            PropertyValue::Bool(b) => Some(b),
            PropertyValue::Int(i) => Some(i != 0),
            _ => None,
        }
    }

    /// Interpret the value as a floating point number.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            PropertyValue::Float(v) => Some(v),
            PropertyValue::Int(i) => Some(i as f64),
            _ => None,
        }
    }
}

/// Camera fan mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    /// Fan stopped
    Off,
    /// Reduced speed
    Quiet,
    /// Full speed, used while cooling
    Full,
}

/// Camera gain setting. The lab always runs the sensor at low gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gain {
    /// High gain
    High,
    /// Low gain
    #[default]
    Low,
}

/// Whether shutter timing is governed electrically or mechanically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutterPriority {
    /// Timing set by the mechanical shutter
    Mechanical,
    /// Timing set electronically
    #[default]
    Electrical,
}

/// Sensor digitization rate trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadoutSpeed {
    /// Slow, low-noise readout (register value 0)
    #[default]
    Quality,
    /// Fast readout (register value 1)
    Fast,
}

/// Register-style access to one camera unit.
#[async_trait]
pub trait CameraTransport: Send {
    /// Try to establish the link. Returns the link state after the attempt.
    async fn connect(&mut self) -> Result<bool>;

    /// Current link state.
    async fn is_connected(&mut self) -> Result<bool>;

    async fn get_property(&mut self, property: CameraProperty) -> Result<PropertyValue>;

    async fn set_property(&mut self, property: CameraProperty, value: PropertyValue) -> Result<()>;

    /// Start an exposure. Returns once the device accepted the command.
    async fn start_exposure(&mut self, duration: Duration, shutter_open: bool) -> Result<()>;

    /// Whether the last started exposure has been read out.
    async fn is_image_ready(&mut self) -> Result<bool>;

    /// Fetch the image of the last completed exposure.
    async fn read_image(&mut self) -> Result<RawFrame>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// Byte-stream port of a laser unit.
#[async_trait]
pub trait LaserTransport: Send {
    async fn open_port(&mut self) -> Result<()>;

    /// Write one ASCII command. The terminator is supplied by the caller.
    async fn write_ascii(&mut self, command: &str) -> Result<()>;

    /// Read whatever the device has sent since the last read.
    async fn read_ascii(&mut self) -> Result<String>;

    async fn close_port(&mut self) -> Result<()>;
}
