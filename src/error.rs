//! Custom error types for the library.
//!
//! This module defines the primary error type, `DaqError`, shared by the camera
//! session, the acquisition pipeline, the calibration engine and the laser
//! controller. Using the `thiserror` crate, it provides a centralized and
//! consistent way to report everything from a missing device link to a
//! Gaussian fit that failed to converge.
//!
//! ## Error Hierarchy
//!
//! - **Session guards** (`NotConnected`, `InvalidState`): a command was issued in a
//!   state that does not allow it. No transport call has been made.
//! - **Argument errors** (`InvalidArgument`, `InvalidGeometry`, `UnsupportedResolution`,
//!   `ImageTooLarge`): rejected synchronously before any device mutation.
//! - **Device errors** (`DeviceUnavailable`, `Transport`, `ExposureTimeout`): the hardware
//!   (or its driver) misbehaved. Mid-exposure failures fault the session and need
//!   an explicit `reset()`.
//! - **Data errors** (`Saturation`, `GeometryMismatch`): the frame is not usable.
//! - **Calibration errors** (`WindowOutOfBounds`, `FitDivergence`, `DegeneratePeak`): the
//!   calibration attempt is aborted and the laser keeps its last good current.
//! - **Ambient** (`Config`, `Configuration`, `Io`, `ShutdownFailed`, `Cancelled`).
//!
//! A current request that exceeds a channel limit during calibration is not an
//! error; it is reported as a [`crate::laser::CurrentClamped`] warning.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    /// Command issued on a `Disabled` session
    #[error("Camera session is not connected")]
    NotConnected,

    /// The device did not answer or refused the link
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Argument rejected before any device traffic
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Readout window outside the sensor
    #[error("Invalid exposure geometry: {0}")]
    InvalidGeometry(String),

    /// Two frames that must share a shape do not
    #[error("Geometry mismatch: expected {expected:?} (rows, cols), got {actual:?}")]
    GeometryMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// A pixel exceeded the saturation threshold
    #[error("Detector saturated: peak {peak_counts} counts exceeds limit of {threshold}")]
    Saturation { peak_counts: f64, threshold: f64 },

    /// The image never became ready
    #[error("Exposure did not complete within {timeout_ms} ms")]
    ExposureTimeout { timeout_ms: u128 },

    /// Gaussian fit failed to converge
    #[error("Gaussian fit did not converge after {iterations} iterations")]
    FitDivergence { iterations: usize },

    #[error(
        "Fit window of size {window} centred at ({x}, {y}) falls outside the {rows}x{cols} spectrum"
    )]
    /// Fit window leaves the spectrum
    WindowOutOfBounds {
        x: usize,
        y: usize,
        window: usize,
        rows: usize,
        cols: usize,
    },

    /// Secondary peak too small to derive a current scale
    #[error("Secondary peak height {height} cannot be used to compute a current scale")]
    DegeneratePeak { height: f64 },

    /// No peak preset for this resolution
    #[error("Unsupported spectrum resolution 2^{0}; expected 11 or 12")]
    UnsupportedResolution(u32),

    /// Image larger than the padded spectrum field
    #[error("Image of {rows}x{cols} does not fit into a {n}x{n} field")]
    ImageTooLarge { rows: usize, cols: usize, n: usize },

    /// Command not allowed in the current session state
    #[error("Cannot {operation} while camera is {state}")]
    InvalidState {
        operation: &'static str,
        state: crate::camera::CameraState,
    },

    /// Cancelled through a `CancelToken`
    #[error("Operation cancelled")]
    Cancelled,

    /// Transport-level failure with its context chain
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Loaded configuration failed validation
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// One or more teardown steps failed
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<DaqError>),
}

impl DaqError {
    /// Wrap a transport-level failure, keeping the full context chain.
    pub fn transport(err: anyhow::Error) -> Self {
        DaqError::Transport(format!("{err:#}"))
    }
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraState;

    #[test]
    fn test_error_display() {
        let err = DaqError::UnsupportedResolution(10);
        assert_eq!(
            err.to_string(),
            "Unsupported spectrum resolution 2^10; expected 11 or 12"
        );
    }

    #[test]
    fn test_invalid_state_names_state() {
        let err = DaqError::InvalidState {
            operation: "expose",
            state: CameraState::Error,
        };
        assert_eq!(err.to_string(), "Cannot expose while camera is Error");
    }

    #[test]
    fn test_transport_keeps_context() {
        let inner = anyhow::anyhow!("port closed").context("write failed");
        let err = DaqError::transport(inner);
        assert_eq!(err.to_string(), "Transport error: write failed: port closed");
    }

    #[test]
    fn test_shutdown_failed_error() {
        let err = DaqError::ShutdownFailed(vec![
            DaqError::Transport("shutter stuck".into()),
            DaqError::NotConnected,
        ]);
        assert!(err.to_string().contains("Shutdown failed"));
    }
}
