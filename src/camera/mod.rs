//! Camera unit model and session control.

pub mod frame;
pub mod geometry;
pub mod session;

pub use frame::{peak_value, Frame, RawFrame};
pub use geometry::{DeviceHandle, ExposureGeometry};
pub use session::{CameraConfig, CameraSession, CameraState, SessionGuard};
