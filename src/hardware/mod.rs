//! Hardware transports.
//!
//! [`transport`] defines the capability traits the rest of the crate is written
//! against. [`mock`] provides in-memory implementations; [`serial`] talks to a
//! real laser over RS-232 when the `instrument_serial` feature is enabled.

pub mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;
pub mod transport;

pub use mock::{CallKind, MockCamera, MockLaserPort, TransportCall};
#[cfg(feature = "instrument_serial")]
pub use serial::SerialLaserPort;
pub use transport::{
    CameraProperty, CameraTransport, FanMode, Gain, LaserTransport, PropertyValue, ReadoutSpeed,
    ShutterPriority,
};
