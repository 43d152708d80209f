//! Four-channel diode laser.

pub mod channel;
pub mod controller;

pub use channel::{CurrentClamped, LaserChannel, LaserChannelState};
pub use controller::LaserController;
