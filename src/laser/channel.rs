//! Laser channels and their current limits.

use std::fmt;

use crate::error::{AppResult, DaqError};

/// One output channel of the four-channel diode laser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaserChannel {
    /// Channel 1
    Ch1,
    /// Channel 2
    Ch2,
    /// Channel 3
    Ch3,
    /// Channel 4
    Ch4,
}

impl LaserChannel {
    /// Every channel in device order.
    pub const ALL: [LaserChannel; 4] = [
        LaserChannel::Ch1,
        LaserChannel::Ch2,
        LaserChannel::Ch3,
        LaserChannel::Ch4,
    ];

    /// Channel number as used in device commands (1-4).
    pub fn number(self) -> u8 {
        match self {
            LaserChannel::Ch1 => 1,
            LaserChannel::Ch2 => 2,
            LaserChannel::Ch3 => 3,
            LaserChannel::Ch4 => 4,
        }
    }

    /// Channel for a device number 1-4.
    pub fn from_number(number: u8) -> AppResult<Self> {
        match number {
            1 => Ok(LaserChannel::Ch1),
            2 => Ok(LaserChannel::Ch2),
            3 => Ok(LaserChannel::Ch3),
            4 => Ok(LaserChannel::Ch4),
            other => Err(DaqError::InvalidArgument(format!(
                "laser channel {other} must be 1, 2, 3 or 4"
            ))),
        }
    }

    /// Maximum drive current in mA.
    pub fn max_current_ma(self) -> f64 {
        match self {
            LaserChannel::Ch1 => 68.09,
            LaserChannel::Ch2 => 63.89,
            LaserChannel::Ch3 => 41.59,
            LaserChannel::Ch4 => 67.39,
        }
    }

    fn index(self) -> usize {
        usize::from(self.number() - 1)
    }
}

impl fmt::Display for LaserChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {}", self.number())
    }
}

/// Last current applied to a channel. `current_ma` never exceeds the channel maximum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaserChannelState {
    /// Channel concerned
    pub channel: LaserChannel,
    /// Last current set, in mA
    pub current_ma: f64,
    /// Whether the output is on
    pub enabled: bool,
}

impl LaserChannelState {
    /// Disabled channel at zero current.
    pub fn off(channel: LaserChannel) -> Self {
        Self {
            channel,
            current_ma: 0.0,
            enabled: false,
        }
    }
}

/// State of all four channels.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChannelBank {
    states: [LaserChannelState; 4],
}

impl Default for ChannelBank {
    fn default() -> Self {
        Self {
            states: LaserChannel::ALL.map(LaserChannelState::off),
        }
    }
}

impl ChannelBank {
    pub(crate) fn get(&self, channel: LaserChannel) -> LaserChannelState {
        self.states[channel.index()]
    }

    pub(crate) fn get_mut(&mut self, channel: LaserChannel) -> &mut LaserChannelState {
        &mut self.states[channel.index()]
    }

    pub(crate) fn all(&self) -> [LaserChannelState; 4] {
        self.states
    }

    pub(crate) fn disable_all(&mut self) {
        for state in &mut self.states {
            state.enabled = false;
        }
    }
}

/// A requested current exceeded the channel limit and was clamped.
///
/// Not an error: the clamped current is still applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentClamped {
    /// Channel concerned
    pub channel: LaserChannel,
    /// Current asked for, in mA
    pub requested_ma: f64,
    /// Channel maximum that was applied, in mA
    pub applied_ma: f64,
}

impl fmt::Display for CurrentClamped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} current {:.2} mA clamped to {:.2} mA",
            self.channel, self.requested_ma, self.applied_ma
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_numbers_round_trip() {
        for channel in LaserChannel::ALL {
            assert_eq!(LaserChannel::from_number(channel.number()).unwrap(), channel);
        }
        assert!(LaserChannel::from_number(0).is_err());
        assert!(LaserChannel::from_number(5).is_err());
    }

    #[test]
    fn channel_limits() {
        assert_eq!(LaserChannel::Ch1.max_current_ma(), 68.09);
        assert_eq!(LaserChannel::Ch2.max_current_ma(), 63.89);
        assert_eq!(LaserChannel::Ch3.max_current_ma(), 41.59);
        assert_eq!(LaserChannel::Ch4.max_current_ma(), 67.39);
    }

    #[test]
    fn bank_starts_off() {
        let mut bank = ChannelBank::default();
        assert_eq!(bank.get(LaserChannel::Ch3), LaserChannelState::off(LaserChannel::Ch3));

        bank.get_mut(LaserChannel::Ch2).enabled = true;
        bank.disable_all();
        assert!(bank.all().iter().all(|s| !s.enabled));
    }

    #[test]
    fn clamp_warning_message() {
        let warning = CurrentClamped {
            channel: LaserChannel::Ch3,
            requested_ma: 90.0,
            applied_ma: 41.59,
        };
        assert_eq!(
            warning.to_string(),
            "channel 3 current 90.00 mA clamped to 41.59 mA"
        );
    }
}
