//! Device identity and exposure geometry.

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, DaqError};

/// Identity and factory defaults of one physical camera unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Unit serial number
    pub serial_number: String,
    /// Default readout origin `(x, y)`
    pub default_start: (u32, u32),
    /// Default frame size `(width, height)`
    pub default_frame_size: (u32, u32),
    /// Default bin factors `(bx, by)`
    pub default_bin: (u32, u32),
    /// Native pixel extent of the sensor `(width, height)`
    pub sensor_extent: (u32, u32),
}

impl Default for DeviceHandle {
    /// QSI RS 6.1s used on the bench.
    fn default() -> Self {
        Self {
            serial_number: "00602768".to_string(),
            default_start: (0, 0),
            default_frame_size: (2758, 2208),
            default_bin: (1, 1),
            sensor_extent: (2758, 2208),
        }
    }
}

impl DeviceHandle {
    /// Full-frame geometry built from the unit defaults.
    pub fn default_geometry(&self) -> ExposureGeometry {
        ExposureGeometry {
            start_pos: self.default_start,
            frame_size: self.default_frame_size,
            bin_factor: self.default_bin,
        }
    }
}

/// Readout window of an exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExposureGeometry {
    /// Readout origin `(x, y)` in sensor pixels
    pub start_pos: (u32, u32),
    /// Reported frame size `(width, height)` in binned pixels
    pub frame_size: (u32, u32),
    /// Bin factors `(bx, by)`
    pub bin_factor: (u32, u32),
}

impl ExposureGeometry {
    /// Geometry from origin, size and bin factors.
    pub fn new(start_pos: (u32, u32), frame_size: (u32, u32), bin_factor: (u32, u32)) -> Self {
        Self {
            start_pos,
            frame_size,
            bin_factor,
        }
    }

    /// Shape of frames produced with this geometry, as `(rows, cols)`.
    pub fn frame_shape(&self) -> (usize, usize) {
        (self.frame_size.1 as usize, self.frame_size.0 as usize)
    }

    /// Check the geometry against the native sensor extent.
    ///
    /// Per axis, `start + size * bin` must not exceed the extent; sizes and bin
    /// factors must be at least 1.
    pub fn validate(&self, sensor_extent: (u32, u32)) -> AppResult<()> {
        let axes = [
            ("x", self.start_pos.0, self.frame_size.0, self.bin_factor.0, sensor_extent.0),
            ("y", self.start_pos.1, self.frame_size.1, self.bin_factor.1, sensor_extent.1),
        ];

        for (axis, start, size, bin, extent) in axes {
            if size == 0 {
                return Err(DaqError::InvalidGeometry(format!(
                    "{axis} frame size must be at least 1"
                )));
            }
            if bin == 0 {
                return Err(DaqError::InvalidGeometry(format!(
                    "{axis} bin factor must be at least 1"
                )));
            }

            let end = size
                .checked_mul(bin)
                .and_then(|span| span.checked_add(start))
                .ok_or_else(|| {
                    DaqError::InvalidGeometry(format!("{axis} pixel span overflows"))
                })?;

            if end > extent {
                return Err(DaqError::InvalidGeometry(format!(
                    "{axis} pixels exceed chip range: {start} + {size} * {bin} = {end} > {extent}"
                )));
            }
        }

        Ok(())
    }
}
