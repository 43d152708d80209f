//! Dark frame capture and caching.
//!
//! A dark frame is an averaged closed-shutter exposure. Captures are cached in
//! the owning session's locked state, keyed by the dark geometry, the exposure
//! time and the bin factors.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::camera::{CameraState, ExposureGeometry, Frame, SessionGuard};
use crate::error::{AppResult, DaqError};
use crate::hardware::{CameraTransport, ReadoutSpeed, ShutterPriority};

/// Cache key of one dark frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DarkFrameKey {
    /// Readout window of the dark exposures
    pub geometry: ExposureGeometry,
    /// Exposure time of each sub-exposure
    pub exposure: Duration,
    /// Bin factors `(bx, by)`
    pub bin: (u32, u32),
}

/// Dark frames captured by one session.
#[derive(Debug, Default)]
pub struct DarkFrameCache {
    frames: HashMap<DarkFrameKey, Frame>,
}

impl DarkFrameCache {
    /// Cached frame for `key`, if any.
    pub fn get(&self, key: &DarkFrameKey) -> Option<&Frame> {
        self.frames.get(key)
    }

    /// Store `frame` under `key`, replacing an older capture.
    pub fn insert(&mut self, key: DarkFrameKey, frame: Frame) {
        self.frames.insert(key, frame);
    }

    /// Drop every cached frame.
    pub fn clear(&mut self) {
        if !self.frames.is_empty() {
            debug!(count = self.frames.len(), "dark frame cache cleared");
        }
        self.frames.clear();
    }

    /// Number of cached frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frame is cached.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Shutter, priority, readout and geometry in effect before a dark capture.
struct SavedExposureState {
    shutter_open: bool,
    priority: ShutterPriority,
    readout: ReadoutSpeed,
    geometry: Option<ExposureGeometry>,
}

/// Return the cached dark frame for `(size, exptime, bin)` or capture one.
///
/// Capture closes the shutter, switches to mechanical shutter priority and
/// quality readout, applies a `size` window at the sensor origin and averages
/// `n_average` exposures. The previous exposure settings are restored
/// afterwards unless the session faulted.
pub(crate) async fn dark_frame<T: CameraTransport>(
    guard: &mut SessionGuard<'_, T>,
    size: (u32, u32),
    exptime: Duration,
    n_average: usize,
    bin: (u32, u32),
) -> AppResult<Frame> {
    if exptime.is_zero() {
        return Err(DaqError::InvalidArgument(
            "exposure time must be positive".to_string(),
        ));
    }
    if n_average == 0 {
        return Err(DaqError::InvalidArgument(
            "average count must be at least 1".to_string(),
        ));
    }
    match guard.state() {
        CameraState::Configured => {}
        CameraState::Disabled => return Err(DaqError::NotConnected),
        state => {
            return Err(DaqError::InvalidState {
                operation: "capture dark frame",
                state,
            })
        }
    }

    let geometry = ExposureGeometry::new((0, 0), size, bin);
    geometry.validate(guard.handle().sensor_extent)?;

    let key = DarkFrameKey {
        geometry,
        exposure: exptime,
        bin,
    };
    if let Some(frame) = guard.dark_frames().get(&key) {
        debug!(?exptime, ?bin, "dark frame cache hit");
        return Ok(frame.clone());
    }

    info!(?exptime, n_average, ?bin, "Capturing dark frame");
    let saved = SavedExposureState {
        shutter_open: guard.shutter_open(),
        priority: guard.shutter_priority(),
        readout: guard.readout_speed(),
        geometry: guard.geometry(),
    };

    let captured = capture(guard, geometry, exptime, n_average).await;

    if guard.state() == CameraState::Error {
        warn!("camera faulted during dark capture; exposure settings not restored");
        return captured;
    }
    let restored = restore(guard, &saved).await;

    let frame = captured?;
    restored?;
    guard.dark_frames().insert(key, frame.clone());
    Ok(frame)
}

async fn capture<T: CameraTransport>(
    guard: &mut SessionGuard<'_, T>,
    geometry: ExposureGeometry,
    exptime: Duration,
    n_average: usize,
) -> AppResult<Frame> {
    guard.set_shutter(false).await?;
    guard.set_shutter_priority(ShutterPriority::Mechanical).await?;
    guard.set_readout_speed(ReadoutSpeed::Quality).await?;
    guard.set_geometry(geometry).await?;
    guard.expose_averaged_with(exptime, n_average, false).await
}

async fn restore<T: CameraTransport>(
    guard: &mut SessionGuard<'_, T>,
    saved: &SavedExposureState,
) -> AppResult<()> {
    if let Some(geometry) = saved.geometry {
        guard.set_geometry(geometry).await?;
    }
    guard.set_readout_speed(saved.readout).await?;
    guard.set_shutter_priority(saved.priority).await?;
    if saved.shutter_open {
        guard.set_shutter(true).await?;
    }
    Ok(())
}
