//! Calibrated frame acquisition.
//!
//! averaged exposure → saturation check → dark subtraction → 90° rotation → centred crop

use std::time::Duration;

use ndarray::{s, Axis};
use tracing::{debug, instrument};

use crate::acquisition::dark;
use crate::camera::{peak_value, CameraSession, Frame};
use crate::config::AcquisitionSettings;
use crate::error::{AppResult, DaqError};
use crate::hardware::CameraTransport;

/// Turns raw exposures into calibrated, oriented frames.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionPipeline {
    settings: AcquisitionSettings,
}

impl AcquisitionPipeline {
    /// Pipeline with the given thresholds and sizes.
    pub fn new(settings: AcquisitionSettings) -> Self {
        Self { settings }
    }

    /// Settings in effect.
    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// Average `n_average` exposures, reject saturation, subtract `dark`,
    /// rotate and crop.
    ///
    /// The session lock is held for the whole acquisition.
    #[instrument(skip(self, session, dark), err)]
    pub async fn acquire_calibrated_frame<T: CameraTransport>(
        &self,
        session: &CameraSession<T>,
        exptime: Duration,
        n_average: usize,
        dark: &Frame,
    ) -> AppResult<Frame> {
        let raw = session
            .lock()
            .await
            .expose_averaged(exptime, n_average)
            .await?;

        check_saturation(&raw, self.settings.saturation_threshold)?;
        let corrected = subtract_dark(raw, dark)?;
        let rotated = rotate_ccw(&corrected);

        match self.settings.output_size {
            Some(size) => crop_centered(&rotated, size),
            None => Ok(rotated),
        }
    }

    /// Averaged closed-shutter frame for `(exptime, bin)`, cached per session.
    #[instrument(skip(self, session), err)]
    pub async fn capture_dark_frame<T: CameraTransport>(
        &self,
        session: &CameraSession<T>,
        exptime: Duration,
        n_average: usize,
        bin: (u32, u32),
    ) -> AppResult<Frame> {
        let mut guard = session.lock().await;
        dark::dark_frame(
            &mut guard,
            self.settings.dark_frame_size,
            exptime,
            n_average,
            bin,
        )
        .await
    }

    /// [`capture_dark_frame`](Self::capture_dark_frame) with the configured
    /// average count.
    pub async fn default_dark_frame<T: CameraTransport>(
        &self,
        session: &CameraSession<T>,
        exptime: Duration,
        bin: (u32, u32),
    ) -> AppResult<Frame> {
        self.capture_dark_frame(session, exptime, self.settings.dark_frame_count, bin)
            .await
    }
}

/// Fail if any pixel exceeds `threshold`.
pub fn check_saturation(frame: &Frame, threshold: f64) -> AppResult<()> {
    match peak_value(frame) {
        Some(peak) if peak > threshold => Err(DaqError::Saturation {
            peak_counts: peak,
            threshold,
        }),
        _ => Ok(()),
    }
}

/// Pixel-wise `frame - dark`.
pub fn subtract_dark(frame: Frame, dark: &Frame) -> AppResult<Frame> {
    if frame.dim() != dark.dim() {
        return Err(DaqError::GeometryMismatch {
            expected: frame.dim(),
            actual: dark.dim(),
        });
    }
    Ok(frame - dark)
}

/// Rotate 90° counter-clockwise: `out[i][j] = in[j][W-1-i]`.
pub fn rotate_ccw(frame: &Frame) -> Frame {
    let mut view = frame.view().reversed_axes();
    view.invert_axis(Axis(0));
    view.to_owned()
}

/// Inclusive crop bounds relative to the centre index for one axis.
///
/// Even sizes are one pixel heavier on the positive side.
pub fn crop_bounds(size: usize) -> (i64, i64) {
    let half = (size / 2) as i64;
    if size % 2 == 0 {
        (-half + 1, half)
    } else {
        (-half, half)
    }
}

/// Crop a `(width, height)` window around the centre pixel.
///
/// The centre index of an axis of length `dim` is `(dim - 1) / 2`, so an even
/// crop of an even axis is symmetric about the geometric centre.
pub fn crop_centered(frame: &Frame, size: (usize, usize)) -> AppResult<Frame> {
    let (width, height) = size;
    if width == 0 || height == 0 {
        return Err(DaqError::InvalidArgument(format!(
            "crop size {width}x{height} must be non-empty"
        )));
    }

    let (rows, cols) = frame.dim();
    let row_range = axis_range(rows, height)?;
    let col_range = axis_range(cols, width)?;
    debug!(?row_range, ?col_range, "crop");

    Ok(frame
        .slice(s![row_range.0..row_range.1, col_range.0..col_range.1])
        .to_owned())
}

/// Half-open index range of a centred crop along an axis of length `dim`.
fn axis_range(dim: usize, size: usize) -> AppResult<(usize, usize)> {
    let (lo, hi) = crop_bounds(size);
    let centre = (dim.saturating_sub(1) / 2) as i64;
    let start = centre + lo;
    let end = centre + hi + 1;
    if start < 0 || end > dim as i64 {
        return Err(DaqError::InvalidArgument(format!(
            "crop of {size} pixels does not fit an axis of {dim}"
        )));
    }
    Ok((start as usize, end as usize))
}
