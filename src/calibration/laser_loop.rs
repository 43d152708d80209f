//! Single-shot laser current correction.
//!
//! One measurement, one gain, one actuation: the spectrum of a diffraction
//! image is fitted, the secondary peak height gives the scale that would bring
//! it to the target fraction, and the channel current is multiplied by that
//! scale. Callers wanting convergence call [`LaserCalibrationLoop::calibrate`]
//! again once the optics have settled.

use tracing::{info, warn};

use crate::calibration::peaks::{CalibrationResult, LocateMode, PeakFit, PeakLocator};
use crate::calibration::spectrum::{SpectralCalibrator, Spectrum};
use crate::camera::Frame;
use crate::config::CalibrationSettings;
use crate::error::{AppResult, DaqError};
use crate::hardware::LaserTransport;
use crate::laser::{CurrentClamped, LaserChannel, LaserController};

/// Current update derived from a secondary peak height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentCorrection {
    /// `target / secondary_height`
    pub scale: f64,
    /// Scaled current before clamping
    pub requested_ma: f64,
    /// Current sent to the laser
    pub applied_ma: f64,
    /// Set when the request exceeded the channel maximum
    pub clamped: Option<CurrentClamped>,
}

/// Scale `current_ma` by `target / secondary_height`, clamped to the channel range.
pub fn compute_correction(
    secondary_height: f64,
    target: f64,
    channel: LaserChannel,
    current_ma: f64,
) -> AppResult<CurrentCorrection> {
    if !secondary_height.is_finite() || secondary_height <= 0.0 {
        return Err(DaqError::DegeneratePeak {
            height: secondary_height,
        });
    }

    let scale = target / secondary_height;
    let requested_ma = scale * current_ma;
    let max = channel.max_current_ma();
    let applied_ma = requested_ma.clamp(0.0, max);
    let clamped = (requested_ma > max).then_some(CurrentClamped {
        channel,
        requested_ma,
        applied_ma,
    });

    Ok(CurrentCorrection {
        scale,
        requested_ma,
        applied_ma,
        clamped,
    })
}

/// Result of one calibration step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationOutcome {
    /// Peaks as measured
    pub measured: CalibrationResult,
    /// Scale and currents applied
    pub correction: CurrentCorrection,
    /// Center peak with its height multiplied by the scale
    pub predicted_center: PeakFit,
    /// Secondary peak with its height multiplied by the scale
    pub predicted_secondary: PeakFit,
}

impl CalibrationOutcome {
    /// Scale applied to the channel current.
    pub fn scale(&self) -> f64 {
        self.correction.scale
    }

    /// Clamp warning, if the scaled current was out of range.
    pub fn clamped(&self) -> Option<CurrentClamped> {
        self.correction.clamped
    }
}

/// Spectrum → peaks → scale → laser current.
pub struct LaserCalibrationLoop<P: LaserTransport> {
    calibrator: SpectralCalibrator,
    locator: PeakLocator,
    target_fraction: f64,
    laser: LaserController<P>,
}

impl<P: LaserTransport> LaserCalibrationLoop<P> {
    /// Loop driving `laser` with the given target and fit limits.
    pub fn new(laser: LaserController<P>, settings: &CalibrationSettings) -> Self {
        Self {
            calibrator: SpectralCalibrator::new(),
            locator: PeakLocator::new(settings.max_fit_iterations),
            target_fraction: settings.target_fraction,
            laser,
        }
    }

    /// Controller the corrections are sent to.
    pub fn laser(&self) -> &LaserController<P> {
        &self.laser
    }

    /// Run one correction on `image` for `channel`, currently driven at `current_ma`.
    ///
    /// `image` is a camera frame as acquired; it is transposed before the
    /// spectrum is taken so that the grating axis lines up with the preset
    /// windows. An `Auto` mode must name the same resolution as the call.
    ///
    /// Nothing is sent to the laser unless the spectrum, both fits and the scale
    /// succeed.
    pub async fn calibrate(
        &mut self,
        image: &Frame,
        resolution: u32,
        mode: &LocateMode,
        channel: LaserChannel,
        current_ma: f64,
    ) -> AppResult<CalibrationOutcome> {
        check_current(current_ma)?;
        if let LocateMode::Auto { resolution: preset } = *mode {
            if preset != resolution {
                return Err(DaqError::InvalidArgument(format!(
                    "auto preset for resolution {preset} used on a 2^{resolution} spectrum"
                )));
            }
        }

        let oriented = image.t().to_owned();
        let spectrum = self.calibrator.compute_spectrum(&oriented, resolution)?;
        self.calibrate_spectrum(&spectrum, mode, channel, current_ma)
            .await
    }

    /// [`calibrate`](Self::calibrate) on an already computed spectrum.
    pub async fn calibrate_spectrum(
        &self,
        spectrum: &Spectrum,
        mode: &LocateMode,
        channel: LaserChannel,
        current_ma: f64,
    ) -> AppResult<CalibrationOutcome> {
        check_current(current_ma)?;
        let measured = self.locator.locate_peaks(spectrum, mode)?;
        let correction = compute_correction(
            measured.secondary.height,
            self.target_fraction,
            channel,
            current_ma,
        )?;

        if let Some(clamp) = &correction.clamped {
            warn!(%clamp, "Laser current clamped");
        }
        self.laser.set_current(channel, correction.applied_ma).await?;

        info!(
            %channel,
            scale = correction.scale,
            current_ma = correction.applied_ma,
            "Laser calibrated"
        );
        Ok(CalibrationOutcome {
            measured,
            correction,
            predicted_center: measured.center.scaled(correction.scale),
            predicted_secondary: measured.secondary.scaled(correction.scale),
        })
    }
}

fn check_current(current_ma: f64) -> AppResult<()> {
    if !current_ma.is_finite() || current_ma < 0.0 {
        return Err(DaqError::InvalidArgument(format!(
            "present current {current_ma} mA must be finite and non-negative"
        )));
    }
    Ok(())
}
