//! Peak location on a spectrum by windowed Gaussian fitting.

use ndarray::s;
use tracing::debug;

use crate::calibration::gaussian::fit_gaussian_2d;
use crate::calibration::spectrum::Spectrum;
use crate::error::{AppResult, DaqError};

/// Fitted peak in spectrum coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakFit {
    /// Fitted Gaussian amplitude, in normalized spectrum units
    pub height: f64,
    /// Column index
    pub x: i64,
    /// Row index
    pub y: i64,
}

impl PeakFit {
    /// Same location, height multiplied by `scale`.
    pub fn scaled(&self, scale: f64) -> Self {
        Self {
            height: self.height * scale,
            ..*self
        }
    }
}

/// Primary and secondary peak of one spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationResult {
    /// Zero-order peak
    pub center: PeakFit,
    /// First-order peak used for the current scale
    pub secondary: PeakFit,
}

/// Square fit window centred on `point = (x, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakWindow {
    /// Window centre `(x, y)` in spectrum indices
    pub point: (usize, usize),
    /// Side length in pixels
    pub size: usize,
}

impl PeakWindow {
    /// Window of side `size` around `point`.
    pub fn new(point: (usize, usize), size: usize) -> Self {
        Self { point, size }
    }
}

/// Windows for the center and secondary peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakWindows {
    /// Window around the zero-order peak
    pub center: PeakWindow,
    /// Window around the first-order peak
    pub secondary: PeakWindow,
}

impl PeakWindows {
    /// Bench presets, which scale with `2^resolution`.
    pub fn preset(resolution: u32) -> AppResult<Self> {
        match resolution {
            11 => Ok(Self {
                center: PeakWindow::new((1025, 1025), 85),
                secondary: PeakWindow::new((950, 1025), 34),
            }),
            12 => Ok(Self {
                center: PeakWindow::new((2050, 2050), 170),
                secondary: PeakWindow::new((1900, 2050), 68),
            }),
            other => Err(DaqError::UnsupportedResolution(other)),
        }
    }
}

/// How the fit windows are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateMode {
    /// Caller-supplied windows
    Manual(PeakWindows),
    /// Bench presets for a `2^resolution` spectrum
    Auto { resolution: u32 },
}

impl LocateMode {
    /// Windows to fit in; `UnsupportedResolution` for an unknown preset.
    pub fn windows(&self) -> AppResult<PeakWindows> {
        match *self {
            LocateMode::Manual(windows) => Ok(windows),
            LocateMode::Auto { resolution } => PeakWindows::preset(resolution),
        }
    }
}

/// Fits peaks inside square windows of a spectrum.
#[derive(Debug, Clone, Copy)]
pub struct PeakLocator {
    max_iterations: usize,
}

impl Default for PeakLocator {
    fn default() -> Self {
        Self {
            max_iterations: 200,
        }
    }
}

impl PeakLocator {
    /// Locator with an iteration limit per fit.
    pub fn new(max_iterations: usize) -> Self {
        Self { max_iterations }
    }

    /// Fit one peak in the `window` x `window` square around `point`.
    ///
    /// The window spans `[trunc(p - w/2), trunc(p + w/2))` per axis, rows
    /// first. A flat window yields height 0 at `point`.
    pub fn fit_peak(
        &self,
        spectrum: &Spectrum,
        point: (usize, usize),
        window: usize,
    ) -> AppResult<PeakFit> {
        if window == 0 {
            return Err(DaqError::InvalidArgument(
                "fit window size must be at least 1".to_string(),
            ));
        }

        let (rows, cols) = spectrum.dim();
        let out_of_bounds = || DaqError::WindowOutOfBounds {
            x: point.0,
            y: point.1,
            window,
            rows,
            cols,
        };
        let (row_start, row_end) = window_span(point.1, window, rows).ok_or_else(out_of_bounds)?;
        let (col_start, col_end) = window_span(point.0, window, cols).ok_or_else(out_of_bounds)?;

        let view = spectrum.slice(s![row_start..row_end, col_start..col_end]);
        let (min, max) = view
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if max <= min {
            debug!(?point, window, "flat fit window");
            return Ok(PeakFit {
                height: 0.0,
                x: point.0 as i64,
                y: point.1 as i64,
            });
        }

        let params = fit_gaussian_2d(view, self.max_iterations)?;
        let fit = PeakFit {
            height: params.amplitude,
            x: (col_start as f64 + params.x0).round() as i64,
            y: (row_start as f64 + params.y0).round() as i64,
        };
        debug!(?point, window, ?fit, "peak fitted");
        Ok(fit)
    }

    /// Fit the center and secondary peaks.
    pub fn locate_peaks(&self, spectrum: &Spectrum, mode: &LocateMode) -> AppResult<CalibrationResult> {
        let windows = mode.windows()?;
        let center = self.fit_peak(spectrum, windows.center.point, windows.center.size)?;
        let secondary = self.fit_peak(spectrum, windows.secondary.point, windows.secondary.size)?;
        Ok(CalibrationResult { center, secondary })
    }
}

/// Half-open index span of a window along one axis, `None` if it leaves `[0, dim)`.
fn window_span(centre: usize, window: usize, dim: usize) -> Option<(usize, usize)> {
    let half = window as f64 / 2.0;
    let lo = centre as f64 - half;
    let hi = centre as f64 + half;
    if lo < 0.0 {
        return None;
    }
    let (start, end) = (lo.trunc() as usize, hi.trunc() as usize);
    (end <= dim && end > start).then_some((start, end))
}
