//! Optical calibration: spectrum, peak fitting and the laser correction step.

pub mod gaussian;
pub mod laser_loop;
pub mod peaks;
pub mod spectrum;

pub use gaussian::{fit_gaussian_2d, GaussianParams};
pub use laser_loop::{compute_correction, CalibrationOutcome, CurrentCorrection, LaserCalibrationLoop};
pub use peaks::{CalibrationResult, LocateMode, PeakFit, PeakLocator, PeakWindow, PeakWindows};
pub use spectrum::{compute_spectrum, SpectralCalibrator, Spectrum};
