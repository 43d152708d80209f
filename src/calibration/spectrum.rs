//! Centred 2-D spatial-frequency spectrum of a diffraction image.

use std::fmt;

use ndarray::Array2;
use num_complex::Complex;
use rustfft::FftPlanner;
use tracing::debug;

use crate::camera::Frame;
use crate::error::{AppResult, DaqError};

/// Normalized spectrum magnitude, square with side `2^resolution`.
pub type Spectrum = Array2<f64>;

/// Side length of the padded field for a resolution exponent.
pub fn field_size(resolution: u32) -> AppResult<usize> {
    match resolution {
        11 | 12 => Ok(1usize << resolution),
        other => Err(DaqError::InvalidArgument(format!(
            "spectrum resolution {other} must be 11 or 12"
        ))),
    }
}

/// Computes spectra, keeping FFT plans between calls.
///
/// All transforms run on the calling thread, so a given input always produces
/// the same bits.
pub struct SpectralCalibrator {
    planner: FftPlanner<f64>,
}

impl Default for SpectralCalibrator {
    fn default() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }
}

impl fmt::Debug for SpectralCalibrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralCalibrator").finish_non_exhaustive()
    }
}

impl SpectralCalibrator {
    /// Calibrator with an empty plan cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Embed `image` centred in an `N x N` zero field, transform, shift the
    /// zero frequency to `(N/2, N/2)` and normalize the magnitude to `[0, 1]`.
    pub fn compute_spectrum(&mut self, image: &Frame, resolution: u32) -> AppResult<Spectrum> {
        let n = field_size(resolution)?;
        let (rows, cols) = image.dim();
        if rows > n || cols > n {
            return Err(DaqError::ImageTooLarge { rows, cols, n });
        }
        if image.iter().any(|v| !v.is_finite()) {
            return Err(DaqError::InvalidArgument(
                "image contains non-finite pixels".to_string(),
            ));
        }
        if image.iter().all(|&v| v == 0.0) {
            return Ok(Spectrum::zeros((n, n)));
        }

        let row0 = (n - rows) / 2;
        let col0 = (n - cols) / 2;
        let mut field = vec![Complex::new(0.0, 0.0); n * n];
        for ((r, c), &v) in image.indexed_iter() {
            field[(row0 + r) * n + col0 + c] = Complex::new(v, 0.0);
        }

        let fft = self.planner.plan_fft_forward(n);

        // rows; rows outside the embedded image stay zero
        fft.process(&mut field[row0 * n..(row0 + rows) * n]);

        // columns, as rows of the transpose
        let mut transposed = vec![Complex::new(0.0, 0.0); n * n];
        for r in 0..n {
            for c in 0..n {
                transposed[c * n + r] = field[r * n + c];
            }
        }
        drop(field);
        fft.process(&mut transposed);

        // transposed[kc * n + kr] holds F[kr][kc]
        let half = n / 2;
        let mut spectrum = Spectrum::from_shape_fn((n, n), |(i, j)| {
            let kr = (i + half) % n;
            let kc = (j + half) % n;
            transposed[kc * n + kr].norm()
        });

        let max = spectrum.iter().copied().fold(0.0_f64, f64::max);
        if max > 0.0 {
            spectrum.mapv_inplace(|v| v / max);
        } else {
            spectrum.fill(0.0);
        }
        debug!(n, rows, cols, peak = max, "spectrum computed");
        Ok(spectrum)
    }
}

/// One-off spectrum with a fresh planner.
pub fn compute_spectrum(image: &Frame, resolution: u32) -> AppResult<Spectrum> {
    SpectralCalibrator::new().compute_spectrum(image, resolution)
}
