//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::f64::consts::PI;

use fpwc_daq::calibration::Spectrum;
use fpwc_daq::camera::{CameraConfig, CameraSession, DeviceHandle, ExposureGeometry, Frame};
use fpwc_daq::config::PollingSettings;
use fpwc_daq::hardware::MockCamera;

/// Polling that gives up quickly when the mock never becomes ready.
pub fn fast_polling() -> PollingSettings {
    PollingSettings {
        initial_interval_ms: 1,
        max_interval_ms: 4,
        timeout_margin_ms: 200,
    }
}

/// Connected and configured session on a mock camera.
pub async fn configured_session(
    camera: &MockCamera,
    geometry: ExposureGeometry,
) -> CameraSession<MockCamera> {
    let session =
        CameraSession::with_polling(DeviceHandle::default(), camera.clone(), fast_polling());
    session.connect().await.expect("connect");
    session
        .configure(CameraConfig::new(-15.0, geometry))
        .await
        .expect("configure");
    session
}

/// Add an isotropic Gaussian bump, evaluated within 6 sigma of its centre.
pub fn add_bump(spectrum: &mut Spectrum, x: f64, y: f64, height: f64, sigma: f64) {
    let (rows, cols) = spectrum.dim();
    let reach = (6.0 * sigma).ceil() as isize;
    for r in (y as isize - reach)..=(y as isize + reach) {
        for c in (x as isize - reach)..=(x as isize + reach) {
            if r < 0 || c < 0 || r as usize >= rows || c as usize >= cols {
                continue;
            }
            let dx = c as f64 - x;
            let dy = r as f64 - y;
            spectrum[[r as usize, c as usize]] +=
                height * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
        }
    }
}

/// Spectrum of side `2^resolution` with bumps at the auto-preset positions.
pub fn two_peak_spectrum(resolution: u32, center_height: f64, secondary_height: f64) -> Spectrum {
    let n = 1usize << resolution;
    let k = f64::from(1u32 << (resolution - 11));
    let mut spectrum = Spectrum::zeros((n, n));
    add_bump(&mut spectrum, 1025.0 * k, 1025.0 * k, center_height, 6.0 * k);
    add_bump(&mut spectrum, 950.0 * k, 1025.0 * k, secondary_height, 3.0 * k);
    spectrum
}

/// Square frame of Gaussian-windowed cosine fringes that vary with the row
/// index, as a diffraction grating imaged on the bench.
pub fn row_grating(size: usize, cycles_per_pixel: f64) -> Frame {
    let centre = (size as f64 - 1.0) / 2.0;
    let sigma = size as f64 / 8.0;
    Frame::from_shape_fn((size, size), |(r, c)| {
        let dr = r as f64 - centre;
        let dc = c as f64 - centre;
        let window = (-(dr * dr + dc * dc) / (2.0 * sigma * sigma)).exp();
        window * (1.0 + (2.0 * PI * cycles_per_pixel * r as f64).cos())
    })
}
