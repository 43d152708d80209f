//! Spectrum → peak fit → laser current, end to end on mock hardware.

mod common;

use approx::assert_relative_eq;
use tracing_test::traced_test;

use fpwc_daq::calibration::{
    compute_spectrum, LaserCalibrationLoop, LocateMode, PeakLocator, PeakWindow, PeakWindows,
    Spectrum,
};
use fpwc_daq::camera::Frame;
use fpwc_daq::config::{CalibrationSettings, LaserTiming};
use fpwc_daq::error::DaqError;
use fpwc_daq::hardware::MockLaserPort;
use fpwc_daq::laser::{LaserChannel, LaserController};

use common::{add_bump, row_grating, two_peak_spectrum};

fn calibration_loop(port: &MockLaserPort) -> LaserCalibrationLoop<MockLaserPort> {
    let laser = LaserController::new(port.clone(), LaserTiming::immediate());
    LaserCalibrationLoop::new(laser, &CalibrationSettings::default())
}

#[test]
fn manual_windows_recover_synthetic_peaks() {
    let mut spectrum = Spectrum::zeros((256, 256));
    add_bump(&mut spectrum, 120.0, 131.0, 1.0, 4.0);
    add_bump(&mut spectrum, 60.0, 131.0, 0.42, 2.5);

    let windows = PeakWindows {
        center: PeakWindow::new((118, 128), 40),
        secondary: PeakWindow::new((62, 130), 20),
    };
    let result = PeakLocator::default()
        .locate_peaks(&spectrum, &LocateMode::Manual(windows))
        .unwrap();

    assert_eq!((result.center.x, result.center.y), (120, 131));
    assert_eq!((result.secondary.x, result.secondary.y), (60, 131));
    assert_relative_eq!(result.center.height, 1.0, max_relative = 0.01);
    assert_relative_eq!(result.secondary.height, 0.42, max_relative = 0.01);
}

#[tokio::test]
async fn auto_preset_drives_laser_to_target() {
    let port = MockLaserPort::new();
    let calibration = calibration_loop(&port);
    let spectrum = two_peak_spectrum(11, 1.0, 0.5);

    let outcome = calibration
        .calibrate_spectrum(
            &spectrum,
            &LocateMode::Auto { resolution: 11 },
            LaserChannel::Ch1,
            10.0,
        )
        .await
        .unwrap();

    assert_eq!(
        (outcome.measured.center.x, outcome.measured.center.y),
        (1025, 1025)
    );
    assert_eq!(
        (outcome.measured.secondary.x, outcome.measured.secondary.y),
        (950, 1025)
    );
    assert_relative_eq!(outcome.scale(), 1.8, max_relative = 1e-3);
    assert_relative_eq!(outcome.predicted_secondary.height, 0.9, max_relative = 1e-6);
    assert!(outcome.clamped().is_none());

    assert_eq!(
        port.writes().await,
        vec!["channel=1\r", "enable=1\r", "current=18.00\r"]
    );
    let state = calibration.laser().channel_state(LaserChannel::Ch1).await;
    assert!(state.enabled);
    assert_relative_eq!(state.current_ma, 18.0, max_relative = 1e-3);
}

#[tokio::test]
async fn finer_resolution_preset() {
    let port = MockLaserPort::new();
    let calibration = calibration_loop(&port);
    let spectrum = two_peak_spectrum(12, 1.0, 0.6);

    let outcome = calibration
        .calibrate_spectrum(
            &spectrum,
            &LocateMode::Auto { resolution: 12 },
            LaserChannel::Ch2,
            20.0,
        )
        .await
        .unwrap();

    assert_eq!(
        (outcome.measured.secondary.x, outcome.measured.secondary.y),
        (1900, 2050)
    );
    assert_relative_eq!(outcome.scale(), 1.5, max_relative = 1e-3);
    assert_eq!(
        port.writes().await.last().map(String::as_str),
        Some("current=30.00\r")
    );
}

#[tokio::test]
#[traced_test]
async fn correction_above_channel_limit_is_clamped() {
    let port = MockLaserPort::new();
    let calibration = calibration_loop(&port);
    let spectrum = two_peak_spectrum(11, 1.0, 0.3);

    let outcome = calibration
        .calibrate_spectrum(
            &spectrum,
            &LocateMode::Auto { resolution: 11 },
            LaserChannel::Ch3,
            30.0,
        )
        .await
        .unwrap();

    let clamp = outcome.clamped().expect("current should be clamped");
    assert_eq!(clamp.channel, LaserChannel::Ch3);
    assert_relative_eq!(clamp.requested_ma, 90.0, max_relative = 1e-3);
    assert_eq!(clamp.applied_ma, 41.59);
    assert_eq!(
        port.writes().await,
        vec!["channel=3\r", "enable=3\r", "current=41.59\r"]
    );
    assert!(logs_contain("Laser current clamped"));
}

#[tokio::test]
async fn camera_frame_is_transposed_before_the_spectrum() {
    let port = MockLaserPort::new();
    let mut calibration = calibration_loop(&port);
    let image = row_grating(256, 74.0 / 2048.0);

    // untransposed, the first order sits on the row axis
    let raw = compute_spectrum(&image, 11).unwrap();
    assert_relative_eq!(raw[[950, 1024]], 0.5, max_relative = 1e-3);
    assert!(raw[[1024, 950]] < 1e-3);

    let outcome = calibration
        .calibrate(
            &image,
            11,
            &LocateMode::Auto { resolution: 11 },
            LaserChannel::Ch1,
            10.0,
        )
        .await
        .unwrap();

    assert_eq!(
        (outcome.measured.center.x, outcome.measured.center.y),
        (1024, 1024)
    );
    assert_eq!(
        (outcome.measured.secondary.x, outcome.measured.secondary.y),
        (950, 1024)
    );
    assert_relative_eq!(outcome.measured.secondary.height, 0.5, max_relative = 0.05);
    assert!(outcome.clamped().is_none());
    assert_relative_eq!(outcome.correction.applied_ma, 18.0, max_relative = 0.05);
}

#[tokio::test]
async fn mismatched_auto_preset_is_rejected() {
    let port = MockLaserPort::new();
    let mut calibration = calibration_loop(&port);
    let image = row_grating(64, 74.0 / 2048.0);

    let err = calibration
        .calibrate(
            &image,
            12,
            &LocateMode::Auto { resolution: 11 },
            LaserChannel::Ch1,
            10.0,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::InvalidArgument(_)));
    assert!(port.writes().await.is_empty());
}

#[tokio::test]
async fn zero_spectrum_leaves_laser_untouched() {
    let port = MockLaserPort::new();
    let calibration = calibration_loop(&port);
    let spectrum = Spectrum::zeros((2048, 2048));

    let err = calibration
        .calibrate_spectrum(
            &spectrum,
            &LocateMode::Auto { resolution: 11 },
            LaserChannel::Ch1,
            10.0,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::DegeneratePeak { height } if height == 0.0));
    assert!(port.writes().await.is_empty());
    assert_eq!(port.open_count().await, 0);
}

#[tokio::test]
async fn dark_image_fails_before_actuation() {
    let port = MockLaserPort::new();
    let mut calibration = calibration_loop(&port);
    let image = Frame::zeros((64, 64));

    let err = calibration
        .calibrate(
            &image,
            11,
            &LocateMode::Auto { resolution: 11 },
            LaserChannel::Ch4,
            12.0,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::DegeneratePeak { .. }));
    assert!(port.writes().await.is_empty());
}

#[tokio::test]
async fn unsupported_preset_resolution() {
    let port = MockLaserPort::new();
    let calibration = calibration_loop(&port);
    let spectrum = Spectrum::zeros((64, 64));

    let err = calibration
        .calibrate_spectrum(
            &spectrum,
            &LocateMode::Auto { resolution: 10 },
            LaserChannel::Ch1,
            10.0,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::UnsupportedResolution(10)));
    assert!(port.writes().await.is_empty());
}

#[tokio::test]
async fn failed_port_write_is_reported() {
    let port = MockLaserPort::new();
    port.fail_writes(true).await;
    let calibration = calibration_loop(&port);
    let spectrum = two_peak_spectrum(11, 1.0, 0.5);

    let err = calibration
        .calibrate_spectrum(
            &spectrum,
            &LocateMode::Auto { resolution: 11 },
            LaserChannel::Ch1,
            10.0,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::Transport(_)));
    assert!(!calibration.laser().channel_state(LaserChannel::Ch1).await.enabled);
}

#[test]
fn spectrum_of_oversized_image() {
    let image = Frame::zeros((2049, 10));
    assert!(matches!(
        compute_spectrum(&image, 11),
        Err(DaqError::ImageTooLarge { .. })
    ));
}
