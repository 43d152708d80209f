//! Camera session and acquisition pipeline against the mock camera.

mod common;

use std::sync::Arc;
use std::time::Duration;

use fpwc_daq::acquisition::{crop_bounds, rotate_ccw, AcquisitionPipeline};
use fpwc_daq::camera::{
    CameraConfig, CameraSession, CameraState, DeviceHandle, ExposureGeometry, Frame,
};
use fpwc_daq::config::{AcquisitionSettings, Settings};
use fpwc_daq::error::DaqError;
use fpwc_daq::hardware::{CallKind, CameraProperty, MockCamera, PropertyValue, TransportCall};

use common::{configured_session, fast_polling};

const EXPOSURE: Duration = Duration::from_millis(20);

#[tokio::test]
async fn frame_dimensions_follow_geometry() {
    let geometries = [
        ExposureGeometry::new((0, 0), (32, 16), (1, 1)),
        ExposureGeometry::new((10, 20), (17, 9), (2, 3)),
        ExposureGeometry::new((2757, 2207), (1, 1), (1, 1)),
    ];

    for geometry in geometries {
        let camera = MockCamera::new();
        let session = configured_session(&camera, geometry).await;
        let frame = session.expose_once(EXPOSURE).await.unwrap();
        assert_eq!(
            frame.dim(),
            (geometry.frame_size.1 as usize, geometry.frame_size.0 as usize)
        );
    }
}

#[tokio::test]
async fn light_geometry_matching_dark_size_calibrates_with_defaults() {
    let settings = Settings::default();
    let camera = MockCamera::new();
    camera.set_pixel_value(900).await;
    camera.set_dark_value(100).await;
    let session = CameraSession::with_polling(
        settings.camera.handle.clone(),
        camera.clone(),
        fast_polling(),
    );
    session.connect().await.unwrap();

    let (w, h) = settings.acquisition.dark_frame_size;
    let geometry = ExposureGeometry::new((0, 0), (w, h), (1, 1));
    session
        .configure(CameraConfig::new(settings.camera.temperature_c, geometry))
        .await
        .unwrap();

    let pipeline = AcquisitionPipeline::new(settings.acquisition.clone());
    let dark = pipeline
        .default_dark_frame(&session, EXPOSURE, (1, 1))
        .await
        .unwrap();
    let frame = pipeline
        .acquire_calibrated_frame(&session, EXPOSURE, 2, &dark)
        .await
        .unwrap();

    assert_eq!(frame.dim(), (h as usize, w as usize));
    assert!(frame.iter().all(|&v| v == 800.0));
}

#[tokio::test]
async fn disabled_session_makes_no_transport_calls() {
    let camera = MockCamera::new();
    let session = CameraSession::new(DeviceHandle::default(), camera.clone());

    assert!(matches!(
        session.expose_once(EXPOSURE).await,
        Err(DaqError::NotConnected)
    ));
    assert!(matches!(
        session.expose_averaged(EXPOSURE, 3).await,
        Err(DaqError::NotConnected)
    ));
    assert!(camera.calls().await.is_empty());

    // teardown on a disabled session is a no-op
    session.finalize().await.unwrap();
    session.disable().await.unwrap();
    session.disconnect().await.unwrap();
    assert!(camera.calls().await.is_empty());
}

#[tokio::test]
async fn zero_dark_round_trip() {
    let camera = MockCamera::new();
    camera.set_pixel_value(1500).await;
    let geometry = ExposureGeometry::new((0, 0), (12, 8), (1, 1));
    let session = configured_session(&camera, geometry).await;

    let pipeline = AcquisitionPipeline::new(AcquisitionSettings {
        output_size: Some((6, 5)),
        ..AcquisitionSettings::default()
    });
    let dark = Frame::zeros((8, 12));
    let calibrated = pipeline
        .acquire_calibrated_frame(&session, EXPOSURE, 4, &dark)
        .await
        .unwrap();

    // rotated frame is 12 x 8; crop 5 rows x 6 cols
    assert_eq!(calibrated.dim(), (5, 6));
    assert!(calibrated.iter().all(|&v| v == 1500.0));
}

#[tokio::test]
async fn calibrated_frame_matches_manual_processing() {
    let camera = MockCamera::new();
    let geometry = ExposureGeometry::new((0, 0), (5, 3), (1, 1));
    let session = configured_session(&camera, geometry).await;

    let raw = Frame::from_shape_fn((3, 5), |(r, c)| (r * 5 + c) as f64);
    camera
        .push_frame(raw.mapv(|v| v as i32))
        .await;

    let pipeline = AcquisitionPipeline::default();
    let dark = Frame::from_elem((3, 5), 1.0);
    let calibrated = pipeline
        .acquire_calibrated_frame(&session, EXPOSURE, 1, &dark)
        .await
        .unwrap();

    let expected = rotate_ccw(&(raw - 1.0));
    assert_eq!(calibrated, expected);
    assert_eq!(calibrated.dim(), (5, 3));
}

#[tokio::test]
async fn saturated_frame_is_rejected_before_dark_subtraction() {
    let camera = MockCamera::new();
    camera.set_pixel_value(400_000).await;
    let geometry = ExposureGeometry::new((0, 0), (4, 4), (1, 1));
    let session = configured_session(&camera, geometry).await;

    // a mismatched dark would fail later; saturation must win
    let wrong_dark = Frame::zeros((2, 2));
    let err = AcquisitionPipeline::default()
        .acquire_calibrated_frame(&session, EXPOSURE, 2, &wrong_dark)
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::Saturation { .. }));
    assert_eq!(session.state().await, CameraState::Configured);
}

#[tokio::test]
async fn mismatched_dark_frame() {
    let camera = MockCamera::new();
    let geometry = ExposureGeometry::new((0, 0), (4, 4), (1, 1));
    let session = configured_session(&camera, geometry).await;

    let err = AcquisitionPipeline::default()
        .acquire_calibrated_frame(&session, EXPOSURE, 1, &Frame::zeros((4, 5)))
        .await
        .unwrap_err();
    assert!(matches!(err, DaqError::GeometryMismatch { .. }));
}

#[tokio::test]
async fn dark_capture_is_cached_and_subtracts_cleanly() {
    let camera = MockCamera::new();
    camera.set_pixel_value(800).await;
    camera.set_dark_value(100).await;
    let geometry = ExposureGeometry::new((0, 0), (16, 16), (1, 1));
    let session = configured_session(&camera, geometry).await;

    let pipeline = AcquisitionPipeline::new(AcquisitionSettings {
        dark_frame_size: (16, 16),
        dark_frame_count: 3,
        ..AcquisitionSettings::default()
    });
    let dark = pipeline
        .default_dark_frame(&session, EXPOSURE, (1, 1))
        .await
        .unwrap();
    assert!(dark.iter().all(|&v| v == 100.0));
    assert_eq!(camera.exposure_count().await, 3);

    // dark exposures ran with the shutter closed
    let dark_exposures: Vec<bool> = camera
        .calls()
        .await
        .into_iter()
        .filter_map(|call| match call {
            TransportCall::StartExposure { shutter_open, .. } => Some(shutter_open),
            _ => None,
        })
        .collect();
    assert_eq!(dark_exposures, vec![false; 3]);

    let again = pipeline
        .default_dark_frame(&session, EXPOSURE, (1, 1))
        .await
        .unwrap();
    assert_eq!(again, dark);
    assert_eq!(camera.exposure_count().await, 3);

    let frame = pipeline
        .acquire_calibrated_frame(&session, EXPOSURE, 2, &dark)
        .await
        .unwrap();
    assert!(frame.iter().all(|&v| v == 700.0));

    session.invalidate_dark_frames().await;
    pipeline
        .default_dark_frame(&session, EXPOSURE, (1, 1))
        .await
        .unwrap();
    assert_eq!(camera.exposure_count().await, 8);
}

#[tokio::test]
async fn mid_exposure_failure_requires_reset() {
    let camera = MockCamera::new();
    let geometry = ExposureGeometry::new((0, 0), (8, 8), (1, 1));
    let session = configured_session(&camera, geometry).await;

    camera.fail_on(CallKind::StartExposure, true).await;
    assert!(matches!(
        session.expose_once(EXPOSURE).await,
        Err(DaqError::Transport(_))
    ));
    assert_eq!(session.state().await, CameraState::Error);

    camera.fail_on(CallKind::StartExposure, false).await;
    assert!(matches!(
        session.expose_once(EXPOSURE).await,
        Err(DaqError::InvalidState { .. })
    ));

    session.reset().await.unwrap();
    assert_eq!(session.state().await, CameraState::Configured);
    session.expose_once(EXPOSURE).await.unwrap();
}

#[tokio::test]
async fn exposure_timeout_faults_session() {
    let camera = MockCamera::new();
    let geometry = ExposureGeometry::new((0, 0), (8, 8), (1, 1));
    let session = configured_session(&camera, geometry).await;
    camera.set_never_ready().await;

    let err = session.expose_once(EXPOSURE).await.unwrap_err();
    assert!(matches!(err, DaqError::ExposureTimeout { timeout_ms: 220 }));
    assert_eq!(session.state().await, CameraState::Error);
}

#[tokio::test]
async fn overlapping_callers_queue() {
    let camera = MockCamera::new();
    camera.set_ready_after(3).await;
    let geometry = ExposureGeometry::new((0, 0), (8, 8), (1, 1));
    let session = Arc::new(configured_session(&camera, geometry).await);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let session = Arc::clone(&session);
        tasks.push(tokio::spawn(async move {
            session.expose_averaged(EXPOSURE, 2).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // each exposure's start, polls and read are contiguous in the log
    let calls = camera.calls().await;
    let mut in_flight = false;
    for call in calls {
        match call {
            TransportCall::StartExposure { .. } => {
                assert!(!in_flight, "exposures interleaved");
                in_flight = true;
            }
            TransportCall::ReadImage => in_flight = false,
            _ => {}
        }
    }
    assert_eq!(camera.exposure_count().await, 8);
}

#[tokio::test]
async fn shutdown_sequence() {
    let camera = MockCamera::new();
    let geometry = ExposureGeometry::new((0, 0), (8, 8), (1, 1));
    let session = configured_session(&camera, geometry).await;

    session.disconnect().await.unwrap();
    assert_eq!(session.state().await, CameraState::Disabled);
    assert_eq!(
        camera.property(CameraProperty::FanMode).await,
        Some(PropertyValue::Fan(fpwc_daq::hardware::FanMode::Off))
    );
    assert!(!camera.is_linked().await);

    assert!(matches!(
        session.expose_once(EXPOSURE).await,
        Err(DaqError::NotConnected)
    ));
}

#[test]
fn crop_parity_literals() {
    assert_eq!(crop_bounds(4), (-1, 2));
    assert_eq!(crop_bounds(5), (-2, 2));
}
