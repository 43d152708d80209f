//! Core library for the FPWC optical bench.
//!
//! Drives a cooled CCD camera through a guarded session state machine, turns
//! exposures into calibrated frames, and tunes the drive current of a
//! four-channel diode laser from the spatial spectrum of a diffraction image.
//! Hardware is reached only through the traits in [`hardware`].
//!
//! ```rust,ignore
//! let settings = Settings::load()?;
//! logging::init_tracing(&settings.application);
//!
//! let session = CameraSession::from_settings(&settings.camera, camera_transport);
//! session.connect().await?;
//!
//! // light frames must share the dark frame's shape
//! let (w, h) = settings.acquisition.dark_frame_size;
//! let geometry = ExposureGeometry::new((0, 0), (w, h), (1, 1));
//! session
//!     .configure(CameraConfig::new(settings.camera.temperature_c, geometry))
//!     .await?;
//!
//! let pipeline = AcquisitionPipeline::new(settings.acquisition.clone());
//! let dark = pipeline.default_dark_frame(&session, exptime, (1, 1)).await?;
//! let frame = pipeline.acquire_calibrated_frame(&session, exptime, 10, &dark).await?;
//!
//! let laser = LaserController::from_settings(port, &settings.laser);
//! let mut calibration = LaserCalibrationLoop::new(laser, &settings.calibration);
//! let outcome = calibration
//!     .calibrate(&frame, 12, &LocateMode::Auto { resolution: 12 }, LaserChannel::Ch3, 20.0)
//!     .await?;
//! ```

pub mod acquisition;
pub mod calibration;
pub mod camera;
pub mod cancel;
pub mod config;
pub mod error;
pub mod hardware;
pub mod laser;
pub mod logging;
