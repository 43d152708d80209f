//! Camera session state machine.
//!
//! A [`CameraSession`] owns one camera transport and sequences every command
//! through a small state machine:
//!
//! ```text
//! Disabled --connect--> Connected --configure--> Configured --expose--> Exposing
//!    ^                     ^  ^                      |  ^                    |
//!    |                     |  +------finalize--------+  +-----frame ready----+
//!    +------disable--------+                         |
//!                                  transport fault   v
//!                                  <----reset------ Error
//! ```
//!
//! The session state lives behind a `tokio::sync::Mutex`; overlapping callers
//! queue. Multi-step operations (averaging, dark capture) take the lock once
//! through [`CameraSession::lock`] and run every step on the returned
//! [`SessionGuard`], so the geometry cannot change in between.
//!
//! Guards are checked before any device traffic: a `Disabled` session answers
//! `NotConnected` and a faulted one `InvalidState` without touching the
//! transport.

use std::fmt;
use std::time::Duration;

use ndarray::Array2;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::acquisition::DarkFrameCache;
use crate::camera::{DeviceHandle, ExposureGeometry, Frame, RawFrame};
use crate::cancel::CancelToken;
use crate::config::{CameraSettings, PollingSettings};
use crate::error::{AppResult, DaqError};
use crate::hardware::{
    CameraProperty, CameraTransport, FanMode, Gain, PropertyValue, ReadoutSpeed,
    ShutterPriority,
};

/// Lifecycle state of a camera session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    /// No link to the device
    Disabled,
    /// Linked, cooling and geometry not applied
    Connected,
    /// Ready to expose
    Configured,
    /// An exposure is in flight
    Exposing,
    /// A device command failed; only `reset` and teardown are accepted
    Error,
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Parameters applied by [`CameraSession::configure`].
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    /// Cooling setpoint in °C, -50..=50
    pub temperature_c: f64,
    /// Readout window applied on configure
    pub geometry: ExposureGeometry,
    /// Sensor gain
    pub gain: Gain,
    /// Shutter timing mode
    pub shutter_priority: ShutterPriority,
}

impl CameraConfig {
    /// Low gain, electrical shutter priority.
    pub fn new(temperature_c: f64, geometry: ExposureGeometry) -> Self {
        Self {
            temperature_c,
            geometry,
            gain: Gain::default(),
            shutter_priority: ShutterPriority::default(),
        }
    }

    /// Override the gain.
    pub fn with_gain(mut self, gain: Gain) -> Self {
        self.gain = gain;
        self
    }

    /// Override the shutter priority.
    pub fn with_shutter_priority(mut self, priority: ShutterPriority) -> Self {
        self.shutter_priority = priority;
        self
    }

    fn validate(&self, sensor_extent: (u32, u32)) -> AppResult<()> {
        if !(-50.0..=50.0).contains(&self.temperature_c) {
            return Err(DaqError::InvalidArgument(format!(
                "temperature {} °C outside -50..=50",
                self.temperature_c
            )));
        }
        self.geometry.validate(sensor_extent)
    }
}

impl From<&CameraSettings> for CameraConfig {
    fn from(settings: &CameraSettings) -> Self {
        Self {
            temperature_c: settings.temperature_c,
            geometry: settings.geometry,
            gain: settings.gain,
            shutter_priority: settings.shutter_priority,
        }
    }
}

struct SessionInner<T> {
    transport: T,
    state: CameraState,
    config: Option<CameraConfig>,
    geometry: Option<ExposureGeometry>,
    shutter_open: bool,
    shutter_priority: ShutterPriority,
    readout: ReadoutSpeed,
    dark_frames: DarkFrameCache,
}

/// Exclusive owner of one camera unit.
pub struct CameraSession<T: CameraTransport> {
    handle: DeviceHandle,
    polling: PollingSettings,
    cancel: CancelToken,
    inner: Mutex<SessionInner<T>>,
}

impl<T: CameraTransport> CameraSession<T> {
    /// Create a `Disabled` session with default polling.
    pub fn new(handle: DeviceHandle, transport: T) -> Self {
        Self::with_polling(handle, transport, PollingSettings::default())
    }

    /// Create a `Disabled` session with explicit exposure polling.
    pub fn with_polling(handle: DeviceHandle, transport: T, polling: PollingSettings) -> Self {
        Self {
            handle,
            polling,
            cancel: CancelToken::new(),
            inner: Mutex::new(SessionInner {
                transport,
                state: CameraState::Disabled,
                config: None,
                geometry: None,
                shutter_open: false,
                shutter_priority: ShutterPriority::default(),
                readout: ReadoutSpeed::default(),
                dark_frames: DarkFrameCache::default(),
            }),
        }
    }

    /// Build a session from the `[camera]` configuration section.
    pub fn from_settings(settings: &CameraSettings, transport: T) -> Self {
        Self::with_polling(settings.handle.clone(), transport, settings.polling)
    }

    /// Identity of the camera unit.
    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    /// Token honoured between the device commands of an exposure.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Take the session lock for a multi-step operation.
    pub async fn lock(&self) -> SessionGuard<'_, T> {
        SessionGuard {
            inner: self.inner.lock().await,
            polling: self.polling,
            cancel: &self.cancel,
            handle: &self.handle,
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> CameraState {
        self.inner.lock().await.state
    }

    /// Geometry currently applied to the device.
    pub async fn geometry(&self) -> Option<ExposureGeometry> {
        self.inner.lock().await.geometry
    }

    /// See [`SessionGuard::connect`].
    pub async fn connect(&self) -> AppResult<()> {
        self.lock().await.connect().await
    }

    /// See [`SessionGuard::configure`].
    pub async fn configure(&self, config: CameraConfig) -> AppResult<()> {
        self.lock().await.configure(config).await
    }

    /// See [`SessionGuard::expose_once`].
    pub async fn expose_once(&self, exptime: Duration) -> AppResult<RawFrame> {
        self.lock().await.expose_once(exptime).await
    }

    /// See [`SessionGuard::expose_averaged`].
    pub async fn expose_averaged(&self, exptime: Duration, n: usize) -> AppResult<Frame> {
        self.lock().await.expose_averaged(exptime, n).await
    }

    /// See [`SessionGuard::reset`].
    pub async fn reset(&self) -> AppResult<()> {
        self.lock().await.reset().await
    }

    /// See [`SessionGuard::finalize`].
    pub async fn finalize(&self) -> AppResult<()> {
        self.lock().await.finalize().await
    }

    /// See [`SessionGuard::disable`].
    pub async fn disable(&self) -> AppResult<()> {
        self.lock().await.disable().await
    }

    /// See [`SessionGuard::disconnect`].
    pub async fn disconnect(&self) -> AppResult<()> {
        self.lock().await.disconnect().await
    }

    /// See [`SessionGuard::set_shutter`].
    pub async fn set_shutter(&self, open: bool) -> AppResult<()> {
        self.lock().await.set_shutter(open).await
    }

    /// See [`SessionGuard::set_readout_speed`].
    pub async fn set_readout_speed(&self, speed: ReadoutSpeed) -> AppResult<()> {
        self.lock().await.set_readout_speed(speed).await
    }

    /// See [`SessionGuard::set_shutter_priority`].
    pub async fn set_shutter_priority(&self, priority: ShutterPriority) -> AppResult<()> {
        self.lock().await.set_shutter_priority(priority).await
    }

    /// See [`SessionGuard::set_geometry`].
    pub async fn set_geometry(&self, geometry: ExposureGeometry) -> AppResult<()> {
        self.lock().await.set_geometry(geometry).await
    }

    /// Current CCD temperature in °C.
    pub async fn temperature(&self) -> AppResult<f64> {
        self.lock().await.temperature().await
    }

    /// Drop every cached dark frame.
    pub async fn invalidate_dark_frames(&self) {
        self.inner.lock().await.dark_frames.clear();
    }
}

/// Locked view of a [`CameraSession`].
///
/// Every command issued through one guard runs without interleaving with
/// other callers.
pub struct SessionGuard<'a, T: CameraTransport> {
    inner: MutexGuard<'a, SessionInner<T>>,
    polling: PollingSettings,
    cancel: &'a CancelToken,
    handle: &'a DeviceHandle,
}

impl<'a, T: CameraTransport> SessionGuard<'a, T> {
    /// Current lifecycle state.
    pub fn state(&self) -> CameraState {
        self.inner.state
    }

    /// Geometry currently applied to the device.
    pub fn geometry(&self) -> Option<ExposureGeometry> {
        self.inner.geometry
    }

    /// Whether the shutter is held open manually.
    pub fn shutter_open(&self) -> bool {
        self.inner.shutter_open
    }

    /// Shutter priority last written.
    pub fn shutter_priority(&self) -> ShutterPriority {
        self.inner.shutter_priority
    }

    /// Readout speed last written.
    pub fn readout_speed(&self) -> ReadoutSpeed {
        self.inner.readout
    }

    /// Identity of the camera unit.
    pub fn handle(&self) -> &DeviceHandle {
        self.handle
    }

    /// Dark frames captured by this session.
    pub fn dark_frames(&mut self) -> &mut DarkFrameCache {
        &mut self.inner.dark_frames
    }

    /// `Disabled → Connected`, opening the shutter.
    pub async fn connect(&mut self) -> AppResult<()> {
        if self.inner.state != CameraState::Disabled {
            debug!(state = %self.inner.state, "connect on linked session ignored");
            return Ok(());
        }

        info!(serial = %self.handle.serial_number, "Connecting camera");
        let linked = self
            .inner
            .transport
            .connect()
            .await
            .map_err(|e| DaqError::DeviceUnavailable(format!("{e:#}")))?;
        let connected = linked
            && self
                .inner
                .transport
                .is_connected()
                .await
                .map_err(|e| DaqError::DeviceUnavailable(format!("{e:#}")))?;
        if !connected {
            return Err(DaqError::DeviceUnavailable(format!(
                "camera {} did not report a link",
                self.handle.serial_number
            )));
        }

        self.inner.state = CameraState::Connected;
        if let Err(e) = self.open_shutter().await {
            return Err(self.fault(e));
        }
        info!(serial = %self.handle.serial_number, "Camera connected");
        Ok(())
    }

    /// Apply cooling, gain, shutter priority and geometry.
    ///
    /// Validation failures leave the session untouched.
    pub async fn configure(&mut self, config: CameraConfig) -> AppResult<()> {
        self.require_connected("configure")?;
        config.validate(self.handle.sensor_extent)?;

        if let Err(e) = self.apply_config(&config).await {
            return Err(self.fault(e));
        }

        self.inner.shutter_priority = config.shutter_priority;
        self.inner.geometry = Some(config.geometry);
        self.inner.config = Some(config);
        self.inner.state = CameraState::Configured;
        info!(geometry = ?self.inner.geometry, "Camera configured");
        Ok(())
    }

    /// One light exposure. The shutter is opened first if it is closed.
    pub async fn expose_once(&mut self, exptime: Duration) -> AppResult<RawFrame> {
        self.expose(exptime, true).await
    }

    /// Average of `n` light exposures.
    pub async fn expose_averaged(&mut self, exptime: Duration, n: usize) -> AppResult<Frame> {
        self.expose_averaged_with(exptime, n, true).await
    }

    /// Average of `n` exposures; with `light == false` the shutter is left as is.
    pub async fn expose_averaged_with(
        &mut self,
        exptime: Duration,
        n: usize,
        light: bool,
    ) -> AppResult<Frame> {
        self.require_configured("expose")?;
        if n == 0 {
            return Err(DaqError::InvalidArgument(
                "average count must be at least 1".to_string(),
            ));
        }
        let geometry = self.configured_geometry()?;

        let mut sum = Array2::<f64>::zeros(geometry.frame_shape());
        for i in 0..n {
            let frame = self.expose(exptime, light).await?;
            sum += &frame.mapv(f64::from);
            debug!(exposure = i + 1, of = n, "sub-exposure done");
        }
        sum /= n as f64;
        Ok(sum)
    }

    /// Single exposure with bounded completion polling.
    pub async fn expose(&mut self, exptime: Duration, light: bool) -> AppResult<RawFrame> {
        self.require_configured("expose")?;
        if exptime.is_zero() {
            return Err(DaqError::InvalidArgument(
                "exposure time must be positive".to_string(),
            ));
        }
        let geometry = self.configured_geometry()?;

        self.cancel.check()?;
        if light && !self.inner.shutter_open {
            if let Err(e) = self.open_shutter().await {
                return Err(self.fault(e));
            }
        }
        self.cancel.check()?;

        self.inner.state = CameraState::Exposing;
        let shutter_open = self.inner.shutter_open;
        debug!(?exptime, shutter_open, "start exposure");
        if let Err(e) = self.inner.transport.start_exposure(exptime, shutter_open).await {
            return Err(self.fault(DaqError::transport(e)));
        }

        if let Err(e) = self.wait_for_image(exptime).await {
            return Err(self.fault(e));
        }

        let frame = match self.inner.transport.read_image().await {
            Ok(frame) => frame,
            Err(e) => return Err(self.fault(DaqError::transport(e))),
        };

        let expected = geometry.frame_shape();
        if frame.dim() != expected {
            return Err(self.fault(DaqError::GeometryMismatch {
                expected,
                actual: frame.dim(),
            }));
        }

        self.inner.state = CameraState::Configured;
        Ok(frame)
    }

    /// Re-apply the last accepted configuration after a fault.
    pub async fn reset(&mut self) -> AppResult<()> {
        match self.inner.state {
            CameraState::Disabled => return Err(DaqError::NotConnected),
            CameraState::Error => {}
            _ => return Ok(()),
        }

        info!("Resetting faulted camera session");
        self.inner.shutter_open = false;
        let Some(config) = self.inner.config.clone() else {
            self.inner.state = CameraState::Connected;
            return Ok(());
        };

        if let Err(e) = self.apply_config(&config).await {
            return Err(self.fault(e));
        }
        self.inner.shutter_priority = config.shutter_priority;
        self.inner.geometry = Some(config.geometry);
        self.inner.state = CameraState::Configured;
        Ok(())
    }

    /// Close the shutter, stop fan and cooler, drop dark frames. Every step is
    /// attempted.
    ///
    /// State becomes `Connected`, except that a faulted session stays in
    /// `Error` until [`reset`](Self::reset) or teardown.
    pub async fn finalize(&mut self) -> AppResult<()> {
        if self.inner.state == CameraState::Disabled {
            return Ok(());
        }

        info!("Finalizing camera");
        let mut errors = Vec::new();
        if let Err(e) = self.close_shutter().await {
            errors.push(e);
        }
        if let Err(e) = self
            .write(CameraProperty::FanMode, PropertyValue::Fan(FanMode::Off))
            .await
        {
            errors.push(e);
        }
        if let Err(e) = self
            .write(CameraProperty::CoolerOn, PropertyValue::Bool(false))
            .await
        {
            errors.push(e);
        }

        self.inner.dark_frames.clear();
        if self.inner.state != CameraState::Error {
            self.inner.state = CameraState::Connected;
        }

        if errors.is_empty() {
            Ok(())
        } else {
            for e in &errors {
                warn!(error = %e, "camera finalize step failed");
            }
            Err(DaqError::ShutdownFailed(errors))
        }
    }

    /// Drop the device link. State becomes `Disabled` even if the transport fails.
    pub async fn disable(&mut self) -> AppResult<()> {
        if self.inner.state == CameraState::Disabled {
            return Ok(());
        }

        let result = self.inner.transport.disconnect().await;
        self.inner.state = CameraState::Disabled;
        self.inner.config = None;
        self.inner.geometry = None;
        self.inner.shutter_open = false;
        self.inner.dark_frames.clear();
        info!(serial = %self.handle.serial_number, "Camera disabled");

        result.map_err(DaqError::transport)
    }

    /// `finalize` followed by `disable`; failures are collected.
    pub async fn disconnect(&mut self) -> AppResult<()> {
        if self.inner.state == CameraState::Disabled {
            return Ok(());
        }

        let mut errors = Vec::new();
        match self.finalize().await {
            Err(DaqError::ShutdownFailed(mut inner)) => errors.append(&mut inner),
            Err(e) => errors.push(e),
            Ok(()) => {}
        }
        if let Err(e) = self.disable().await {
            warn!(error = %e, "camera disconnect failed");
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DaqError::ShutdownFailed(errors))
        }
    }

    /// Manual shutter control. Closing hands the shutter back to the camera.
    pub async fn set_shutter(&mut self, open: bool) -> AppResult<()> {
        self.require_connected("set shutter")?;
        let result = if open {
            self.open_shutter().await
        } else {
            self.close_shutter().await
        };
        result.map_err(|e| self.fault(e))
    }

    /// Select fast or quality readout.
    pub async fn set_readout_speed(&mut self, speed: ReadoutSpeed) -> AppResult<()> {
        self.require_connected("set readout speed")?;
        if let Err(e) = self
            .write(CameraProperty::ReadoutSpeed, PropertyValue::Readout(speed))
            .await
        {
            return Err(self.fault(e));
        }
        self.inner.readout = speed;
        Ok(())
    }

    /// Select mechanical or electrical shutter timing.
    pub async fn set_shutter_priority(&mut self, priority: ShutterPriority) -> AppResult<()> {
        self.require_connected("set shutter priority")?;
        if let Err(e) = self
            .write(
                CameraProperty::ShutterPriority,
                PropertyValue::ShutterPriority(priority),
            )
            .await
        {
            return Err(self.fault(e));
        }
        self.inner.shutter_priority = priority;
        Ok(())
    }

    /// Re-apply exposure properties. The stored configuration is not changed,
    /// so `reset` restores the configured geometry.
    pub async fn set_geometry(&mut self, geometry: ExposureGeometry) -> AppResult<()> {
        self.require_connected("set geometry")?;
        geometry.validate(self.handle.sensor_extent)?;

        if let Err(e) = self.apply_geometry(&geometry).await {
            return Err(self.fault(e));
        }
        self.inner.geometry = Some(geometry);
        debug!(?geometry, "geometry applied");
        Ok(())
    }

    /// Current CCD temperature in °C.
    pub async fn temperature(&mut self) -> AppResult<f64> {
        self.require_connected("read temperature")?;
        let value = match self
            .inner
            .transport
            .get_property(CameraProperty::CcdTemperature)
            .await
        {
            Ok(value) => value,
            Err(e) => return Err(self.fault(DaqError::transport(e))),
        };
        value.as_f64().ok_or_else(|| {
            DaqError::Transport(format!("unexpected CcdTemperature value {value:?}"))
        })
    }

    fn require_connected(&self, operation: &'static str) -> AppResult<()> {
        match self.inner.state {
            CameraState::Disabled => Err(DaqError::NotConnected),
            CameraState::Connected | CameraState::Configured => Ok(()),
            state => Err(DaqError::InvalidState { operation, state }),
        }
    }

    fn require_configured(&self, operation: &'static str) -> AppResult<()> {
        match self.inner.state {
            CameraState::Disabled => Err(DaqError::NotConnected),
            CameraState::Configured => Ok(()),
            state => Err(DaqError::InvalidState { operation, state }),
        }
    }

    fn configured_geometry(&self) -> AppResult<ExposureGeometry> {
        self.inner.geometry.ok_or(DaqError::InvalidState {
            operation: "expose",
            state: self.inner.state,
        })
    }

    fn fault(&mut self, err: DaqError) -> DaqError {
        error!(error = %err, "camera session faulted");
        self.inner.state = CameraState::Error;
        err
    }

    async fn write(&mut self, property: CameraProperty, value: PropertyValue) -> AppResult<()> {
        debug!(%property, ?value, "set camera property");
        self.inner
            .transport
            .set_property(property, value)
            .await
            .map_err(DaqError::transport)
    }

    async fn open_shutter(&mut self) -> AppResult<()> {
        self.write(CameraProperty::ManualShutterMode, PropertyValue::Bool(true))
            .await?;
        self.write(CameraProperty::ManualShutterOpen, PropertyValue::Bool(true))
            .await?;
        self.inner.shutter_open = true;
        Ok(())
    }

    async fn close_shutter(&mut self) -> AppResult<()> {
        self.write(CameraProperty::ManualShutterMode, PropertyValue::Bool(true))
            .await?;
        self.write(CameraProperty::ManualShutterOpen, PropertyValue::Bool(false))
            .await?;
        self.inner.shutter_open = false;
        self.write(CameraProperty::ManualShutterMode, PropertyValue::Bool(false))
            .await
    }

    async fn apply_config(&mut self, config: &CameraConfig) -> AppResult<()> {
        let is_main = self
            .inner
            .transport
            .get_property(CameraProperty::IsMainCamera)
            .await
            .map_err(DaqError::transport)?;
        if is_main.as_bool() != Some(true) {
            self.write(CameraProperty::IsMainCamera, PropertyValue::Bool(true))
                .await?;
        }

        self.write(CameraProperty::FanMode, PropertyValue::Fan(FanMode::Full))
            .await?;
        self.write(CameraProperty::CoolerOn, PropertyValue::Bool(true))
            .await?;

        let can_set = self
            .inner
            .transport
            .get_property(CameraProperty::CanSetCcdTemperature)
            .await
            .map_err(DaqError::transport)?;
        if can_set.as_bool() == Some(true) {
            self.write(
                CameraProperty::SetCcdTemperature,
                PropertyValue::Float(config.temperature_c),
            )
            .await?;
        } else {
            warn!("camera cannot set its CCD temperature; setpoint ignored");
        }

        self.write(CameraProperty::CameraGain, PropertyValue::Gain(config.gain))
            .await?;
        self.write(
            CameraProperty::ShutterPriority,
            PropertyValue::ShutterPriority(config.shutter_priority),
        )
        .await?;
        self.apply_geometry(&config.geometry).await
    }

    async fn apply_geometry(&mut self, geometry: &ExposureGeometry) -> AppResult<()> {
        let writes = [
            (CameraProperty::StartX, geometry.start_pos.0),
            (CameraProperty::StartY, geometry.start_pos.1),
            (CameraProperty::NumX, geometry.frame_size.0),
            (CameraProperty::NumY, geometry.frame_size.1),
            (CameraProperty::BinX, geometry.bin_factor.0),
            (CameraProperty::BinY, geometry.bin_factor.1),
        ];
        for (property, value) in writes {
            self.write(property, PropertyValue::Int(i64::from(value)))
                .await?;
        }
        Ok(())
    }

    async fn wait_for_image(&mut self, exptime: Duration) -> AppResult<()> {
        let timeout = self.polling.timeout_for(exptime);
        let deadline = Instant::now() + timeout;
        let max_interval = self.polling.max_interval();
        let mut interval = self.polling.initial_interval();

        loop {
            if self
                .inner
                .transport
                .is_image_ready()
                .await
                .map_err(DaqError::transport)?
            {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DaqError::ExposureTimeout {
                    timeout_ms: timeout.as_millis(),
                });
            }
            sleep(interval.min(deadline - now)).await;
            interval = (interval * 2).min(max_interval);
        }
    }
}
