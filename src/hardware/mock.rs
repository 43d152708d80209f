//! Mock transports for testing without hardware.
//!
//! Both mocks are cheap `Clone` handles onto shared state: hand one clone to
//! the session or controller and keep another in the test to script behaviour
//! and inspect traffic.
//!
//! - [`MockCamera`] - register store with a call log, failure injection,
//!   constant light/dark frames, scripted frames and ready-after-N-polls
//! - [`MockLaserPort`] - records every written command and serves scripted replies

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::camera::RawFrame;
use crate::hardware::transport::{
    CameraProperty, CameraTransport, LaserTransport, PropertyValue,
};

/// One call made on a [`MockCamera`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    /// `connect`
    Connect,
    /// `is_connected`
    IsConnected,
    /// `get_property`
    GetProperty(CameraProperty),
    /// `set_property` with the written value
    SetProperty(CameraProperty, PropertyValue),
    /// `start_exposure` with its arguments
    StartExposure {
        duration: Duration,
        shutter_open: bool,
    },
    /// `is_image_ready`
    IsImageReady,
    /// `read_image`
    ReadImage,
    /// `disconnect`
    Disconnect,
}

impl TransportCall {
    /// Category used by [`MockCamera::fail_on`].
    pub fn kind(&self) -> CallKind {
        match self {
            TransportCall::Connect => CallKind::Connect,
            TransportCall::IsConnected => CallKind::IsConnected,
            TransportCall::GetProperty(p) => CallKind::GetProperty(*p),
            TransportCall::SetProperty(p, _) => CallKind::SetProperty(*p),
            TransportCall::StartExposure { .. } => CallKind::StartExposure,
            TransportCall::IsImageReady => CallKind::IsImageReady,
            TransportCall::ReadImage => CallKind::ReadImage,
            TransportCall::Disconnect => CallKind::Disconnect,
        }
    }
}

/// Call category used for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// `connect`
    Connect,
    /// `is_connected`
    IsConnected,
    /// `get_property`
    GetProperty(CameraProperty),
    /// `set_property` on one property
    SetProperty(CameraProperty),
    /// `start_exposure`
    StartExposure,
    /// `is_image_ready`
    IsImageReady,
    /// `read_image`
    ReadImage,
    /// `disconnect`
    Disconnect,
}

/// When `is_image_ready` reports completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    /// Ready after this many negative polls
    AfterPolls(usize),
    Never,
}

#[derive(Debug)]
struct MockCameraState {
    calls: Vec<TransportCall>,
    failing: HashSet<CallKind>,
    refuse_connect: bool,
    linked: bool,
    properties: HashMap<CameraProperty, PropertyValue>,
    light_value: i32,
    dark_value: i32,
    scripted: VecDeque<RawFrame>,
    readiness: Readiness,
    polls: usize,
    exposures: usize,
    last_shutter_open: bool,
}

impl Default for MockCameraState {
    fn default() -> Self {
        let properties = HashMap::from([
            (CameraProperty::IsMainCamera, PropertyValue::Bool(false)),
            (CameraProperty::CanSetCcdTemperature, PropertyValue::Bool(true)),
            (CameraProperty::CcdTemperature, PropertyValue::Float(20.0)),
        ]);
        Self {
            calls: Vec::new(),
            failing: HashSet::new(),
            refuse_connect: false,
            linked: false,
            properties,
            light_value: 0,
            dark_value: 0,
            scripted: VecDeque::new(),
            readiness: Readiness::AfterPolls(0),
            polls: 0,
            exposures: 0,
            last_shutter_open: false,
        }
    }
}

impl MockCameraState {
    fn record(&mut self, call: TransportCall) -> Result<()> {
        let kind = call.kind();
        self.calls.push(call);
        if self.failing.contains(&kind) {
            bail!("injected failure on {kind:?}");
        }
        Ok(())
    }

    fn int_property(&self, property: CameraProperty) -> Result<usize> {
        match self.properties.get(&property) {
            Some(PropertyValue::Int(v)) if *v >= 0 => Ok(*v as usize),
            other => Err(anyhow!("{property} not set to a size: {other:?}")),
        }
    }
}

/// In-memory camera.
///
/// Frames are filled with the light value for open-shutter exposures and with
/// the dark value otherwise, shaped from the `NumY` x `NumX` registers.
/// Frames queued with [`MockCamera::push_frame`] are served first, as is.
///
/// ```rust,ignore
/// let camera = MockCamera::new();
/// camera.set_pixel_value(100).await;
/// let session = CameraSession::new(DeviceHandle::default(), camera.clone());
/// // ... drive the session, then inspect traffic
/// assert!(camera.calls().await.is_empty());
/// ```
#[derive(Clone, Default)]
pub struct MockCamera {
    state: Arc<Mutex<MockCameraState>>,
}

impl MockCamera {
    /// Fresh mock with default state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().await.calls.clone()
    }

    /// Forget the recorded calls.
    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Make every call of `kind` fail (or stop failing).
    pub async fn fail_on(&self, kind: CallKind, failing: bool) {
        let mut state = self.state.lock().await;
        if failing {
            state.failing.insert(kind);
        } else {
            state.failing.remove(&kind);
        }
    }

    /// `connect` succeeds but the link never comes up.
    pub async fn refuse_connect(&self, refuse: bool) {
        self.state.lock().await.refuse_connect = refuse;
    }

    /// Pixel value of open-shutter frames.
    pub async fn set_pixel_value(&self, value: i32) {
        self.state.lock().await.light_value = value;
    }

    /// Pixel value of closed-shutter frames.
    pub async fn set_dark_value(&self, value: i32) {
        self.state.lock().await.dark_value = value;
    }

    /// Queue a frame returned verbatim by the next `read_image`.
    pub async fn push_frame(&self, frame: RawFrame) {
        self.state.lock().await.scripted.push_back(frame);
    }

    /// Report ready after `polls` negative answers per exposure.
    pub async fn set_ready_after(&self, polls: usize) {
        self.state.lock().await.readiness = Readiness::AfterPolls(polls);
    }

    /// Never report an image as ready.
    pub async fn set_never_ready(&self) {
        self.state.lock().await.readiness = Readiness::Never;
    }

    /// Preset a register, e.g. the CCD temperature.
    pub async fn set_property_value(&self, property: CameraProperty, value: PropertyValue) {
        self.state.lock().await.properties.insert(property, value);
    }

    /// Current register value.
    pub async fn property(&self, property: CameraProperty) -> Option<PropertyValue> {
        self.state.lock().await.properties.get(&property).copied()
    }

    /// Number of exposures started.
    pub async fn exposure_count(&self) -> usize {
        self.state.lock().await.exposures
    }

    /// Whether the mock link is up.
    pub async fn is_linked(&self) -> bool {
        self.state.lock().await.linked
    }
}

#[async_trait]
impl CameraTransport for MockCamera {
    async fn connect(&mut self) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.record(TransportCall::Connect)?;
        state.linked = !state.refuse_connect;
        Ok(state.linked)
    }

    async fn is_connected(&mut self) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.record(TransportCall::IsConnected)?;
        Ok(state.linked)
    }

    async fn get_property(&mut self, property: CameraProperty) -> Result<PropertyValue> {
        let mut state = self.state.lock().await;
        state.record(TransportCall::GetProperty(property))?;
        if property == CameraProperty::Connected {
            return Ok(PropertyValue::Bool(state.linked));
        }
        state
            .properties
            .get(&property)
            .copied()
            .ok_or_else(|| anyhow!("property {property} has no value"))
    }

    async fn set_property(&mut self, property: CameraProperty, value: PropertyValue) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(TransportCall::SetProperty(property, value))?;
        if !state.linked {
            bail!("set {property} while not linked");
        }
        state.properties.insert(property, value);
        Ok(())
    }

    async fn start_exposure(&mut self, duration: Duration, shutter_open: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(TransportCall::StartExposure {
            duration,
            shutter_open,
        })?;
        if !state.linked {
            bail!("exposure started while not linked");
        }
        state.polls = 0;
        state.exposures += 1;
        state.last_shutter_open = shutter_open;
        Ok(())
    }

    async fn is_image_ready(&mut self) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.record(TransportCall::IsImageReady)?;
        match state.readiness {
            Readiness::Never => Ok(false),
            Readiness::AfterPolls(n) => {
                let ready = state.polls >= n;
                state.polls += 1;
                Ok(ready)
            }
        }
    }

    async fn read_image(&mut self) -> Result<RawFrame> {
        let mut state = self.state.lock().await;
        state.record(TransportCall::ReadImage)?;
        if let Some(frame) = state.scripted.pop_front() {
            return Ok(frame);
        }
        let rows = state.int_property(CameraProperty::NumY)?;
        let cols = state.int_property(CameraProperty::NumX)?;
        let value = if state.last_shutter_open {
            state.light_value
        } else {
            state.dark_value
        };
        Ok(RawFrame::from_elem((rows, cols), value))
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(TransportCall::Disconnect)?;
        state.linked = false;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PortState {
    open: bool,
    opened: usize,
    writes: Vec<String>,
    replies: VecDeque<String>,
    fail_writes: bool,
}

/// In-memory laser serial port.
#[derive(Clone, Default)]
pub struct MockLaserPort {
    state: Arc<Mutex<PortState>>,
}

impl MockLaserPort {
    /// Fresh mock with default state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command written, terminators included.
    pub async fn writes(&self) -> Vec<String> {
        self.state.lock().await.writes.clone()
    }

    /// Forget the recorded writes.
    pub async fn clear_writes(&self) {
        self.state.lock().await.writes.clear();
    }

    /// Queue a reply for the next `read_ascii`.
    pub async fn push_reply(&self, reply: impl Into<String>) {
        self.state.lock().await.replies.push_back(reply.into());
    }

    /// Make every write fail while `fail` is set.
    pub async fn fail_writes(&self, fail: bool) {
        self.state.lock().await.fail_writes = fail;
    }

    /// Number of times the port has been opened.
    pub async fn open_count(&self) -> usize {
        self.state.lock().await.opened
    }

    /// Whether the port is currently open.
    pub async fn is_open(&self) -> bool {
        self.state.lock().await.open
    }
}

#[async_trait]
impl LaserTransport for MockLaserPort {
    async fn open_port(&mut self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.open {
            bail!("port already open");
        }
        state.open = true;
        state.opened += 1;
        Ok(())
    }

    async fn write_ascii(&mut self, command: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.open {
            bail!("write on closed port");
        }
        if state.fail_writes {
            bail!("injected write failure");
        }
        state.writes.push(command.to_string());
        Ok(())
    }

    async fn read_ascii(&mut self) -> Result<String> {
        let mut state = self.state.lock().await;
        if !state.open {
            bail!("read on closed port");
        }
        Ok(state.replies.pop_front().unwrap_or_default())
    }

    async fn close_port(&mut self) -> Result<()> {
        self.state.lock().await.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn camera_frames_follow_registers_and_shutter() {
        let mut camera = MockCamera::new();
        camera.set_pixel_value(7).await;
        camera.set_dark_value(2).await;
        assert!(camera.connect().await.unwrap());
        camera
            .set_property(CameraProperty::NumX, PropertyValue::Int(4))
            .await
            .unwrap();
        camera
            .set_property(CameraProperty::NumY, PropertyValue::Int(3))
            .await
            .unwrap();

        camera
            .start_exposure(Duration::from_millis(1), true)
            .await
            .unwrap();
        let light = camera.read_image().await.unwrap();
        assert_eq!(light.dim(), (3, 4));
        assert!(light.iter().all(|&v| v == 7));

        camera
            .start_exposure(Duration::from_millis(1), false)
            .await
            .unwrap();
        let dark = camera.read_image().await.unwrap();
        assert!(dark.iter().all(|&v| v == 2));
    }

    #[tokio::test]
    async fn camera_failure_injection_is_logged() {
        let mut camera = MockCamera::new();
        camera.fail_on(CallKind::Connect, true).await;
        assert!(camera.connect().await.is_err());
        assert_eq!(camera.calls().await, vec![TransportCall::Connect]);
    }

    #[tokio::test]
    async fn camera_ready_after_polls() {
        let mut camera = MockCamera::new();
        camera.set_ready_after(2).await;
        camera.connect().await.unwrap();
        camera
            .start_exposure(Duration::from_millis(1), true)
            .await
            .unwrap();
        assert!(!camera.is_image_ready().await.unwrap());
        assert!(!camera.is_image_ready().await.unwrap());
        assert!(camera.is_image_ready().await.unwrap());
    }

    #[tokio::test]
    async fn laser_port_requires_open() {
        let mut port = MockLaserPort::new();
        assert!(port.write_ascii("system=1\r").await.is_err());

        port.open_port().await.unwrap();
        port.write_ascii("system=1\r").await.unwrap();
        port.push_reply("0x0001\r\n").await;
        assert_eq!(port.read_ascii().await.unwrap(), "0x0001\r\n");
        assert_eq!(port.read_ascii().await.unwrap(), "");
        port.close_port().await.unwrap();

        assert_eq!(port.writes().await, vec!["system=1\r".to_string()]);
        assert_eq!(port.open_count().await, 1);
        assert!(!port.is_open().await);
    }
}
