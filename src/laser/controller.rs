//! ASCII command sequences for the diode laser.
//!
//! Every command is sent as open → write `cmd\r` → settle → close. The port
//! and the channel states share one async mutex that is held for a whole
//! command sequence, so sequences for different channels never interleave.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::{LaserSettings, LaserTiming};
use crate::error::{AppResult, DaqError};
use crate::hardware::LaserTransport;
use crate::laser::channel::{ChannelBank, LaserChannel, LaserChannelState};

struct LaserInner<P> {
    port: P,
    channels: ChannelBank,
}

impl<P: LaserTransport> LaserInner<P> {
    async fn send(&mut self, command: &str, settle: Duration) -> AppResult<()> {
        debug!(command, "laser command");
        self.port.open_port().await.map_err(DaqError::transport)?;

        let written = self.port.write_ascii(&format!("{command}\r")).await;
        if written.is_ok() {
            sleep(settle).await;
        }
        let closed = self.port.close_port().await;

        written.map_err(DaqError::transport)?;
        closed.map_err(DaqError::transport)
    }

    async fn query(&mut self, command: &str, wait: Duration, settle: Duration) -> AppResult<String> {
        debug!(command, "laser query");
        self.port.open_port().await.map_err(DaqError::transport)?;

        let reply = async {
            self.port.write_ascii(&format!("{command}\r")).await?;
            sleep(wait).await;
            let reply = self.port.read_ascii().await?;
            sleep(settle).await;
            Ok::<_, anyhow::Error>(reply)
        }
        .await;
        let closed = self.port.close_port().await;

        let reply = reply.map_err(DaqError::transport)?;
        closed.map_err(DaqError::transport)?;
        Ok(reply)
    }
}

/// Controller for one physical laser unit. Clones share the port.
pub struct LaserController<P: LaserTransport> {
    inner: Arc<Mutex<LaserInner<P>>>,
    timing: LaserTiming,
}

impl<P: LaserTransport> Clone for LaserController<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            timing: self.timing,
        }
    }
}

impl<P: LaserTransport> LaserController<P> {
    /// Controller over `port` with the given settle delays.
    pub fn new(port: P, timing: LaserTiming) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LaserInner {
                port,
                channels: ChannelBank::default(),
            })),
            timing,
        }
    }

    /// Controller using the `[laser]` timing.
    pub fn from_settings(port: P, settings: &LaserSettings) -> Self {
        Self::new(port, settings.timing)
    }

    /// Switch the laser system on.
    pub async fn enable(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .send("system=1", ms(self.timing.system_settle_ms))
            .await?;
        info!("Laser system enabled");
        Ok(())
    }

    /// Switch all outputs and the laser system off.
    pub async fn disable(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .send("enable=0", ms(self.timing.disable_settle_ms))
            .await?;
        inner
            .send("system=0", ms(self.timing.system_settle_ms))
            .await?;
        inner.channels.disable_all();
        info!("Laser system disabled");
        Ok(())
    }

    /// Device status word, trimmed.
    pub async fn status(&self) -> AppResult<String> {
        let mut inner = self.inner.lock().await;
        let reply = inner
            .query(
                "statword?",
                ms(self.timing.status_wait_ms),
                ms(self.timing.status_settle_ms),
            )
            .await?;
        Ok(reply.trim().to_string())
    }

    /// Drive `channel` at `current_ma`; zero switches the channel off.
    ///
    /// Currents outside `[0, max]` are rejected before any port traffic.
    pub async fn set_current(&self, channel: LaserChannel, current_ma: f64) -> AppResult<()> {
        let max = channel.max_current_ma();
        if !current_ma.is_finite() || !(0.0..=max).contains(&current_ma) {
            return Err(DaqError::InvalidArgument(format!(
                "{channel} current {current_ma} mA outside 0..={max}"
            )));
        }

        let n = channel.number();
        let mut inner = self.inner.lock().await;
        inner
            .send(&format!("channel={n}"), ms(self.timing.channel_settle_ms))
            .await?;

        if current_ma == 0.0 {
            inner
                .send("enable=0", ms(self.timing.disable_settle_ms))
                .await?;
            *inner.channels.get_mut(channel) = LaserChannelState::off(channel);
            info!(%channel, "Laser channel off");
            return Ok(());
        }

        inner
            .send(&format!("enable={n}"), ms(self.timing.enable_settle_ms))
            .await?;
        inner
            .send(
                &format!("current={current_ma:.2}"),
                ms(self.timing.current_settle_ms),
            )
            .await?;
        *inner.channels.get_mut(channel) = LaserChannelState {
            channel,
            current_ma,
            enabled: true,
        };
        info!(%channel, current_ma, "Laser current set");
        Ok(())
    }

    /// Last known state of `channel`.
    pub async fn channel_state(&self, channel: LaserChannel) -> LaserChannelState {
        self.inner.lock().await.channels.get(channel)
    }

    /// Last known state of every channel.
    pub async fn channel_states(&self) -> [LaserChannelState; 4] {
        self.inner.lock().await.channels.all()
    }
}

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
