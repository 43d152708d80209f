//! RS-232 laser port backed by the `serialport` crate.
//!
//! Serial I/O is blocking, so every read and write runs on Tokio's blocking
//! pool. The port is opened and closed around each laser command.

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serialport::{DataBits, SerialPort, StopBits};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::LaserSettings;
use crate::hardware::transport::LaserTransport;

/// Laser serial port.
pub struct SerialLaserPort {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,
    baud_rate: u32,
    data_bits: DataBits,
    stop_bits: StopBits,
    timeout: Duration,
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialLaserPort {
    /// Build a closed port from the `[laser]` settings.
    pub fn from_settings(settings: &LaserSettings) -> Result<Self> {
        let data_bits = match settings.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => return Err(anyhow!("unsupported data bits {other}")),
        };
        let stop_bits = match settings.stop_bits {
            1 => StopBits::One,
            2 => StopBits::Two,
            other => return Err(anyhow!("unsupported stop bits {other}")),
        };

        Ok(Self {
            port_name: settings.port.clone(),
            baud_rate: settings.baud_rate,
            data_bits,
            stop_bits,
            timeout: Duration::from_millis(settings.timeout_ms),
            port: None,
        })
    }

    fn handle(&self) -> Result<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port
            .clone()
            .ok_or_else(|| anyhow!("serial port '{}' is not open", self.port_name))
    }
}

#[async_trait]
impl LaserTransport for SerialLaserPort {
    async fn open_port(&mut self) -> Result<()> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .data_bits(self.data_bits)
            .stop_bits(self.stop_bits)
            .timeout(self.timeout)
            .open()
            .with_context(|| {
                format!(
                    "Failed to open serial port '{}' at {} baud",
                    self.port_name, self.baud_rate
                )
            })?;

        self.port = Some(Arc::new(Mutex::new(port)));
        debug!(port = %self.port_name, baud = self.baud_rate, "serial port opened");
        Ok(())
    }

    async fn write_ascii(&mut self, command: &str) -> Result<()> {
        let port = self.handle()?;
        let bytes = command.as_bytes().to_vec();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut port = port.blocking_lock();
            port.write_all(&bytes)
                .context("Failed to write to serial port")?;
            port.flush().context("Failed to flush serial port")?;
            Ok(())
        })
        .await
        .context("Serial I/O task panicked")??;

        debug!(command = command.trim_end(), "sent laser command");
        Ok(())
    }

    async fn read_ascii(&mut self) -> Result<String> {
        let port = self.handle()?;

        let reply = tokio::task::spawn_blocking(move || -> Result<String> {
            let mut port = port.blocking_lock();
            let pending = port
                .bytes_to_read()
                .context("Failed to query serial input buffer")? as usize;
            let mut buffer = vec![0u8; pending];
            if pending > 0 {
                port.read_exact(&mut buffer)
                    .context("Failed to read from serial port")?;
            }
            Ok(String::from_utf8_lossy(&buffer).into_owned())
        })
        .await
        .context("Serial I/O task panicked")??;

        debug!(reply = reply.trim(), "laser reply");
        Ok(reply)
    }

    async fn close_port(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!(port = %self.port_name, "serial port closed");
        }
        Ok(())
    }
}
