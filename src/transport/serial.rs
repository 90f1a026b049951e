//! Serial-line transport.
//!
//! Built on `tokio-serial`. This is the one transport where
//! [`set_speed`](crate::transport::Transport::set_speed) actually reaches
//! the hardware: the handshake layer calls it after baud negotiation.

use std::io;
use std::time::Duration;

use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

use crate::error::{HandlinkError, Result};
use crate::transport::{StreamTransport, Transport, TransportKind};

/// A [`Transport`] over a serial line.
pub struct SerialTransport {
    inner: StreamTransport<SerialStream>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("speed", &self.inner.speed())
            .finish()
    }
}

impl SerialTransport {
    /// Open a serial port at the given initial speed.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use handlink::transport::SerialTransport;
    ///
    /// let port = SerialTransport::open("/dev/ttyUSB0", 9_600).unwrap();
    /// ```
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let stream = tokio_serial::new(path, baud)
            .open_native_async()
            .map_err(serial_io_error)?;
        Ok(Self {
            inner: StreamTransport::with_speed(stream, TransportKind::Serial, baud),
        })
    }
}

impl Transport for SerialTransport {
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.inner.read(buf, timeout).await
    }

    async fn write_all(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        self.inner.write_all(data, timeout).await
    }

    async fn poll(&mut self, timeout: Duration) -> Result<()> {
        self.inner.poll(timeout).await
    }

    async fn flush(&mut self) -> Result<()> {
        self.inner.flush().await
    }

    fn set_speed(&mut self, baud: u32) -> Result<()> {
        self.inner
            .get_mut()
            .set_baud_rate(baud)
            .map_err(serial_io_error)?;
        tracing::debug!(baud, "serial line speed changed");
        self.inner.set_speed(baud)
    }

    fn speed(&self) -> u32 {
        self.inner.speed()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}

fn serial_io_error(e: tokio_serial::Error) -> HandlinkError {
    HandlinkError::Io(io::Error::new(io::ErrorKind::Other, e))
}
