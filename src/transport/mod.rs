//! Transport capability contract and implementations.
//!
//! The protocol core never touches an OS handle directly: everything below
//! the link framer goes through [`Transport`]. One implementation exists per
//! physical medium — serial lines, TCP sockets, and an in-memory pair for
//! tests and demos.

mod memory;
mod serial;
mod stream;
mod tcp;

pub use memory::{memory_pair, MemoryTransport};
pub use serial::SerialTransport;
pub use stream::StreamTransport;
pub use tcp::{TcpLinkListener, TcpTransport, SYNC_PORT};

use std::time::Duration;

use crate::error::Result;

/// How a transport establishes and frames its sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// A raw byte pipe with no delivery guarantees. The framed reliable
    /// stack runs on top, and connection establishment uses the speed
    /// handshake.
    Serial,
    /// A stream that performs its own connection establishment out-of-band.
    /// Carries the network envelope instead of the framed stack; the speed
    /// handshake is skipped.
    Network,
}

/// Polymorphic device-I/O contract consumed by the protocol core.
///
/// Every blocking call carries an explicit timeout and either completes,
/// times out, or fails; a timeout leaves the transport usable and all
/// connection state untouched.
#[allow(async_fn_in_trait)]
pub trait Transport: Send {
    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// Returns the number of bytes read; `Ok(0)` means the peer closed the
    /// stream.
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write all of `data`, waiting at most `timeout`.
    async fn write_all(&mut self, data: &[u8], timeout: Duration) -> Result<()>;

    /// Wait until at least one byte is readable.
    async fn poll(&mut self, timeout: Duration) -> Result<()>;

    /// Flush buffered output to the device.
    async fn flush(&mut self) -> Result<()>;

    /// Change the link speed.
    ///
    /// No-op (beyond recording the value) where the medium has no notion of
    /// baud rate.
    fn set_speed(&mut self, baud: u32) -> Result<()>;

    /// The current link speed.
    fn speed(&self) -> u32;

    /// How this transport establishes and frames sessions.
    fn kind(&self) -> TransportKind;

    /// Flush and shut down. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}
