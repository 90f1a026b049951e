//! Generic transport over any async byte stream.
//!
//! `StreamTransport` adapts anything implementing `AsyncRead + AsyncWrite`
//! to the [`Transport`] contract: per-call timeouts via `tokio::time`, and a
//! small internal buffer so `poll` can confirm readability without losing
//! the byte it observed.

use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::DEFAULT_INITIAL_BAUD;
use crate::error::{HandlinkError, Result};
use crate::transport::{Transport, TransportKind};

/// Size of the scratch buffer `poll` reads into.
const POLL_CHUNK: usize = 4 * 1024;

/// A [`Transport`] over any `AsyncRead + AsyncWrite` stream.
pub struct StreamTransport<S> {
    io: S,
    kind: TransportKind,
    /// Bytes pulled off the stream by `poll` and not yet consumed by `read`.
    peeked: BytesMut,
    speed: u32,
    open: bool,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a stream, reporting the given transport kind.
    pub fn new(io: S, kind: TransportKind) -> Self {
        Self::with_speed(io, kind, DEFAULT_INITIAL_BAUD)
    }

    /// Wrap a stream with a known current speed.
    pub fn with_speed(io: S, kind: TransportKind, speed: u32) -> Self {
        Self {
            io,
            kind,
            peeked: BytesMut::new(),
            speed,
            open: true,
        }
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.io
    }

    /// Get a mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.io
    }

    /// Consume the transport and return the underlying stream.
    pub fn into_inner(self) -> S {
        self.io
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        // Drain anything poll() already pulled off the stream first.
        if !self.peeked.is_empty() {
            let n = self.peeked.len().min(buf.len());
            buf[..n].copy_from_slice(&self.peeked[..n]);
            self.peeked.advance(n);
            return Ok(n);
        }

        match tokio::time::timeout(timeout, self.io.read(buf)).await {
            Err(_) => Err(HandlinkError::Timeout),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn write_all(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.io.write_all(data)).await {
            Err(_) => Err(HandlinkError::Timeout),
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn poll(&mut self, timeout: Duration) -> Result<()> {
        if !self.peeked.is_empty() {
            return Ok(());
        }

        let mut chunk = [0u8; POLL_CHUNK];
        match tokio::time::timeout(timeout, self.io.read(&mut chunk)).await {
            Err(_) => Err(HandlinkError::Timeout),
            Ok(Ok(0)) => Err(HandlinkError::Disconnected),
            Ok(Ok(n)) => {
                self.peeked.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    async fn flush(&mut self) -> Result<()> {
        self.io.flush().await?;
        Ok(())
    }

    fn set_speed(&mut self, baud: u32) -> Result<()> {
        self.speed = baud;
        Ok(())
    }

    fn speed(&self) -> u32 {
        self.speed
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.io.flush().await?;
        self.io.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (
        StreamTransport<tokio::io::DuplexStream>,
        StreamTransport<tokio::io::DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(4096);
        (
            StreamTransport::new(a, TransportKind::Serial),
            StreamTransport::new(b, TransportKind::Serial),
        )
    }

    #[tokio::test]
    async fn test_read_returns_written_bytes() {
        let (mut a, mut b) = pair();
        a.write_all(b"ping", Duration::from_secs(1)).await.unwrap();
        a.flush().await.unwrap();

        let mut buf = [0u8; 16];
        let n = b.read(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[tokio::test]
    async fn test_read_times_out_on_silence() {
        let (_a, mut b) = pair();
        let mut buf = [0u8; 8];
        let err = b
            .read(&mut buf, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlinkError::Timeout));
    }

    #[tokio::test]
    async fn test_poll_then_read_loses_nothing() {
        let (mut a, mut b) = pair();
        a.write_all(b"abcdef", Duration::from_secs(1)).await.unwrap();

        b.poll(Duration::from_secs(1)).await.unwrap();
        // A second poll is satisfied from the buffer.
        b.poll(Duration::from_millis(1)).await.unwrap();

        let mut buf = [0u8; 3];
        let n = b.read(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"abc");
        let n = b.read(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"def");
    }

    #[tokio::test]
    async fn test_poll_reports_peer_close() {
        let (a, mut b) = pair();
        drop(a);
        let err = b.poll(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, HandlinkError::Disconnected));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut a, _b) = pair();
        a.close().await.unwrap();
        a.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_speed_is_recorded() {
        let (mut a, _b) = pair();
        assert_eq!(a.speed(), DEFAULT_INITIAL_BAUD);
        a.set_speed(57_600).unwrap();
        assert_eq!(a.speed(), 57_600);
    }
}
