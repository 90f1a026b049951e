//! TCP transport.
//!
//! Network links arrive already connected and already reliable, so they are
//! [`TransportKind::Network`]: the connection runs the network envelope
//! instead of the framed stack and skips the speed handshake.

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::error::Result;
use crate::transport::{StreamTransport, TransportKind};

/// Well-known TCP port for network sync sessions.
pub const SYNC_PORT: u16 = 14238;

/// A [`Transport`](crate::transport::Transport) over a TCP stream.
pub type TcpTransport = StreamTransport<TcpStream>;

impl StreamTransport<TcpStream> {
    /// Connect to a listening peer.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<TcpTransport> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(StreamTransport::new(stream, TransportKind::Network))
    }
}

/// Listener side of a network sync session.
///
/// Wraps `tokio::net::TcpListener`; each accepted stream becomes a
/// [`TcpTransport`] ready to hand to
/// [`Connection::bind`](crate::Connection::bind).
pub struct TcpLinkListener {
    listener: TcpListener,
}

impl TcpLinkListener {
    /// Bind to the given address.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Accept a single peer.
    pub async fn accept(&self) -> Result<TcpTransport> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::debug!(%peer, "accepted network sync stream");
        stream.set_nodelay(true)?;
        Ok(StreamTransport::new(stream, TransportKind::Network))
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::Transport;

    #[tokio::test]
    async fn test_connect_and_exchange() {
        let listener = TcpLinkListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let mut t = listener.accept().await.unwrap();
            let mut buf = [0u8; 8];
            let n = t.read(&mut buf, Duration::from_secs(5)).await.unwrap();
            t.write_all(&buf[..n], Duration::from_secs(5)).await.unwrap();
        });

        let mut client = TcpTransport::connect(addr).await.unwrap();
        assert_eq!(client.kind(), TransportKind::Network);
        client
            .write_all(b"echo", Duration::from_secs(5))
            .await
            .unwrap();

        let mut buf = [0u8; 8];
        let n = client.read(&mut buf, Duration::from_secs(5)).await.unwrap();
        assert_eq!(&buf[..n], b"echo");

        server.await.unwrap();
    }
}
