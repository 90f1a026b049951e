//! In-memory transport pair.
//!
//! Two ends of a `tokio::io::duplex` pipe wrapped as serial-kind transports,
//! so the full framed stack — handshake included — can run entirely
//! in-process. Used by the integration tests and the loopback demo.

use tokio::io::DuplexStream;

use crate::transport::{StreamTransport, TransportKind};

/// One end of an in-memory link.
pub type MemoryTransport = StreamTransport<DuplexStream>;

/// Create a connected pair of in-memory transports.
///
/// # Example
///
/// ```
/// use handlink::transport::memory_pair;
///
/// let (host_end, device_end) = memory_pair();
/// ```
pub fn memory_pair() -> (MemoryTransport, MemoryTransport) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    (
        StreamTransport::new(a, TransportKind::Serial),
        StreamTransport::new(b, TransportKind::Serial),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::Transport;

    #[tokio::test]
    async fn test_pair_is_cross_connected() {
        let (mut a, mut b) = memory_pair();
        a.write_all(b"to-b", Duration::from_secs(1)).await.unwrap();
        b.write_all(b"to-a", Duration::from_secs(1)).await.unwrap();

        let mut buf = [0u8; 8];
        let n = b.read(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"to-b");
        let n = a.read(&mut buf, Duration::from_secs(1)).await.unwrap();
        assert_eq!(&buf[..n], b"to-a");
    }

    #[tokio::test]
    async fn test_pair_kind_runs_the_framed_stack() {
        let (a, _b) = memory_pair();
        assert_eq!(a.kind(), TransportKind::Serial);
    }
}
