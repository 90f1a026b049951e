//! Per-connection configuration: addresses, speeds, timeouts, retry budget.

use std::time::Duration;

/// Link speed every session starts at, until the handshake negotiates up.
pub const DEFAULT_INITIAL_BAUD: u32 = 9_600;

/// Highest speed offered when initiating a handshake.
pub const DEFAULT_MAX_BAUD: u32 = 57_600;

/// Well-known sync endpoint address, used for both ends by default.
pub const DEFAULT_ADDRESS: u8 = 3;

/// Default maximum payload carried by one fragment.
pub const DEFAULT_MAX_FRAGMENT: usize = 1_024;

/// Ceiling for a single logical transfer (message or argument block).
///
/// The size fields on the wire are 16 bits, so one transfer never exceeds
/// 64 KiB regardless of configuration.
pub const MAX_TRANSFER: usize = 0xFFFF;

/// Default wait for one fragment's acknowledgment before retransmitting.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Default wait for an inbound message.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wait for a peer to start the handshake in `accept`.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of delivery attempts per fragment before the link is
/// declared broken.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Configuration for a [`Connection`](crate::Connection).
///
/// `ConnectionConfig::default()` matches the historical wire defaults; the
/// `with_*` methods exist for the handful of knobs callers commonly turn.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Our link-layer address.
    pub local_addr: u8,
    /// The peer's link-layer address.
    pub remote_addr: u8,
    /// Speed the transport starts at.
    pub initial_baud: u32,
    /// Highest speed we offer (connect) or grant (accept) in the handshake.
    pub max_baud: u32,
    /// How long `accept` waits for a peer.
    pub accept_timeout: Duration,
    /// How long `receive` waits for a complete message.
    pub recv_timeout: Duration,
    /// How long to wait for each fragment's acknowledgment.
    pub ack_timeout: Duration,
    /// Delivery attempts per fragment before giving up.
    pub max_retries: u32,
    /// Maximum payload per fragment.
    pub max_fragment: usize,
    /// Maximum size of one logical transfer. Clamped to [`MAX_TRANSFER`].
    pub max_transfer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            local_addr: DEFAULT_ADDRESS,
            remote_addr: DEFAULT_ADDRESS,
            initial_baud: DEFAULT_INITIAL_BAUD,
            max_baud: DEFAULT_MAX_BAUD,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            max_fragment: DEFAULT_MAX_FRAGMENT,
            max_transfer: MAX_TRANSFER,
        }
    }
}

impl ConnectionConfig {
    /// Create a configuration with the historical defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the accept timeout.
    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /// Set the receive timeout.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    /// Set the per-fragment acknowledgment timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the delivery attempt budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the highest speed offered or granted during the handshake.
    pub fn with_max_baud(mut self, baud: u32) -> Self {
        self.max_baud = baud;
        self
    }

    /// Set the maximum fragment payload.
    pub fn with_max_fragment(mut self, size: usize) -> Self {
        self.max_fragment = size.max(1);
        self
    }

    /// The effective single-transfer ceiling.
    pub fn transfer_ceiling(&self) -> usize {
        self.max_transfer.min(MAX_TRANSFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_wire_history() {
        let cfg = ConnectionConfig::default();
        assert_eq!(cfg.initial_baud, 9_600);
        assert_eq!(cfg.local_addr, 3);
        assert_eq!(cfg.remote_addr, 3);
        assert_eq!(cfg.max_fragment, 1_024);
        assert_eq!(cfg.max_retries, 10);
    }

    #[test]
    fn test_transfer_ceiling_is_clamped() {
        let mut cfg = ConnectionConfig::default();
        cfg.max_transfer = 10 * 1024 * 1024;
        assert_eq!(cfg.transfer_ceiling(), MAX_TRANSFER);

        cfg.max_transfer = 512;
        assert_eq!(cfg.transfer_ceiling(), 512);
    }

    #[test]
    fn test_max_fragment_floor_is_one() {
        let cfg = ConnectionConfig::new().with_max_fragment(0);
        assert_eq!(cfg.max_fragment, 1);
    }
}
