//! Error types for handlink.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Main error type for all handlink operations.
///
/// Variants fall into the shared-range numeric bands the sync protocol has
/// always used; [`HandlinkError::code`] returns the band code so callers that
/// speak the historical negative-integer convention can recover it.
#[derive(Debug, Error)]
pub enum HandlinkError {
    /// I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation did not complete within its timeout.
    ///
    /// Connection state is left exactly as it was before the call.
    #[error("operation timed out")]
    Timeout,

    /// The link is gone: retransmissions were exhausted, the peer closed
    /// the stream, or the transport reported an unrecoverable failure.
    #[error("link disconnected")]
    Disconnected,

    /// Operation invalid for the connection's current state.
    ///
    /// Fails fast; no I/O was attempted.
    #[error("`{op}` is invalid while the connection is {state}")]
    InvalidState {
        /// The operation that was attempted.
        op: &'static str,
        /// The state the connection was in.
        state: ConnectionState,
    },

    /// Malformed or unexpected wire data that could not be recovered locally.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connection establishment was rejected or aborted.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The device reported a non-zero status for a command.
    ///
    /// Never retried automatically: the same request will fail the same way.
    /// The transport-level connection is still usable.
    #[error("device rejected command {command:#04x} with status {status}")]
    Remote {
        /// The command that was rejected.
        command: u8,
        /// The device's reported status code.
        status: u8,
    },

    /// A single transfer exceeded the protocol's size ceiling.
    ///
    /// Detected locally, before any bytes are transmitted.
    #[error("transfer of {len} bytes exceeds the single-transfer ceiling")]
    TransferTooLarge {
        /// Size of the offending transfer.
        len: usize,
    },

    /// A buffer limit was exceeded; any partially built state was unwound.
    #[error("resource limit exceeded: {0}")]
    Resource(&'static str),

    /// Malformed configuration document (device table overrides).
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl HandlinkError {
    /// Numeric error code in the protocol's historical negative bands:
    /// protocol −100s, transport/socket −200s, remote −300s, configuration
    /// −400s, resource −500s.
    pub fn code(&self) -> i32 {
        match self {
            HandlinkError::Handshake(_) => -101,
            HandlinkError::Protocol(_) => -102,
            HandlinkError::Disconnected => -200,
            HandlinkError::InvalidState { .. } => -201,
            HandlinkError::Timeout => -202,
            HandlinkError::Io(_) => -204,
            HandlinkError::Remote { .. } => -301,
            HandlinkError::TransferTooLarge { .. } => -304,
            HandlinkError::Config(_) => -400,
            HandlinkError::Resource(_) => -500,
        }
    }

    /// Whether this is a transport-level failure that a caller may retry
    /// once the link is re-established (as opposed to a remote rejection,
    /// which will fail identically on retry).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            HandlinkError::Io(_) | HandlinkError::Timeout | HandlinkError::Disconnected
        )
    }
}

/// Result type alias using HandlinkError.
pub type Result<T> = std::result::Result<T, HandlinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_fall_in_their_bands() {
        assert_eq!(HandlinkError::Disconnected.code(), -200);
        assert_eq!(HandlinkError::Timeout.code(), -202);
        assert_eq!(
            HandlinkError::Remote {
                command: 0x01,
                status: 3
            }
            .code(),
            -301
        );
        assert_eq!(HandlinkError::TransferTooLarge { len: 70_000 }.code(), -304);
        assert_eq!(HandlinkError::Resource("reassembly").code(), -500);

        let hs = HandlinkError::Handshake("bad record".into());
        assert!(hs.code() <= -100 && hs.code() > -200);
    }

    #[test]
    fn test_remote_is_not_transport() {
        let remote = HandlinkError::Remote {
            command: 1,
            status: 0x80,
        };
        assert!(!remote.is_transport());
        assert!(HandlinkError::Timeout.is_transport());
        assert!(HandlinkError::Disconnected.is_transport());
    }

    #[test]
    fn test_display_carries_device_code() {
        let err = HandlinkError::Remote {
            command: 0x2a,
            status: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x2a"));
        assert!(msg.contains('5'));
    }
}
