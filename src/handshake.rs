//! Connection-establishment handshake: protocol version and link speed.
//!
//! Both sides exchange fixed-layout records over the reliable delivery
//! layer — frame loss is that layer's problem, so the handshake itself never
//! retransmits. A record that is malformed or out of sequence is fatal to
//! the attempt: the observer transmits an abort record and gives up.
//!
//! Record layout (10 bytes): type (1B), flags (1B), version (2B BE),
//! reserved (2B), baud rate (4B BE).

use crate::config::ConnectionConfig;
use crate::delivery::ReliableChannel;
use crate::error::{HandlinkError, Result};
use crate::transport::Transport;

/// Size of a handshake record on the wire.
pub const RECORD_SIZE: usize = 10;

/// Protocol version this stack implements.
pub const PROTOCOL_VERSION: u16 = 0x0100;

/// Handshake record types.
pub mod record_kind {
    /// Initiator announces itself and its highest supported speed.
    pub const WAKE: u8 = 1;
    /// Acceptor grants the final negotiated version and speed.
    pub const INIT: u8 = 2;
    /// Either side rejects the attempt.
    pub const ABORT: u8 = 3;

    /// Whether `k` is a record type this stack knows about.
    #[inline]
    pub fn is_known(k: u8) -> bool {
        matches!(k, WAKE | INIT | ABORT)
    }
}

/// Flag on an init record: the granted speed differs from the initial one.
pub const FLAG_CHANGE_SPEED: u8 = 0x80;

/// Abort reason: the peer's declared version is not supported.
pub const ABORT_VERSION_MISMATCH: u8 = 0x80;

/// A handshake record. Exists only while a connection is being established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeRecord {
    /// Record type (see [`record_kind`]).
    pub kind: u8,
    /// Type-specific flags.
    pub flags: u8,
    /// Declared protocol version.
    pub version: u16,
    /// Reserved, zero on the wire.
    pub reserved: u16,
    /// Requested (wake) or granted (init) baud rate.
    pub baud: u32,
}

impl HandshakeRecord {
    /// A wake record offering speeds up to `max_baud`.
    pub fn wake(max_baud: u32) -> Self {
        Self {
            kind: record_kind::WAKE,
            flags: 0,
            version: PROTOCOL_VERSION,
            reserved: 0,
            baud: max_baud,
        }
    }

    /// An init record granting `baud`, relative to the session's
    /// `initial_baud`.
    pub fn init(baud: u32, initial_baud: u32) -> Self {
        Self {
            kind: record_kind::INIT,
            flags: if baud != initial_baud {
                FLAG_CHANGE_SPEED
            } else {
                0
            },
            version: PROTOCOL_VERSION,
            reserved: 0,
            baud,
        }
    }

    /// An abort record with the given reason flags.
    pub fn abort(reason: u8) -> Self {
        Self {
            kind: record_kind::ABORT,
            flags: reason,
            version: 0,
            reserved: 0,
            baud: 0,
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0] = self.kind;
        buf[1] = self.flags;
        buf[2..4].copy_from_slice(&self.version.to_be_bytes());
        buf[4..6].copy_from_slice(&self.reserved.to_be_bytes());
        buf[6..10].copy_from_slice(&self.baud.to_be_bytes());
        buf
    }

    /// Decode from wire bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RECORD_SIZE {
            return Err(HandlinkError::Protocol(format!(
                "handshake record of {} bytes is too short",
                buf.len()
            )));
        }
        let kind = buf[0];
        if !record_kind::is_known(kind) {
            return Err(HandlinkError::Protocol(format!(
                "unknown handshake record type {kind:#04x}"
            )));
        }
        Ok(Self {
            kind,
            flags: buf[1],
            version: u16::from_be_bytes([buf[2], buf[3]]),
            reserved: u16::from_be_bytes([buf[4], buf[5]]),
            baud: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
        })
    }
}

/// Accept path: wait for a wake record, grant a speed, apply it.
///
/// Returns the negotiated baud rate. The init record is sent — and
/// acknowledged by the delivery layer — before the transport speed changes,
/// so both ends switch after the same frame.
pub async fn accept<T: Transport>(
    channel: &mut ReliableChannel<T>,
    cfg: &ConnectionConfig,
) -> Result<u32> {
    let raw = channel.recv(cfg.accept_timeout).await?;

    let record = match HandshakeRecord::decode(&raw) {
        Ok(r) => r,
        Err(e) => {
            abort_best_effort(channel, 0).await;
            return Err(HandlinkError::Handshake(format!(
                "malformed handshake record: {e}"
            )));
        }
    };
    if record.kind != record_kind::WAKE {
        abort_best_effort(channel, 0).await;
        return Err(HandlinkError::Handshake(format!(
            "expected wake record, got type {:#04x}",
            record.kind
        )));
    }
    if record.version > PROTOCOL_VERSION {
        tracing::warn!(
            peer = record.version,
            known = PROTOCOL_VERSION,
            "peer declares a newer protocol version, rejecting"
        );
        abort_best_effort(channel, ABORT_VERSION_MISMATCH).await;
        return Err(HandlinkError::Handshake(format!(
            "unsupported peer version {:#06x}",
            record.version
        )));
    }

    let baud = if record.baud == 0 {
        cfg.initial_baud
    } else {
        record.baud.min(cfg.max_baud)
    };

    channel
        .send(&HandshakeRecord::init(baud, cfg.initial_baud).encode())
        .await?;
    if baud != cfg.initial_baud {
        channel.transport_mut().set_speed(baud)?;
    }
    tracing::debug!(baud, "handshake accepted");
    Ok(baud)
}

/// Connect path: send a wake record, await the granted init, apply it.
///
/// Returns the negotiated baud rate.
pub async fn connect<T: Transport>(
    channel: &mut ReliableChannel<T>,
    cfg: &ConnectionConfig,
) -> Result<u32> {
    channel
        .send(&HandshakeRecord::wake(cfg.max_baud).encode())
        .await?;

    let raw = channel.recv(cfg.recv_timeout).await?;
    let record = HandshakeRecord::decode(&raw).map_err(|e| {
        HandlinkError::Handshake(format!("malformed handshake response: {e}"))
    })?;

    match record.kind {
        record_kind::INIT => {
            let baud = if record.baud == 0 {
                cfg.initial_baud
            } else {
                record.baud
            };
            if baud != cfg.initial_baud {
                channel.transport_mut().set_speed(baud)?;
            }
            tracing::debug!(baud, "handshake completed");
            Ok(baud)
        }
        record_kind::ABORT => Err(HandlinkError::Handshake(format!(
            "peer aborted the handshake (reason {:#04x})",
            record.flags
        ))),
        _ => {
            abort_best_effort(channel, 0).await;
            Err(HandlinkError::Handshake(
                "out-of-sequence handshake record".into(),
            ))
        }
    }
}

/// Send an abort record, swallowing delivery failures — the attempt is
/// already being torn down.
async fn abort_best_effort<T: Transport>(channel: &mut ReliableChannel<T>, reason: u8) {
    if let Err(e) = channel.send(&HandshakeRecord::abort(reason).encode()).await {
        tracing::debug!(error = %e, "abort record not delivered");
    }
}
