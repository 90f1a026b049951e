//! Reliable delivery over the link framer.
//!
//! [`ReliableChannel`] turns the lossy frame stream into in-order, reliable,
//! arbitrarily-sized messages: oversized payloads are split into fragments,
//! every data frame is acknowledged, unacknowledged fragments are
//! retransmitted up to a budget, and duplicates caused by lost
//! acknowledgments are re-acked but never redelivered.
//!
//! [`NetChannel`] is the alternate envelope for transports that are already
//! reliable (network sync): a six-byte header in front of each message, no
//! fragments and no acknowledgments.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};

use crate::config::ConnectionConfig;
use crate::error::{HandlinkError, Result};
use crate::protocol::{build_frame, frame_type, DecodeEvent, Frame, FrameBuffer};
use crate::transport::Transport;

/// Size of the fragment header inside each data frame.
pub const FRAGMENT_HEADER_SIZE: usize = 4;

/// Fragment kind constants.
pub mod fragment_kind {
    /// Carries message bytes.
    pub const DATA: u8 = 1;
    /// Acknowledges the data frame with the same frame id.
    pub const ACK: u8 = 2;
}

/// Fragment flag constants.
pub mod fragment_flags {
    /// First fragment of a message; the size field holds the total length.
    pub const FIRST: u8 = 0x80;
    /// Final fragment of a message.
    pub const LAST: u8 = 0x40;
}

/// Fragment header: kind (1B), flags (1B), size (2B BE).
///
/// `size` is the total message length on the first fragment and the byte
/// offset of the fragment otherwise, which lets the receiver verify it is
/// appending in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Fragment kind (see [`fragment_kind`]).
    pub kind: u8,
    /// Fragment flags (see [`fragment_flags`]).
    pub flags: u8,
    /// Total length (first fragment) or byte offset (the rest).
    pub size: u16,
}

impl FragmentHeader {
    /// Encode to wire bytes.
    pub fn encode(&self) -> [u8; FRAGMENT_HEADER_SIZE] {
        let size = self.size.to_be_bytes();
        [self.kind, self.flags, size[0], size[1]]
    }

    /// Decode from wire bytes. Returns `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < FRAGMENT_HEADER_SIZE {
            return None;
        }
        Some(Self {
            kind: buf[0],
            flags: buf[1],
            size: u16::from_be_bytes([buf[2], buf[3]]),
        })
    }

    /// Whether this is the first fragment of a message.
    #[inline]
    pub fn is_first(&self) -> bool {
        self.flags & fragment_flags::FIRST != 0
    }

    /// Whether this is the final fragment of a message.
    #[inline]
    pub fn is_last(&self) -> bool {
        self.flags & fragment_flags::LAST != 0
    }
}

/// Signed distance from `b` to `a` on the wrapping 8-bit id circle.
///
/// Positive means `a` is ahead of `b`. Using the window instead of raw
/// equality keeps id wraparound from being mistaken for a duplicate.
pub(crate) fn seq_distance(a: u8, b: u8) -> i8 {
    a.wrapping_sub(b) as i8
}

/// In-progress reassembly of one inbound message.
struct Assembly {
    /// Total length declared by the first fragment.
    expected_total: usize,
    /// Bytes received so far.
    buf: BytesMut,
    /// Frame id the next fragment must carry.
    next_id: u8,
}

/// Reliable, in-order message delivery over a lossy frame stream.
pub struct ReliableChannel<T> {
    transport: T,
    cfg: ConnectionConfig,
    decoder: FrameBuffer,
    /// Decoded frames not yet consumed.
    pending: VecDeque<Frame>,
    read_buf: Vec<u8>,
    next_frame_id: u8,
    /// Frame id of the last inbound data frame we acknowledged.
    last_acked: Option<u8>,
    assembly: Option<Assembly>,
    broken: bool,
}

impl<T: Transport> ReliableChannel<T> {
    /// Create a channel over `transport`.
    pub fn new(transport: T, cfg: ConnectionConfig) -> Self {
        let frame_ceiling = (cfg.max_fragment + FRAGMENT_HEADER_SIZE).min(u16::MAX as usize);
        Self {
            transport,
            cfg,
            decoder: FrameBuffer::with_max_payload(frame_ceiling as u16),
            pending: VecDeque::new(),
            read_buf: vec![0u8; 4 * 1024],
            next_frame_id: 0,
            last_acked: None,
            assembly: None,
            broken: false,
        }
    }

    /// Whether retransmissions were exhausted or the transport failed.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Access the underlying transport (the handshake layer changes its
    /// speed after negotiation).
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Re-arm the channel for a fresh session: empty reassembly state,
    /// id counters at zero, broken flag cleared.
    pub fn reset(&mut self) {
        self.decoder.clear();
        self.pending.clear();
        self.next_frame_id = 0;
        self.last_acked = None;
        self.assembly = None;
        self.broken = false;
    }

    /// Send one message, fragmenting as needed.
    ///
    /// Each fragment is retransmitted until acknowledged, up to the retry
    /// budget; exhausting it breaks the channel.
    pub async fn send(&mut self, message: &[u8]) -> Result<()> {
        if self.broken {
            return Err(HandlinkError::Disconnected);
        }
        if message.len() > self.cfg.transfer_ceiling() {
            return Err(HandlinkError::TransferTooLarge {
                len: message.len(),
            });
        }

        let max = self.cfg.max_fragment.max(1);
        let total = message.len() as u16;
        let mut offset = 0usize;
        loop {
            let end = (offset + max).min(message.len());
            let first = offset == 0;
            let last = end == message.len();

            let mut flags = 0u8;
            if first {
                flags |= fragment_flags::FIRST;
            }
            if last {
                flags |= fragment_flags::LAST;
            }
            let header = FragmentHeader {
                kind: fragment_kind::DATA,
                flags,
                size: if first { total } else { offset as u16 },
            };

            let mut payload = Vec::with_capacity(FRAGMENT_HEADER_SIZE + (end - offset));
            payload.extend_from_slice(&header.encode());
            payload.extend_from_slice(&message[offset..end]);
            self.send_fragment(&payload).await?;

            if last {
                return Ok(());
            }
            offset = end;
        }
    }

    /// Receive one complete message.
    ///
    /// On timeout, connection state — including a partially reassembled
    /// message — is left exactly as it was, so a later call can finish it.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Bytes> {
        if self.broken {
            return Err(HandlinkError::Disconnected);
        }
        let deadline = Instant::now() + timeout;

        loop {
            let frame = self.next_frame(deadline).await?;
            if !frame.is_data() {
                tracing::debug!(
                    frame_type = frame.header.frame_type,
                    "ignoring non-delivery frame"
                );
                continue;
            }
            let Some(frag) = FragmentHeader::decode(frame.payload()) else {
                tracing::warn!(frame_id = frame.frame_id(), "fragment header too short");
                continue;
            };
            if frag.kind == fragment_kind::ACK {
                tracing::debug!(frame_id = frame.frame_id(), "stale acknowledgment");
                continue;
            }
            if frag.kind != fragment_kind::DATA {
                tracing::warn!(kind = frag.kind, "unknown fragment kind");
                continue;
            }

            let id = frame.frame_id();
            if self.last_acked == Some(id) {
                // Our acknowledgment was lost; repeat it, deliver nothing.
                tracing::debug!(frame_id = id, "duplicate fragment, re-acknowledging");
                self.ack_frame(&frame, frag).await?;
                continue;
            }
            if let Some(last) = self.last_acked {
                if seq_distance(id, last) < 0 {
                    tracing::warn!(frame_id = id, "stale fragment id");
                    continue;
                }
            }

            let body = &frame.payload()[FRAGMENT_HEADER_SIZE..];
            if frag.is_first() {
                if self.assembly.is_some() {
                    tracing::warn!("new message started mid-reassembly, discarding partial");
                }
                let expected_total = frag.size as usize;
                if expected_total > self.cfg.transfer_ceiling() {
                    self.assembly = None;
                    return Err(HandlinkError::Resource(
                        "inbound transfer exceeds the single-transfer ceiling",
                    ));
                }
                let mut buf = BytesMut::with_capacity(expected_total);
                buf.extend_from_slice(body);
                self.assembly = Some(Assembly {
                    expected_total,
                    buf,
                    next_id: id.wrapping_add(1),
                });
            } else {
                match &mut self.assembly {
                    Some(a) if a.next_id == id && a.buf.len() == frag.size as usize => {
                        a.buf.extend_from_slice(body);
                        a.next_id = id.wrapping_add(1);
                    }
                    Some(_) => {
                        tracing::warn!(
                            frame_id = id,
                            "fragment does not continue the message in progress, discarding"
                        );
                        self.assembly = None;
                        continue;
                    }
                    None => {
                        tracing::warn!(frame_id = id, "continuation with no message in progress");
                        continue;
                    }
                }
            }

            self.ack_frame(&frame, frag).await?;
            self.last_acked = Some(id);

            if frag.is_last() {
                let done = self
                    .assembly
                    .take()
                    .expect("assembly present after first/continuation fragment");
                if done.buf.len() != done.expected_total {
                    tracing::warn!(
                        expected = done.expected_total,
                        received = done.buf.len(),
                        "reassembled length mismatch, discarding message"
                    );
                    continue;
                }
                return Ok(done.buf.freeze());
            }
        }
    }

    /// Send one framed fragment and wait for its acknowledgment,
    /// retransmitting on silence.
    async fn send_fragment(&mut self, payload: &[u8]) -> Result<()> {
        let id = self.next_frame_id;
        self.next_frame_id = id.wrapping_add(1);
        let frame = build_frame(
            self.cfg.remote_addr,
            self.cfg.local_addr,
            frame_type::DATA,
            id,
            payload,
        );

        let attempts = self.cfg.max_retries.max(1);
        for attempt in 1..=attempts {
            let res = self.transport.write_all(&frame, self.cfg.ack_timeout).await;
            if let Err(e) = res {
                return Err(self.fatal(e));
            }
            let res = self.transport.flush().await;
            if let Err(e) = res {
                return Err(self.fatal(e));
            }

            match self.await_ack(id).await {
                Ok(()) => return Ok(()),
                Err(HandlinkError::Timeout) => {
                    tracing::warn!(frame_id = id, attempt, "no acknowledgment, retransmitting");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::error!(frame_id = id, "retransmission budget exhausted");
        self.broken = true;
        Err(HandlinkError::Disconnected)
    }

    /// Wait for the acknowledgment matching `id` within the ack timeout.
    async fn await_ack(&mut self, id: u8) -> Result<()> {
        let deadline = Instant::now() + self.cfg.ack_timeout;
        loop {
            let frame = self.next_frame(deadline).await?;
            if !frame.is_data() {
                continue;
            }
            let Some(frag) = FragmentHeader::decode(frame.payload()) else {
                tracing::warn!("fragment header too short while awaiting ack");
                continue;
            };
            match frag.kind {
                fragment_kind::ACK => {
                    if seq_distance(frame.frame_id(), id) == 0 {
                        return Ok(());
                    }
                    tracing::debug!(
                        frame_id = frame.frame_id(),
                        awaiting = id,
                        "acknowledgment for a different frame"
                    );
                }
                fragment_kind::DATA => {
                    // The peer never saw our last ack and is retransmitting.
                    if self.last_acked == Some(frame.frame_id()) {
                        self.ack_frame(&frame, frag).await?;
                    } else {
                        tracing::warn!(
                            frame_id = frame.frame_id(),
                            "unexpected data while awaiting ack"
                        );
                    }
                }
                other => tracing::warn!(kind = other, "unknown fragment kind"),
            }
        }
    }

    /// Acknowledge a data frame, echoing its id, flags, and size.
    async fn ack_frame(&mut self, frame: &Frame, frag: FragmentHeader) -> Result<()> {
        let header = FragmentHeader {
            kind: fragment_kind::ACK,
            flags: frag.flags,
            size: frag.size,
        };
        let bytes = build_frame(
            frame.src(),
            self.cfg.local_addr,
            frame_type::DATA,
            frame.frame_id(),
            &header.encode(),
        );
        let res = self.transport.write_all(&bytes, self.cfg.ack_timeout).await;
        if let Err(e) = res {
            return Err(self.fatal(e));
        }
        let res = self.transport.flush().await;
        if let Err(e) = res {
            return Err(self.fatal(e));
        }
        Ok(())
    }

    /// Pop the next frame addressed to us, reading more bytes as needed.
    async fn next_frame(&mut self, deadline: Instant) -> Result<Frame> {
        loop {
            while let Some(frame) = self.pending.pop_front() {
                if frame.dest() != self.cfg.local_addr {
                    tracing::debug!(dest = frame.dest(), "dropping frame addressed elsewhere");
                    continue;
                }
                return Ok(frame);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HandlinkError::Timeout);
            }
            let res = self.transport.read(&mut self.read_buf, remaining).await;
            let n = match res {
                Ok(n) => n,
                Err(e) => return Err(self.fatal(e)),
            };
            if n == 0 {
                self.broken = true;
                return Err(HandlinkError::Disconnected);
            }

            for ev in self.decoder.push(&self.read_buf[..n]) {
                match ev {
                    DecodeEvent::Frame(f) => self.pending.push_back(f),
                    DecodeEvent::Corrupt => {
                        // The sender's ack wait handles recovery.
                        tracing::warn!("corrupt frame on link, awaiting retransmission");
                    }
                }
            }
        }
    }

    /// Mark the channel broken on unrecoverable transport failures.
    fn fatal(&mut self, e: HandlinkError) -> HandlinkError {
        if matches!(e, HandlinkError::Io(_) | HandlinkError::Disconnected) {
            self.broken = true;
        }
        e
    }
}

// ============================================================================
// Network envelope
// ============================================================================

/// Size of the network envelope header.
pub const NET_HEADER_SIZE: usize = 6;

/// The only envelope type in use: one complete message.
const NET_TYPE_DATA: u8 = 0x01;

/// Message delivery over an already-reliable stream transport.
///
/// Envelope: type (1B), transaction id (1B), length (4B BE), payload.
pub struct NetChannel<T> {
    transport: T,
    cfg: ConnectionConfig,
    inbuf: BytesMut,
    read_buf: Vec<u8>,
    next_txid: u8,
    broken: bool,
}

impl<T: Transport> NetChannel<T> {
    /// Create a channel over `transport`.
    pub fn new(transport: T, cfg: ConnectionConfig) -> Self {
        Self {
            transport,
            cfg,
            inbuf: BytesMut::with_capacity(4 * 1024),
            read_buf: vec![0u8; 4 * 1024],
            next_txid: 0,
            broken: false,
        }
    }

    /// Whether the stream failed or lost envelope synchronization.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Access the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Re-arm for a fresh session.
    pub fn reset(&mut self) {
        self.inbuf.clear();
        self.next_txid = 0;
        self.broken = false;
    }

    /// Send one message.
    pub async fn send(&mut self, message: &[u8]) -> Result<()> {
        if self.broken {
            return Err(HandlinkError::Disconnected);
        }
        if message.len() > self.cfg.transfer_ceiling() {
            return Err(HandlinkError::TransferTooLarge {
                len: message.len(),
            });
        }

        let txid = self.next_txid;
        self.next_txid = txid.wrapping_add(1);

        let mut buf = Vec::with_capacity(NET_HEADER_SIZE + message.len());
        buf.push(NET_TYPE_DATA);
        buf.push(txid);
        buf.extend_from_slice(&(message.len() as u32).to_be_bytes());
        buf.extend_from_slice(message);

        let res = self.transport.write_all(&buf, self.cfg.ack_timeout).await;
        if let Err(e) = res {
            return Err(self.fatal(e));
        }
        let res = self.transport.flush().await;
        if let Err(e) = res {
            return Err(self.fatal(e));
        }
        Ok(())
    }

    /// Receive one message.
    ///
    /// Partial envelopes survive a timeout: the next call resumes where
    /// this one stopped.
    pub async fn recv(&mut self, timeout: Duration) -> Result<Bytes> {
        if self.broken {
            return Err(HandlinkError::Disconnected);
        }
        let deadline = Instant::now() + timeout;

        loop {
            if self.inbuf.len() >= NET_HEADER_SIZE {
                if self.inbuf[0] != NET_TYPE_DATA {
                    self.broken = true;
                    return Err(HandlinkError::Protocol(format!(
                        "unknown envelope type {:#04x}",
                        self.inbuf[0]
                    )));
                }
                let len = u32::from_be_bytes([
                    self.inbuf[2],
                    self.inbuf[3],
                    self.inbuf[4],
                    self.inbuf[5],
                ]) as usize;
                if len > self.cfg.transfer_ceiling() {
                    self.broken = true;
                    return Err(HandlinkError::Resource(
                        "inbound transfer exceeds the single-transfer ceiling",
                    ));
                }
                if self.inbuf.len() >= NET_HEADER_SIZE + len {
                    let mut chunk = self.inbuf.split_to(NET_HEADER_SIZE + len);
                    chunk.advance(NET_HEADER_SIZE);
                    return Ok(chunk.freeze());
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HandlinkError::Timeout);
            }
            let res = self.transport.read(&mut self.read_buf, remaining).await;
            let n = match res {
                Ok(n) => n,
                Err(e) => return Err(self.fatal(e)),
            };
            if n == 0 {
                self.broken = true;
                return Err(HandlinkError::Disconnected);
            }
            self.inbuf.extend_from_slice(&self.read_buf[..n]);
        }
    }

    fn fatal(&mut self, e: HandlinkError) -> HandlinkError {
        if matches!(e, HandlinkError::Io(_) | HandlinkError::Disconnected) {
            self.broken = true;
        }
        e
    }
}
