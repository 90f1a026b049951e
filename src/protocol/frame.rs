//! Frame struct with typed accessors.
//!
//! Represents a complete, checksum-validated link frame.
//! Uses `bytes::Bytes` for zero-copy payload sharing.

use bytes::Bytes;

use super::wire_format::{frame_type, Header};

/// A complete link frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Destination address.
    #[inline]
    pub fn dest(&self) -> u8 {
        self.header.dest
    }

    /// Source address.
    #[inline]
    pub fn src(&self) -> u8 {
        self.header.src
    }

    /// Frame id.
    #[inline]
    pub fn frame_id(&self) -> u8 {
        self.header.frame_id
    }

    /// Check if this is reliable-delivery traffic.
    #[inline]
    pub fn is_data(&self) -> bool {
        self.header.frame_type == frame_type::DATA
    }

    /// Check if this is link-control traffic.
    #[inline]
    pub fn is_control(&self) -> bool {
        self.header.frame_type == frame_type::CONTROL
    }

    /// Check if this is loopback test traffic.
    #[inline]
    pub fn is_loopback(&self) -> bool {
        self.header.frame_type == frame_type::LOOPBACK
    }
}
