//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management. Decoding is a
//! streaming operation: partial input is buffered until a complete frame is
//! available, a corrupt header or failed checksum resynchronizes the cursor
//! byte-by-byte to the next preamble, and frames of unknown type are dropped
//! without disturbing the stream.
//!
//! # Example
//!
//! ```
//! use handlink::protocol::{build_frame, frame_type, DecodeEvent, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let bytes = build_frame(3, 3, frame_type::DATA, 1, b"payload");
//!
//! // Data arrives in arbitrary chunks from the transport.
//! assert!(buffer.push(&bytes[..4]).is_empty());
//! let events = buffer.push(&bytes[4..]);
//! assert!(matches!(events[0], DecodeEvent::Frame(_)));
//! ```

use bytes::{Buf, BytesMut};

use super::wire_format::{checksum, frame_type, Header, CHECKSUM_OFFSET, HEADER_SIZE, PREAMBLE};
use super::Frame;

/// Outcome of feeding bytes to the decoder.
#[derive(Debug, Clone)]
pub enum DecodeEvent {
    /// A complete frame passed checksum validation.
    Frame(Frame),
    /// A frame-shaped region failed validation and was discarded.
    ///
    /// Recovery is the layer above's business: the peer retransmits when its
    /// acknowledgment never arrives.
    Corrupt,
}

/// One step of the internal extraction loop.
enum Step {
    /// Not enough buffered bytes for a decision.
    NeedMoreData,
    /// Bytes were consumed without producing an event (dropped frame).
    Dropped,
    /// An event for the caller.
    Event(DecodeEvent),
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from transport reads.
    buffer: BytesMut,
    /// Largest payload length accepted in a header; anything bigger is
    /// treated as header corruption.
    max_payload: u16,
}

impl FrameBuffer {
    /// Create a new frame buffer accepting any 16-bit payload length.
    pub fn new() -> Self {
        Self::with_max_payload(u16::MAX)
    }

    /// Create a new frame buffer with a custom payload ceiling.
    pub fn with_max_payload(max_payload: u16) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
            max_payload,
        }
    }

    /// Push data into the buffer and extract everything decodable.
    ///
    /// Returns one event per complete frame or detected corruption; an empty
    /// vector means more data is needed.
    pub fn push(&mut self, data: &[u8]) -> Vec<DecodeEvent> {
        self.buffer.extend_from_slice(data);

        let mut events = Vec::new();
        loop {
            match self.try_extract_one() {
                Step::NeedMoreData => break,
                Step::Dropped => continue,
                Step::Event(ev) => events.push(ev),
            }
        }
        events
    }

    /// Like [`push`](Self::push), but returns only the valid frames.
    ///
    /// For callers where corruption recovery happens elsewhere entirely.
    pub fn push_frames(&mut self, data: &[u8]) -> Vec<Frame> {
        self.push(data)
            .into_iter()
            .filter_map(|ev| match ev {
                DecodeEvent::Frame(f) => Some(f),
                DecodeEvent::Corrupt => None,
            })
            .collect()
    }

    fn try_extract_one(&mut self) -> Step {
        // Align the cursor to the next preamble, discarding leading garbage.
        if self.buffer.len() < PREAMBLE.len() {
            return Step::NeedMoreData;
        }
        match find_preamble(&self.buffer) {
            Some(0) => {}
            Some(pos) => {
                tracing::debug!(skipped = pos, "resynchronized to next preamble");
                self.buffer.advance(pos);
            }
            None => {
                // Keep a possible preamble prefix at the tail.
                let drop = self.buffer.len() - (PREAMBLE.len() - 1);
                tracing::debug!(skipped = drop, "no preamble in buffered bytes");
                self.buffer.advance(drop);
                return Step::NeedMoreData;
            }
        }

        if self.buffer.len() < HEADER_SIZE {
            return Step::NeedMoreData;
        }
        let header = Header::decode(&self.buffer[..HEADER_SIZE])
            .expect("buffer starts with a preamble and holds a full header");

        if header.payload_length > self.max_payload {
            // Almost certainly a corrupted length field; resynchronize one
            // byte past the bogus preamble rather than waiting for payload
            // bytes that will never come.
            tracing::warn!(
                declared = header.payload_length,
                "header declares oversized payload, discarding"
            );
            self.buffer.advance(1);
            return Step::Event(DecodeEvent::Corrupt);
        }

        let total = HEADER_SIZE + header.payload_length as usize;
        if self.buffer.len() < total {
            return Step::NeedMoreData;
        }

        let expected = checksum(
            &self.buffer[..CHECKSUM_OFFSET],
            &self.buffer[HEADER_SIZE..total],
        );
        if expected != header.checksum {
            tracing::warn!(
                frame_id = header.frame_id,
                expected,
                declared = header.checksum,
                "frame checksum mismatch"
            );
            self.buffer.advance(1);
            return Step::Event(DecodeEvent::Corrupt);
        }

        if !frame_type::is_known(header.frame_type) {
            tracing::warn!(frame_type = header.frame_type, "dropping unknown frame type");
            self.buffer.advance(total);
            return Step::Dropped;
        }

        let mut chunk = self.buffer.split_to(total);
        chunk.advance(HEADER_SIZE);
        Step::Event(DecodeEvent::Frame(Frame::new(header, chunk.freeze())))
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Position of the first preamble in `buf`, if any.
fn find_preamble(buf: &[u8]) -> Option<usize> {
    buf.windows(PREAMBLE.len()).position(|w| w == PREAMBLE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::build_frame;

    fn only_frames(events: Vec<DecodeEvent>) -> Vec<Frame> {
        events
            .into_iter()
            .filter_map(|ev| match ev {
                DecodeEvent::Frame(f) => Some(f),
                DecodeEvent::Corrupt => None,
            })
            .collect()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(3, 3, frame_type::DATA, 42, b"hello");

        let frames = only_frames(buffer.push(&bytes));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_id(), 42);
        assert_eq!(frames[0].payload(), b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();
        let mut combined = Vec::new();
        for id in 1..=3u8 {
            combined.extend(build_frame(3, 3, frame_type::DATA, id, &[id; 4]));
        }

        let frames = only_frames(buffer.push(&combined));
        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.frame_id(), (i + 1) as u8);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(3, 3, frame_type::DATA, 9, b"hi");

        let mut all = Vec::new();
        for b in &bytes {
            all.extend(only_frames(buffer.push(&[*b])));
        }
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].payload(), b"hi");
    }

    #[test]
    fn test_garbage_before_frame_is_skipped() {
        let mut buffer = FrameBuffer::new();
        let mut bytes = vec![0x00, 0x55, 0xBE, 0x01];
        bytes.extend(build_frame(3, 3, frame_type::DATA, 1, b"data"));

        let frames = only_frames(buffer.push(&bytes));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"data");
    }

    #[test]
    fn test_corrupt_payload_byte_reports_and_resyncs() {
        let mut buffer = FrameBuffer::new();
        let mut bytes = build_frame(3, 3, frame_type::DATA, 1, b"abcdef");
        bytes[HEADER_SIZE + 2] ^= 0xFF;
        bytes.extend(build_frame(3, 3, frame_type::DATA, 2, b"good"));

        let events = buffer.push(&bytes);
        assert!(events
            .iter()
            .any(|ev| matches!(ev, DecodeEvent::Corrupt)));

        let frames = only_frames(events);
        assert_eq!(frames.len(), 1, "only the intact frame survives");
        assert_eq!(frames[0].frame_id(), 2);
        assert_eq!(frames[0].payload(), b"good");
    }

    #[test]
    fn test_every_single_byte_corruption_is_detected() {
        let reference = build_frame(3, 3, frame_type::DATA, 7, b"payload!");
        for i in 3..reference.len() {
            let mut corrupted = reference.clone();
            corrupted[i] ^= 0x01;

            let mut buffer = FrameBuffer::new();
            let frames: Vec<Frame> = only_frames(buffer.push(&corrupted))
                .into_iter()
                .filter(|f| f.payload() == b"payload!" && f.frame_id() == 7)
                .collect();
            assert!(
                frames.is_empty(),
                "corruption at byte {i} went undetected"
            );
        }
    }

    #[test]
    fn test_unknown_frame_type_is_dropped_not_fatal() {
        let mut buffer = FrameBuffer::new();
        let mut bytes = build_frame(3, 3, 0x6E, 1, b"odd");
        bytes.extend(build_frame(3, 3, frame_type::DATA, 2, b"fine"));

        let events = buffer.push(&bytes);
        // The unknown frame vanishes silently; the next one decodes.
        let frames = only_frames(events);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"fine");
    }

    #[test]
    fn test_oversized_declared_length_resyncs() {
        let mut buffer = FrameBuffer::with_max_payload(64);
        let mut bytes = build_frame(3, 3, frame_type::DATA, 1, &[0xAB; 200]);
        bytes.extend(build_frame(3, 3, frame_type::DATA, 2, b"ok"));

        let events = buffer.push(&bytes);
        assert!(events
            .iter()
            .any(|ev| matches!(ev, DecodeEvent::Corrupt)));
        let frames = only_frames(events);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"ok");
    }

    #[test]
    fn test_partial_header_then_payload() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(3, 3, frame_type::DATA, 4, b"partial reads");

        assert!(buffer.push(&bytes[..5]).is_empty());
        assert!(buffer.push(&bytes[5..HEADER_SIZE + 3]).is_empty());
        let frames = only_frames(buffer.push(&bytes[HEADER_SIZE + 3..]));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload(), b"partial reads");
    }

    #[test]
    fn test_clear_discards_pending_bytes() {
        let mut buffer = FrameBuffer::new();
        let bytes = build_frame(3, 3, frame_type::DATA, 1, b"xyz");
        buffer.push(&bytes[..6]);
        assert!(!buffer.is_empty());

        buffer.clear();
        assert!(buffer.is_empty());

        // A fresh frame still parses afterwards.
        let frames = only_frames(buffer.push(&bytes));
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_pure_garbage_is_bounded() {
        let mut buffer = FrameBuffer::new();
        for _ in 0..64 {
            assert!(buffer.push(&[0x11u8; 256]).is_empty());
        }
        // Resynchronization keeps at most a preamble prefix buffered.
        assert!(buffer.len() < HEADER_SIZE);
    }
}
