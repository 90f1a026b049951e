//! Link-framing layer: wire format, frame values, streaming decode.

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::Frame;
pub use frame_buffer::{DecodeEvent, FrameBuffer};
pub use wire_format::{build_frame, checksum, frame_type, Header, HEADER_SIZE, PREAMBLE};
