//! Remote-procedure layer: command requests and status responses.
//!
//! Requests and responses travel as one reliable-delivery message each.
//! Argument payloads are opaque — field-level record codecs belong to the
//! applications above this crate.
//!
//! Wire layout:
//! ```text
//! request:  command (1B), argument count (1B),
//!           then per argument: id (1B), length (2B BE), data
//! response: status (1B), then the mirrored request layout
//! ```

use bytes::Bytes;

use crate::config::MAX_TRANSFER;
use crate::error::{HandlinkError, Result};

/// Size of a request header.
pub const REQUEST_HEADER_SIZE: usize = 2;

/// Size of each argument-block header.
pub const ARG_HEADER_SIZE: usize = 3;

/// Largest single argument block accepted for transmission.
///
/// Enforced locally, before any bytes leave the host, so an oversized
/// request can never amplify into a packet storm.
pub const MAX_ARG_DATA: usize = MAX_TRANSFER;

/// One length-prefixed argument block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgBlock {
    /// Argument id, chosen by the command's codec.
    pub id: u8,
    /// Opaque payload bytes.
    pub data: Bytes,
}

impl ArgBlock {
    /// Create an argument block.
    pub fn new(id: u8, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An outbound command request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    /// Command id.
    pub command: u8,
    /// Argument blocks, in transmission order.
    pub args: Vec<ArgBlock>,
}

impl RpcRequest {
    /// Create a request with no arguments.
    pub fn new(command: u8) -> Self {
        Self {
            command,
            args: Vec::new(),
        }
    }

    /// Append an argument block.
    pub fn with_arg(mut self, id: u8, data: impl Into<Bytes>) -> Self {
        self.args.push(ArgBlock::new(id, data));
        self
    }

    /// Encode for transmission.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(REQUEST_HEADER_SIZE);
        buf.push(self.command);
        encode_blocks(&mut buf, &self.args)?;
        Ok(buf)
    }

    /// Decode a request (the device side of an exchange).
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < REQUEST_HEADER_SIZE {
            return Err(HandlinkError::Protocol("truncated request header".into()));
        }
        let command = buf[0];
        let args = decode_blocks(&buf[1..])?;
        Ok(Self { command, args })
    }
}

/// An inbound command response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcResponse {
    /// Device-reported status; zero is success.
    pub status: u8,
    /// Command id this responds to.
    pub command: u8,
    /// Result argument blocks.
    pub args: Vec<ArgBlock>,
}

impl RpcResponse {
    /// Create a response.
    pub fn new(command: u8, status: u8) -> Self {
        Self {
            status,
            command,
            args: Vec::new(),
        }
    }

    /// Append a result block.
    pub fn with_arg(mut self, id: u8, data: impl Into<Bytes>) -> Self {
        self.args.push(ArgBlock::new(id, data));
        self
    }

    /// The first result block with the given id, if present.
    pub fn arg(&self, id: u8) -> Option<&ArgBlock> {
        self.args.iter().find(|a| a.id == id)
    }

    /// Encode for transmission (the device side of an exchange).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(1 + REQUEST_HEADER_SIZE);
        buf.push(self.status);
        buf.push(self.command);
        encode_blocks(&mut buf, &self.args)?;
        Ok(buf)
    }

    /// Decode a response.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 1 + REQUEST_HEADER_SIZE {
            return Err(HandlinkError::Protocol("truncated response header".into()));
        }
        let status = buf[0];
        let command = buf[1];
        let args = decode_blocks(&buf[2..])?;
        Ok(Self {
            status,
            command,
            args,
        })
    }
}

/// Append an argument count and blocks to `buf`.
fn encode_blocks(buf: &mut Vec<u8>, args: &[ArgBlock]) -> Result<()> {
    if args.len() > u8::MAX as usize {
        return Err(HandlinkError::Protocol(format!(
            "{} argument blocks exceed the count field",
            args.len()
        )));
    }
    buf.push(args.len() as u8);
    for arg in args {
        if arg.data.len() > MAX_ARG_DATA {
            return Err(HandlinkError::TransferTooLarge {
                len: arg.data.len(),
            });
        }
        buf.push(arg.id);
        buf.extend_from_slice(&(arg.data.len() as u16).to_be_bytes());
        buf.extend_from_slice(&arg.data);
    }
    Ok(())
}

/// Parse an argument count and exactly that many blocks.
fn decode_blocks(buf: &[u8]) -> Result<Vec<ArgBlock>> {
    let count = buf[0] as usize;
    let mut args = Vec::with_capacity(count);
    let mut cursor = 1usize;

    for _ in 0..count {
        if buf.len() < cursor + ARG_HEADER_SIZE {
            return Err(HandlinkError::Protocol(
                "truncated argument-block header".into(),
            ));
        }
        let id = buf[cursor];
        let len = u16::from_be_bytes([buf[cursor + 1], buf[cursor + 2]]) as usize;
        cursor += ARG_HEADER_SIZE;

        if buf.len() < cursor + len {
            return Err(HandlinkError::Protocol(
                "argument block shorter than declared".into(),
            ));
        }
        args.push(ArgBlock::new(id, Bytes::copy_from_slice(&buf[cursor..cursor + len])));
        cursor += len;
    }

    if cursor != buf.len() {
        return Err(HandlinkError::Protocol(format!(
            "{} trailing bytes after argument blocks",
            buf.len() - cursor
        )));
    }
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let request = RpcRequest::new(0x11)
            .with_arg(0x20, &b"alpha"[..])
            .with_arg(0x21, &b""[..])
            .with_arg(0x22, vec![0u8; 300]);

        let decoded = RpcRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_response_roundtrip() {
        let response = RpcResponse::new(0x11, 0).with_arg(0x20, &[0xCA, 0xFE][..]);
        let decoded = RpcResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.arg(0x20).unwrap().data.as_ref(), &[0xCA, 0xFE]);
        assert!(decoded.arg(0x55).is_none());
    }

    #[test]
    fn test_no_argument_request() {
        let request = RpcRequest::new(0x01);
        let bytes = request.encode().unwrap();
        assert_eq!(bytes, vec![0x01, 0x00]);
        assert_eq!(RpcRequest::decode(&bytes).unwrap(), request);
    }

    #[test]
    fn test_oversized_block_fails_before_transmission() {
        let request = RpcRequest::new(0x01).with_arg(0x20, vec![0u8; MAX_ARG_DATA + 1]);
        let err = request.encode().unwrap_err();
        assert!(matches!(err, HandlinkError::TransferTooLarge { .. }));
    }

    #[test]
    fn test_too_many_blocks_rejected() {
        let mut request = RpcRequest::new(0x01);
        for _ in 0..=u8::MAX as usize {
            request = request.with_arg(0x20, &b"x"[..]);
        }
        let err = request.encode().unwrap_err();
        assert!(matches!(err, HandlinkError::Protocol(_)));
    }

    #[test]
    fn test_truncated_block_rejected() {
        let request = RpcRequest::new(0x11).with_arg(0x20, &b"abcdef"[..]);
        let bytes = request.encode().unwrap();
        for cut in 1..bytes.len() {
            assert!(
                RpcRequest::decode(&bytes[..cut]).is_err(),
                "truncation at {cut} bytes went unnoticed"
            );
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = RpcResponse::new(0x11, 0).encode().unwrap();
        bytes.push(0xEE);
        let err = RpcResponse::decode(&bytes).unwrap_err();
        assert!(matches!(err, HandlinkError::Protocol(_)));
    }

    #[test]
    fn test_big_endian_length_field() {
        let bytes = RpcRequest::new(0x01)
            .with_arg(0x20, vec![0u8; 0x0102])
            .encode()
            .unwrap();
        // command, count, id, then the length field.
        assert_eq!(bytes[3], 0x01);
        assert_eq!(bytes[4], 0x02);
    }

    #[test]
    fn test_nonzero_status_survives_roundtrip() {
        let response = RpcResponse::new(0x2a, 0x05);
        let decoded = RpcResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded.status, 0x05);
    }
}
