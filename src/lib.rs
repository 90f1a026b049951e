//! # handlink
//!
//! Host-side protocol stack for synchronizing with handheld devices over
//! serial, USB-serial, or network links.
//!
//! ## Architecture
//!
//! Layered, bottom to top:
//!
//! - **[`transport`]**: the device-I/O capability contract (read/write/poll/
//!   flush with timeouts) and its per-medium implementations
//! - **[`protocol`]**: link framing — packet delimiting, addressing,
//!   checksum, streaming decode with resynchronization
//! - **[`delivery`]**: reliable delivery — fragmentation, acknowledgment,
//!   retransmission, duplicate suppression
//! - **[`handshake`]**: connection establishment — version and link-speed
//!   negotiation
//! - **[`connection`]**: the session state machine tying the stack together
//! - **[`rpc`]**: the request/response command layer applications use
//!
//! ## Example
//!
//! ```ignore
//! use handlink::{Connection, ConnectionConfig, RpcRequest};
//! use handlink::transport::SerialTransport;
//!
//! #[tokio::main]
//! async fn main() -> handlink::Result<()> {
//!     let port = SerialTransport::open("/dev/pilot", 9_600)?;
//!     let mut conn = Connection::bind(port, ConnectionConfig::default());
//!     conn.listen()?;
//!     conn.accept().await?;
//!
//!     let response = conn
//!         .call(&RpcRequest::new(0x12).with_arg(0x20, &b"todo"[..]))
//!         .await?;
//!     println!("device answered with {} blocks", response.args.len());
//!
//!     conn.close().await
//! }
//! ```

pub mod config;
pub mod connection;
pub mod delivery;
pub mod device;
pub mod error;
pub mod handshake;
pub mod protocol;
pub mod rpc;
pub mod transport;

pub use config::ConnectionConfig;
pub use connection::{CommandProtocol, Connection, ConnectionState};
pub use error::{HandlinkError, Result};
pub use rpc::{ArgBlock, RpcRequest, RpcResponse};
