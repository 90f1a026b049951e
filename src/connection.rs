//! Connection lifecycle and state machine.
//!
//! A [`Connection`] owns the composed layer stack for one session: the
//! transport at the bottom, a delivery channel above it (framed reliable
//! delivery, or the network envelope for transports that are reliable on
//! their own), and the remote-procedure layer on top.
//!
//! Lifecycle mirrors the classic socket shape:
//! `bind → listen → accept` on the waiting side, `bind → connect` on the
//! initiating side, then `call`/`send`/`receive`, then `close`. Every
//! operation validates the state first and fails fast — without I/O — when
//! called out of order.

use std::fmt;

use bytes::Bytes;

use crate::config::ConnectionConfig;
use crate::delivery::{NetChannel, ReliableChannel};
use crate::error::{HandlinkError, Result};
use crate::handshake;
use crate::rpc::{RpcRequest, RpcResponse};
use crate::transport::{Transport, TransportKind};

/// States a connection moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; only binding a new transport is meaningful.
    Closed,
    /// A transport is attached but the session role is not chosen yet.
    Bound,
    /// Waiting for a peer; `accept` is the next step.
    Listening,
    /// `accept` is running the establishment exchange.
    Accepting,
    /// `connect` is running the establishment exchange.
    Connecting,
    /// Established; the only state valid for traffic.
    Connected,
    /// The link failed; `close` is the only valid operation.
    Broken,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Bound => "bound",
            ConnectionState::Listening => "listening",
            ConnectionState::Accepting => "accepting",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Broken => "broken",
        };
        f.write_str(name)
    }
}

/// Which command protocol the session settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandProtocol {
    /// Framed reliable delivery with the speed handshake.
    Framed,
    /// Network envelope; establishment happened out-of-band.
    Network,
}

/// The delivery layer variants a connection can carry.
enum Channel<T> {
    Framed(ReliableChannel<T>),
    Network(NetChannel<T>),
}

impl<T: Transport> Channel<T> {
    async fn send(&mut self, message: &[u8]) -> Result<()> {
        match self {
            Channel::Framed(ch) => ch.send(message).await,
            Channel::Network(ch) => ch.send(message).await,
        }
    }

    async fn recv(&mut self, timeout: std::time::Duration) -> Result<Bytes> {
        match self {
            Channel::Framed(ch) => ch.recv(timeout).await,
            Channel::Network(ch) => ch.recv(timeout).await,
        }
    }

    fn transport_mut(&mut self) -> &mut T {
        match self {
            Channel::Framed(ch) => ch.transport_mut(),
            Channel::Network(ch) => ch.transport_mut(),
        }
    }

    fn is_broken(&self) -> bool {
        match self {
            Channel::Framed(ch) => ch.is_broken(),
            Channel::Network(ch) => ch.is_broken(),
        }
    }
}

/// One session with one device.
///
/// Connections are fully isolated from each other; within one connection
/// operations are strictly serialized by `&mut self`, matching the
/// protocol's one-outstanding-exchange rule.
///
/// # Example
///
/// ```ignore
/// use handlink::{Connection, ConnectionConfig, RpcRequest};
/// use handlink::transport::SerialTransport;
///
/// let port = SerialTransport::open("/dev/ttyUSB0", 9_600)?;
/// let mut conn = Connection::bind(port, ConnectionConfig::default());
/// conn.listen()?;
/// conn.accept().await?;
///
/// let response = conn
///     .call(&RpcRequest::new(0x01).with_arg(0x20, &b"ping"[..]))
///     .await?;
/// conn.close().await?;
/// ```
pub struct Connection<T: Transport> {
    state: ConnectionState,
    protocol: CommandProtocol,
    config: ConnectionConfig,
    channel: Option<Channel<T>>,
    speed: u32,
    last_error: Option<i32>,
}

impl<T: Transport> Connection<T> {
    /// Attach a transport, creating a connection in the `Bound` state.
    ///
    /// The command protocol follows the transport kind: serial-like
    /// transports get the framed reliable stack, network transports the
    /// envelope.
    pub fn bind(transport: T, config: ConnectionConfig) -> Self {
        let speed = transport.speed();
        let (protocol, channel) = match transport.kind() {
            TransportKind::Serial => (
                CommandProtocol::Framed,
                Channel::Framed(ReliableChannel::new(transport, config.clone())),
            ),
            TransportKind::Network => (
                CommandProtocol::Network,
                Channel::Network(NetChannel::new(transport, config.clone())),
            ),
        };
        Self {
            state: ConnectionState::Bound,
            protocol,
            config,
            channel: Some(channel),
            speed,
            last_error: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The command protocol this session negotiated.
    pub fn command_protocol(&self) -> CommandProtocol {
        self.protocol
    }

    /// The negotiated link speed.
    pub fn speed(&self) -> u32 {
        self.speed
    }

    /// Numeric code of the most recent failure, if any.
    pub fn last_error(&self) -> Option<i32> {
        self.last_error
    }

    /// The configuration this connection runs with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Move from `Bound` to `Listening`.
    pub fn listen(&mut self) -> Result<()> {
        self.require(ConnectionState::Bound, "listen")?;
        self.state = ConnectionState::Listening;
        Ok(())
    }

    /// Wait for a peer to complete establishment.
    ///
    /// On timeout the connection drops back to `Listening`, untouched; any
    /// other failure breaks it.
    pub async fn accept(&mut self) -> Result<()> {
        self.require(ConnectionState::Listening, "accept")?;
        self.state = ConnectionState::Accepting;

        match self.establish(true).await {
            Ok(baud) => {
                self.speed = baud;
                self.state = ConnectionState::Connected;
                tracing::debug!(baud, "peer accepted");
                Ok(())
            }
            Err(HandlinkError::Timeout) => {
                self.state = ConnectionState::Listening;
                Err(self.fail(HandlinkError::Timeout))
            }
            Err(e) => {
                self.state = ConnectionState::Broken;
                Err(self.fail(e))
            }
        }
    }

    /// Initiate establishment with a listening peer.
    ///
    /// On timeout the connection drops back to `Bound`, untouched; any
    /// other failure breaks it.
    pub async fn connect(&mut self) -> Result<()> {
        self.require(ConnectionState::Bound, "connect")?;
        self.state = ConnectionState::Connecting;

        match self.establish(false).await {
            Ok(baud) => {
                self.speed = baud;
                self.state = ConnectionState::Connected;
                tracing::debug!(baud, "connected");
                Ok(())
            }
            Err(HandlinkError::Timeout) => {
                self.state = ConnectionState::Bound;
                Err(self.fail(HandlinkError::Timeout))
            }
            Err(e) => {
                self.state = ConnectionState::Broken;
                Err(self.fail(e))
            }
        }
    }

    /// Run the establishment exchange for the active channel kind.
    async fn establish(&mut self, accepting: bool) -> Result<u32> {
        let cfg = self.config.clone();
        let current = self.speed;
        match self.channel_mut(if accepting { "accept" } else { "connect" })? {
            Channel::Framed(ch) => {
                ch.reset();
                if accepting {
                    handshake::accept(ch, &cfg).await
                } else {
                    handshake::connect(ch, &cfg).await
                }
            }
            Channel::Network(ch) => {
                // The transport established the session out-of-band; there
                // is no speed to negotiate.
                ch.reset();
                tracing::debug!("network transport, skipping speed handshake");
                Ok(current)
            }
        }
    }

    /// Send one opaque message through the delivery layer.
    pub async fn send(&mut self, message: &[u8]) -> Result<()> {
        self.require(ConnectionState::Connected, "send")?;
        let res = self.channel_mut("send")?.send(message).await;
        self.after_io(res)
    }

    /// Receive one opaque message, waiting up to the configured receive
    /// timeout.
    pub async fn receive(&mut self) -> Result<Bytes> {
        self.require(ConnectionState::Connected, "receive")?;
        let timeout = self.config.recv_timeout;
        let res = self.channel_mut("receive")?.recv(timeout).await;
        self.after_io(res)
    }

    /// Issue one command and wait for its response.
    ///
    /// A non-zero device status surfaces as
    /// [`HandlinkError::Remote`] carrying the exact code; the connection
    /// stays `Connected`, since the transport did its job.
    pub async fn call(&mut self, request: &RpcRequest) -> Result<RpcResponse> {
        self.require(ConnectionState::Connected, "call")?;

        // Local encoding failures never reach the wire.
        let payload = match request.encode() {
            Ok(p) => p,
            Err(e) => return Err(self.fail(e)),
        };

        let res = self.channel_mut("call")?.send(&payload).await;
        self.after_io(res)?;

        let timeout = self.config.recv_timeout;
        let res = self.channel_mut("call")?.recv(timeout).await;
        let raw = self.after_io(res)?;

        let response = match RpcResponse::decode(&raw) {
            Ok(r) => r,
            Err(e) => return Err(self.fail(e)),
        };
        if response.command != request.command {
            return Err(self.fail(HandlinkError::Protocol(format!(
                "response for command {:#04x} does not match request {:#04x}",
                response.command, request.command
            ))));
        }
        if response.status != 0 {
            tracing::debug!(
                command = request.command,
                status = response.status,
                "device rejected command"
            );
            return Err(self.fail(HandlinkError::Remote {
                command: request.command,
                status: response.status,
            }));
        }
        Ok(response)
    }

    /// Release the layer stack and the transport.
    ///
    /// Idempotent: closing an already-closed connection is a no-op, and a
    /// stack that never finished establishment tears down cleanly.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        if let Some(mut channel) = self.channel.take() {
            if let Err(e) = channel.transport_mut().close().await {
                tracing::debug!(error = %e, "transport close reported an error");
            }
        }
        self.state = ConnectionState::Closed;
        Ok(())
    }

    /// Fail fast when `op` is not valid in the current state.
    fn require(&self, expected: ConnectionState, op: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(HandlinkError::InvalidState {
                op,
                state: self.state,
            })
        }
    }

    fn channel_mut(&mut self, op: &'static str) -> Result<&mut Channel<T>> {
        let state = self.state;
        self.channel
            .as_mut()
            .ok_or(HandlinkError::InvalidState { op, state })
    }

    /// Record a failure and propagate channel breakage into the state.
    fn after_io<V>(&mut self, res: Result<V>) -> Result<V> {
        match res {
            Ok(v) => Ok(v),
            Err(e) => {
                if self.channel.as_ref().is_some_and(Channel::is_broken) {
                    self.state = ConnectionState::Broken;
                }
                Err(self.fail(e))
            }
        }
    }

    fn fail(&mut self, e: HandlinkError) -> HandlinkError {
        self.last_error = Some(e.code());
        e
    }
}
