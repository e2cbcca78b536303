//! The pluggable connection layer beneath the client.

pub mod websocket;

use crate::message::{IRCMessage, IRCParseError};
use async_trait::async_trait;
use either::Either;
use futures_util::sink::Sink;
use futures_util::stream::FusedStream;
use std::fmt::{Debug, Display};

pub use websocket::WsTransport;

/// Address of the chat server, assembled from the client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddr {
    /// Hostname to connect to.
    pub server: String,
    /// Port to connect to.
    pub port: u16,
    /// Whether to use TLS.
    pub secure: bool,
}

impl ServerAddr {
    /// The WebSocket URL for this address, `wss://` when secure.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.server, self.port)
    }
}

/// Abstracts over the messages-in/messages-out connection to the chat
/// server. The connection core consumes this as a capability, so tests can
/// substitute their own implementation.
#[async_trait]
pub trait Transport: Sized + Send + Sync + 'static {
    /// Error type for when the connection could not be established.
    type ConnectError: Send + Sync + Debug + Display;
    /// Error type returned by the incoming half.
    type IncomingError: Send + Sync + Debug + Display;
    /// Error type returned by the outgoing half.
    type OutgoingError: Send + Sync + Debug + Display;

    /// Stream of incoming messages. Transport-level and parse-level errors
    /// are distinguished so a bad line does not kill the connection.
    type Incoming: FusedStream<Item = Result<IRCMessage, Either<Self::IncomingError, IRCParseError>>>
        + Unpin
        + Send
        + Sync;
    /// Sink for outgoing messages.
    type Outgoing: Sink<IRCMessage, Error = Self::OutgoingError> + Unpin + Send + Sync;

    /// Open a new connection to the given server address.
    async fn new(addr: &ServerAddr) -> Result<Self, Self::ConnectError>;

    /// Split this transport into its incoming and outgoing halves.
    fn split(self) -> (Self::Incoming, Self::Outgoing);
}
