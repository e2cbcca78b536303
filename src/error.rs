use crate::login::LoginCredentials;
use crate::transport::Transport;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while trying to execute some action on a
/// [`Client`](crate::Client).
#[derive(Error, Debug)]
pub enum Error<T: Transport, L: LoginCredentials> {
    /// Underlying transport failed to connect
    #[error("Unable to connect: {0}")]
    ConnectError(Arc<T::ConnectError>),
    /// Error received from incoming stream of messages
    #[error("Error received from incoming stream of messages: {0}")]
    IncomingError(Arc<T::IncomingError>),
    /// Error received while trying to send message(s) out
    #[error("Error received while trying to send message(s) out: {0}")]
    OutgoingError(Arc<T::OutgoingError>),
    /// Failed to get login credentials to log in with
    #[error("Failed to get login credentials to log in with: {0}")]
    CredentialsError(Arc<L::Error>),
    /// The command requires an open connection
    #[error("Not connected to server.")]
    NotConnected,
    /// `connect()` was called while a connection was already open or opening
    #[error("Connection already open.")]
    AlreadyConnected,
    /// The connection was closed
    #[error("Connection closed.")]
    ConnectionClosed,
    /// The server rejected the login during the handshake. Carries the
    /// offending `NOTICE` text verbatim (e.g. `Login authentication failed`).
    #[error("{0}")]
    LoginFailed(String),
    /// Did not receive a `PONG` back within the configured timeout after
    /// sending a `PING`
    #[error("Ping timeout.")]
    PingTimeout,
    /// No recognizable reply arrived for a command before its deadline
    #[error("No response from Twitch.")]
    NoResponse,
    /// A multi-channel `JOIN` was not confirmed for the listed channels
    /// before its deadline
    #[error("No response from Twitch for channels: {}", .0.join(", "))]
    JoinTimeout(Vec<String>),
    /// The server rejected a command. Carries the `msg-id` of the rejecting
    /// `NOTICE` (e.g. `already_banned`).
    #[error("{0}")]
    CommandRejected(String),
    /// The command was malformed and rejected before anything was sent
    #[error("{0}")]
    Usage(String),
}

// we have to implement Clone manually, the derive macro would place
// `T: Clone` and `L: Clone` bounds we cannot satisfy and don't need
impl<T: Transport, L: LoginCredentials> Clone for Error<T, L> {
    fn clone(&self) -> Self {
        match self {
            Error::ConnectError(e) => Error::ConnectError(Arc::clone(e)),
            Error::IncomingError(e) => Error::IncomingError(Arc::clone(e)),
            Error::OutgoingError(e) => Error::OutgoingError(Arc::clone(e)),
            Error::CredentialsError(e) => Error::CredentialsError(Arc::clone(e)),
            Error::NotConnected => Error::NotConnected,
            Error::AlreadyConnected => Error::AlreadyConnected,
            Error::ConnectionClosed => Error::ConnectionClosed,
            Error::LoginFailed(reason) => Error::LoginFailed(reason.clone()),
            Error::PingTimeout => Error::PingTimeout,
            Error::NoResponse => Error::NoResponse,
            Error::JoinTimeout(channels) => Error::JoinTimeout(channels.clone()),
            Error::CommandRejected(msg_id) => Error::CommandRejected(msg_id.clone()),
            Error::Usage(message) => Error::Usage(message.clone()),
        }
    }
}
