//! Connecting to Twitch chat using the plain or secure IRC-over-WebSocket
//! protocol.

use crate::message::{AsRawIRC, IRCMessage, IRCParseError};
use crate::transport::{ServerAddr, Transport};
use async_trait::async_trait;
use async_tungstenite::tokio::connect_async;
use async_tungstenite::tungstenite::client::IntoClientRequest;
use async_tungstenite::tungstenite::http::HeaderValue;
use async_tungstenite::tungstenite::Error as WSError;
use async_tungstenite::tungstenite::Message as WSMessage;
use either::Either;
use futures_util::{
    future,
    sink::Sink,
    stream::{self, FusedStream},
    SinkExt, StreamExt,
};
use smallvec::SmallVec;

type FrameResults = SmallVec<[Result<IRCMessage, Either<WSError, IRCParseError>>; 1]>;

/// The IRC messages carried by one websocket frame. Twitch batches
/// newline-separated messages into a single text frame under load, so one
/// frame can yield several results; non-text frames yield none.
fn parse_frame(frame: Result<WSMessage, WSError>) -> FrameResults {
    let mut results = FrameResults::new();
    match frame {
        Ok(WSMessage::Text(text)) => {
            for line in text.lines().filter(|line| !line.is_empty()) {
                results.push(IRCMessage::parse(line).map_err(Either::Right));
            }
        }
        Ok(_) => {}
        Err(e) => results.push(Err(Either::Left(e))),
    }
    results
}

/// Connect to Twitch chat via IRC over a plain-text or TLS-secured
/// WebSocket, speaking the `irc` subprotocol.
pub struct WsTransport {
    incoming_messages: <Self as Transport>::Incoming,
    outgoing_messages: <Self as Transport>::Outgoing,
}

#[async_trait]
impl Transport for WsTransport {
    type ConnectError = WSError;
    type IncomingError = WSError;
    type OutgoingError = WSError;

    type Incoming = Box<
        dyn FusedStream<Item = Result<IRCMessage, Either<WSError, IRCParseError>>>
            + Unpin
            + Send
            + Sync,
    >;
    type Outgoing = Box<dyn Sink<IRCMessage, Error = Self::OutgoingError> + Unpin + Send + Sync>;

    async fn new(addr: &ServerAddr) -> Result<WsTransport, WSError> {
        let mut request = addr.url().into_client_request()?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("irc"));

        let (ws_stream, _response) = connect_async(request).await?;

        let (write_half, read_half) = ws_stream.split();

        let message_stream = read_half
            .flat_map(|frame| stream::iter(parse_frame(frame)))
            .fuse();

        let message_sink = write_half.with(|message: IRCMessage| {
            future::ready(Ok::<_, WSError>(WSMessage::text(message.as_raw_irc())))
        });

        Ok(WsTransport {
            incoming_messages: Box::new(message_stream),
            outgoing_messages: Box::new(message_sink),
        })
    }

    fn split(self) -> (Self::Incoming, Self::Outgoing) {
        (self.incoming_messages, self.outgoing_messages)
    }
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_splits_batched_messages() {
        let frame = WSMessage::text("PING :tmi.twitch.tv\r\n:tmi.twitch.tv 376 a :>\r\n");
        let results = parse_frame(Ok(frame));

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap().command, "PING");
        assert_eq!(results[1].as_ref().unwrap().command, "376");
    }

    #[test]
    fn test_parse_frame_skips_empty_lines() {
        let frame = WSMessage::text("\r\n\r\nPING :tmi.twitch.tv\r\n");
        let results = parse_frame(Ok(frame));

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap().command, "PING");
    }

    #[test]
    fn test_parse_frame_ignores_non_text_frames() {
        assert!(parse_frame(Ok(WSMessage::Ping(Default::default()))).is_empty());
    }

    #[test]
    fn test_parse_frame_keeps_parse_errors_per_line() {
        let frame = WSMessage::text("@key=value\r\nPING :tmi.twitch.tv\r\n");
        let results = parse_frame(Ok(frame));

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0], Err(Either::Right(_))));
        assert!(results[1].is_ok());
    }
}
