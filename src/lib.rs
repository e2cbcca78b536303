#![warn(missing_docs)]
//! Connect to Twitch chat (TMI) from a Rust application.
//!
//! This library speaks the IRCv3-derived Twitch chat protocol over a
//! WebSocket transport. It connects, authenticates, joins chat rooms,
//! parses incoming messages (including the tag-encoded metadata about
//! badges, emotes and subscriptions) into semantic [`Event`]s, and turns
//! chat commands like `/ban` or `/slow` into awaitable operations by
//! correlating them with the delayed server replies that confirm or reject
//! them.
//!
//! # Getting started
//!
//! ```no_run
//! use tmi_client::login::StaticLoginCredentials;
//! use tmi_client::ClientConfig;
//! use tmi_client::Client;
//! use tmi_client::WsTransport;
//!
//! #[tokio::main]
//! pub async fn main() {
//!     // the default configuration joins chat as a random anonymous user
//!     let config = ClientConfig::default();
//!     let (mut events, client) = Client::<WsTransport, StaticLoginCredentials>::new(config);
//!
//!     // first thing you should do: start consuming events,
//!     // otherwise they will back up.
//!     let event_handle = tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("Received event: {:?}", event);
//!         }
//!     });
//!
//!     client.connect().await.unwrap();
//!     client.join("sodapoppin").await.unwrap();
//!
//!     // keep the tokio executor alive.
//!     // If you return instead of waiting the background task will exit.
//!     event_handle.await.unwrap();
//! }
//! ```
//!
//! # Commands
//!
//! Every chat command is a method on [`Client`] that resolves once the
//! server's reply arrives. The server never echoes request IDs, so
//! completion is inferred from later `NOTICE`, `ROOMSTATE`, `JOIN` or
//! `USERSTATE` messages carrying recognizable `msg-id` tags or matching
//! channel names. A rejection resolves the call with
//! [`Error::CommandRejected`] carrying the rejecting `msg-id`
//! (e.g. `already_banned`); a command nothing answers fails with
//! [`Error::NoResponse`] after `max(600ms, latency + 100ms)`.
//!
//! ```no_run
//! # use tmi_client::login::StaticLoginCredentials;
//! # use tmi_client::{Client, ClientConfig, WsTransport};
//! # #[tokio::main]
//! # async fn main() {
//! # let config = ClientConfig::default();
//! # let (mut events, client) = Client::<WsTransport, StaticLoginCredentials>::new(config);
//! client.say("a_channel", "Hello world!").await.unwrap();
//! client.ban("a_channel", "a_user", Some("spam")).await.unwrap();
//! # }
//! ```
//!
//! # Logging in
//!
//! [`StaticLoginCredentials`](login::StaticLoginCredentials) covers fixed
//! tokens and anonymous (`justinfan`) logins. Implement
//! [`LoginCredentials`](login::LoginCredentials) to fetch a fresh token
//! for every (re)connect.
//!
//! # Reconnecting
//!
//! A connection loss that was not requested via
//! [`disconnect()`](Client::disconnect) triggers automatic reconnects with
//! a decaying delay, and previously joined channels are re-joined through
//! a rate-limited join queue. A rejected login disables reconnecting.
//!
//! # Close the client
//!
//! To close the client, call [`disconnect()`](Client::disconnect) and drop
//! all clones of the [`Client`] handle. The background loop ends and the
//! event stream closes once all processing is done.

pub(crate) mod client;
pub(crate) mod config;
pub(crate) mod error;
pub mod events;
pub mod login;
pub mod message;
pub(crate) mod transport;
pub mod validate;

pub use client::Client;
pub use config::ClientConfig;
pub use error::Error;
pub use events::Event;
pub use login::StaticLoginCredentials;
pub use transport::{ServerAddr, Transport, WsTransport};
