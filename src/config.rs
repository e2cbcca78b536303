use crate::login::{LoginCredentials, StaticLoginCredentials};
use crate::transport::ServerAddr;
use std::time::Duration;

/// Configures settings for a [`Client`](crate::Client).
pub struct ClientConfig<L: LoginCredentials> {
    /// Gets a set of credentials every time the client needs to log in on a
    /// new connection. See [`LoginCredentials`] for details.
    pub login_credentials: L,

    /// Channels to join once the handshake completes (also re-joined after
    /// every reconnect). Names are normalized via
    /// [`validate::channel`](crate::validate::channel).
    pub channels: Vec<String>,

    /// Channel name under which replies to commands that are not
    /// channel-scoped (`/color`, whispers, ...) are correlated.
    /// Default `#tmijs`.
    pub global_default_channel: String,

    /// If `true`, the `twitch.tv/membership` capability is not requested,
    /// so JOIN/PART messages of other users are not received.
    pub skip_membership: bool,

    /// Pause between two JOINs issued from the join queue. Default 2
    /// seconds; values below 300 milliseconds are raised to 300
    /// milliseconds.
    pub join_interval: Duration,

    /// Hostname of the chat server. Default `irc-ws.chat.twitch.tv`.
    pub server: String,
    /// Port of the chat server. Default 443.
    pub port: u16,
    /// Whether to connect with TLS (`wss://`). Default `true`. Plain
    /// `ws://` is supported for test servers.
    pub secure: bool,

    /// Whether to automatically reconnect after a connection loss that was
    /// not requested via `disconnect()`. Default `true`.
    pub reconnect: bool,
    /// Multiplier applied to the reconnect delay before every attempt.
    /// Default 1.5.
    pub reconnect_decay: f64,
    /// Initial reconnect delay, also restored after every successful
    /// handshake. Default 1 second.
    pub reconnect_interval: Duration,
    /// Upper bound for the decayed reconnect delay. Default 30 seconds.
    pub max_reconnect_interval: Duration,
    /// Give up reconnecting after this many attempts. `None` (the default)
    /// retries forever.
    pub max_reconnect_attempts: Option<u64>,

    /// How long to wait for a `PONG` after sending a `PING` before the
    /// connection is considered dead. Also the deadline for `ping()`.
    /// Default 9999 milliseconds.
    pub timeout: Duration,

    /// Allows you to differentiate between multiple clients with the same
    /// setup in log messages. If `Some`, all log messages are made
    /// inside a span with the given name.
    pub tracing_identifier: Option<String>,
}

impl<L: LoginCredentials> ClientConfig<L> {
    /// Create a new configuration from the given login credentials, with
    /// all other configuration options being defaulted.
    pub fn new_simple(login_credentials: L) -> ClientConfig<L> {
        ClientConfig {
            login_credentials,
            channels: vec![],
            global_default_channel: "#tmijs".to_owned(),
            skip_membership: false,
            join_interval: Duration::from_secs(2),
            server: "irc-ws.chat.twitch.tv".to_owned(),
            port: 443,
            secure: true,
            reconnect: true,
            reconnect_decay: 1.5,
            reconnect_interval: Duration::from_secs(1),
            max_reconnect_interval: Duration::from_secs(30),
            max_reconnect_attempts: None,
            timeout: Duration::from_millis(9999),
            tracing_identifier: None,
        }
    }

    pub(crate) fn server_addr(&self) -> ServerAddr {
        ServerAddr {
            server: self.server.clone(),
            port: self.port,
            secure: self.secure,
        }
    }

    pub(crate) fn effective_join_interval(&self) -> Duration {
        self.join_interval.max(Duration::from_millis(300))
    }
}

impl Default for ClientConfig<StaticLoginCredentials> {
    fn default() -> ClientConfig<StaticLoginCredentials> {
        ClientConfig::new_simple(StaticLoginCredentials::anonymous())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.server, "irc-ws.chat.twitch.tv");
        assert_eq!(config.port, 443);
        assert!(config.secure);
        assert_eq!(config.global_default_channel, "#tmijs");
        assert_eq!(config.timeout, Duration::from_millis(9999));
        assert_eq!(config.max_reconnect_attempts, None);
    }

    #[test]
    fn test_join_interval_floor() {
        let mut config = ClientConfig::default();
        config.join_interval = Duration::from_millis(100);
        assert_eq!(config.effective_join_interval(), Duration::from_millis(300));

        config.join_interval = Duration::from_millis(500);
        assert_eq!(config.effective_join_interval(), Duration::from_millis(500));
    }
}
