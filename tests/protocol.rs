//! End-to-end protocol scenarios against an in-process WebSocket server.

use async_tungstenite::tokio::{accept_hdr_async, TokioAdapter};
use async_tungstenite::tungstenite::handshake::server::{Request, Response};
use async_tungstenite::tungstenite::http::HeaderValue;
use async_tungstenite::tungstenite::Message as WSMessage;
use async_tungstenite::WebSocketStream;
use futures_util::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tmi_client::login::StaticLoginCredentials;
use tmi_client::{Client, ClientConfig, Error, Event, WsTransport};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

type TestClient = Client<WsTransport, StaticLoginCredentials>;

struct ServerConn {
    ws: WebSocketStream<TokioAdapter<TcpStream>>,
}

impl ServerConn {
    async fn recv(&mut self) -> String {
        loop {
            match self.ws.next().await {
                Some(Ok(WSMessage::Text(text))) => return text.to_string(),
                Some(Ok(WSMessage::Close(_))) | None => {
                    panic!("connection closed while expecting a line")
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => panic!("server websocket error: {}", e),
            }
        }
    }

    /// Reads lines until one starting with the given prefix arrives.
    async fn recv_until(&mut self, prefix: &str) -> String {
        loop {
            let line = self.recv().await;
            if line.starts_with(prefix) {
                return line;
            }
        }
    }

    async fn send(&mut self, line: &str) {
        self.ws.send(WSMessage::text(line)).await.unwrap();
    }

    /// Answers `CAP`/`PASS`/`NICK` with a successful login sequence and
    /// returns the presented nickname.
    async fn accept_login(&mut self) -> String {
        let nick_line = self.recv_until("NICK ").await;
        let nick = nick_line["NICK ".len()..].to_owned();
        self.send(&format!(":tmi.twitch.tv 001 {} :Welcome, GLHF!", nick))
            .await;
        self.send(&format!(":tmi.twitch.tv 376 {} :>", nick)).await;
        nick
    }

    /// Confirms a join of `channel` the way the live server does.
    async fn confirm_join(&mut self, channel: &str) {
        self.send(&format!(
            "@badge-info=;badges=;mod=0;subscriber=0;user-type= :tmi.twitch.tv USERSTATE {}",
            channel
        ))
        .await;
        self.send(&format!(
            "@emote-only=0;followers-only=-1;r9k=0;room-id=1;slow=0;subs-only=0 :tmi.twitch.tv ROOMSTATE {}",
            channel
        ))
        .await;
    }
}

async fn start_server() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn accept_conn(listener: &TcpListener) -> ServerConn {
    let (stream, _) = listener.accept().await.unwrap();
    let ws = accept_hdr_async(stream, |req: &Request, mut response: Response| {
        if req.headers().get("Sec-WebSocket-Protocol").is_some() {
            response
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("irc"));
        }
        Ok(response)
    })
    .await
    .unwrap();
    ServerConn { ws }
}

fn test_config(port: u16) -> ClientConfig<StaticLoginCredentials> {
    let mut config = ClientConfig::new_simple(StaticLoginCredentials::new(
        "testbot".to_owned(),
        Some("secrettoken".to_owned()),
    ));
    config.server = "127.0.0.1".to_owned();
    config.port = port;
    config.secure = false;
    config.reconnect = false;
    config
}

async fn connected_pair(
    listener: &TcpListener,
    client: &TestClient,
) -> ServerConn {
    let connect = client.connect();
    let accept = async {
        let mut server = accept_conn(listener).await;
        server.accept_login().await;
        server
    };
    let (connect_result, server) = tokio::join!(connect, accept);
    connect_result.unwrap();
    server
}

async fn next_event_matching(
    events: &mut UnboundedReceiver<Event>,
    pred: impl Fn(&Event) -> bool,
) -> Event {
    timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_handshake_sequence() {
    let (listener, port) = start_server().await;
    let (_events, client) = TestClient::new(test_config(port));

    let server_task = tokio::spawn(async move {
        let mut server = accept_conn(&listener).await;

        let cap = server.recv().await;
        assert_eq!(
            cap,
            "CAP REQ :twitch.tv/tags twitch.tv/commands twitch.tv/membership"
        );
        let pass = server.recv().await;
        assert_eq!(pass, "PASS oauth:secrettoken");
        let nick = server.recv().await;
        assert_eq!(nick, "NICK testbot");

        server.send(":tmi.twitch.tv 001 testbot :Welcome, GLHF!").await;
        server.send(":tmi.twitch.tv 376 testbot :>").await;
        server
    });

    let (server, port_out) = client.connect().await.unwrap();
    assert_eq!(server, "127.0.0.1");
    assert_eq!(port_out, port);
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_skip_membership_capability() {
    let (listener, port) = start_server().await;
    let mut config = test_config(port);
    config.skip_membership = true;
    let (_events, client) = TestClient::new(config);

    let server_task = tokio::spawn(async move {
        let mut server = accept_conn(&listener).await;
        let cap = server.recv().await;
        assert_eq!(cap, "CAP REQ :twitch.tv/tags twitch.tv/commands");
        server.accept_login().await;
    });

    client.connect().await.unwrap();
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_anonymous_login_sends_schmoopiie() {
    let (listener, port) = start_server().await;
    let mut config = test_config(port);
    config.login_credentials = StaticLoginCredentials::anonymous();
    let (_events, client) = TestClient::new(config);

    let server_task = tokio::spawn(async move {
        let mut server = accept_conn(&listener).await;
        let pass = server.recv_until("PASS ").await;
        assert_eq!(pass, "PASS SCHMOOPIIE");
        let nick_line = server.recv_until("NICK ").await;
        assert!(nick_line.starts_with("NICK justinfan"));

        let nick = nick_line["NICK ".len()..].to_owned();
        server
            .send(&format!(":tmi.twitch.tv 001 {} :Welcome, GLHF!", nick))
            .await;
        server.send(&format!(":tmi.twitch.tv 376 {} :>", nick)).await;
    });

    client.connect().await.unwrap();
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_login_failure_rejects_connect() {
    let (listener, port) = start_server().await;
    let (mut events, client) = TestClient::new(test_config(port));

    tokio::spawn(async move {
        let mut server = accept_conn(&listener).await;
        server.recv_until("NICK ").await;
        server
            .send(":tmi.twitch.tv NOTICE * :Login authentication failed")
            .await;
        // hold the connection open so the close is client-driven
        server.recv().await
    });

    let error = client.connect().await.unwrap_err();
    assert_eq!(error.to_string(), "Login authentication failed");

    next_event_matching(&mut events, |e| matches!(e, Event::Disconnected { .. })).await;
}

#[tokio::test]
async fn test_commands_before_connect_are_rejected() {
    let (_events, client) = TestClient::new(test_config(1));

    let error = client.ban("#local7000", "baduser", None).await.unwrap_err();
    assert_eq!(error.to_string(), "Not connected to server.");

    let error = client.say("#local7000", "hi").await.unwrap_err();
    assert!(matches!(error, Error::NotConnected));

    let error = client.ping().await.unwrap_err();
    assert!(matches!(error, Error::NotConnected));
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let (listener, port) = start_server().await;
    let (_events, client) = TestClient::new(test_config(port));
    let _server = connected_pair(&listener, &client).await;

    let error = client.connect().await.unwrap_err();
    assert!(matches!(error, Error::AlreadyConnected));
}

#[tokio::test]
async fn test_ban_success() {
    let (listener, port) = start_server().await;
    let (_events, client) = TestClient::new(test_config(port));
    let mut server = connected_pair(&listener, &client).await;

    let server_task = tokio::spawn(async move {
        let line = server.recv().await;
        assert_eq!(line, "PRIVMSG #local7000 :/ban baduser reason");
        server
            .send("@msg-id=ban_success :tmi.twitch.tv NOTICE #local7000 :baduser is now banned.")
            .await;
        server
    });

    let result = client.ban("#local7000", "baduser", Some("reason")).await;
    assert_eq!(
        result.unwrap(),
        (
            "#local7000".to_owned(),
            "baduser".to_owned(),
            Some("reason".to_owned())
        )
    );
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_ban_rejected() {
    let (listener, port) = start_server().await;
    let (_events, client) = TestClient::new(test_config(port));
    let mut server = connected_pair(&listener, &client).await;

    tokio::spawn(async move {
        server.recv_until("PRIVMSG ").await;
        server
            .send(
                "@msg-id=already_banned :tmi.twitch.tv NOTICE #local7000 :baduser is already banned in this channel.",
            )
            .await;
        server.recv().await
    });

    let error = client
        .ban("#local7000", "baduser", Some("reason"))
        .await
        .unwrap_err();
    assert_eq!(error.to_string(), "already_banned");
    assert!(matches!(error, Error::CommandRejected(_)));
}

#[tokio::test]
async fn test_ping_measures_latency() {
    let (listener, port) = start_server().await;
    let (_events, client) = TestClient::new(test_config(port));
    let mut server = connected_pair(&listener, &client).await;

    tokio::spawn(async move {
        server.recv_until("PING").await;
        server.send("PONG :tmi.twitch.tv").await;
        server.recv().await
    });

    let latency = client.ping().await.unwrap();
    assert!(latency > Duration::ZERO);
}

#[tokio::test]
async fn test_ping_without_pong_times_out() {
    let (listener, port) = start_server().await;
    let mut config = test_config(port);
    config.timeout = Duration::from_millis(200);
    let (_events, client) = TestClient::new(config);
    let mut server = connected_pair(&listener, &client).await;

    tokio::spawn(async move {
        // swallow the PING, never answer
        server.recv_until("PING").await;
        server.recv().await
    });

    let started = Instant::now();
    let result = client.ping().await;
    assert!(result.is_err());
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_join_multi_single_frame_and_confirmation() {
    let (listener, port) = start_server().await;
    let (_events, client) = TestClient::new(test_config(port));
    let mut server = connected_pair(&listener, &client).await;

    let server_task = tokio::spawn(async move {
        let line = server.recv().await;
        assert_eq!(line, "JOIN #a,#b,#c");
        for channel in ["#a", "#b", "#c"] {
            server.confirm_join(channel).await;
        }
        server
    });

    let joined = client.join_many(&["a", "b", "c"]).await.unwrap();
    assert_eq!(
        joined,
        vec!["#a".to_owned(), "#b".to_owned(), "#c".to_owned()]
    );
    assert_eq!(client.channels().await, joined);
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_join_rejects_when_one_channel_is_suspended() {
    let (listener, port) = start_server().await;
    let (_events, client) = TestClient::new(test_config(port));
    let mut server = connected_pair(&listener, &client).await;

    tokio::spawn(async move {
        server.recv_until("JOIN ").await;
        server.confirm_join("#a").await;
        server
            .send(
                "@msg-id=msg_channel_suspended :tmi.twitch.tv NOTICE #b :This channel does not exist or has been suspended.",
            )
            .await;
        server.recv().await
    });

    let error = client.join_many(&["a", "b"]).await.unwrap_err();
    assert_eq!(error.to_string(), "msg_channel_suspended");

    // the confirmed channel is joined regardless of the rejected future
    assert_eq!(client.channels().await, vec!["#a".to_owned()]);
}

#[tokio::test]
async fn test_say_splits_long_messages() {
    let (listener, port) = start_server().await;
    let (_events, client) = TestClient::new(test_config(port));
    let mut server = connected_pair(&listener, &client).await;

    let message = "A".repeat(600);
    let expected = message.clone();
    let server_task = tokio::spawn(async move {
        let started = Instant::now();
        let first = server.recv_until("PRIVMSG ").await;
        let second = server.recv_until("PRIVMSG ").await;
        let elapsed = started.elapsed();

        // a single-word payload is sent as a middle parameter
        let first_payload = first.strip_prefix("PRIVMSG #chan ").unwrap().to_owned();
        let second_payload = second.strip_prefix("PRIVMSG #chan ").unwrap().to_owned();
        assert_eq!(first_payload.len(), 500);
        assert_eq!(format!("{}{}", first_payload, second_payload), expected);
        // the remainder is re-enqueued with a delay
        assert!(elapsed >= Duration::from_millis(300));
    });

    let (channel, echoed) = client.say("chan", &message).await.unwrap();
    assert_eq!(channel, "#chan");
    assert_eq!(echoed, message);
    server_task.await.unwrap();
}

#[tokio::test]
async fn test_action_message_parses_into_action_event() {
    let (listener, port) = start_server().await;
    let (mut events, client) = TestClient::new(test_config(port));
    let mut server = connected_pair(&listener, &client).await;

    server
        .send(
            "@badge-info=;badges=;color=;display-name=Pajlada;emotes=;id=abc;mod=0;room-id=1;subscriber=0;tmi-sent-ts=1;turbo=0;user-id=1;user-type= :pajlada!pajlada@pajlada.tmi.twitch.tv PRIVMSG #pajlada :\u{1}ACTION hi\u{1}",
        )
        .await;

    let event = next_event_matching(&mut events, |e| matches!(e, Event::Action { .. })).await;
    match event {
        Event::Action {
            channel,
            message,
            username,
            ..
        } => {
            assert_eq!(channel, "#pajlada");
            assert_eq!(message, "hi");
            assert_eq!(username, "pajlada");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_cheer_and_chat_events() {
    let (listener, port) = start_server().await;
    let (mut events, client) = TestClient::new(test_config(port));
    let mut server = connected_pair(&listener, &client).await;

    server
        .send(
            "@badges=;bits=100;display-name=Donor;emotes=;id=a;mod=0;room-id=1;subscriber=0;tmi-sent-ts=1;turbo=0;user-id=2;user-type= :donor!donor@donor.tmi.twitch.tv PRIVMSG #pajlada :cheer100 nice",
        )
        .await;
    server
        .send(
            "@badges=;display-name=Chatter;emotes=;id=b;mod=0;room-id=1;subscriber=0;tmi-sent-ts=1;turbo=0;user-id=3;user-type= :chatter!chatter@chatter.tmi.twitch.tv PRIVMSG #pajlada :hello",
        )
        .await;

    let cheer = next_event_matching(&mut events, |e| matches!(e, Event::Cheer { .. })).await;
    match cheer {
        Event::Cheer { tags, message, .. } => {
            // bits is exempt from normalization and stays a raw string
            assert_eq!(tags.get_str("bits"), Some("100"));
            assert_eq!(message, "cheer100 nice");
        }
        _ => unreachable!(),
    }

    let chat = next_event_matching(&mut events, |e| matches!(e, Event::Chat { .. })).await;
    match chat {
        Event::Chat {
            message, username, ..
        } => {
            assert_eq!(message, "hello");
            assert_eq!(username, "chatter");
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_mods_reply_updates_roster() {
    let (listener, port) = start_server().await;
    let (_events, client) = TestClient::new(test_config(port));
    let mut server = connected_pair(&listener, &client).await;

    tokio::spawn(async move {
        let line = server.recv_until("PRIVMSG ").await;
        assert_eq!(line, "PRIVMSG #pajlada :/mods");
        server
            .send(
                "@msg-id=room_mods :tmi.twitch.tv NOTICE #pajlada :The moderators of this channel are: pajbot, snusbot",
            )
            .await;
        server.recv().await
    });

    let mods = client.mods("pajlada").await.unwrap();
    assert_eq!(mods, vec!["pajbot".to_owned(), "snusbot".to_owned()]);
    assert_eq!(client.moderators("pajlada").await, mods);
}

#[tokio::test]
async fn test_whisper_to_self_is_a_usage_error() {
    let (listener, port) = start_server().await;
    let (_events, client) = TestClient::new(test_config(port));
    let _server = connected_pair(&listener, &client).await;

    let error = client.whisper("testbot", "hi me").await.unwrap_err();
    assert!(matches!(error, Error::Usage(_)));
}

#[tokio::test]
async fn test_whisper_silence_counts_as_success() {
    let (listener, port) = start_server().await;
    let (_events, client) = TestClient::new(test_config(port));
    let mut server = connected_pair(&listener, &client).await;

    tokio::spawn(async move {
        let line = server.recv_until("PRIVMSG ").await;
        assert_eq!(line, "PRIVMSG #tmijs :/w someone psst");
        // Twitch never confirms delivered whispers
        server.recv().await
    });

    let result = client.whisper("someone", "psst").await.unwrap();
    assert_eq!(result, ("someone".to_owned(), "psst".to_owned()));
}

#[tokio::test]
async fn test_slow_mode_confirmed_by_roomstate() {
    let (listener, port) = start_server().await;
    let (mut events, client) = TestClient::new(test_config(port));
    let mut server = connected_pair(&listener, &client).await;

    tokio::spawn(async move {
        let line = server.recv_until("PRIVMSG ").await;
        assert_eq!(line, "PRIVMSG #pajlada :/slow 10");
        // partial ROOMSTATE carrying only the changed mode
        server
            .send("@room-id=1;slow=10 :tmi.twitch.tv ROOMSTATE #pajlada")
            .await;
        server.recv().await
    });

    let result = client.slow("pajlada", 10).await.unwrap();
    assert_eq!(result, ("#pajlada".to_owned(), 10));

    let event = next_event_matching(&mut events, |e| matches!(e, Event::Slow { .. })).await;
    match event {
        Event::Slow {
            channel,
            enabled,
            seconds,
        } => {
            assert_eq!(channel, "#pajlada");
            assert!(enabled);
            assert_eq!(seconds, 10);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_permission_class_rejects_all_outstanding_commands() {
    let (listener, port) = start_server().await;
    let (_events, client) = TestClient::new(test_config(port));
    let mut server = connected_pair(&listener, &client).await;

    tokio::spawn(async move {
        server.recv_until("PRIVMSG ").await;
        server.recv_until("PRIVMSG ").await;
        server
            .send("@msg-id=no_permission :tmi.twitch.tv NOTICE #pajlada :You don't have permission to perform that action.")
            .await;
        server.recv().await
    });

    let (ban_result, clear_result) = tokio::join!(
        client.ban("pajlada", "baduser", None),
        client.clear("pajlada")
    );
    assert_eq!(ban_result.unwrap_err().to_string(), "no_permission");
    assert_eq!(clear_result.unwrap_err().to_string(), "no_permission");
}

#[tokio::test]
async fn test_server_reconnect_request_triggers_reconnect_and_rejoin() {
    let (listener, port) = start_server().await;
    let mut config = test_config(port);
    config.reconnect = true;
    config.reconnect_interval = Duration::from_millis(50);
    config.max_reconnect_interval = Duration::from_millis(200);
    let (mut events, client) = TestClient::new(config);

    let mut server = connected_pair(&listener, &client).await;

    // join a channel on the first connection
    let join_task = tokio::spawn(async move {
        server.recv_until("JOIN ").await;
        server.confirm_join("#a").await;
        server
    });
    client.join("a").await.unwrap();
    let mut server = join_task.await.unwrap();

    // server asks us to reconnect
    server.send(":tmi.twitch.tv RECONNECT").await;

    next_event_matching(&mut events, |e| matches!(e, Event::Reconnect)).await;

    // second connection: handshake again, previously joined channels are
    // re-joined through the join queue
    let mut server = accept_conn(&listener).await;
    server.accept_login().await;
    let join = server.recv_until("JOIN ").await;
    assert_eq!(join, "JOIN #a");
    server.confirm_join("#a").await;

    next_event_matching(
        &mut events,
        |e| matches!(e, Event::Join { is_self: true, .. }),
    )
    .await;
}

#[tokio::test]
async fn test_disconnect_suppresses_reconnect() {
    let (listener, port) = start_server().await;
    let mut config = test_config(port);
    config.reconnect = true;
    let (mut events, client) = TestClient::new(config);
    let _server = connected_pair(&listener, &client).await;

    client.disconnect().await.unwrap();

    let event =
        next_event_matching(&mut events, |e| matches!(e, Event::Disconnected { .. })).await;
    match event {
        Event::Disconnected { reason } => assert_eq!(reason, "Connection closed."),
        _ => unreachable!(),
    }

    // no reconnect attempt follows a user-requested close
    let followup = timeout(Duration::from_millis(300), async {
        loop {
            match events.recv().await {
                Some(Event::Reconnect) | Some(Event::Connecting { .. }) => break,
                Some(_) => continue,
                None => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(followup.is_err(), "client must not reconnect after disconnect()");

    let error = client.disconnect().await.unwrap_err();
    assert!(matches!(error, Error::NotConnected));
}
