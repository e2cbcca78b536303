use crate::client::bus::{Reply, ReplyBus, ReplyTopic};
use crate::client::queue::DelayQueue;
use crate::config::ClientConfig;
use crate::error::Error;
use crate::events::Event;
use crate::irc;
use crate::login::{CredentialsPair, LoginCredentials};
use crate::message::{IRCMessage, IRCTags};
use crate::transport::Transport;
use crate::validate;
use either::Either;
use futures_util::{SinkExt, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep, Instant};
use tracing::{info_span, Instrument};

/// Interval between liveness pings while the connection is ready.
const PING_EVERY: Duration = Duration::from_secs(60);
/// Outgoing chat messages longer than this many bytes are split.
const CHAT_SPLIT_LIMIT: usize = 500;
/// Pause before the remainder of a split chat message is re-enqueued.
const CHAT_SPLIT_DELAY: Duration = Duration::from_millis(350);

/// A correlated command: the message to put on the wire plus the topic and
/// channel its confirmation will arrive under.
pub(crate) struct CommandRequest {
    pub message: IRCMessage,
    pub channel: String,
    pub topic: ReplyTopic,
    /// Whisper-style commands resolve instead of rejecting when the
    /// deadline passes (Twitch confirms nothing on success).
    pub timeout_ok: bool,
}

pub(crate) enum ClientLoopCommand<T: Transport, L: LoginCredentials> {
    // commands that come from Client methods
    Connect {
        return_sender: oneshot::Sender<Result<(String, u16), Error<T, L>>>,
    },
    Disconnect {
        return_sender: oneshot::Sender<Result<(), Error<T, L>>>,
    },
    SendMessage {
        message: IRCMessage,
        return_sender: Option<oneshot::Sender<Result<(), Error<T, L>>>>,
    },
    SendChat {
        channel: String,
        message: String,
        action: bool,
        return_sender: Option<oneshot::Sender<Result<(), Error<T, L>>>>,
    },
    Execute {
        request: CommandRequest,
        return_sender: oneshot::Sender<Result<Reply, Error<T, L>>>,
    },
    Join {
        channels: Vec<String>,
        return_sender: oneshot::Sender<Result<Vec<String>, Error<T, L>>>,
    },
    Part {
        channel: String,
        return_sender: oneshot::Sender<Result<Reply, Error<T, L>>>,
    },
    Ping {
        return_sender: oneshot::Sender<Result<Reply, Error<T, L>>>,
    },
    Whisper {
        username: String,
        message: String,
        return_sender: oneshot::Sender<Result<Reply, Error<T, L>>>,
    },
    GetChannels {
        return_sender: oneshot::Sender<Vec<String>>,
    },
    GetUserstate {
        channel: String,
        return_sender: oneshot::Sender<Option<IRCTags>>,
    },
    GetGlobalUserstate {
        return_sender: oneshot::Sender<IRCTags>,
    },
    GetModerators {
        channel: String,
        return_sender: oneshot::Sender<Vec<String>>,
    },

    // comes from the join queue
    QueuedJoin {
        channel: String,
    },

    // comes from the init task
    TransportInitFinished(Box<Result<(T, CredentialsPair), Error<T, L>>>),

    // comes from the incoming forwarder.
    // Some(Ok(_)) is an ordinary message, Some(Err(_)) an error, and None
    // an EOF (end of stream)
    IncomingMessage(Option<Result<IRCMessage, Error<T, L>>>),

    // comes from the outgoing writer
    SendError(Arc<T::OutgoingError>),
    OutgoingEnded,

    // timer-driven commands
    SendPing,
    CheckPong {
        generation: u64,
    },
    ReplyDeadline {
        listener_id: u64,
    },
    ReconnectDelayElapsed,
}

/// One queued outgoing message. Items reach the wire strictly in queue
/// order.
pub(super) struct OutgoingItem<T: Transport, L: LoginCredentials> {
    message: IRCMessage,
    return_sender: Option<oneshot::Sender<Result<(), Error<T, L>>>>,
}

pub(super) enum ConnectionState<T: Transport, L: LoginCredentials> {
    Closed,
    Connecting {
        connect_return: Option<oneshot::Sender<Result<(String, u16), Error<T, L>>>>,
    },
    Handshaking {
        outgoing_tx: mpsc::UnboundedSender<OutgoingItem<T, L>>,
        kill_incoming: Option<oneshot::Sender<()>>,
        connect_return: Option<oneshot::Sender<Result<(String, u16), Error<T, L>>>>,
    },
    Ready {
        outgoing_tx: mpsc::UnboundedSender<OutgoingItem<T, L>>,
        kill_incoming: Option<oneshot::Sender<()>>,
        kill_pinger: Option<oneshot::Sender<()>>,
    },
    Closing {
        disconnect_return: Option<oneshot::Sender<Result<(), Error<T, L>>>>,
    },
    ReconnectWaiting,
}

/// The actor owning the connection and all client state. All mutation
/// happens on this single task; other tasks only feed it commands.
pub(crate) struct ClientLoopWorker<T: Transport, L: LoginCredentials> {
    pub(super) config: Arc<ClientConfig<L>>,
    loop_rx: mpsc::UnboundedReceiver<ClientLoopCommand<T, L>>,
    loop_tx: Weak<mpsc::UnboundedSender<ClientLoopCommand<T, L>>>,
    events_tx: mpsc::UnboundedSender<Event>,
    pub(super) state: ConnectionState<T, L>,
    pub(super) bus: ReplyBus<T, L>,
    join_queue: DelayQueue<ClientLoopCommand<T, L>>,

    /// Login name, replaced by the server-assigned name from `001`.
    pub(super) username: String,

    // liveness
    pub(super) latency: Duration,
    pub(super) ping_sent_at: Option<Instant>,
    ping_generation: u64,

    // reconnect policy
    reconnect_enabled: bool,
    reconnect_attempts: u64,
    reconnect_delay: Duration,
    closed_by_user: bool,

    // auxiliary state
    pub(super) channels: Vec<String>,
    pub(super) wanted_channels: Vec<String>,
    pub(super) last_joined: Option<String>,
    pub(super) userstate: HashMap<String, IRCTags>,
    pub(super) global_userstate: IRCTags,
    pub(super) moderators: HashMap<String, HashSet<String>>,
    pub(super) emote_sets: String,
}

impl<T: Transport, L: LoginCredentials> ClientLoopWorker<T, L> {
    pub fn spawn(
        config: Arc<ClientConfig<L>>,
        loop_tx: Weak<mpsc::UnboundedSender<ClientLoopCommand<T, L>>>,
        loop_rx: mpsc::UnboundedReceiver<ClientLoopCommand<T, L>>,
        events_tx: mpsc::UnboundedSender<Event>,
    ) {
        let span = match &config.tracing_identifier {
            Some(s) => info_span!("client_loop", name = %s),
            None => info_span!("client_loop"),
        };

        let join_queue = DelayQueue::spawn(config.effective_join_interval(), Weak::clone(&loop_tx));

        let worker = ClientLoopWorker {
            reconnect_delay: config.reconnect_interval,
            config,
            loop_rx,
            loop_tx,
            events_tx,
            state: ConnectionState::Closed,
            bus: ReplyBus::new(),
            join_queue,
            username: String::new(),
            latency: Duration::ZERO,
            ping_sent_at: None,
            ping_generation: 0,
            reconnect_enabled: true,
            reconnect_attempts: 0,
            closed_by_user: false,
            channels: vec![],
            wanted_channels: vec![],
            last_joined: None,
            userstate: HashMap::new(),
            global_userstate: IRCTags::new(),
            moderators: HashMap::new(),
            emote_sets: String::new(),
        };

        tokio::spawn(worker.run().instrument(span));
    }

    async fn run(mut self) {
        tracing::debug!("Spawned client event loop");
        while let Some(command) = self.loop_rx.recv().await {
            self.process_command(command);
        }
        tracing::debug!("Client event loop ended")
    }

    fn process_command(&mut self, command: ClientLoopCommand<T, L>) {
        match command {
            ClientLoopCommand::Connect { return_sender } => self.connect(return_sender),
            ClientLoopCommand::Disconnect { return_sender } => self.disconnect(return_sender),
            ClientLoopCommand::SendMessage {
                message,
                return_sender,
            } => self.send_message(message, return_sender),
            ClientLoopCommand::SendChat {
                channel,
                message,
                action,
                return_sender,
            } => self.send_chat(channel, message, action, return_sender),
            ClientLoopCommand::Execute {
                request,
                return_sender,
            } => self.execute_command(request, return_sender),
            ClientLoopCommand::Join {
                channels,
                return_sender,
            } => self.join(channels, return_sender),
            ClientLoopCommand::Part {
                channel,
                return_sender,
            } => self.part(channel, return_sender),
            ClientLoopCommand::Ping { return_sender } => self.ping(return_sender),
            ClientLoopCommand::Whisper {
                username,
                message,
                return_sender,
            } => self.whisper(username, message, return_sender),
            ClientLoopCommand::GetChannels { return_sender } => {
                return_sender.send(self.channels.clone()).ok();
            }
            ClientLoopCommand::GetUserstate {
                channel,
                return_sender,
            } => {
                return_sender.send(self.userstate.get(&channel).cloned()).ok();
            }
            ClientLoopCommand::GetGlobalUserstate { return_sender } => {
                return_sender.send(self.global_userstate.clone()).ok();
            }
            ClientLoopCommand::GetModerators {
                channel,
                return_sender,
            } => {
                let mut mods = self
                    .moderators
                    .get(&channel)
                    .map(|set| set.iter().cloned().collect::<Vec<_>>())
                    .unwrap_or_default();
                mods.sort();
                return_sender.send(mods).ok();
            }
            ClientLoopCommand::QueuedJoin { channel } => self.queued_join(channel),
            ClientLoopCommand::TransportInitFinished(result) => {
                self.on_transport_init_finished(*result)
            }
            ClientLoopCommand::IncomingMessage(maybe_message) => {
                self.on_incoming_message(maybe_message)
            }
            ClientLoopCommand::SendError(error) => self.on_send_error(error),
            ClientLoopCommand::OutgoingEnded => self.on_outgoing_ended(),
            ClientLoopCommand::SendPing => self.send_ping(),
            ClientLoopCommand::CheckPong { generation } => self.check_pong(generation),
            ClientLoopCommand::ReplyDeadline { listener_id } => self.bus.deadline(listener_id),
            ClientLoopCommand::ReconnectDelayElapsed => self.on_reconnect_delay_elapsed(),
        }
    }

    pub(super) fn emit(&self, event: Event) {
        // ignore if the library user dropped the receiver
        self.events_tx.send(event).ok();
    }

    pub(super) fn is_ready(&self) -> bool {
        matches!(self.state, ConnectionState::Ready { .. })
    }

    pub(super) fn is_handshaking(&self) -> bool {
        matches!(self.state, ConnectionState::Handshaking { .. })
    }

    //
    // connection establishment
    //

    fn connect(&mut self, return_sender: oneshot::Sender<Result<(String, u16), Error<T, L>>>) {
        match self.state {
            ConnectionState::Closed | ConnectionState::ReconnectWaiting => {
                // a fresh user-requested session resets the reconnect policy
                self.reconnect_enabled = true;
                self.reconnect_attempts = 0;
                self.reconnect_delay = self.config.reconnect_interval;
                self.closed_by_user = false;
                self.start_connect(Some(return_sender));
            }
            _ => {
                return_sender.send(Err(Error::AlreadyConnected)).ok();
            }
        }
    }

    fn start_connect(
        &mut self,
        connect_return: Option<oneshot::Sender<Result<(String, u16), Error<T, L>>>>,
    ) {
        tracing::info!("Connecting to {}:{}", self.config.server, self.config.port);
        self.emit(Event::Connecting {
            server: self.config.server.clone(),
            port: self.config.port,
        });
        self.state = ConnectionState::Connecting { connect_return };

        tokio::spawn(Self::run_init_task(
            Arc::clone(&self.config),
            Weak::clone(&self.loop_tx),
        ));
    }

    async fn run_init_task(
        config: Arc<ClientConfig<L>>,
        loop_tx: Weak<mpsc::UnboundedSender<ClientLoopCommand<T, L>>>,
    ) {
        tracing::debug!("Spawned connection init task");
        let res = async {
            let credentials = config
                .login_credentials
                .get_credentials()
                .await
                .map_err(|e| Error::CredentialsError(Arc::new(e)))?;

            let transport = T::new(&config.server_addr())
                .await
                .map_err(|e| Error::ConnectError(Arc::new(e)))?;

            Ok::<(T, CredentialsPair), Error<T, L>>((transport, credentials))
        }
        .await;

        if let Some(loop_tx) = loop_tx.upgrade() {
            loop_tx
                .send(ClientLoopCommand::TransportInitFinished(Box::new(res)))
                .ok();
        }
    }

    fn on_transport_init_finished(
        &mut self,
        init_result: Result<(T, CredentialsPair), Error<T, L>>,
    ) {
        let connect_return = match &mut self.state {
            ConnectionState::Connecting { connect_return } => connect_return.take(),
            _ => {
                // the user disconnected while the transport was opening;
                // dropping the transport closes it again
                tracing::debug!("Discarding transport init result, connection no longer wanted");
                return;
            }
        };

        match init_result {
            Ok((transport, credentials)) => {
                tracing::debug!("Transport open, starting login handshake");
                let (transport_incoming, transport_outgoing) = transport.split();

                let (kill_incoming_tx, kill_incoming_rx) = oneshot::channel();
                tokio::spawn(Self::run_incoming_forward_task(
                    transport_incoming,
                    Weak::clone(&self.loop_tx),
                    kill_incoming_rx,
                ));

                let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
                tokio::spawn(Self::run_outgoing_task(
                    transport_outgoing,
                    outgoing_rx,
                    Weak::clone(&self.loop_tx),
                ));

                self.state = ConnectionState::Handshaking {
                    outgoing_tx,
                    kill_incoming: Some(kill_incoming_tx),
                    connect_return,
                };

                let mut capabilities = "twitch.tv/tags twitch.tv/commands".to_owned();
                if !self.config.skip_membership {
                    capabilities.push_str(" twitch.tv/membership");
                }

                let login = validate::username(&credentials.login);
                self.send_message(irc!["CAP", "REQ", capabilities], None);
                if let Some(token) = &credentials.token {
                    self.send_message(irc!["PASS", validate::token(token)], None);
                } else if validate::is_justinfan(&login) {
                    self.send_message(irc!["PASS", "SCHMOOPIIE"], None);
                }
                self.send_message(irc!["NICK", login.clone()], None);
                self.username = login;
            }
            Err(init_error) => {
                tracing::error!("Connecting failed: {}", init_error);
                if let Some(connect_return) = connect_return {
                    connect_return.send(Err(init_error.clone())).ok();
                }
                self.transition_to_closed(init_error);
            }
        }
    }

    /// Forwards messages from the transport into the event loop. Parse
    /// failures are logged and skipped, they never end the connection.
    async fn run_incoming_forward_task(
        mut transport_incoming: T::Incoming,
        loop_tx: Weak<mpsc::UnboundedSender<ClientLoopCommand<T, L>>>,
        mut shutdown_notify: oneshot::Receiver<()>,
    ) {
        tracing::debug!("Spawned incoming messages forwarder");
        loop {
            tokio::select! {
                _ = &mut shutdown_notify => {
                    // got kill signal
                    break;
                }
                incoming_message = transport_incoming.next() => {
                    let forwarded = match incoming_message {
                        Some(Ok(message)) => Some(Some(Ok(message))),
                        Some(Err(Either::Right(parse_error))) => {
                            tracing::warn!("Ignoring malformed line from server: {}", parse_error);
                            None
                        }
                        Some(Err(Either::Left(transport_error))) => {
                            Some(Some(Err(Error::IncomingError(Arc::new(transport_error)))))
                        }
                        None => Some(None),
                    };

                    if let Some(forwarded) = forwarded {
                        let do_exit = matches!(forwarded, None | Some(Err(_)));
                        if let Some(loop_tx) = loop_tx.upgrade() {
                            loop_tx.send(ClientLoopCommand::IncomingMessage(forwarded)).ok();
                        } else {
                            break;
                        }
                        if do_exit {
                            break;
                        }
                    }
                }
            }
        }
        tracing::debug!("Incoming messages forwarder ended");
    }

    /// Owns the outgoing half of the transport. Writes queued items in
    /// order, then closes the socket once the queue's senders are gone.
    async fn run_outgoing_task(
        mut transport_outgoing: T::Outgoing,
        mut outgoing_rx: mpsc::UnboundedReceiver<OutgoingItem<T, L>>,
        loop_tx: Weak<mpsc::UnboundedSender<ClientLoopCommand<T, L>>>,
    ) {
        tracing::debug!("Spawned outgoing writer");
        while let Some(item) = outgoing_rx.recv().await {
            let res = transport_outgoing.send(item.message).await.map_err(Arc::new);

            // the error is cloned and sent both to the calling method as
            // well as the event loop so the connection can end with it
            if let Some(return_sender) = item.return_sender {
                return_sender
                    .send(res.clone().map_err(Error::OutgoingError))
                    .ok();
            }
            if let Err(err) = res {
                if let Some(loop_tx) = loop_tx.upgrade() {
                    loop_tx.send(ClientLoopCommand::SendError(err)).ok();
                }
                break;
            }
        }

        // reject whatever was still queued, then close the socket
        outgoing_rx.close();
        while let Ok(item) = outgoing_rx.try_recv() {
            if let Some(return_sender) = item.return_sender {
                return_sender.send(Err(Error::ConnectionClosed)).ok();
            }
        }
        transport_outgoing.close().await.ok();

        if let Some(loop_tx) = loop_tx.upgrade() {
            loop_tx.send(ClientLoopCommand::OutgoingEnded).ok();
        }
        tracing::debug!("Outgoing writer ended");
    }

    fn on_incoming_message(&mut self, maybe_message: Option<Result<IRCMessage, Error<T, L>>>) {
        match maybe_message {
            None => {
                tracing::info!("EOF received from transport incoming stream");
                self.transition_to_closed(Error::ConnectionClosed);
            }
            Some(Err(error)) => {
                tracing::error!("Error received from transport incoming stream: {}", error);
                self.transition_to_closed(error);
            }
            Some(Ok(message)) => self.dispatch_message(message),
        }
    }

    //
    // handshake completion (driven by the dispatcher)
    //

    pub(super) fn on_handshake_complete(&mut self) {
        let prev = std::mem::replace(&mut self.state, ConnectionState::Closed);
        match prev {
            ConnectionState::Handshaking {
                outgoing_tx,
                kill_incoming,
                connect_return,
            } => {
                let (kill_pinger_tx, kill_pinger_rx) = oneshot::channel();
                tokio::spawn(Self::run_ping_task(
                    Weak::clone(&self.loop_tx),
                    kill_pinger_rx,
                ));

                self.state = ConnectionState::Ready {
                    outgoing_tx,
                    kill_incoming,
                    kill_pinger: Some(kill_pinger_tx),
                };

                // a completed handshake resets the decayed reconnect delay
                self.reconnect_attempts = 0;
                self.reconnect_delay = self.config.reconnect_interval;

                let server = self.config.server.clone();
                let port = self.config.port;
                tracing::info!("Connected to {}:{}", server, port);
                if let Some(connect_return) = connect_return {
                    connect_return.send(Ok((server.clone(), port))).ok();
                }
                self.emit(Event::Connected { server, port });

                // queue joins for the configured channels plus everything
                // joined before a reconnect
                let mut to_join = self
                    .config
                    .channels
                    .iter()
                    .map(|c| validate::channel(c))
                    .collect::<Vec<_>>();
                for channel in &self.wanted_channels {
                    if !to_join.contains(channel) {
                        to_join.push(channel.clone());
                    }
                }
                for channel in to_join {
                    tracing::debug!("Queueing join for {}", channel);
                    self.join_queue
                        .push(ClientLoopCommand::QueuedJoin { channel });
                }
            }
            prev => self.state = prev,
        }
    }

    //
    // closing down & reconnect policy
    //

    pub(super) fn disable_reconnect(&mut self) {
        self.reconnect_enabled = false;
    }

    pub(super) fn transition_to_closed(&mut self, cause: Error<T, L>) {
        tracing::info!("Closing connection, cause: {}", cause);
        let prev = std::mem::replace(&mut self.state, ConnectionState::Closed);
        let mut was_user_close = self.closed_by_user;

        match prev {
            ConnectionState::Connecting { connect_return } => {
                if let Some(connect_return) = connect_return {
                    connect_return.send(Err(cause.clone())).ok();
                }
            }
            ConnectionState::Handshaking {
                outgoing_tx,
                mut kill_incoming,
                connect_return,
            } => {
                if let Some(kill) = kill_incoming.take() {
                    kill.send(()).ok();
                }
                if let Some(connect_return) = connect_return {
                    connect_return.send(Err(cause.clone())).ok();
                }
                // dropping the queue sender lets the writer close the socket
                drop(outgoing_tx);
            }
            ConnectionState::Ready {
                outgoing_tx,
                mut kill_incoming,
                mut kill_pinger,
            } => {
                if let Some(kill) = kill_incoming.take() {
                    kill.send(()).ok();
                }
                if let Some(kill) = kill_pinger.take() {
                    kill.send(()).ok();
                }
                drop(outgoing_tx);
            }
            ConnectionState::Closing { disconnect_return } => {
                was_user_close = true;
                if let Some(disconnect_return) = disconnect_return {
                    disconnect_return.send(Ok(())).ok();
                }
            }
            ConnectionState::Closed | ConnectionState::ReconnectWaiting => {}
        }

        self.finish_close_bookkeeping(&cause.to_string());

        if was_user_close || !self.config.reconnect || !self.reconnect_enabled {
            return;
        }

        match self.config.max_reconnect_attempts {
            Some(max) if self.reconnect_attempts >= max => {
                tracing::error!("Maximum number of reconnect attempts reached, giving up");
                self.emit(Event::MaxReconnect);
            }
            _ => {
                self.reconnect_attempts += 1;
                self.reconnect_delay = self
                    .reconnect_delay
                    .mul_f64(self.config.reconnect_decay)
                    .min(self.config.max_reconnect_interval);
                tracing::info!(
                    "Reconnecting in {:?} (attempt {})",
                    self.reconnect_delay,
                    self.reconnect_attempts
                );
                self.emit(Event::Reconnect);
                self.state = ConnectionState::ReconnectWaiting;

                let delay = self.reconnect_delay;
                let loop_tx = Weak::clone(&self.loop_tx);
                tokio::spawn(async move {
                    sleep(delay).await;
                    if let Some(loop_tx) = loop_tx.upgrade() {
                        loop_tx.send(ClientLoopCommand::ReconnectDelayElapsed).ok();
                    }
                });
            }
        }
    }

    fn finish_close_bookkeeping(&mut self, reason: &str) {
        self.bus.fail_all(Error::ConnectionClosed);
        self.ping_sent_at = None;
        self.last_joined = None;
        // joined channels are re-joined through the join queue after a
        // reconnect; userstate must be forgotten so the re-join is
        // detected as a fresh join again
        self.userstate.clear();
        for channel in self.channels.drain(..) {
            if !self.wanted_channels.contains(&channel) {
                self.wanted_channels.push(channel);
            }
        }
        self.emit(Event::Disconnected {
            reason: reason.to_owned(),
        });
        self.closed_by_user = false;
    }

    fn on_reconnect_delay_elapsed(&mut self) {
        if matches!(self.state, ConnectionState::ReconnectWaiting) {
            self.start_connect(None);
        }
    }

    fn disconnect(&mut self, return_sender: oneshot::Sender<Result<(), Error<T, L>>>) {
        match std::mem::replace(&mut self.state, ConnectionState::Closed) {
            ConnectionState::Connecting { connect_return } => {
                self.closed_by_user = true;
                if let Some(connect_return) = connect_return {
                    connect_return.send(Err(Error::ConnectionClosed)).ok();
                }
                // the init task's transport is discarded once it arrives
                self.finish_close_bookkeeping("Connection closed.");
                return_sender.send(Ok(())).ok();
            }
            ConnectionState::Handshaking {
                outgoing_tx,
                mut kill_incoming,
                connect_return,
            } => {
                self.closed_by_user = true;
                if let Some(kill) = kill_incoming.take() {
                    kill.send(()).ok();
                }
                if let Some(connect_return) = connect_return {
                    connect_return.send(Err(Error::ConnectionClosed)).ok();
                }
                self.state = ConnectionState::Closing {
                    disconnect_return: Some(return_sender),
                };
                // the writer drains its queue, closes the socket and then
                // reports back with OutgoingEnded
                drop(outgoing_tx);
            }
            ConnectionState::Ready {
                outgoing_tx,
                mut kill_incoming,
                mut kill_pinger,
            } => {
                self.closed_by_user = true;
                if let Some(kill) = kill_incoming.take() {
                    kill.send(()).ok();
                }
                if let Some(kill) = kill_pinger.take() {
                    kill.send(()).ok();
                }
                self.state = ConnectionState::Closing {
                    disconnect_return: Some(return_sender),
                };
                drop(outgoing_tx);
            }
            ConnectionState::ReconnectWaiting => {
                // stop the pending reconnect
                return_sender.send(Ok(())).ok();
            }
            prev @ ConnectionState::Closed => {
                self.state = prev;
                return_sender.send(Err(Error::NotConnected)).ok();
            }
            prev @ ConnectionState::Closing { .. } => {
                self.state = prev;
                return_sender.send(Err(Error::NotConnected)).ok();
            }
        }
    }

    fn on_outgoing_ended(&mut self) {
        match std::mem::replace(&mut self.state, ConnectionState::Closed) {
            ConnectionState::Closing { disconnect_return } => {
                self.finish_close_bookkeeping("Connection closed.");
                if let Some(disconnect_return) = disconnect_return {
                    disconnect_return.send(Ok(())).ok();
                }
            }
            prev => self.state = prev,
        }
    }

    //
    // sending
    //

    pub(super) fn send_message(
        &mut self,
        message: IRCMessage,
        return_sender: Option<oneshot::Sender<Result<(), Error<T, L>>>>,
    ) {
        let outgoing_tx = match &self.state {
            ConnectionState::Handshaking { outgoing_tx, .. }
            | ConnectionState::Ready { outgoing_tx, .. } => outgoing_tx,
            _ => {
                if let Some(return_sender) = return_sender {
                    return_sender.send(Err(Error::NotConnected)).ok();
                }
                return;
            }
        };

        if let Err(rejected) = outgoing_tx.send(OutgoingItem {
            message,
            return_sender,
        }) {
            // the writer has already shut down
            if let Some(return_sender) = rejected.0.return_sender {
                return_sender.send(Err(Error::ConnectionClosed)).ok();
            }
        }
    }

    fn on_send_error(&mut self, error: Arc<T::OutgoingError>) {
        self.transition_to_closed(Error::OutgoingError(error));
    }

    fn send_chat(
        &mut self,
        channel: String,
        message: String,
        action: bool,
        return_sender: Option<oneshot::Sender<Result<(), Error<T, L>>>>,
    ) {
        if !self.is_ready() {
            if let Some(return_sender) = return_sender {
                return_sender.send(Err(Error::NotConnected)).ok();
            }
            return;
        }

        let (head, remainder) = split_chat_message(&message);
        let payload = if action {
            format!("\u{1}ACTION {}\u{1}", head)
        } else {
            head.to_owned()
        };
        self.send_message(irc!["PRIVMSG", channel.clone(), payload], return_sender);

        if let Some(remainder) = remainder {
            let remainder = remainder.to_owned();
            let loop_tx = Weak::clone(&self.loop_tx);
            tokio::spawn(async move {
                sleep(CHAT_SPLIT_DELAY).await;
                if let Some(loop_tx) = loop_tx.upgrade() {
                    loop_tx
                        .send(ClientLoopCommand::SendChat {
                            channel,
                            message: remainder,
                            action,
                            return_sender: None,
                        })
                        .ok();
                }
            });
        }
    }

    //
    // correlated commands
    //

    /// Deadline for correlated commands, derived from the last measured
    /// round-trip time.
    fn reply_deadline(&self) -> Duration {
        (self.latency + Duration::from_millis(100)).max(Duration::from_millis(600))
    }

    fn arm_reply_deadline(&self, listener_id: u64, deadline: Duration) {
        let loop_tx = Weak::clone(&self.loop_tx);
        tokio::spawn(async move {
            sleep(deadline).await;
            if let Some(loop_tx) = loop_tx.upgrade() {
                loop_tx
                    .send(ClientLoopCommand::ReplyDeadline { listener_id })
                    .ok();
            }
        });
    }

    fn execute_command(
        &mut self,
        request: CommandRequest,
        return_sender: oneshot::Sender<Result<Reply, Error<T, L>>>,
    ) {
        if !self.is_ready() {
            return_sender.send(Err(Error::NotConnected)).ok();
            return;
        }

        let listener_id = self.bus.listen_once(
            request.topic,
            request.channel,
            request.timeout_ok,
            return_sender,
        );
        self.arm_reply_deadline(listener_id, self.reply_deadline());
        self.send_message(request.message, None);
    }

    fn join(
        &mut self,
        channels: Vec<String>,
        return_sender: oneshot::Sender<Result<Vec<String>, Error<T, L>>>,
    ) {
        if !self.is_ready() {
            return_sender.send(Err(Error::NotConnected)).ok();
            return;
        }

        for channel in &channels {
            if !self.wanted_channels.contains(channel) {
                self.wanted_channels.push(channel.clone());
            }
        }

        let listener_id = self.bus.listen_join(channels.clone(), return_sender);
        // a multi-channel join is given proportionally more time
        let deadline = self.reply_deadline() * channels.len() as u32;
        self.arm_reply_deadline(listener_id, deadline);
        self.send_message(irc!["JOIN", channels.join(",")], None);
    }

    fn queued_join(&mut self, channel: String) {
        if !self.is_ready() {
            tracing::warn!("Dropping queued join for {}, not connected", channel);
            return;
        }

        // failures of queued joins are logged, they do not halt the queue
        let (return_tx, return_rx) = oneshot::channel();
        {
            let channel = channel.clone();
            tokio::spawn(async move {
                if let Ok(Err(error)) = return_rx.await {
                    tracing::warn!("Failed to join {}: {}", channel, error);
                }
            });
        }
        self.join(vec![channel], return_tx);
    }

    fn part(&mut self, channel: String, return_sender: oneshot::Sender<Result<Reply, Error<T, L>>>) {
        if !self.is_ready() {
            return_sender.send(Err(Error::NotConnected)).ok();
            return;
        }

        self.wanted_channels.retain(|c| c != &channel);

        let listener_id =
            self.bus
                .listen_once(ReplyTopic::Part, channel.clone(), false, return_sender);
        self.arm_reply_deadline(listener_id, self.reply_deadline());
        self.send_message(irc!["PART", channel], None);
    }

    //
    // liveness
    //

    async fn run_ping_task(
        loop_tx: Weak<mpsc::UnboundedSender<ClientLoopCommand<T, L>>>,
        mut shutdown_notify: oneshot::Receiver<()>,
    ) {
        tracing::debug!("Spawned pinger task");
        let mut send_ping_interval = interval_at(Instant::now() + PING_EVERY, PING_EVERY);

        loop {
            tokio::select! {
                _ = &mut shutdown_notify => {
                    break;
                },
                _ = send_ping_interval.tick() => {
                    if let Some(loop_tx) = loop_tx.upgrade() {
                        loop_tx.send(ClientLoopCommand::SendPing).ok();
                    } else {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Pinger task ended");
    }

    fn ping(&mut self, return_sender: oneshot::Sender<Result<Reply, Error<T, L>>>) {
        if !self.is_ready() {
            return_sender.send(Err(Error::NotConnected)).ok();
            return;
        }

        let listener_id = self.bus.listen_once(
            ReplyTopic::Ping,
            self.config.global_default_channel.clone(),
            false,
            return_sender,
        );
        self.arm_reply_deadline(listener_id, self.config.timeout);
        self.send_ping();
    }

    fn send_ping(&mut self) {
        if !self.is_ready() {
            return;
        }

        tracing::trace!("Sending ping");
        self.ping_generation += 1;
        self.ping_sent_at = Some(Instant::now());

        let generation = self.ping_generation;
        let timeout = self.config.timeout;
        let loop_tx = Weak::clone(&self.loop_tx);
        tokio::spawn(async move {
            sleep(timeout).await;
            if let Some(loop_tx) = loop_tx.upgrade() {
                loop_tx
                    .send(ClientLoopCommand::CheckPong { generation })
                    .ok();
            }
        });

        self.send_message(irc!["PING"], None);
    }

    fn check_pong(&mut self, generation: u64) {
        // only the deadline belonging to the latest unanswered ping counts
        if generation == self.ping_generation && self.ping_sent_at.is_some() {
            tracing::error!("No PONG received within the timeout, closing connection");
            self.transition_to_closed(Error::PingTimeout);
        }
    }

    pub(super) fn on_pong(&mut self) {
        if let Some(sent_at) = self.ping_sent_at.take() {
            self.latency = sent_at.elapsed();
            tracing::trace!("Received pong, latency is {:?}", self.latency);
        }
        self.emit(Event::Pong {
            latency: self.latency,
        });
        let channel = self.config.global_default_channel.clone();
        self.bus
            .complete(ReplyTopic::Ping, &channel, Ok(Reply::Latency(self.latency)));
    }

    fn whisper(
        &mut self,
        username: String,
        message: String,
        return_sender: oneshot::Sender<Result<Reply, Error<T, L>>>,
    ) {
        if !self.is_ready() {
            return_sender.send(Err(Error::NotConnected)).ok();
            return;
        }
        if username == self.username {
            return_sender
                .send(Err(Error::Usage(
                    "Cannot send a whisper to yourself.".to_owned(),
                )))
                .ok();
            return;
        }

        let channel = self.config.global_default_channel.clone();
        let request = CommandRequest {
            message: irc![
                "PRIVMSG",
                channel.clone(),
                format!("/w {} {}", username, message)
            ],
            channel,
            topic: ReplyTopic::Whisper,
            // Twitch is silent about successfully delivered whispers, so
            // the deadline resolves the operation
            timeout_ok: true,
        };
        self.execute_command(request, return_sender);
    }
}

/// Splits an outgoing chat message at the last space at or before the
/// 500-byte limit (or hard at the limit if it contains no space). The
/// remainder, if any, is re-enqueued by the caller.
fn split_chat_message(message: &str) -> (&str, Option<&str>) {
    if message.len() <= CHAT_SPLIT_LIMIT {
        return (message, None);
    }

    let mut boundary = CHAT_SPLIT_LIMIT;
    while !message.is_char_boundary(boundary) {
        boundary -= 1;
    }

    let split_at = match message[..boundary].rfind(' ') {
        Some(pos) if pos > 0 => pos,
        _ => boundary,
    };

    (
        &message[..split_at],
        Some(message[split_at..].trim_start_matches(' ')),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_short_message_is_untouched() {
        assert_eq!(split_chat_message("hello"), ("hello", None));
        let exactly_500 = "a".repeat(500);
        assert_eq!(
            split_chat_message(&exactly_500),
            (exactly_500.as_str(), None)
        );
    }

    #[test]
    fn test_split_without_spaces_cuts_at_limit() {
        let message = "A".repeat(600);
        let (head, remainder) = split_chat_message(&message);
        assert_eq!(head.len(), 500);
        assert_eq!(remainder, Some(&message[500..]));
        assert_eq!(format!("{}{}", head, remainder.unwrap()), message);
    }

    #[test]
    fn test_split_at_last_space() {
        let mut message = "b".repeat(490);
        message.push(' ');
        message.push_str(&"c".repeat(100));

        let (head, remainder) = split_chat_message(&message);
        assert_eq!(head, "b".repeat(490));
        assert_eq!(remainder, Some("c".repeat(100)).as_deref());
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        // 3-byte characters straddling the 500-byte limit
        let message = "테".repeat(200);
        let (head, remainder) = split_chat_message(&message);
        assert!(head.len() <= 500);
        assert!(remainder.is_some());
        assert_eq!(format!("{}{}", head, remainder.unwrap()), message);
    }
}
