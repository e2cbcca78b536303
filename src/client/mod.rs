//! The chat client and its accompanying types.

pub(crate) mod bus;
pub(crate) mod dispatch;
pub(crate) mod event_loop;
pub(crate) mod queue;

use crate::client::bus::{Reply, ReplyTopic};
use crate::client::event_loop::{ClientLoopCommand, ClientLoopWorker, CommandRequest};
use crate::config::ClientConfig;
use crate::error::Error;
use crate::events::Event;
use crate::irc;
use crate::login::LoginCredentials;
use crate::message::{IRCMessage, IRCTags};
use crate::transport::Transport;
use crate::validate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// A send-only handle to control the chat client.
///
/// The handle can be cloned cheaply and used from multiple tasks. The
/// client shuts down once every handle has been dropped and all processing
/// has finished.
pub struct Client<T: Transport, L: LoginCredentials> {
    // the event loop holds a Weak<> of this sender so it can feed itself
    // commands (timers, queued joins) without keeping itself alive once
    // every Client handle is gone
    loop_tx: Arc<mpsc::UnboundedSender<ClientLoopCommand<T, L>>>,
    global_channel: String,
}

// manual Clone, the derive macro would require `T: Clone` + `L: Clone`
impl<T: Transport, L: LoginCredentials> Clone for Client<T, L> {
    fn clone(&self) -> Self {
        Client {
            loop_tx: Arc::clone(&self.loop_tx),
            global_channel: self.global_channel.clone(),
        }
    }
}

impl<T: Transport, L: LoginCredentials> Client<T, L> {
    /// Create a new client from the given configuration, returning the
    /// stream of [`Event`]s together with the control handle.
    ///
    /// Note this method is not side-effect-free, a background event loop is
    /// spawned as a result of calling this function. No connection is
    /// opened until [`connect()`](Client::connect) is called.
    pub fn new(config: ClientConfig<L>) -> (mpsc::UnboundedReceiver<Event>, Client<T, L>) {
        let global_channel = config.global_default_channel.clone();
        let config = Arc::new(config);

        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        let loop_tx = Arc::new(loop_tx);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        ClientLoopWorker::spawn(
            config,
            // the worker gets only a weak reference
            Arc::downgrade(&loop_tx),
            loop_rx,
            events_tx,
        );

        (
            events_rx,
            Client {
                loop_tx,
                global_channel,
            },
        )
    }

    /// Open the connection and log in. Completes once the server finishes
    /// the handshake (numeric `376`), or fails with the server's reason if
    /// the login is rejected.
    ///
    /// Resolves to the `(server, port)` pair that was connected to.
    pub async fn connect(&self) -> Result<(String, u16), Error<T, L>> {
        let (return_tx, return_rx) = oneshot::channel();
        self.loop_tx
            .send(ClientLoopCommand::Connect {
                return_sender: return_tx,
            })
            .unwrap();
        // unwrap: the event loop does not die before all sender handles
        // have been dropped
        return_rx.await.unwrap()
    }

    /// Close the connection. Suppresses the automatic reconnect for this
    /// close.
    pub async fn disconnect(&self) -> Result<(), Error<T, L>> {
        let (return_tx, return_rx) = oneshot::channel();
        self.loop_tx
            .send(ClientLoopCommand::Disconnect {
                return_sender: return_tx,
            })
            .unwrap();
        return_rx.await.unwrap()
    }

    /// Send an arbitrary IRC message over the connection.
    pub async fn send_message(&self, message: IRCMessage) -> Result<(), Error<T, L>> {
        let (return_tx, return_rx) = oneshot::channel();
        self.loop_tx
            .send(ClientLoopCommand::SendMessage {
                message,
                return_sender: Some(return_tx),
            })
            .unwrap();
        return_rx.await.unwrap()
    }

    async fn execute(
        &self,
        message: IRCMessage,
        channel: String,
        topic: ReplyTopic,
        timeout_ok: bool,
    ) -> Result<Reply, Error<T, L>> {
        let (return_tx, return_rx) = oneshot::channel();
        self.loop_tx
            .send(ClientLoopCommand::Execute {
                request: CommandRequest {
                    message,
                    channel,
                    topic,
                    timeout_ok,
                },
                return_sender: return_tx,
            })
            .unwrap();
        return_rx.await.unwrap()
    }

    /// Sends `text` as a `/command` chat line to the given channel and
    /// awaits its correlated reply.
    async fn chat_command(
        &self,
        channel: String,
        text: String,
        topic: ReplyTopic,
        timeout_ok: bool,
    ) -> Result<Reply, Error<T, L>> {
        self.execute(
            irc!["PRIVMSG", channel.clone(), text],
            channel,
            topic,
            timeout_ok,
        )
        .await
    }

    /// Like [`chat_command`](Client::chat_command), for the commands that
    /// are not channel-scoped; their replies arrive under the global
    /// default channel.
    async fn global_command(
        &self,
        text: String,
        topic: ReplyTopic,
        timeout_ok: bool,
    ) -> Result<Reply, Error<T, L>> {
        self.chat_command(self.global_channel.clone(), text, topic, timeout_ok)
            .await
    }

    async fn send_chat(
        &self,
        channel: &str,
        message: &str,
        action: bool,
    ) -> Result<(String, String), Error<T, L>> {
        let channel = validate::channel(channel);
        let (return_tx, return_rx) = oneshot::channel();
        self.loop_tx
            .send(ClientLoopCommand::SendChat {
                channel: channel.clone(),
                message: message.to_owned(),
                action,
                return_sender: Some(return_tx),
            })
            .unwrap();
        return_rx.await.unwrap()?;
        Ok((channel, message.to_owned()))
    }

    //
    // chatting
    //

    /// Send a chat message to a channel. Messages over 500 bytes are split
    /// at the last space and the remainder is sent as a follow-up message.
    pub async fn say(&self, channel: &str, message: &str) -> Result<(String, String), Error<T, L>> {
        self.send_chat(channel, message, false).await
    }

    /// Send a `/me` action message to a channel.
    pub async fn action(
        &self,
        channel: &str,
        message: &str,
    ) -> Result<(String, String), Error<T, L>> {
        self.send_chat(channel, message, true).await
    }

    /// Send a chat message in reply to the message identified by
    /// `reply_parent_msg_id` (the `id` tag of the message being replied
    /// to).
    pub async fn reply(
        &self,
        channel: &str,
        message: &str,
        reply_parent_msg_id: &str,
    ) -> Result<(String, String), Error<T, L>> {
        if reply_parent_msg_id.is_empty() {
            return Err(Error::Usage(
                "reply-parent-msg-id must not be empty.".to_owned(),
            ));
        }

        let channel = validate::channel(channel);
        let mut tags = IRCTags::new();
        tags.set_str("reply-parent-msg-id", reply_parent_msg_id);
        let irc_message = IRCMessage::new(
            tags,
            None,
            "PRIVMSG".to_owned(),
            vec![channel.clone(), message.to_owned()],
        );
        self.send_message(irc_message).await?;
        Ok((channel, message.to_owned()))
    }

    /// Send a whisper to the given user. A whisper that Twitch accepts is
    /// never confirmed, so this resolves once the deadline passes without
    /// a rejecting notice.
    pub async fn whisper(
        &self,
        username: &str,
        message: &str,
    ) -> Result<(String, String), Error<T, L>> {
        let username = validate::username(username);
        let (return_tx, return_rx) = oneshot::channel();
        self.loop_tx
            .send(ClientLoopCommand::Whisper {
                username: username.clone(),
                message: message.to_owned(),
                return_sender: return_tx,
            })
            .unwrap();
        return_rx.await.unwrap()?;
        Ok((username, message.to_owned()))
    }

    //
    // channel membership
    //

    /// Join a single channel. Resolves to a one-element sequence with the
    /// normalized channel name once the server confirms the join with the
    /// channel's `ROOMSTATE`.
    pub async fn join(&self, channel: &str) -> Result<Vec<String>, Error<T, L>> {
        self.join_many(&[channel]).await
    }

    /// Join multiple channels with a single `JOIN` command. Resolves to
    /// the normalized channel names once every channel is confirmed; a
    /// single rejected channel rejects the whole future (channels that
    /// were confirmed stay joined).
    pub async fn join_many(&self, channels: &[&str]) -> Result<Vec<String>, Error<T, L>> {
        let channels = channels
            .iter()
            .map(|c| validate::channel(c))
            .collect::<Vec<_>>();

        let (return_tx, return_rx) = oneshot::channel();
        self.loop_tx
            .send(ClientLoopCommand::Join {
                channels,
                return_sender: return_tx,
            })
            .unwrap();
        return_rx.await.unwrap()
    }

    /// Leave a channel. Resolves to the normalized channel name once the
    /// server echoes the `PART`.
    pub async fn part(&self, channel: &str) -> Result<String, Error<T, L>> {
        let channel = validate::channel(channel);
        let (return_tx, return_rx) = oneshot::channel();
        self.loop_tx
            .send(ClientLoopCommand::Part {
                channel: channel.clone(),
                return_sender: return_tx,
            })
            .unwrap();
        return_rx.await.unwrap()?;
        Ok(channel)
    }

    /// Alias for [`part()`](Client::part).
    pub async fn leave(&self, channel: &str) -> Result<String, Error<T, L>> {
        self.part(channel).await
    }

    //
    // moderation
    //

    /// Ban a user from a channel, with an optional reason.
    pub async fn ban(
        &self,
        channel: &str,
        username: &str,
        reason: Option<&str>,
    ) -> Result<(String, String, Option<String>), Error<T, L>> {
        let channel = validate::channel(channel);
        let username = validate::username(username);
        let text = match reason {
            Some(reason) => format!("/ban {} {}", username, reason),
            None => format!("/ban {}", username),
        };
        self.chat_command(channel.clone(), text, ReplyTopic::Ban, false)
            .await?;
        Ok((channel, username, reason.map(|r| r.to_owned())))
    }

    /// Lift a user's ban.
    pub async fn unban(
        &self,
        channel: &str,
        username: &str,
    ) -> Result<(String, String), Error<T, L>> {
        let channel = validate::channel(channel);
        let username = validate::username(username);
        self.chat_command(
            channel.clone(),
            format!("/unban {}", username),
            ReplyTopic::Unban,
            false,
        )
        .await?;
        Ok((channel, username))
    }

    /// Time a user out for `seconds`, with an optional reason.
    pub async fn timeout(
        &self,
        channel: &str,
        username: &str,
        seconds: u64,
        reason: Option<&str>,
    ) -> Result<(String, String, u64, Option<String>), Error<T, L>> {
        let channel = validate::channel(channel);
        let username = validate::username(username);
        let text = match reason {
            Some(reason) => format!("/timeout {} {} {}", username, seconds, reason),
            None => format!("/timeout {} {}", username, seconds),
        };
        self.chat_command(channel.clone(), text, ReplyTopic::TimeoutUser, false)
            .await?;
        Ok((channel, username, seconds, reason.map(|r| r.to_owned())))
    }

    /// Lift a user's timeout.
    pub async fn untimeout(
        &self,
        channel: &str,
        username: &str,
    ) -> Result<(String, String), Error<T, L>> {
        let channel = validate::channel(channel);
        let username = validate::username(username);
        self.chat_command(
            channel.clone(),
            format!("/untimeout {}", username),
            ReplyTopic::Untimeout,
            false,
        )
        .await?;
        Ok((channel, username))
    }

    /// Clear all messages in a channel. Confirmed by the target-less
    /// `CLEARCHAT` the server sends back.
    pub async fn clear(&self, channel: &str) -> Result<String, Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(channel.clone(), "/clear".to_owned(), ReplyTopic::Clear, false)
            .await?;
        Ok(channel)
    }

    /// Delete a single message by its `id` tag.
    pub async fn delete_message(
        &self,
        channel: &str,
        message_id: &str,
    ) -> Result<(String, String), Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(
            channel.clone(),
            format!("/delete {}", message_id),
            ReplyTopic::DeleteMessage,
            false,
        )
        .await?;
        Ok((channel, message_id.to_owned()))
    }

    /// Grant moderator status to a user.
    pub async fn mod_user(
        &self,
        channel: &str,
        username: &str,
    ) -> Result<(String, String), Error<T, L>> {
        let channel = validate::channel(channel);
        let username = validate::username(username);
        self.chat_command(
            channel.clone(),
            format!("/mod {}", username),
            ReplyTopic::Mod,
            false,
        )
        .await?;
        Ok((channel, username))
    }

    /// Revoke a user's moderator status.
    pub async fn unmod_user(
        &self,
        channel: &str,
        username: &str,
    ) -> Result<(String, String), Error<T, L>> {
        let channel = validate::channel(channel);
        let username = validate::username(username);
        self.chat_command(
            channel.clone(),
            format!("/unmod {}", username),
            ReplyTopic::Unmod,
            false,
        )
        .await?;
        Ok((channel, username))
    }

    /// Request the list of moderators of a channel.
    pub async fn mods(&self, channel: &str) -> Result<Vec<String>, Error<T, L>> {
        let channel = validate::channel(channel);
        match self
            .chat_command(channel, "/mods".to_owned(), ReplyTopic::Mods, false)
            .await?
        {
            Reply::Names(mods) => Ok(mods),
            _ => Ok(vec![]),
        }
    }

    /// Grant VIP status to a user.
    pub async fn vip(
        &self,
        channel: &str,
        username: &str,
    ) -> Result<(String, String), Error<T, L>> {
        let channel = validate::channel(channel);
        let username = validate::username(username);
        self.chat_command(
            channel.clone(),
            format!("/vip {}", username),
            ReplyTopic::Vip,
            false,
        )
        .await?;
        Ok((channel, username))
    }

    /// Revoke a user's VIP status.
    pub async fn unvip(
        &self,
        channel: &str,
        username: &str,
    ) -> Result<(String, String), Error<T, L>> {
        let channel = validate::channel(channel);
        let username = validate::username(username);
        self.chat_command(
            channel.clone(),
            format!("/unvip {}", username),
            ReplyTopic::Unvip,
            false,
        )
        .await?;
        Ok((channel, username))
    }

    /// Request the list of VIPs of a channel.
    pub async fn vips(&self, channel: &str) -> Result<Vec<String>, Error<T, L>> {
        let channel = validate::channel(channel);
        match self
            .chat_command(channel, "/vips".to_owned(), ReplyTopic::Vips, false)
            .await?
        {
            Reply::Names(vips) => Ok(vips),
            _ => Ok(vec![]),
        }
    }

    //
    // room modes
    //

    /// Enable emote-only mode.
    pub async fn emoteonly(&self, channel: &str) -> Result<String, Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(
            channel.clone(),
            "/emoteonly".to_owned(),
            ReplyTopic::EmoteOnly,
            false,
        )
        .await?;
        Ok(channel)
    }

    /// Disable emote-only mode.
    pub async fn emoteonlyoff(&self, channel: &str) -> Result<String, Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(
            channel.clone(),
            "/emoteonlyoff".to_owned(),
            ReplyTopic::EmoteOnlyOff,
            false,
        )
        .await?;
        Ok(channel)
    }

    /// Enable followers-only mode, requiring a follow age of `minutes`.
    pub async fn followersonly(
        &self,
        channel: &str,
        minutes: u64,
    ) -> Result<(String, u64), Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(
            channel.clone(),
            format!("/followers {}", minutes),
            ReplyTopic::FollowersOnly,
            false,
        )
        .await?;
        Ok((channel, minutes))
    }

    /// Disable followers-only mode.
    pub async fn followersonlyoff(&self, channel: &str) -> Result<String, Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(
            channel.clone(),
            "/followersoff".to_owned(),
            ReplyTopic::FollowersOnlyOff,
            false,
        )
        .await?;
        Ok(channel)
    }

    /// Enable slow mode with the given pause between messages. Confirmed
    /// by the `ROOMSTATE` update carrying the new `slow` duration.
    pub async fn slow(&self, channel: &str, seconds: u64) -> Result<(String, u64), Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(
            channel.clone(),
            format!("/slow {}", seconds),
            ReplyTopic::Slow,
            false,
        )
        .await?;
        Ok((channel, seconds))
    }

    /// Alias for [`slow()`](Client::slow).
    pub async fn slowmode(
        &self,
        channel: &str,
        seconds: u64,
    ) -> Result<(String, u64), Error<T, L>> {
        self.slow(channel, seconds).await
    }

    /// Disable slow mode.
    pub async fn slowoff(&self, channel: &str) -> Result<String, Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(
            channel.clone(),
            "/slowoff".to_owned(),
            ReplyTopic::SlowOff,
            false,
        )
        .await?;
        Ok(channel)
    }

    /// Enable subscribers-only mode.
    pub async fn subscribers(&self, channel: &str) -> Result<String, Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(
            channel.clone(),
            "/subscribers".to_owned(),
            ReplyTopic::Subscribers,
            false,
        )
        .await?;
        Ok(channel)
    }

    /// Disable subscribers-only mode.
    pub async fn subscribersoff(&self, channel: &str) -> Result<String, Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(
            channel.clone(),
            "/subscribersoff".to_owned(),
            ReplyTopic::SubscribersOff,
            false,
        )
        .await?;
        Ok(channel)
    }

    /// Enable unique-chat (r9k) mode.
    pub async fn r9kbeta(&self, channel: &str) -> Result<String, Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(
            channel.clone(),
            "/r9kbeta".to_owned(),
            ReplyTopic::R9kBeta,
            false,
        )
        .await?;
        Ok(channel)
    }

    /// Disable unique-chat (r9k) mode.
    pub async fn r9kbetaoff(&self, channel: &str) -> Result<String, Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(
            channel.clone(),
            "/r9kbetaoff".to_owned(),
            ReplyTopic::R9kBetaOff,
            false,
        )
        .await?;
        Ok(channel)
    }

    /// Alias for [`r9kbeta()`](Client::r9kbeta).
    pub async fn r9kmode(&self, channel: &str) -> Result<String, Error<T, L>> {
        self.r9kbeta(channel).await
    }

    /// Alias for [`r9kbeta()`](Client::r9kbeta).
    pub async fn uniquechat(&self, channel: &str) -> Result<String, Error<T, L>> {
        self.r9kbeta(channel).await
    }

    /// Alias for [`r9kbetaoff()`](Client::r9kbetaoff).
    pub async fn uniquechatoff(&self, channel: &str) -> Result<String, Error<T, L>> {
        self.r9kbetaoff(channel).await
    }

    //
    // broadcaster tools
    //

    /// Change the color the logged-in user's name is shown in.
    pub async fn color(&self, color: &str) -> Result<String, Error<T, L>> {
        self.global_command(format!("/color {}", color), ReplyTopic::Color, false)
            .await?;
        Ok(color.to_owned())
    }

    /// Run a commercial for the given number of seconds.
    pub async fn commercial(
        &self,
        channel: &str,
        seconds: u64,
    ) -> Result<(String, u64), Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(
            channel.clone(),
            format!("/commercial {}", seconds),
            ReplyTopic::Commercial,
            false,
        )
        .await?;
        Ok((channel, seconds))
    }

    /// Host another channel. Resolves with the number of host commands
    /// remaining this half hour.
    pub async fn host(
        &self,
        channel: &str,
        target: &str,
    ) -> Result<(String, String, u64), Error<T, L>> {
        let channel = validate::channel(channel);
        let target = validate::username(target);
        let reply = self
            .chat_command(
                channel.clone(),
                format!("/host {}", target),
                ReplyTopic::Host,
                false,
            )
            .await?;
        let remaining = match reply {
            Reply::Count(n) => n,
            _ => 0,
        };
        Ok((channel, target, remaining))
    }

    /// Stop hosting. Confirmed by the `HOSTTARGET` exit notification.
    pub async fn unhost(&self, channel: &str) -> Result<String, Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(
            channel.clone(),
            "/unhost".to_owned(),
            ReplyTopic::Unhost,
            false,
        )
        .await?;
        Ok(channel)
    }

    /// Raid another channel. Twitch does not confirm a started raid on
    /// this connection, so this resolves once the deadline passes without
    /// a rejecting notice.
    pub async fn raid(
        &self,
        channel: &str,
        target: &str,
    ) -> Result<(String, String), Error<T, L>> {
        let channel = validate::channel(channel);
        let target = validate::username(target);
        self.chat_command(
            channel.clone(),
            format!("/raid {}", target),
            ReplyTopic::Raid,
            true,
        )
        .await?;
        Ok((channel, target))
    }

    /// Cancel an ongoing raid. Resolves like [`raid()`](Client::raid).
    pub async fn unraid(&self, channel: &str) -> Result<String, Error<T, L>> {
        let channel = validate::channel(channel);
        self.chat_command(
            channel.clone(),
            "/unraid".to_owned(),
            ReplyTopic::Unraid,
            true,
        )
        .await?;
        Ok(channel)
    }

    //
    // connection utilities
    //

    /// Ping the server. Resolves to the measured round-trip latency, or
    /// rejects after the configured `timeout` if no `PONG` arrives.
    pub async fn ping(&self) -> Result<Duration, Error<T, L>> {
        let (return_tx, return_rx) = oneshot::channel();
        self.loop_tx
            .send(ClientLoopCommand::Ping {
                return_sender: return_tx,
            })
            .unwrap();
        match return_rx.await.unwrap()? {
            Reply::Latency(latency) => Ok(latency),
            _ => Ok(Duration::ZERO),
        }
    }

    /// The channels the client is currently joined to.
    pub async fn channels(&self) -> Vec<String> {
        let (return_tx, return_rx) = oneshot::channel();
        self.loop_tx
            .send(ClientLoopCommand::GetChannels {
                return_sender: return_tx,
            })
            .unwrap();
        return_rx.await.unwrap()
    }

    /// The last `USERSTATE` tag set observed for the given channel.
    pub async fn userstate(&self, channel: &str) -> Option<IRCTags> {
        let (return_tx, return_rx) = oneshot::channel();
        self.loop_tx
            .send(ClientLoopCommand::GetUserstate {
                channel: validate::channel(channel),
                return_sender: return_tx,
            })
            .unwrap();
        return_rx.await.unwrap()
    }

    /// The last `GLOBALUSERSTATE` tag set observed for the logged-in user.
    pub async fn global_userstate(&self) -> IRCTags {
        let (return_tx, return_rx) = oneshot::channel();
        self.loop_tx
            .send(ClientLoopCommand::GetGlobalUserstate {
                return_sender: return_tx,
            })
            .unwrap();
        return_rx.await.unwrap()
    }

    /// The known moderators of the given channel, sorted by name. Seeded
    /// from `/mods` replies, `MODE` changes and our own `USERSTATE`.
    pub async fn moderators(&self, channel: &str) -> Vec<String> {
        let (return_tx, return_rx) = oneshot::channel();
        self.loop_tx
            .send(ClientLoopCommand::GetModerators {
                channel: validate::channel(channel),
                return_sender: return_tx,
            })
            .unwrap();
        return_rx.await.unwrap()
    }
}
